//! 导星偏移计算
//!
//! 把星像质心相对光纤位置的像素差换算成角秒，并编码为导星程序的
//! 偏移指令 `"<x 轴>;<y 轴>"`，例如 `"nn 2.85;ww 0.57"`。
//!
//! 坐标约定：x 小于光纤位置向北（`nn`），否则向南（`ss`）；
//! y 小于光纤位置向东（`ee`），否则向西（`ww`）。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 导星几何参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideConfig {
    /// 光纤在导星图像上的 x 像素坐标
    pub fiber_x: f64,
    /// 光纤在导星图像上的 y 像素坐标
    pub fiber_y: f64,
    /// 底片比例尺（角秒/像素）
    pub plate_scale: f64,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            fiber_x: 2000.0,
            fiber_y: 1700.0,
            plate_scale: 0.057,
        }
    }
}

/// 偏移方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisDirection {
    North,
    South,
    East,
    West,
}

impl AxisDirection {
    /// 导星程序使用的两字母代码
    pub fn code(self) -> &'static str {
        match self {
            AxisDirection::North => "nn",
            AxisDirection::South => "ss",
            AxisDirection::East => "ee",
            AxisDirection::West => "ww",
        }
    }
}

/// 单轴偏移
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisOffset {
    pub direction: AxisDirection,
    /// 偏移量（角秒，非负）
    pub arcsec: f64,
}

impl fmt::Display for AxisOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.direction.code(), self.arcsec)
    }
}

/// 两轴导星偏移
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideOffset {
    pub x: AxisOffset,
    pub y: AxisOffset,
}

impl GuideOffset {
    /// 由星像质心计算偏移
    ///
    /// # 示例
    ///
    /// ```
    /// use refractor_tools::{GuideConfig, GuideOffset};
    ///
    /// let offset = GuideOffset::from_centroid(1950.0, 1710.0, &GuideConfig::default());
    /// assert_eq!(offset.command(), "nn 2.85;ww 0.57");
    /// ```
    pub fn from_centroid(x: f64, y: f64, config: &GuideConfig) -> Self {
        let dx = x - config.fiber_x;
        let dy = y - config.fiber_y;

        let x_direction = if dx < 0.0 {
            AxisDirection::North
        } else {
            AxisDirection::South
        };
        let y_direction = if dy < 0.0 {
            AxisDirection::East
        } else {
            AxisDirection::West
        };

        Self {
            x: AxisOffset {
                direction: x_direction,
                arcsec: (dx * config.plate_scale).abs(),
            },
            y: AxisOffset {
                direction: y_direction,
                arcsec: (dy * config.plate_scale).abs(),
            },
        }
    }

    /// 发送给导星程序的指令字符串
    pub fn command(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GuideOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadrants() {
        let config = GuideConfig::default();

        let offset = GuideOffset::from_centroid(1900.0, 1600.0, &config);
        assert_eq!(offset.x.direction, AxisDirection::North);
        assert_eq!(offset.y.direction, AxisDirection::East);

        let offset = GuideOffset::from_centroid(2100.0, 1800.0, &config);
        assert_eq!(offset.x.direction, AxisDirection::South);
        assert_eq!(offset.y.direction, AxisDirection::West);
        assert_eq!(offset.command(), "ss 5.70;ww 5.70");
    }

    #[test]
    fn test_centred_star_is_zero_offset() {
        let offset = GuideOffset::from_centroid(2000.0, 1700.0, &GuideConfig::default());
        assert_eq!(offset.command(), "ss 0.00;ww 0.00");
    }

    #[test]
    fn test_custom_geometry() {
        let config = GuideConfig {
            fiber_x: 100.0,
            fiber_y: 100.0,
            plate_scale: 1.0,
        };
        let offset = GuideOffset::from_centroid(90.0, 112.5, &config);
        assert_eq!(offset.x.arcsec, 10.0);
        assert_eq!(offset.y.arcsec, 12.5);
        assert_eq!(offset.to_string(), "nn 10.00;ww 12.50");
    }
}
