/// RGB-D检测数据结构定义
/// Data structures for RGB-D colour object detection
use chrono::{DateTime, Utc};
use glam::Vec3;
use image::{GrayImage, RgbImage};

use crate::error::{DetectionError, Result};

// ========== 公共常量 ==========

/// 掩码前景值
pub const MASK_ON: u8 = 255;
/// 掩码背景值
pub const MASK_OFF: u8 = 0;

// ========== 类型别名 ==========

/// 彩色图像 (内部统一为RGB8)
pub type ColorImage = RgbImage;

/// 二值掩码 (0/255), 与图像/点云同尺寸
pub type Mask = GrayImage;

// ========== 枚举类型 ==========

/// 像素编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
}

impl PixelEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rgb8" => Some(Self::Rgb8),
            "bgr8" => Some(Self::Bgr8),
            "rgba8" => Some(Self::Rgba8),
            "bgra8" => Some(Self::Bgra8),
            "mono8" => Some(Self::Mono8),
            _ => None,
        }
    }

    /// 每像素字节数
    pub fn channels(&self) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Mono8 => 1,
        }
    }
}

// ========== 数据结构 ==========

/// 带采集时间戳的彩色帧
#[derive(Clone, Debug)]
pub struct StampedImage {
    pub image: ColorImage,
    pub encoding: PixelEncoding, // 原始编码, 输出裁剪图时沿用
    pub stamp: DateTime<Utc>,
}

impl StampedImage {
    pub fn new(image: ColorImage, encoding: PixelEncoding, stamp: DateTime<Utc>) -> Self {
        Self {
            image,
            encoding,
            stamp,
        }
    }

    /// (宽, 高)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 有序点云 (Organized point cloud)
///
/// 行优先存储, 每个像素对应一个点; 任一分量为NaN表示该像素没有深度。
#[derive(Clone, Debug)]
pub struct OrganizedPointCloud {
    rows: u32,
    cols: u32,
    points: Vec<Vec3>,
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
}

impl OrganizedPointCloud {
    pub fn new(
        rows: u32,
        cols: u32,
        points: Vec<Vec3>,
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
    ) -> Result<Self> {
        let expected = rows as usize * cols as usize;
        if points.len() != expected {
            return Err(DetectionError::DimensionMismatch {
                expected: (cols, rows),
                actual: (points.len() as u32, 1),
            });
        }
        Ok(Self {
            rows,
            cols,
            points,
            frame_id: frame_id.into(),
            stamp,
        })
    }

    /// 所有像素填同一个点
    pub fn filled(
        rows: u32,
        cols: u32,
        point: Vec3,
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
    ) -> Self {
        Self {
            rows,
            cols,
            points: vec![point; rows as usize * cols as usize],
            frame_id: frame_id.into(),
            stamp,
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// (宽, 高), 与 `image::GenericImageView::dimensions` 同序
    pub fn dimensions(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Vec3] {
        &mut self.points
    }

    /// 按像素坐标取点
    pub fn at(&self, col: u32, row: u32) -> Vec3 {
        self.points[(row * self.cols + col) as usize]
    }

    pub fn set(&mut self, col: u32, row: u32, point: Vec3) {
        let idx = (row * self.cols + col) as usize;
        self.points[idx] = point;
    }
}

/// 点是否为有效测量
pub fn is_valid_point(p: Vec3) -> bool {
    !p.is_nan()
}

/// 空间裁剪盒: x/y/z 三个闭区间
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct CropBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl CropBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 闭区间包含测试; NaN分量比较恒为false
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

impl Default for CropBox {
    fn default() -> Self {
        Self {
            min: Vec3::splat(-10.0),
            max: Vec3::splat(10.0),
        }
    }
}

/// HSV颜色范围 (H: 0..180, S/V: 0..255), 各通道闭区间
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HsvRange {
    pub hmin: u8,
    pub smin: u8,
    pub vmin: u8,
    pub hmax: u8,
    pub smax: u8,
    pub vmax: u8,
    pub label: String,
}

impl Default for HsvRange {
    fn default() -> Self {
        Self {
            hmin: 10,
            smin: 10,
            vmin: 10,
            hmax: 180,
            smax: 255,
            vmax: 255,
            label: String::new(),
        }
    }
}

impl HsvRange {
    pub fn new(min: [u8; 3], max: [u8; 3], label: impl Into<String>) -> Self {
        Self {
            hmin: min[0],
            smin: min[1],
            vmin: min[2],
            hmax: max[0],
            smax: max[1],
            vmax: max[2],
            label: label.into(),
        }
    }

    pub fn min(&self) -> [u8; 3] {
        [self.hmin, self.smin, self.vmin]
    }

    pub fn max(&self) -> [u8; 3] {
        [self.hmax, self.smax, self.vmax]
    }

    /// 逐通道闭区间测试
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (self.hmin..=self.hmax).contains(&hsv[0])
            && (self.smin..=self.smax).contains(&hsv[1])
            && (self.vmin..=self.vmax).contains(&hsv[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_rejects_wrong_len() {
        let r = OrganizedPointCloud::new(2, 3, vec![Vec3::ZERO; 5], "cam", Utc::now());
        assert!(matches!(r, Err(DetectionError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_cloud_indexing_row_major() {
        let mut cloud = OrganizedPointCloud::filled(2, 3, Vec3::ZERO, "cam", Utc::now());
        cloud.set(2, 1, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cloud.points()[5], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cloud.at(2, 1), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cloud.dimensions(), (3, 2));
    }

    #[test]
    fn test_crop_box_closed_intervals() {
        let b = CropBox::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 2.0));
        assert!(b.contains(Vec3::new(1.0, -1.0, 2.0)));
        assert!(!b.contains(Vec3::new(1.01, 0.0, 1.0)));
        assert!(!b.contains(Vec3::new(0.0, 0.0, f32::NAN)));
    }

    #[test]
    fn test_hsv_range_default_and_contains() {
        let r = HsvRange::default();
        assert_eq!(r.min(), [10, 10, 10]);
        assert_eq!(r.max(), [180, 255, 255]);
        assert!(r.contains([10, 255, 200]));
        assert!(!r.contains([9, 255, 200]));
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!(PixelEncoding::parse("BGR8"), Some(PixelEncoding::Bgr8));
        assert_eq!(PixelEncoding::parse("yuv422"), None);
        assert_eq!(PixelEncoding::Bgra8.channels(), 4);
    }
}
