//! 空间裁剪滤波 (Spatial crop filter)
//!
//! 点云已在裁剪盒所在坐标系中; 逐像素判断点是否落在盒内, 输出同尺寸掩码。

use image::Luma;

use crate::error::{DetectionError, Result};
use crate::types::{is_valid_point, CropBox, Mask, OrganizedPointCloud, MASK_OFF, MASK_ON};

/// 无效点 (NaN深度) 的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum InvalidPointPolicy {
    /// 无深度的像素不参与检测
    #[default]
    Exclude,
    /// 无深度的像素视为在盒内 (旧行为)
    Include,
}

/// 生成空间掩码, 尺寸取点云的 (cols, rows)
pub fn crop_mask(
    cloud: &OrganizedPointCloud,
    crop_box: &CropBox,
    invalid: InvalidPointPolicy,
) -> Mask {
    let (w, h) = cloud.dimensions();
    let mut mask = Mask::from_pixel(w, h, Luma([MASK_OFF]));

    for (dst, &p) in mask.iter_mut().zip(cloud.points()) {
        let inside = if is_valid_point(p) {
            crop_box.contains(p)
        } else {
            invalid == InvalidPointPolicy::Include
        };
        if inside {
            *dst = MASK_ON;
        }
    }
    mask
}

/// 同上, 但要求点云与图像尺寸一致
pub fn crop_mask_for(
    cloud: &OrganizedPointCloud,
    crop_box: &CropBox,
    invalid: InvalidPointPolicy,
    image_dims: (u32, u32),
) -> Result<Mask> {
    if cloud.dimensions() != image_dims {
        return Err(DetectionError::DimensionMismatch {
            expected: image_dims,
            actual: cloud.dimensions(),
        });
    }
    Ok(crop_mask(cloud, crop_box, invalid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use glam::Vec3;

    fn unit_box() -> CropBox {
        CropBox::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    }

    #[test]
    fn test_inside_points_included() {
        let cloud =
            OrganizedPointCloud::filled(4, 5, Vec3::new(0.5, -0.5, 0.9), "base", Utc::now());
        let mask = crop_mask(&cloud, &unit_box(), InvalidPointPolicy::Exclude);
        assert_eq!(mask.dimensions(), (5, 4));
        assert!(mask.iter().all(|&v| v == MASK_ON));
    }

    #[test]
    fn test_outside_on_any_axis_excluded() {
        let mut cloud = OrganizedPointCloud::filled(1, 4, Vec3::ZERO, "base", Utc::now());
        cloud.set(1, 0, Vec3::new(1.5, 0.0, 0.0));
        cloud.set(2, 0, Vec3::new(0.0, -1.5, 0.0));
        cloud.set(3, 0, Vec3::new(0.0, 0.0, 1.0001));
        let mask = crop_mask(&cloud, &unit_box(), InvalidPointPolicy::Exclude);
        assert_eq!(mask.as_raw(), &vec![MASK_ON, MASK_OFF, MASK_OFF, MASK_OFF]);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let cloud =
            OrganizedPointCloud::filled(1, 1, Vec3::new(1.0, -1.0, 1.0), "base", Utc::now());
        let mask = crop_mask(&cloud, &unit_box(), InvalidPointPolicy::Exclude);
        assert_eq!(mask.get_pixel(0, 0).0[0], MASK_ON);
    }

    #[test]
    fn test_invalid_point_policy() {
        let mut cloud = OrganizedPointCloud::filled(1, 2, Vec3::ZERO, "base", Utc::now());
        cloud.set(1, 0, Vec3::new(0.0, f32::NAN, 0.0));

        let excl = crop_mask(&cloud, &unit_box(), InvalidPointPolicy::Exclude);
        assert_eq!(excl.as_raw(), &vec![MASK_ON, MASK_OFF]);

        let incl = crop_mask(&cloud, &unit_box(), InvalidPointPolicy::Include);
        assert_eq!(incl.as_raw(), &vec![MASK_ON, MASK_ON]);
    }

    #[test]
    fn test_dimension_check() {
        let cloud = OrganizedPointCloud::filled(2, 2, Vec3::ZERO, "base", Utc::now());
        let r = crop_mask_for(&cloud, &unit_box(), InvalidPointPolicy::Exclude, (3, 2));
        assert!(matches!(r, Err(DetectionError::DimensionMismatch { .. })));
    }
}
