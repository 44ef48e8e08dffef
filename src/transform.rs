/// 坐标系变换 (Reference-frame transforms)
///
/// 变换服务本身是外部协作者, 这里只定义查询接口和一个静态表实现,
/// 以及把有序点云整体搬到目标坐标系的函数。
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use glam::{Affine3A, Quat, Vec3};
use parking_lot::RwLock;

use crate::error::{DetectionError, Result};
use crate::types::{is_valid_point, OrganizedPointCloud};

/// 刚体变换: 把 source 坐标系下的点映射到 target 坐标系
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidTransform(pub Affine3A);

impl RigidTransform {
    pub const IDENTITY: Self = Self(Affine3A::IDENTITY);

    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self(Affine3A::from_rotation_translation(rotation, translation))
    }

    pub fn apply(&self, p: Vec3) -> Vec3 {
        self.0.transform_point3(p)
    }

    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }
}

/// 变换查询服务
pub trait TransformLookup: Send + Sync {
    /// 查询 source → target 的变换; 失败时返回 `TransformUnavailable`
    fn lookup(&self, target: &str, source: &str, stamp: DateTime<Utc>) -> Result<RigidTransform>;
}

/// 静态变换表 (不随时间变化)
#[derive(Default)]
pub struct StaticTransforms {
    table: RwLock<HashMap<(String, String), RigidTransform>>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记 source → target
    pub fn insert(&self, target: &str, source: &str, transform: RigidTransform) {
        self.table
            .write()
            .insert((target.to_string(), source.to_string()), transform);
    }
}

impl TransformLookup for StaticTransforms {
    fn lookup(&self, target: &str, source: &str, _stamp: DateTime<Utc>) -> Result<RigidTransform> {
        if target == source {
            return Ok(RigidTransform::IDENTITY);
        }
        let table = self.table.read();
        if let Some(t) = table.get(&(target.to_string(), source.to_string())) {
            return Ok(*t);
        }
        // 反向登记的也能用
        if let Some(t) = table.get(&(source.to_string(), target.to_string())) {
            return Ok(t.inverse());
        }
        Err(DetectionError::TransformUnavailable {
            target_frame: target.to_string(),
            source_frame: source.to_string(),
        })
    }
}

/// 把点云整体变换到 `target_frame`, 无效点保持无效
pub fn transform_cloud(
    cloud: &OrganizedPointCloud,
    transform: &RigidTransform,
    target_frame: &str,
) -> OrganizedPointCloud {
    let mut out = cloud.clone();
    for p in out.points_mut() {
        if is_valid_point(*p) {
            *p = transform.apply(*p);
        }
    }
    out.frame_id = target_frame.to_string();
    out
}
