/// 帧缓存 (Frame Store)
///
/// 保存最近一帧彩色图像与最近一帧点云。写入方 (采集线程) 整体替换,
/// 检测周期开始时在锁内取 `Arc` 快照, 之后的读取不受并发写入影响。
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{OrganizedPointCloud, StampedImage};

/// 一个检测周期使用的帧对
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    pub image: Arc<StampedImage>,
    pub cloud: Arc<OrganizedPointCloud>,
}

impl FrameSnapshot {
    /// 图像与点云采集时间差 (毫秒, 绝对值)
    pub fn skew_ms(&self) -> i64 {
        (self.image.stamp - self.cloud.stamp).num_milliseconds().abs()
    }
}

#[derive(Default)]
struct Slots {
    image: Option<Arc<StampedImage>>,
    cloud: Option<Arc<OrganizedPointCloud>>,
}

#[derive(Default)]
pub struct FrameStore {
    slots: Mutex<Slots>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换图像, 未消费的旧帧直接丢弃
    pub fn set_image(&self, image: StampedImage) {
        let image = Arc::new(image);
        self.slots.lock().image = Some(image);
    }

    /// 替换点云
    pub fn set_cloud(&self, cloud: OrganizedPointCloud) {
        let cloud = Arc::new(cloud);
        self.slots.lock().cloud = Some(cloud);
    }

    pub fn has_image(&self) -> bool {
        self.slots.lock().image.is_some()
    }

    pub fn has_cloud(&self) -> bool {
        self.slots.lock().cloud.is_some()
    }

    /// 图像和点云都至少到过一次
    pub fn is_ready(&self) -> bool {
        let slots = self.slots.lock();
        slots.image.is_some() && slots.cloud.is_some()
    }

    /// 锁内取快照; 未就绪返回 None
    pub fn snapshot(&self) -> Option<FrameSnapshot> {
        let slots = self.slots.lock();
        Some(FrameSnapshot {
            image: slots.image.clone()?,
            cloud: slots.cloud.clone()?,
        })
    }
}
