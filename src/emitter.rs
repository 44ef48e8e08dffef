//! 输出模块 (Region emitter)
//!
//! 把裁剪出的目标图像交给下游; 下游接口是外部协作者, 投递失败不重试。

use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, TrySendError};
use imageproc::rect::Rect;
use parking_lot::Mutex;
use tracing::warn;

use crate::types::{ColorImage, OrganizedPointCloud, PixelEncoding};

/// 检测输出: 某个HSV范围命中的裁剪图
#[derive(Clone, Debug)]
pub struct DetectedRegion {
    pub range_index: usize,
    pub label: String,
    pub rect: Rect,              // 在原图中的位置
    pub image: ColorImage,       // 裁剪图 (RGB8)
    pub encoding: PixelEncoding, // 输入帧的原始编码
    pub stamp: DateTime<Utc>,
}

impl DetectedRegion {
    /// 按原始编码重新打包像素 (RGB8内部格式 → 输入编码)
    pub fn encoded_bytes(&self) -> Vec<u8> {
        let raw = self.image.as_raw();
        match self.encoding {
            PixelEncoding::Rgb8 => raw.clone(),
            PixelEncoding::Bgr8 => raw
                .chunks_exact(3)
                .flat_map(|c| [c[2], c[1], c[0]])
                .collect(),
            PixelEncoding::Rgba8 => raw
                .chunks_exact(3)
                .flat_map(|c| [c[0], c[1], c[2], 255])
                .collect(),
            PixelEncoding::Bgra8 => raw
                .chunks_exact(3)
                .flat_map(|c| [c[2], c[1], c[0], 255])
                .collect(),
            PixelEncoding::Mono8 => raw.chunks_exact(3).map(|c| c[0]).collect(),
        }
    }
}

/// 下游接收裁剪图
pub trait RegionEmitter: Send + Sync {
    fn emit(&self, region: DetectedRegion);
}

/// 下游接收变换后的点云
pub trait CloudPublisher: Send + Sync {
    fn publish(&self, cloud: &OrganizedPointCloud);
}

/// 通过 crossbeam 通道转发; 队列满或接收端关闭时丢弃并记日志
pub struct ChannelEmitter {
    tx: Sender<DetectedRegion>,
}

impl ChannelEmitter {
    pub fn new(tx: Sender<DetectedRegion>) -> Self {
        Self { tx }
    }
}

impl RegionEmitter for ChannelEmitter {
    fn emit(&self, region: DetectedRegion) {
        match self.tx.try_send(region) {
            Ok(()) => {}
            Err(TrySendError::Full(r)) => {
                warn!("⚠️ 输出队列已满, 丢弃 range#{} ({})", r.range_index, r.label);
            }
            Err(TrySendError::Disconnected(r)) => {
                warn!("⚠️ 输出通道已关闭, 丢弃 range#{} ({})", r.range_index, r.label);
            }
        }
    }
}

/// 点云通道发布
pub struct ChannelCloudPublisher {
    tx: Sender<OrganizedPointCloud>,
}

impl ChannelCloudPublisher {
    pub fn new(tx: Sender<OrganizedPointCloud>) -> Self {
        Self { tx }
    }
}

impl CloudPublisher for ChannelCloudPublisher {
    fn publish(&self, cloud: &OrganizedPointCloud) {
        if self.tx.try_send(cloud.clone()).is_err() {
            warn!("⚠️ 点云发布失败 (frame={})", cloud.frame_id);
        }
    }
}

/// 收集所有输出, 供测试和离线工具使用
#[derive(Default)]
pub struct CollectingEmitter {
    regions: Mutex<Vec<DetectedRegion>>,
    clouds: Mutex<Vec<OrganizedPointCloud>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regions(&self) -> Vec<DetectedRegion> {
        self.regions.lock().clone()
    }

    pub fn clouds(&self) -> Vec<OrganizedPointCloud> {
        self.clouds.lock().clone()
    }
}

impl RegionEmitter for CollectingEmitter {
    fn emit(&self, region: DetectedRegion) {
        self.regions.lock().push(region);
    }
}

impl CloudPublisher for CollectingEmitter {
    fn publish(&self, cloud: &OrganizedPointCloud) {
        self.clouds.lock().push(cloud.clone());
    }
}
