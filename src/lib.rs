// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! RGB-D 颜色目标检测
//!
//! 点云空间裁剪 + HSV颜色分割, 每个颜色范围选出最大的合格轮廓并输出裁剪图。
pub mod config; // 检测参数
pub mod crop_filter; // 点云空间裁剪
pub mod detector; // 定频检测周期
pub mod emitter; // 输出接口
pub mod error;
pub mod frame_store; // 最新帧缓存
pub mod input; // 图像/点云输入
pub mod segmentation; // HSV颜色分割
pub mod selector; // 掩码融合与候选选择
pub mod transform; // 坐标变换
pub mod types;

pub use crate::config::{DetectionConfig, JsonParams, MapParams, ParamStore};
pub use crate::crop_filter::InvalidPointPolicy;
pub use crate::detector::{CycleReport, CycleState, Detector, DetectorHandle};
pub use crate::emitter::{
    ChannelCloudPublisher, ChannelEmitter, CloudPublisher, CollectingEmitter, DetectedRegion,
    RegionEmitter,
};
pub use crate::error::{DetectionError, Result};
pub use crate::frame_store::{FrameSnapshot, FrameStore};
pub use crate::input::{Ingestor, RawImage};
pub use crate::selector::CandidateSelector;
pub use crate::transform::{RigidTransform, StaticTransforms, TransformLookup};
pub use crate::types::{
    CropBox, HsvRange, Mask, OrganizedPointCloud, PixelEncoding, StampedImage,
};

pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    let t_now = chrono::Utc::now();
    match chrono::FixedOffset::east_opt(8 * 60 * 60) {
        Some(offset) => t_now.with_timezone(&offset).format(&fmt).to_string(), // Beijing
        None => t_now.format(&fmt).to_string(),
    }
}
