/// 输入系统 (Input ingestion)
///
/// 采集线程把原始帧交给 `Ingestor`:
/// - 图像: 按编码解码为RGB8, 失败则丢帧, 帧缓存保留旧图
/// - 点云: 查询坐标变换 → 变换到检测坐标系 → 发布 → 写入帧缓存;
///         变换不可用时整帧丢弃, 不标记就绪
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::Rgb;
use tracing::{debug, error};

use crate::error::{DetectionError, Result};
use crate::emitter::CloudPublisher;
use crate::frame_store::FrameStore;
use crate::transform::{transform_cloud, TransformLookup};
use crate::types::{ColorImage, OrganizedPointCloud, PixelEncoding, StampedImage};

/// 采集端送来的原始图像
#[derive(Clone, Debug)]
pub struct RawImage {
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub stamp: DateTime<Utc>,
}

/// 原始图像 → RGB8
pub fn decode_image(raw: &RawImage) -> Result<StampedImage> {
    let fail = |reason: String| DetectionError::InputConversion {
        encoding: raw.encoding.clone(),
        reason,
    };

    let encoding =
        PixelEncoding::parse(&raw.encoding).ok_or_else(|| fail("不支持的编码".to_string()))?;
    if raw.width == 0 || raw.height == 0 {
        return Err(fail("空图像".to_string()));
    }
    let expected = raw.width as usize * raw.height as usize * encoding.channels();
    if raw.data.len() != expected {
        return Err(fail(format!(
            "数据长度 {} 与 {}x{}x{} 不符",
            raw.data.len(),
            raw.width,
            raw.height,
            encoding.channels()
        )));
    }

    let mut image = ColorImage::new(raw.width, raw.height);
    let chunks = raw.data.chunks_exact(encoding.channels());
    for (dst, c) in image.pixels_mut().zip(chunks) {
        *dst = match encoding {
            PixelEncoding::Rgb8 | PixelEncoding::Rgba8 => Rgb([c[0], c[1], c[2]]),
            PixelEncoding::Bgr8 | PixelEncoding::Bgra8 => Rgb([c[2], c[1], c[0]]),
            PixelEncoding::Mono8 => Rgb([c[0], c[0], c[0]]),
        };
    }
    Ok(StampedImage::new(image, encoding, raw.stamp))
}

/// 输入处理器: 图像/点云回调的落地点
pub struct Ingestor {
    store: Arc<FrameStore>,
    transforms: Arc<dyn TransformLookup>,
    publisher: Arc<dyn CloudPublisher>,
    detection_frame: String,
}

impl Ingestor {
    pub fn new(
        store: Arc<FrameStore>,
        transforms: Arc<dyn TransformLookup>,
        publisher: Arc<dyn CloudPublisher>,
        detection_frame: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transforms,
            publisher,
            detection_frame: detection_frame.into(),
        }
    }

    /// 图像回调
    pub fn on_image(&self, raw: &RawImage) -> Result<()> {
        match decode_image(raw) {
            Ok(image) => {
                debug!("📷 收到图像 {}x{} ({})", raw.width, raw.height, raw.encoding);
                self.store.set_image(image);
                Ok(())
            }
            Err(e) => {
                error!("❌ {}", e);
                Err(e)
            }
        }
    }

    /// 点云回调 (点云位于传感器坐标系 `cloud.frame_id`)
    pub fn on_cloud(&self, cloud: &OrganizedPointCloud) -> Result<()> {
        let transform = match self
            .transforms
            .lookup(&self.detection_frame, &cloud.frame_id, cloud.stamp)
        {
            Ok(t) => t,
            Err(e) => {
                error!("❌ {}", e);
                return Err(e);
            }
        };

        let transformed = transform_cloud(cloud, &transform, &self.detection_frame);
        self.publisher.publish(&transformed);
        debug!(
            "☁️ 点云已变换 {} → {} ({}x{})",
            cloud.frame_id,
            self.detection_frame,
            cloud.cols(),
            cloud.rows()
        );
        self.store.set_cloud(transformed);
        Ok(())
    }
}
