//! 检测器 (Detector)
//! 职责: 定时取帧缓存快照 → 空间裁剪 → 逐HSV范围分割/选择 → 输出裁剪图
//!
//! 周期状态: WaitingForInputs → Ready → (每个范围: Segmenting → Selecting
//! → Emitting | Skipping) → WaitingForInputs

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use image::imageops;
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::crop_filter::crop_mask_for;
use crate::emitter::{DetectedRegion, RegionEmitter};
use crate::error::DetectionError;
use crate::frame_store::{FrameSnapshot, FrameStore};
use crate::segmentation;
use crate::selector::CandidateSelector;

/// 周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    WaitingForInputs,
    Ready,
    Segmenting(usize),
    Selecting(usize),
    Emitting(usize),
    Skipping(usize),
}

/// 单个周期的结果
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub emitted: Vec<usize>,                 // 有输出的范围下标
    pub skipped: Vec<usize>,                 // 无合格候选的范围下标
    pub skip_reason: Option<DetectionError>, // 整个周期被跳过的原因
}

impl CycleReport {
    fn skipped_cycle(reason: DetectionError) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Default::default()
        }
    }
}

pub struct Detector {
    config: DetectionConfig,
    store: Arc<FrameStore>,
    emitter: Arc<dyn RegionEmitter>,
    selector: CandidateSelector,
    state: CycleState,

    // 统计
    cycle_count: u64,
    emitted_count: u64,
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl Detector {
    pub fn new(
        config: DetectionConfig,
        store: Arc<FrameStore>,
        emitter: Arc<dyn RegionEmitter>,
    ) -> Self {
        let selector = CandidateSelector::new(config.area_threshold, config.rect_padding);
        Self {
            config,
            store,
            emitter,
            selector,
            state: CycleState::WaitingForInputs,
            cycle_count: 0,
            emitted_count: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted_count
    }

    fn transition(&mut self, next: CycleState) {
        if self.state != next {
            debug!("🔁 {:?} → {:?}", self.state, next);
            self.state = next;
        }
    }

    /// 执行一个检测周期
    pub fn detect_once(&mut self) -> CycleReport {
        self.transition(CycleState::WaitingForInputs);
        self.cycle_count += 1;

        let Some(snapshot) = self.store.snapshot() else {
            // 启动阶段的常态, 不大声报错
            let reason = DetectionError::MissingInput {
                have_image: self.store.has_image(),
                have_cloud: self.store.has_cloud(),
            };
            debug!("⏳ {}", reason);
            return CycleReport::skipped_cycle(reason);
        };
        self.transition(CycleState::Ready);

        let report = match self.process_snapshot(&snapshot) {
            Ok(report) => report,
            Err(e) => {
                warn!("⚠️ 跳过本周期: {}", e);
                CycleReport::skipped_cycle(e)
            }
        };
        self.transition(CycleState::WaitingForInputs);
        self.update_stats(&report);
        report
    }

    fn process_snapshot(
        &mut self,
        snapshot: &FrameSnapshot,
    ) -> Result<CycleReport, DetectionError> {
        if let Some(tolerance_ms) = self.config.max_pairing_skew_ms {
            let skew_ms = snapshot.skew_ms();
            if skew_ms > tolerance_ms {
                return Err(DetectionError::StaleFramePair {
                    skew_ms,
                    tolerance_ms,
                });
            }
        }

        let image = &snapshot.image;
        let spatial = crop_mask_for(
            &snapshot.cloud,
            &self.config.crop_box,
            self.config.invalid_points,
            image.dimensions(),
        )?;

        // 滤波+HSV转换对所有范围相同, 只做一次
        let hsv = segmentation::preprocess(&image.image, self.config.image_blur_kernel);

        let mut report = CycleReport::default();
        for i in 0..self.config.hsv_ranges.len() {
            self.transition(CycleState::Segmenting(i));
            let color = segmentation::in_range(&hsv, &self.config.hsv_ranges[i]);

            self.transition(CycleState::Selecting(i));
            let selection = match self.selector.select(&spatial, &color) {
                Ok(s) => s,
                Err(e) => {
                    warn!("⚠️ range#{} 选择失败: {}", i, e);
                    None
                }
            };

            let Some(selection) = selection else {
                self.transition(CycleState::Skipping(i));
                report.skipped.push(i);
                continue;
            };

            self.transition(CycleState::Emitting(i));
            let rect = selection.region;
            let crop = imageops::crop_imm(
                &image.image,
                rect.left() as u32,
                rect.top() as u32,
                rect.width(),
                rect.height(),
            )
            .to_image();
            let label = self.config.hsv_ranges[i].label.clone();
            debug!(
                "🎯 range#{} '{}': 面积 {:.1}, 区域 ({}, {}) {}x{}{}",
                i,
                label,
                selection.candidate.area,
                rect.left(),
                rect.top(),
                rect.width(),
                rect.height(),
                if selection.padded { "" } else { " (未外扩)" }
            );
            self.emitter.emit(DetectedRegion {
                range_index: i,
                label,
                rect,
                image: crop,
                encoding: image.encoding,
                stamp: image.stamp,
            });
            report.emitted.push(i);
        }
        Ok(report)
    }

    fn update_stats(&mut self, report: &CycleReport) {
        self.emitted_count += report.emitted.len() as u64;
        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            self.current_fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            self.count = 0;
            self.last = now;
        }

        // 每30个周期打印一次
        if self.cycle_count % 30 == 0 {
            info!(
                "🎯 检测: 第{}周期 | 累计输出{}个 | {:.1}Hz",
                self.cycle_count, self.emitted_count, self.current_fps
            );
        }
    }

    /// 定频检测循环, 收到停止信号 (或发送端关闭) 时退出
    pub fn run(&mut self, stop: &Receiver<()>, max_cycles: Option<u64>) {
        let ticker = crossbeam_channel::tick(self.config.cycle_period());
        info!(
            "🔍 检测模块启动 ({:.1}Hz, {}个颜色范围)",
            self.config.rate_hz,
            self.config.hsv_ranges.len()
        );

        let mut cycles = 0u64;
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(ticker) -> _ => {
                    self.detect_once();
                    cycles += 1;
                    if max_cycles.is_some_and(|max| cycles >= max) {
                        break;
                    }
                }
            }
        }
        info!(
            "🛑 检测模块退出 (共{}周期, 输出{}个)",
            self.cycle_count, self.emitted_count
        );
    }

    /// 在独立线程中运行
    pub fn spawn(mut self, max_cycles: Option<u64>) -> DetectorHandle {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let join = std::thread::spawn(move || {
            self.run(&stop_rx, max_cycles);
            self
        });
        DetectorHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// 检测线程句柄: 停止并等待线程退出
pub struct DetectorHandle {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<Detector>>,
}

impl DetectorHandle {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// 等待线程自然结束 (max_cycles 用完)
    pub fn join(mut self) -> Option<Detector> {
        self.join.take().and_then(|j| j.join().ok())
    }

    /// 发送停止信号并等待线程退出
    pub fn stop(mut self) -> Option<Detector> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        self.join.take().and_then(|j| j.join().ok())
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        // 关闭发送端即可唤醒 select
        self.stop_tx.take();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::CollectingEmitter;
    use crate::input::{Ingestor, RawImage};
    use crate::transform::StaticTransforms;
    use crate::types::{
        ColorImage, HsvRange, Mask, OrganizedPointCloud, PixelEncoding, StampedImage, MASK_ON,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use glam::Vec3;
    use image::{Luma, Rgb};

    const W: u32 = 64;
    const H: u32 = 48;
    const RED: Rgb<u8> = Rgb([200, 20, 20]);
    const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

    fn scene(x0: u32, y0: u32, bw: u32, bh: u32) -> ColorImage {
        let mut img = ColorImage::from_pixel(W, H, GRAY);
        for y in y0..y0 + bh {
            for x in x0..x0 + bw {
                img.put_pixel(x, y, RED);
            }
        }
        img
    }

    fn config(ranges: Vec<HsvRange>) -> DetectionConfig {
        DetectionConfig {
            hsv_ranges: ranges,
            rate_hz: 200.0,
            ..Default::default()
        }
    }

    fn red_range() -> HsvRange {
        HsvRange::new([0, 100, 100], [10, 255, 255], "red")
    }

    fn setup(
        ranges: Vec<HsvRange>,
        image: ColorImage,
    ) -> (Detector, Arc<FrameStore>, Arc<CollectingEmitter>) {
        let store = Arc::new(FrameStore::new());
        let sink = Arc::new(CollectingEmitter::new());
        store.set_image(StampedImage::new(image, PixelEncoding::Bgr8, Utc::now()));
        store.set_cloud(OrganizedPointCloud::filled(
            H,
            W,
            Vec3::new(0.0, 0.0, 1.0),
            "robot_center",
            Utc::now(),
        ));
        let detector = Detector::new(config(ranges), store.clone(), sink.clone());
        (detector, store, sink)
    }

    #[test]
    fn test_blob_cropped_with_padding() {
        // 20x10 色块, 面积 200
        let (mut det, _store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        let report = det.detect_once();

        assert_eq!(report.emitted, vec![0]);
        let regions = sink.regions();
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(
            (r.rect.left(), r.rect.top(), r.rect.width(), r.rect.height()),
            (15, 10, 30, 20)
        );
        assert_eq!(r.image.dimensions(), (30, 20));
        assert_eq!(r.label, "red");
        assert_eq!(r.encoding, PixelEncoding::Bgr8);
        assert_eq!(*r.image.get_pixel(15, 10), RED);
        assert_eq!(det.state(), CycleState::WaitingForInputs);
    }

    /// 同一场景经过滤波/分割/融合后的最大轮廓面积
    fn blob_area(image: &ColorImage) -> f64 {
        let cfg = config(vec![red_range()]);
        let hsv = segmentation::preprocess(image, cfg.image_blur_kernel);
        let color = segmentation::in_range(&hsv, &cfg.hsv_ranges[0]);
        let spatial = Mask::from_pixel(W, H, Luma([MASK_ON]));
        CandidateSelector::new(0.0, 0)
            .select(&spatial, &color)
            .unwrap()
            .unwrap()
            .candidate
            .area
    }

    fn detector_with_threshold(
        image: ColorImage,
        area_threshold: f64,
    ) -> (Detector, Arc<CollectingEmitter>) {
        let (_, store, sink) = setup(vec![red_range()], image);
        let mut cfg = config(vec![red_range()]);
        cfg.area_threshold = area_threshold;
        (Detector::new(cfg, store, sink.clone()), sink)
    }

    #[test]
    fn test_area_equal_to_threshold_not_emitted() {
        let image = scene(20, 15, 20, 10);
        let area = blob_area(&image);
        assert!(area > 100.0 && area <= 171.0, "area = {}", area);

        let (mut det, sink) = detector_with_threshold(image, area);
        let report = det.detect_once();
        assert!(report.emitted.is_empty());
        assert_eq!(report.skipped, vec![0]);
        assert!(report.skip_reason.is_none());
        assert!(sink.regions().is_empty());
    }

    #[test]
    fn test_area_just_above_threshold_emitted() {
        let image = scene(20, 15, 20, 10);
        let area = blob_area(&image);

        let (mut det, sink) = detector_with_threshold(image, area - 0.5);
        let report = det.detect_once();
        assert_eq!(report.emitted, vec![0]);
        assert_eq!(sink.regions().len(), 1);
    }

    #[test]
    fn test_speck_removed_by_filters() {
        // 5x1 的噪点在中值滤波后消失, 阈值再低也没有候选
        let (mut det, sink) = detector_with_threshold(scene(30, 20, 5, 1), -1.0);
        let report = det.detect_once();
        assert!(report.emitted.is_empty());
        assert_eq!(report.skipped, vec![0]);
        assert!(sink.regions().is_empty());
    }

    #[test]
    fn test_tiny_rate_does_not_panic() {
        let (_, store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        let mut cfg = config(vec![red_range()]);
        cfg.rate_hz = 1e-20;
        let handle = Detector::new(cfg, store, sink).spawn(None);
        std::thread::sleep(Duration::from_millis(20));
        let det = handle.stop().unwrap();
        assert_eq!(det.cycle_count(), 0);
    }

    #[test]
    fn test_transform_failure_blocks_cycle() {
        let store = Arc::new(FrameStore::new());
        let sink = Arc::new(CollectingEmitter::new());
        let ingest = Ingestor::new(
            store.clone(),
            Arc::new(StaticTransforms::new()),
            sink.clone(),
            "robot_center",
        );
        let img = scene(20, 15, 20, 10);
        ingest
            .on_image(&RawImage {
                encoding: "rgb8".into(),
                width: W,
                height: H,
                data: img.into_raw(),
                stamp: Utc::now(),
            })
            .unwrap();
        let cloud = OrganizedPointCloud::filled(
            H,
            W,
            Vec3::Z,
            "camera_rgb_optical_frame",
            Utc::now(),
        );
        assert!(ingest.on_cloud(&cloud).is_err());

        let mut det = Detector::new(config(vec![red_range()]), store.clone(), sink.clone());
        let report = det.detect_once();
        assert!(matches!(
            report.skip_reason,
            Some(DetectionError::MissingInput {
                have_image: true,
                have_cloud: false
            })
        ));
        assert!(sink.regions().is_empty());
        assert!(sink.clouds().is_empty());
    }

    #[test]
    fn test_overlapping_ranges_emit_separately() {
        let warm = HsvRange::new([0, 50, 50], [30, 255, 255], "warm");
        let blue = HsvRange::new([100, 50, 50], [130, 255, 255], "blue");
        let (mut det, _store, sink) = setup(vec![red_range(), blue, warm], scene(20, 15, 20, 10));
        let report = det.detect_once();

        assert_eq!(report.emitted, vec![0, 2]);
        assert_eq!(report.skipped, vec![1]);
        let regions = sink.regions();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].range_index, 0);
        assert_eq!(regions[1].range_index, 2);
        assert_eq!(regions[1].label, "warm");
        assert_eq!(regions[0].rect, regions[1].rect);
    }

    #[test]
    fn test_crop_box_excludes_blob() {
        let (mut det, store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        // 所有点都在盒外 (z = 50 > 10)
        store.set_cloud(OrganizedPointCloud::filled(
            H,
            W,
            Vec3::new(0.0, 0.0, 50.0),
            "robot_center",
            Utc::now(),
        ));
        let report = det.detect_once();
        assert!(report.emitted.is_empty());
        assert!(sink.regions().is_empty());
    }

    #[test]
    fn test_missing_input_skips_quietly() {
        let store = Arc::new(FrameStore::new());
        let sink = Arc::new(CollectingEmitter::new());
        let mut det = Detector::new(config(vec![red_range()]), store, sink);
        let report = det.detect_once();
        assert!(matches!(
            report.skip_reason,
            Some(DetectionError::MissingInput { .. })
        ));
        assert_eq!(det.state(), CycleState::WaitingForInputs);
    }

    #[test]
    fn test_dimension_mismatch_skips_cycle() {
        let (mut det, store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        store.set_cloud(OrganizedPointCloud::filled(
            10,
            10,
            Vec3::ZERO,
            "robot_center",
            Utc::now(),
        ));
        let report = det.detect_once();
        assert!(matches!(
            report.skip_reason,
            Some(DetectionError::DimensionMismatch { .. })
        ));
        assert!(sink.regions().is_empty());
    }

    #[test]
    fn test_stale_pair_rejected_when_tolerance_set() {
        let (_, store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        store.set_cloud(OrganizedPointCloud::filled(
            H,
            W,
            Vec3::Z,
            "robot_center",
            Utc::now() - ChronoDuration::milliseconds(500),
        ));
        let mut cfg = config(vec![red_range()]);
        cfg.max_pairing_skew_ms = Some(100);
        let mut det = Detector::new(cfg, store, sink.clone());
        let report = det.detect_once();
        assert!(matches!(
            report.skip_reason,
            Some(DetectionError::StaleFramePair { .. })
        ));
        assert!(sink.regions().is_empty());
    }

    #[test]
    fn test_spawned_loop_stops_and_joins() {
        let (det, _store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        let handle = det.spawn(None);
        std::thread::sleep(Duration::from_millis(50));
        let det = handle.stop().unwrap();
        assert!(det.cycle_count() >= 1);
        assert_eq!(det.emitted_count() as usize, sink.regions().len());
    }

    #[test]
    fn test_spawned_loop_max_cycles() {
        let (det, _store, sink) = setup(vec![red_range()], scene(20, 15, 20, 10));
        let det = det.spawn(Some(3)).join().unwrap();
        assert_eq!(det.cycle_count(), 3);
        assert_eq!(sink.regions().len(), 3);
    }
}
