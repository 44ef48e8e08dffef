//! 检测参数配置 - 启动时从参数源解析一次
//!
//! 参数名沿用 `object_detection/...` 斜杠路径; 缺失的参数回退默认值并打印警告。

use std::collections::HashMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use glam::Vec3;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::crop_filter::InvalidPointPolicy;
use crate::error::{DetectionError, Result};
use crate::types::{CropBox, HsvRange};

/// 参数命名空间
pub const NAMESPACE: &str = "object_detection";

/// 默认HSV范围个数
pub const DEFAULT_HSV_RANGE_COUNT: usize = 6;

/// 默认检测频率 (Hz)
pub const DEFAULT_RATE_HZ: f64 = 1.0;

/// 允许的检测频率范围 (Hz)
pub const RATE_HZ_RANGE: RangeInclusive<f64> = 0.01..=1000.0;

/// 中值滤波窗口上限
pub const MAX_BLUR_KERNEL: i64 = 255;

/// 参数源 (外部配置存储)
pub trait ParamStore {
    fn get_f64(&self, key: &str) -> Option<f64>;
    fn get_i64(&self, key: &str) -> Option<i64>;
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_str(&self, key: &str) -> Option<String>;
}

fn value_as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

/// JSON参数源: 既支持嵌套对象 (`{"object_detection": {"crop": {...}}}`),
/// 也支持扁平键 (`{"object_detection/crop/wMin": -1.0}`)
#[derive(Clone, Debug, Default)]
pub struct JsonParams {
    root: Value,
}

impl JsonParams {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map(Self::new)
            .map_err(|e| DetectionError::Config(format!("JSON解析失败: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            DetectionError::Config(format!("读取 {} 失败: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    fn find(&self, key: &str) -> Option<&Value> {
        self.root
            .get(key)
            .or_else(|| self.root.pointer(&format!("/{}", key)))
    }
}

impl ParamStore for JsonParams {
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.find(key)?.as_f64()
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        value_as_i64(self.find(key)?)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.find(key)?.as_bool()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.find(key)?.as_str().map(str::to_string)
    }
}

/// 内存参数源 (测试/嵌入使用)
#[derive(Clone, Debug, Default)]
pub struct MapParams {
    values: HashMap<String, Value>,
}

impl MapParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl ParamStore for MapParams {
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key)?.as_f64()
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        value_as_i64(self.values.get(key)?)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key)?.as_bool()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key)?.as_str().map(str::to_string)
    }
}

/// 逐项读取参数, 记录缺失项
struct Resolver<'a> {
    store: &'a dyn ParamStore,
    missing: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn key(name: &str) -> String {
        format!("{}/{}", NAMESPACE, name)
    }

    fn fallback<T: std::fmt::Debug>(&mut self, key: String, default: T) -> T {
        warn!(
            "⚠️ {}, 使用默认值 {:?}",
            DetectionError::ConfigurationMissing { key: key.clone() },
            default
        );
        self.missing.push(key);
        default
    }

    fn f64(&mut self, name: &str, default: f64) -> f64 {
        let key = Self::key(name);
        match self.store.get_f64(&key) {
            Some(v) => v,
            None => self.fallback(key, default),
        }
    }

    fn i64(&mut self, name: &str, default: i64) -> i64 {
        let key = Self::key(name);
        match self.store.get_i64(&key) {
            Some(v) => v,
            None => self.fallback(key, default),
        }
    }

    fn bool(&mut self, name: &str, default: bool) -> bool {
        let key = Self::key(name);
        match self.store.get_bool(&key) {
            Some(v) => v,
            None => self.fallback(key, default),
        }
    }

    fn string(&mut self, name: &str, default: &str) -> String {
        let key = Self::key(name);
        match self.store.get_str(&key) {
            Some(v) => v,
            None => self.fallback(key, default.to_string()),
        }
    }

    /// HSV通道值截断到 [0, limit]
    fn channel(&mut self, name: &str, default: i64, limit: i64) -> u8 {
        let v = self.i64(name, default);
        if !(0..=limit).contains(&v) {
            warn!("⚠️ 参数 {} = {} 超出 [0, {}], 已截断", Self::key(name), v, limit);
        }
        v.clamp(0, limit) as u8
    }
}

/// 检测参数 (启动后不再修改)
#[derive(Clone, Debug, Serialize)]
pub struct DetectionConfig {
    // === 空间裁剪 ===
    pub crop_box: CropBox,
    pub invalid_points: InvalidPointPolicy,

    // === 体素降采样 (保留参数, 掩码逻辑不使用) ===
    pub voxel_leaf_size: f64,

    // === 候选选择 ===
    pub rect_padding: u32,   // 外扩像素
    pub area_threshold: f64, // 最小轮廓面积 (严格大于)

    // === 颜色分割 ===
    pub hsv_ranges: Vec<HsvRange>,
    pub image_blur_kernel: u32, // 中值滤波窗口 (奇数)

    // === 坐标系 ===
    pub sensor_frame: String,
    pub detection_frame: String,

    // === 调度与同步 ===
    pub max_pairing_skew_ms: Option<i64>, // None: 不检查图像/点云时间差
    pub rate_hz: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            crop_box: CropBox::default(),
            invalid_points: InvalidPointPolicy::Exclude,
            voxel_leaf_size: 0.005,
            rect_padding: 5,
            area_threshold: 10.0,
            hsv_ranges: vec![HsvRange::default(); DEFAULT_HSV_RANGE_COUNT],
            image_blur_kernel: 9,
            sensor_frame: "camera_rgb_optical_frame".to_string(),
            detection_frame: "robot_center".to_string(),
            max_pairing_skew_ms: None,
            rate_hz: DEFAULT_RATE_HZ,
        }
    }
}

impl DetectionConfig {
    /// 从参数源解析
    pub fn resolve(store: &dyn ParamStore) -> Self {
        Self::resolve_with_report(store).0
    }

    /// 解析并返回缺失的参数名
    pub fn resolve_with_report(store: &dyn ParamStore) -> (Self, Vec<String>) {
        let d = Self::default();
        let mut r = Resolver {
            store,
            missing: Vec::new(),
        };

        // w/d/h 对应 x/y/z
        let crop_box = CropBox::new(
            Vec3::new(
                r.f64("crop/wMin", d.crop_box.min.x as f64) as f32,
                r.f64("crop/dMin", d.crop_box.min.y as f64) as f32,
                r.f64("crop/hMin", d.crop_box.min.z as f64) as f32,
            ),
            Vec3::new(
                r.f64("crop/wMax", d.crop_box.max.x as f64) as f32,
                r.f64("crop/dMax", d.crop_box.max.y as f64) as f32,
                r.f64("crop/hMax", d.crop_box.max.z as f64) as f32,
            ),
        );
        let invalid_points = if r.bool("crop/includeInvalid", false) {
            InvalidPointPolicy::Include
        } else {
            InvalidPointPolicy::Exclude
        };

        let voxel_leaf_size = r.f64("voxel/leafsize", d.voxel_leaf_size);

        let rect_padding = r.i64("rectPadding", d.rect_padding as i64);
        if rect_padding < 0 {
            warn!("⚠️ rectPadding = {} 为负数, 按0处理", rect_padding);
        }
        let rect_padding = rect_padding.max(0) as u32;
        let area_threshold = r.f64("minArea", d.area_threshold);

        let count = r.i64("hsvCount", DEFAULT_HSV_RANGE_COUNT as i64).max(0) as usize;
        let default_range = HsvRange::default();
        let hsv_ranges = (0..count)
            .map(|i| {
                let p = format!("hsv{}", i);
                HsvRange {
                    hmin: r.channel(&format!("{}/hmin", p), default_range.hmin as i64, 180),
                    smin: r.channel(&format!("{}/smin", p), default_range.smin as i64, 255),
                    vmin: r.channel(&format!("{}/vmin", p), default_range.vmin as i64, 255),
                    hmax: r.channel(&format!("{}/hmax", p), default_range.hmax as i64, 180),
                    smax: r.channel(&format!("{}/smax", p), default_range.smax as i64, 255),
                    vmax: r.channel(&format!("{}/vmax", p), default_range.vmax as i64, 255),
                    label: r.string(&format!("{}/color", p), ""),
                }
            })
            .collect();

        let kernel = r.i64("imageBlurKernel", d.image_blur_kernel as i64);
        if !(0..=MAX_BLUR_KERNEL).contains(&kernel) {
            warn!(
                "⚠️ imageBlurKernel = {} 超出 [0, {}], 已截断",
                kernel, MAX_BLUR_KERNEL
            );
        }
        let mut image_blur_kernel = kernel.clamp(0, MAX_BLUR_KERNEL) as u32;
        if image_blur_kernel > 1 && image_blur_kernel % 2 == 0 {
            image_blur_kernel += 1;
            warn!("⚠️ imageBlurKernel 必须为奇数, 调整为 {}", image_blur_kernel);
        }

        let sensor_frame = r.string("frames/sensor", &d.sensor_frame);
        let detection_frame = r.string("frames/detection", &d.detection_frame);

        let skew = r.i64("sync/maxSkewMs", 0);
        let max_pairing_skew_ms = (skew > 0).then_some(skew);

        let mut rate_hz = r.f64("rateHz", d.rate_hz);
        if !RATE_HZ_RANGE.contains(&rate_hz) {
            warn!(
                "⚠️ rateHz = {} 超出 [{}, {}], 使用 {}",
                rate_hz,
                RATE_HZ_RANGE.start(),
                RATE_HZ_RANGE.end(),
                d.rate_hz
            );
            rate_hz = d.rate_hz;
        }

        let config = Self {
            crop_box,
            invalid_points,
            voxel_leaf_size,
            rect_padding,
            area_threshold,
            hsv_ranges,
            image_blur_kernel,
            sensor_frame,
            detection_frame,
            max_pairing_skew_ms,
            rate_hz,
        };
        (config, r.missing)
    }

    /// 覆盖检测频率; 超出 `RATE_HZ_RANGE` 时不修改并返回 false
    pub fn set_rate_hz(&mut self, rate_hz: f64) -> bool {
        if RATE_HZ_RANGE.contains(&rate_hz) {
            self.rate_hz = rate_hz;
            true
        } else {
            false
        }
    }

    /// 检测周期; 频率不在允许范围内时按默认频率
    pub fn cycle_period(&self) -> Duration {
        let rate_hz = if RATE_HZ_RANGE.contains(&self.rate_hz) {
            self.rate_hz
        } else {
            DEFAULT_RATE_HZ
        };
        Duration::from_secs_f64(1.0 / rate_hz)
    }

    /// 从JSON文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let params = JsonParams::from_file(path.as_ref())?;
        let config = Self::resolve(&params);
        info!("✅ 配置已从 {} 加载", path.as_ref().display());
        Ok(config)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ 当前检测配置:");
        info!(
            "  裁剪盒: x[{:.3}, {:.3}] y[{:.3}, {:.3}] z[{:.3}, {:.3}] (无效点: {:?})",
            self.crop_box.min.x,
            self.crop_box.max.x,
            self.crop_box.min.y,
            self.crop_box.max.y,
            self.crop_box.min.z,
            self.crop_box.max.z,
            self.invalid_points
        );
        info!(
            "  外扩: {}px | 最小面积: {:.1} | 滤波窗口: {}",
            self.rect_padding, self.area_threshold, self.image_blur_kernel
        );
        for (i, r) in self.hsv_ranges.iter().enumerate() {
            info!(
                "  HSV#{} '{}': {:?} ~ {:?}",
                i,
                r.label,
                r.min(),
                r.max()
            );
        }
        info!(
            "  坐标系: {} → {} | 频率: {:.1}Hz",
            self.sensor_frame, self.detection_frame, self.rate_hz
        );
    }
}
