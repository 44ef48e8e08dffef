//! 错误类型 (Error taxonomy)
//!
//! 检测循环里没有致命错误: 每种错误只会让当前帧/当前周期被跳过,
//! 下一个调度周期自然重试。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    /// 图像编码不支持或数据长度不对
    #[error("图像转换失败 (encoding={encoding}): {reason}")]
    InputConversion { encoding: String, reason: String },

    /// 坐标系变换查询失败
    #[error("坐标变换不可用: {source_frame} → {target_frame}")]
    TransformUnavailable {
        target_frame: String,
        source_frame: String,
    },

    /// 图像或点云尚未到达
    #[error("输入未就绪 (image={have_image}, cloud={have_cloud})")]
    MissingInput { have_image: bool, have_cloud: bool },

    /// 参数缺失 (解析时回退默认值, 只用于日志)
    #[error("参数 '{key}' 未设置")]
    ConfigurationMissing { key: String },

    /// 图像与点云尺寸不一致
    #[error("尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// 图像与点云采集时间相差过大
    #[error("图像/点云时间差 {skew_ms}ms 超出容差 {tolerance_ms}ms")]
    StaleFramePair { skew_ms: i64, tolerance_ms: i64 },

    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DetectionError>;
