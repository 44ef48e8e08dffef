/// RGB-D 颜色目标检测 - 离线回放
///
/// 读取一张彩色图像, 按针孔模型生成平面点云, 走完整的输入→检测→输出流程,
/// 把每个输出区域保存为PNG。
///
/// cargo run --bin rgbd_detect -- --image scene.png --config detection.json
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use crossbeam_channel::{bounded, select};
use glam::Vec3;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rgbd_detect::{
    gen_time_string, ChannelCloudPublisher, ChannelEmitter, DetectedRegion, DetectionConfig,
    Detector, FrameStore, Ingestor, OrganizedPointCloud, RawImage, RigidTransform,
    StaticTransforms,
};

/// 离线回放检测
#[derive(Parser, Debug)]
#[command(author, version, about = "RGB-D 颜色目标检测回放", long_about = None)]
struct Args {
    /// 配置文件 (JSON), 不指定则使用默认参数
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输入彩色图像
    #[arg(short, long)]
    image: PathBuf,

    /// 合成点云的平面深度 (米)
    #[arg(short, long, default_value_t = 1.0)]
    depth: f32,

    /// 输出目录
    #[arg(short, long, default_value = "detections")]
    output: PathBuf,

    /// 检测周期数
    #[arg(long, default_value_t = 3)]
    cycles: u64,

    /// 覆盖配置中的检测频率 (Hz)
    #[arg(long)]
    rate: Option<f64>,

    /// 打印解析后的配置 (JSON) 并退出
    #[arg(long)]
    print_config: bool,
}

/// 针孔模型: 每个像素对应 z = depth 平面上的一个点
fn synth_plane_cloud(width: u32, height: u32, depth: f32, frame_id: &str) -> OrganizedPointCloud {
    let f = width.max(height) as f32;
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let mut cloud = OrganizedPointCloud::filled(height, width, Vec3::ZERO, frame_id, Utc::now());
    for row in 0..height {
        for col in 0..width {
            let x = (col as f32 - cx) * depth / f;
            let y = (row as f32 - cy) * depth / f;
            cloud.set(col, row, Vec3::new(x, y, depth));
        }
    }
    cloud
}

fn save_region(dir: &std::path::Path, region: &DetectedRegion) -> Result<PathBuf> {
    let label = if region.label.is_empty() {
        format!("range{}", region.range_index)
    } else {
        region.label.clone()
    };
    let path = dir.join(format!("{}-{}.png", label, gen_time_string("-")));
    region
        .image
        .save(&path)
        .with_context(|| format!("保存失败: {}", path.display()))?;
    Ok(path)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DetectionConfig::load(path)
            .with_context(|| format!("无法加载配置: {}", path.display()))?,
        None => {
            warn!("⚠️ 未指定配置文件, 使用默认参数");
            DetectionConfig::default()
        }
    };
    if let Some(rate) = args.rate {
        if !config.set_rate_hz(rate) {
            warn!("⚠️ 忽略无效频率 {}, 使用 {}Hz", rate, config.rate_hz);
        }
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    config.print_summary();

    let rgb = image::open(&args.image)
        .with_context(|| format!("无法读取图像: {}", args.image.display()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    info!("📷 输入图像 {}x{}", width, height);

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("无法创建输出目录: {}", args.output.display()))?;

    // 传感器→检测坐标系: 回放时两者重合
    let transforms = Arc::new(StaticTransforms::new());
    transforms.insert(
        &config.detection_frame,
        &config.sensor_frame,
        RigidTransform::IDENTITY,
    );

    let store = Arc::new(FrameStore::new());
    let (cloud_tx, cloud_rx) = bounded::<OrganizedPointCloud>(4);
    let ingestor = Ingestor::new(
        store.clone(),
        transforms,
        Arc::new(ChannelCloudPublisher::new(cloud_tx)),
        config.detection_frame.clone(),
    );

    // 采集线程: 按检测频率的两倍重复送帧
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let raw = rgb.into_raw();
    let sensor_frame = config.sensor_frame.clone();
    let depth = args.depth;
    let feed_period = config.cycle_period() / 2;
    let ingest = std::thread::spawn(move || {
        let ticker = crossbeam_channel::tick(feed_period);
        loop {
            let image = RawImage {
                encoding: "rgb8".to_string(),
                width,
                height,
                data: raw.clone(),
                stamp: Utc::now(),
            };
            if let Err(e) = ingestor.on_image(&image) {
                error!("❌ 图像输入失败: {}", e);
            }
            let cloud = synth_plane_cloud(width, height, depth, &sensor_frame);
            if let Err(e) = ingestor.on_cloud(&cloud) {
                error!("❌ 点云输入失败: {}", e);
            }
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {}
            }
        }
        info!("🛑 采集线程退出");
    });

    let (region_tx, region_rx) = bounded::<DetectedRegion>(64);
    let detector = Detector::new(config, store, Arc::new(ChannelEmitter::new(region_tx)));
    let handle = detector.spawn(Some(args.cycles));

    let mut saved = 0usize;
    let mut published = 0usize;
    let mut save = |region: DetectedRegion| match save_region(&args.output, &region) {
        Ok(path) => {
            saved += 1;
            info!("💾 {} → {}", region.label, path.display());
        }
        Err(e) => error!("❌ {:#}", e),
    };
    loop {
        select! {
            recv(region_rx) -> msg => match msg {
                Ok(region) => save(region),
                Err(_) => break,
            },
            // 变换后的点云: 回放时只计数
            recv(cloud_rx) -> msg => {
                if msg.is_ok() {
                    published += 1;
                }
            },
            default(Duration::from_millis(100)) => {
                if handle.is_finished() {
                    region_rx.try_iter().for_each(&mut save);
                    break;
                }
            }
        }
    }

    let detector = handle.join();
    let _ = stop_tx.send(());
    if ingest.join().is_err() {
        error!("❌ 采集线程异常退出");
    }

    if let Some(d) = detector {
        info!(
            "✅ 完成: {}个周期, 输出{}个区域, 保存{}个, 发布点云{}帧",
            d.cycle_count(),
            d.emitted_count(),
            saved,
            published
        );
    }
    Ok(())
}
