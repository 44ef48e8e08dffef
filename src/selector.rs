// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 掩码融合与候选选择 (Mask fusion & candidate selection)
//!
//! 空间掩码 ∧ 颜色掩码 → 3x3中值去噪 → 外轮廓 → 面积最大且超过阈值的候选
//! → 外接矩形 → 整体外扩 (全部扩或者不扩)。

use image::Luma;
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::median_filter;
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::error::{DetectionError, Result};
use crate::types::{Mask, MASK_OFF, MASK_ON};

/// 候选区域
#[derive(Clone, Debug)]
pub struct Candidate {
    pub contour: Vec<Point<i32>>, // 有序边界点
    pub area: f64,
    pub bbox: Rect, // 轮廓外接矩形 (未外扩)
}

/// 最终选区
#[derive(Clone, Debug)]
pub struct Selection {
    pub candidate: Candidate,
    pub region: Rect, // 外扩后的裁剪矩形
    pub padded: bool,
}

/// 逐像素与
pub fn fuse(spatial: &Mask, color: &Mask) -> Result<Mask> {
    if spatial.dimensions() != color.dimensions() {
        return Err(DetectionError::DimensionMismatch {
            expected: spatial.dimensions(),
            actual: color.dimensions(),
        });
    }
    let (w, h) = spatial.dimensions();
    let mut out = Mask::from_pixel(w, h, Luma([MASK_OFF]));
    for ((a, b), dst) in spatial.iter().zip(color.iter()).zip(out.iter_mut()) {
        if *a != MASK_OFF && *b != MASK_OFF {
            *dst = MASK_ON;
        }
    }
    Ok(out)
}

/// 3x3 中值滤波去掉孤立噪点
pub fn denoise(mask: &Mask) -> Mask {
    median_filter(mask, 1, 1)
}

/// 最外层轮廓 (不含孔洞及孔洞内部的岛)
pub fn external_contours(mask: &Mask) -> Vec<Vec<Point<i32>>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// 多边形面积 (鞋带公式), 点需有序
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0f64;
    for i in 0..n {
        let p0 = points[i];
        let p1 = points[(i + 1) % n];
        area += p0.x as f64 * p1.y as f64 - p1.x as f64 * p0.y as f64;
    }
    area.abs() * 0.5
}

/// 外接矩形
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

/// 选出面积严格最大且严格大于阈值的下标; 面积相同取先出现者
pub fn select_index(areas: &[f64], threshold: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &area) in areas.iter().enumerate() {
        if area <= threshold {
            continue;
        }
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((i, area)),
        }
    }
    best.map(|(i, _)| i)
}

/// 在轮廓中选候选
pub fn select_candidate(contours: Vec<Vec<Point<i32>>>, threshold: f64) -> Option<Candidate> {
    let areas: Vec<f64> = contours.iter().map(|c| contour_area(c)).collect();
    let idx = select_index(&areas, threshold)?;
    let contour = contours.into_iter().nth(idx)?;
    let bbox = bounding_rect(&contour)?;
    Some(Candidate {
        contour,
        area: areas[idx],
        bbox,
    })
}

/// 四边同时外扩 `padding` 像素; 只要有一边越界就保持原矩形
pub fn pad_rect(rect: Rect, padding: u32, image_dims: (u32, u32)) -> (Rect, bool) {
    let (w, h) = (image_dims.0 as i64, image_dims.1 as i64);
    let p = padding as i64;
    let left = rect.left() as i64 - p;
    let top = rect.top() as i64 - p;
    let right = rect.left() as i64 + rect.width() as i64 + p; // 开区间
    let bottom = rect.top() as i64 + rect.height() as i64 + p;

    if padding == 0 || left < 0 || top < 0 || right > w || bottom > h {
        return (rect, false);
    }
    let padded = Rect::at(left as i32, top as i32)
        .of_size(rect.width() + 2 * padding, rect.height() + 2 * padding);
    (padded, true)
}

/// 候选选择器 (每个HSV范围调用一次)
#[derive(Clone, Debug)]
pub struct CandidateSelector {
    pub area_threshold: f64,
    pub padding: u32,
}

impl CandidateSelector {
    pub fn new(area_threshold: f64, padding: u32) -> Self {
        Self {
            area_threshold,
            padding,
        }
    }

    /// 融合 → 去噪 → 轮廓 → 选择 → 外扩; 无合格候选返回 `Ok(None)`
    pub fn select(&self, spatial: &Mask, color: &Mask) -> Result<Option<Selection>> {
        let combined = denoise(&fuse(spatial, color)?);
        let contours = external_contours(&combined);
        let Some(candidate) = select_candidate(contours, self.area_threshold) else {
            return Ok(None);
        };
        let (region, padded) = pad_rect(candidate.bbox, self.padding, combined.dimensions());
        Ok(Some(Selection {
            candidate,
            region,
            padded,
        }))
    }
}
