// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 颜色分割 (Colour segmentation)
//!
//! 中值滤波去噪 → RGB转HSV → 每个HSV范围一张二值掩码。
//! HSV采用8位约定: H ∈ [0,180), S/V ∈ [0,255]。

use image::{ImageBuffer, Luma, Rgb};
use imageproc::filter::median_filter;

use crate::types::{ColorImage, HsvRange, Mask, MASK_OFF, MASK_ON};

/// HSV图像, 三个通道依次为 H/S/V
pub type HsvImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// 单像素 RGB → HSV
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };

    let h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    // 度数减半放进u8, 359.x 会四舍五入到180, 回绕到0
    let mut h = (h / 2.0).round() as u32;
    if h >= 180 {
        h -= 180;
    }

    [h as u8, s.round() as u8, v as u8]
}

/// 整图转HSV
pub fn to_hsv(image: &ColorImage) -> HsvImage {
    let (w, h) = image.dimensions();
    let mut out = HsvImage::new(w, h);
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        *dst = Rgb(rgb_to_hsv(src.0));
    }
    out
}

/// 中值滤波 + HSV转换; kernel为奇数窗口边长, 小于3时不做滤波
pub fn preprocess(image: &ColorImage, blur_kernel: u32) -> HsvImage {
    if blur_kernel < 3 {
        return to_hsv(image);
    }
    let radius = blur_kernel / 2;
    let blurred = median_filter(image, radius, radius);
    to_hsv(&blurred)
}

/// 逐通道闭区间阈值, 生成0/255掩码
pub fn in_range(hsv: &HsvImage, range: &HsvRange) -> Mask {
    let (w, h) = hsv.dimensions();
    let mut mask = Mask::from_pixel(w, h, Luma([MASK_OFF]));
    for (src, dst) in hsv.pixels().zip(mask.pixels_mut()) {
        if range.contains(src.0) {
            dst.0[0] = MASK_ON;
        }
    }
    mask
}

/// 按列表顺序为每个范围生成一张掩码
///
/// 范围之间互不排斥, 同一像素可以命中多个范围。
pub fn segment(image: &ColorImage, ranges: &[HsvRange], blur_kernel: u32) -> Vec<Mask> {
    let hsv = preprocess(image, blur_kernel);
    ranges.iter().map(|r| in_range(&hsv, r)).collect()
}
