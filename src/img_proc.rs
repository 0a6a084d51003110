//! YOLOに関する画像処理モジュール

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::detection_result::ObjectDetection;
use crate::neural_net::Blob;

const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_BG_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 画像からネットワーク入力用のブロブを生成します。
///
/// 画像はトリミングせずに `width` x `height` へリサイズし、画素値を 1/255 倍して
/// RGB 順のプレーン (NCHW) に並べます。
///
/// # Args
///
/// * `img` - 入力画像
/// * `width` - ネットワーク入力の幅
/// * `height` - ネットワーク入力の高さ
///
/// # Return
///
/// * 正規化されたブロブ
pub fn blob_from_image(img: &DynamicImage, width: u32, height: u32) -> Blob {
    let plane = width as usize * height as usize;
    let mut data = vec![0.; plane * Blob::CHANNELS];
    if img.width() == 0 || img.height() == 0 {
        return Blob::new(data, width, height);
    }

    let resized = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = y as usize * width as usize + x as usize;
        for ch in 0..Blob::CHANNELS {
            data[ch * plane + idx] = f32::from(pixel[ch]) / 255.;
        }
    }
    Blob::new(data, width, height)
}

/// 画像上に線を描画します。
///
/// # Args
///
/// * `img` - 線を描画する画像 (in-place)
/// * `x1`, `y1`, `x2`, `y2` - 線の始点と終点の座標
/// * `thickness` - 線の太さ
/// * `color` - 線の色
fn draw_line(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    let thickness = thickness.max(1.);
    let (bx, by) = (
        x1.min(x2) - (thickness / 2.).floor(),
        y1.min(y2) - (thickness / 2.).floor(),
    );

    let (w, h) = if x1 == x2 {
        (thickness, (y2 - y1).abs() + thickness)
    } else {
        ((x2 - x1).abs() + thickness, thickness)
    };

    let rect = Rect::at(bx as i32, by as i32).of_size(w as u32, h as u32);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形を描画します。
fn draw_rect(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// ボックスの左上にラベルを描画します。
fn draw_label(img: &mut RgbImage, x1: i32, y1: i32, font: &Font, font_size: f32, text: &str) {
    let scale = Scale::uniform(font_size);
    let (text_w, text_h) = text_size(scale, font, text);
    if text_w <= 0 || text_h <= 0 {
        return;
    }

    let bg = Rect::at(x1, y1 - text_h - 1).of_size(text_w as u32, text_h as u32 + 1);
    draw_filled_rect_mut(img, bg, LABEL_BG_COLOR);
    draw_text_mut(img, LABEL_TEXT_COLOR, x1, y1 - text_h, scale, font, text);
}

/// 画像上にバウンディングボックスとラベルを描画します。
///
/// ボックスが画像からはみ出している場合は画像内の部分だけを描画します。
///
/// # Args
///
/// * `img` - バウンディングボックスとラベルを描画する画像 (in-place)
/// * `detections` - 検出結果の配列
/// * `font` - ラベルのフォント
/// * `font_size` - ラベルのフォントサイズ
/// * `line_thickness` - バウンディングボックスの線の太さ
pub fn draw_detections(
    img: &mut RgbImage,
    detections: &[ObjectDetection],
    font: &Font,
    font_size: f32,
    line_thickness: f32,
) {
    // 画像外の辺は線の太さより外側に寄せ、見えない位置で描画する
    let margin = line_thickness.max(1.).ceil() + 1.;
    let clip = |v: i32, size: u32| (v as f32).clamp(-margin, size as f32 + margin);
    let (w, h) = img.dimensions();

    for d in detections {
        let b = d.bounding_box;
        if b.width() <= 0 || b.height() <= 0 {
            continue;
        }
        let (x1, y1) = (clip(b.left, w), clip(b.top, h));
        let (x2, y2) = (clip(b.right, w), clip(b.bottom, h));
        draw_rect(img, x1, y1, x2, y2, line_thickness, BOX_COLOR);

        let text = format!("{}:{:.2}", d.class_name, d.confidence);
        draw_label(img, x1 as i32, y1 as i32, font, font_size, &text);
    }
}
