// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测框绘制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::Detection;

const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: u32 = 80;

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h as u32 {
    0..60 => (c, x, 0.0),
    60..120 => (x, c, 0.0),
    120..180 => (0.0, c, x),
    180..240 => (0.0, x, c),
    240..300 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 类别对应的框颜色
pub fn class_color(class_id: u32) -> Rgb<u8> {
  let hue = ((class_id % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32) * 360.0;
  hsv_to_rgb(hue, 0.8, 0.9)
}

/// 在图像上绘制检测框，坐标按图像自身分辨率反归一化
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
  let (width, height) = image.dimensions();

  for detection in detections {
    let pixel = detection.bounding_box.denormalize(width, height);
    let x_min = (pixel.xmin as i32).clamp(0, width as i32 - 1);
    let y_min = (pixel.ymin as i32).clamp(0, height as i32 - 1);
    let x_max = (pixel.xmax as i32).clamp(0, width as i32 - 1);
    let y_max = (pixel.ymax as i32).clamp(0, height as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      continue;
    }

    let color = class_color(detection.class_id);
    for t in 0..BOX_THICKNESS {
      let w = x_max - x_min - 2 * t;
      let h = y_max - y_min - 2 * t;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}
