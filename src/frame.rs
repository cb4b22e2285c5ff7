// 该文件是 Fenjian （分拣） 项目的一部分。
// src/frame.rs - 模型输入帧定义与预处理
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 模型输入边长（两级模型共用 260x260）
pub const MODEL_INPUT_SIZE: u32 = 260;

/// 归一化均值（按 R、G、B 通道）
pub const NORM_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// 归一化标准差（按 R、G、B 通道）
pub const NORM_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 归一化后的 NCHW 浮点帧，直接作为 ONNX 模型输入
#[derive(Debug, Clone)]
pub struct NchwFrame {
  data: Box<[f32]>,
  width: u32,
  height: u32,
  /// 预处理前的原始图像尺寸，检测框坐标换算时使用
  source_width: u32,
  source_height: u32,
}

impl NchwFrame {
  /// 将任意分辨率的 RGB 图像预处理为模型输入帧：
  /// 双线性缩放到 size x size，像素除以 255 后按通道做均值方差归一化，
  /// 最后排列为 NCHW 格式。
  pub fn from_rgb(image: &RgbImage, size: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
    let (source_width, source_height) = image.dimensions();

    let resized = image::imageops::resize(
      image,
      size,
      size,
      image::imageops::FilterType::Triangle,
    );

    let side = size as usize;
    let spatial = side * side;
    let mut data = vec![0.0f32; RGB_CHANNELS * spatial].into_boxed_slice();

    for h in 0..size {
      for w in 0..size {
        let pixel = resized.get_pixel(w, h);
        let idx = (h as usize) * side + (w as usize);
        for c in 0..RGB_CHANNELS {
          let value = pixel[c] as f32 / 255.0;
          data[c * spatial + idx] = (value - mean[c]) / std[c];
        }
      }
    }

    Self {
      data,
      width: size,
      height: size,
      source_width,
      source_height,
    }
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// NCHW 形状，批大小恒为 1
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height as usize, self.width as usize]
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn source_width(&self) -> u32 {
    self.source_width
  }

  pub fn source_height(&self) -> u32 {
    self.source_height
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb(rgb))
  }

  #[test]
  fn frame_has_nchw_shape_and_keeps_source_size() {
    let image = solid_image(640, 480, [0, 0, 0]);
    let frame = NchwFrame::from_rgb(&image, MODEL_INPUT_SIZE, NORM_MEAN, NORM_STD);

    assert_eq!(frame.shape(), [1, 3, 260, 260]);
    assert_eq!(frame.as_slice().len(), 3 * 260 * 260);
    assert_eq!(frame.source_width(), 640);
    assert_eq!(frame.source_height(), 480);
  }

  #[test]
  fn normalization_uses_per_channel_constants() {
    // 纯白图像每个通道应当是 (1.0 - mean) / std
    let image = solid_image(32, 32, [255, 255, 255]);
    let frame = NchwFrame::from_rgb(&image, 4, NORM_MEAN, NORM_STD);

    let spatial = 4 * 4;
    for c in 0..3 {
      let expected = (1.0 - NORM_MEAN[c]) / NORM_STD[c];
      for idx in 0..spatial {
        let got = frame.as_slice()[c * spatial + idx];
        assert!((got - expected).abs() < 1e-6, "channel {c}: {got} != {expected}");
      }
    }
  }

  #[test]
  fn zero_pixels_map_to_negative_mean_over_std() {
    let image = solid_image(8, 8, [0, 0, 0]);
    let frame = NchwFrame::from_rgb(&image, 4, NORM_MEAN, NORM_STD);

    let spatial = 4 * 4;
    for c in 0..3 {
      let expected = -NORM_MEAN[c] / NORM_STD[c];
      assert!((frame.as_slice()[c * spatial] - expected).abs() < 1e-6);
    }
  }
}
