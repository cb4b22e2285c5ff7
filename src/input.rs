// 该文件是 Fenjian （分拣） 项目的一部分。
// src/input.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
}

impl From<std::io::Error> for DecodeError {
  fn from(err: std::io::Error) -> Self {
    DecodeError::IoError(err)
  }
}

impl From<image::ImageError> for DecodeError {
  fn from(err: image::ImageError) -> Self {
    DecodeError::ImageLoadError(err)
  }
}

/// 支持的图像扩展名，批处理入口据此过滤目录内容
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 判断路径是否为受支持的图像文件
pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let lower = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&lower.as_str())
    })
    .unwrap_or(false)
}

/// 从本地路径解码 RGB 图像。
/// 文件不可读或内容损坏时返回 [`DecodeError`]，不会触碰任何模型。
pub fn load_rgb_image(path: &Path) -> Result<RgbImage, DecodeError> {
  let image = ImageReader::open(path)?.decode()?;
  let image: RgbImage = image.into();
  debug!(
    "图像解码完成: {} ({}x{})",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(image)
}
