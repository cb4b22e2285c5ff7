// 该文件是 Fenjian （分拣） 项目的一部分。
// src/model/classifier.rs - 一级垃圾分类模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use image::RgbImage;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{MODEL_INPUT_SIZE, NORM_MEAN, NORM_STD, NchwFrame},
  model::{
    Classification, Device, InferenceError, LabelTable, Model, ModelLoadError, WasteCategory,
    WithLabel, argmax, onnx::OrtRunner, softmax,
  },
};

pub struct WasteClassifierBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  device: Device,
  num_threads: usize,
  input_size: u32,
}

impl FromUrlWithScheme for WasteClassifierBuilder {
  const SCHEME: &'static str = "waste-cls";
}

impl FromUrl for WasteClassifierBuilder {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(WasteClassifierBuilder::new(PathBuf::from(url.path())))
  }
}

impl WasteClassifierBuilder {
  pub fn new(model_path: PathBuf) -> Self {
    WasteClassifierBuilder {
      model_path,
      labels_path: None,
      device: Device::default(),
      num_threads: 4,
      input_size: MODEL_INPUT_SIZE,
    }
  }

  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn labels_path(mut self, path: PathBuf) -> Self {
    self.labels_path = Some(path);
    self
  }

  pub fn build(self) -> Result<WasteClassifier, ModelLoadError> {
    LabelTable::load_for_model::<WasteCategory>(&self.model_path, self.labels_path.as_deref())?;

    let runner = OrtRunner::load(&self.model_path, self.device, self.num_threads)?;

    let units = runner.probe_output_units(self.input_size)?;
    if units != WasteCategory::VOCABULARY.len() {
      return Err(ModelLoadError::OutputShape {
        expected: WasteCategory::VOCABULARY.len(),
        actual: units,
      });
    }

    info!("一级分类模型就绪: {}", self.model_path.display());
    Ok(WasteClassifier {
      runner,
      input_size: self.input_size,
    })
  }
}

/// 一级分类器：单标签三分类，softmax 取最大概率类
pub struct WasteClassifier {
  runner: OrtRunner,
  input_size: u32,
}

impl Model for WasteClassifier {
  type Input = RgbImage;
  type Output = Classification;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = NchwFrame::from_rgb(input, self.input_size, NORM_MEAN, NORM_STD);
    let logits = self.runner.run(&frame)?;
    let result = decode_logits(&logits)?;
    debug!(
      "一级分类结果: {} (置信度 {:.4})",
      result.category.to_label_str(),
      result.confidence
    );
    Ok(result)
  }
}

/// 把一级模型的原始输出解码为分类结果
pub fn decode_logits(logits: &[f32]) -> Result<Classification, InferenceError> {
  if logits.len() != WasteCategory::VOCABULARY.len() {
    return Err(InferenceError::BadOutput(format!(
      "输出单元数不符: 期望 {}, 实际 {}",
      WasteCategory::VOCABULARY.len(),
      logits.len()
    )));
  }

  let probabilities = softmax(logits);
  let (class_id, confidence) = argmax(&probabilities);
  let category = WasteCategory::from_label_id(class_id)
    .ok_or_else(|| InferenceError::BadOutput(format!("类别下标越界: {class_id}")))?;

  Ok(Classification {
    category,
    confidence,
    class_id,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decode_picks_argmax_with_softmax_confidence() {
    // 下标 1 (inorganic) 的 logit 最大
    let result = decode_logits(&[0.2, 2.5, -1.0]).unwrap();
    assert_eq!(result.category, WasteCategory::Inorganic);
    assert_eq!(result.class_id, 1);
    assert!(result.confidence > 0.8 && result.confidence <= 1.0);
  }

  #[test]
  fn decode_rejects_wrong_output_width() {
    // 词表被截断前的 5 类旧权重必须报错，而不是静默使用前 3 类
    let err = decode_logits(&[0.1, 0.2, 0.3, 0.4, 0.5]).unwrap_err();
    assert!(matches!(err, InferenceError::BadOutput(_)));
  }

  #[test]
  fn decode_is_deterministic() {
    let a = decode_logits(&[1.0, 0.5, 0.2]).unwrap();
    let b = decode_logits(&[1.0, 0.5, 0.2]).unwrap();
    assert_eq!(a, b);
  }
}
