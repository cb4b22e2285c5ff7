// 该文件是 Fenjian （分拣） 项目的一部分。
// src/model/material.rs - 二级材质识别模型
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
  FromUrl,
  frame::{MODEL_INPUT_SIZE, NORM_MEAN, NORM_STD, NchwFrame},
  model::{
    Device, InferenceError, LabelTable, MaterialDetection, MaterialKind, Model, ModelLoadError,
    WithLabel, argmax, onnx::OrtRunner, softmax,
  },
};

/// 检测候选框的默认最低置信度
pub const DETECT_CONFIDENCE_THRESH: f32 = 0.25;
/// NMS IOU 阈值
pub const DETECT_NMS_IOU: f32 = 0.45;

const MATERIAL_CLS_SCHEME: &str = "material-cls";
const MATERIAL_DET_SCHEME: &str = "material-det";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaterialVariant {
  Classification,
  Detection,
}

pub struct MaterialModelBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  device: Device,
  num_threads: usize,
  input_size: u32,
  confidence_threshold: f32,
  nms_threshold: f32,
  variant: MaterialVariant,
}

impl FromUrl for MaterialModelBuilder {
  type Error = ModelLoadError;

  /// 方案名决定二级模型的形态：
  /// `material-cls:/path` 为分类变体，`material-det:/path` 为检测变体
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let variant = match url.scheme() {
      MATERIAL_CLS_SCHEME => MaterialVariant::Classification,
      MATERIAL_DET_SCHEME => MaterialVariant::Detection,
      other => {
        return Err(ModelLoadError::ModelPathError(format!(
          "模型路径必须使用 {} 或 {} 方案, 实际为 {}",
          MATERIAL_CLS_SCHEME, MATERIAL_DET_SCHEME, other
        )));
      }
    };

    Ok(MaterialModelBuilder {
      model_path: PathBuf::from(url.path()),
      labels_path: None,
      device: Device::default(),
      num_threads: 4,
      input_size: MODEL_INPUT_SIZE,
      confidence_threshold: DETECT_CONFIDENCE_THRESH,
      nms_threshold: DETECT_NMS_IOU,
      variant,
    })
  }
}

impl MaterialModelBuilder {
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

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<MaterialModel, ModelLoadError> {
    LabelTable::load_for_model::<MaterialKind>(&self.model_path, self.labels_path.as_deref())?;

    let runner = OrtRunner::load(&self.model_path, self.device, self.num_threads)?;
    let units = runner.probe_output_units(self.input_size)?;

    let vocabulary = MaterialKind::VOCABULARY.len();
    let model = match self.variant {
      MaterialVariant::Classification => {
        if units != vocabulary {
          return Err(ModelLoadError::OutputShape {
            expected: vocabulary,
            actual: units,
          });
        }
        info!("二级材质模型就绪（分类变体）: {}", self.model_path.display());
        MaterialModel::Classifier(MaterialClassifier {
          runner,
          input_size: self.input_size,
        })
      }
      MaterialVariant::Detection => {
        // 检测头输出布局为 [1, 4 + 类别数, 候选框数]
        if units % (4 + vocabulary) != 0 {
          return Err(ModelLoadError::ModelInvalid(format!(
            "检测输出单元数 {} 不是 (4 + {}) 的整数倍",
            units, vocabulary
          )));
        }
        info!("二级材质模型就绪（检测变体）: {}", self.model_path.display());
        MaterialModel::Detector(MaterialDetector {
          runner,
          input_size: self.input_size,
          confidence_threshold: self.confidence_threshold,
          nms_threshold: self.nms_threshold,
        })
      }
    };

    Ok(model)
  }
}

/// 二级模型的统一入口。
/// 上游编排逻辑只面对这一个类型，分类与检测两种实现可以通过配置互换。
pub enum MaterialModel {
  Classifier(MaterialClassifier),
  Detector(MaterialDetector),
}

impl Model for MaterialModel {
  type Input = RgbImage;
  type Output = MaterialDetection;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      MaterialModel::Classifier(model) => model.infer(input),
      MaterialModel::Detector(model) => model.infer(input),
    }
  }
}

/// 分类变体：与一级分类同样的 softmax/argmax 流程，词表换成材质，
/// 不产出边界框
pub struct MaterialClassifier {
  runner: OrtRunner,
  input_size: u32,
}

impl Model for MaterialClassifier {
  type Input = RgbImage;
  type Output = MaterialDetection;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = NchwFrame::from_rgb(input, self.input_size, NORM_MEAN, NORM_STD);
    let logits = self.runner.run(&frame)?;
    let result = decode_material_logits(&logits)?;
    debug!(
      "二级材质结果: {:?} (置信度 {:.4})",
      result.kind.map(|k| k.to_label_str()),
      result.confidence
    );
    Ok(result)
  }
}

/// 检测变体：带固定置信度阈值的目标检测，取置信度最高的一个框
pub struct MaterialDetector {
  runner: OrtRunner,
  input_size: u32,
  confidence_threshold: f32,
  nms_threshold: f32,
}

impl Model for MaterialDetector {
  type Input = RgbImage;
  type Output = MaterialDetection;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = NchwFrame::from_rgb(input, self.input_size, NORM_MEAN, NORM_STD);
    let output = self.runner.run(&frame)?;
    let result = decode_material_detections(
      &output,
      self.input_size,
      frame.source_width(),
      frame.source_height(),
      self.confidence_threshold,
      self.nms_threshold,
    )?;
    debug!(
      "二级材质结果: {:?} (置信度 {:.4}, 框数 {})",
      result.kind.map(|k| k.to_label_str()),
      result.confidence,
      result.detection_count
    );
    Ok(result)
  }
}

/// 解码分类变体输出，detection_count 恒为 1
pub fn decode_material_logits(logits: &[f32]) -> Result<MaterialDetection, InferenceError> {
  if logits.len() != MaterialKind::VOCABULARY.len() {
    return Err(InferenceError::BadOutput(format!(
      "输出单元数不符: 期望 {}, 实际 {}",
      MaterialKind::VOCABULARY.len(),
      logits.len()
    )));
  }

  let probabilities = softmax(logits);
  let (class_id, confidence) = argmax(&probabilities);
  let kind = MaterialKind::from_label_id(class_id)
    .ok_or_else(|| InferenceError::BadOutput(format!("类别下标越界: {class_id}")))?;

  Ok(MaterialDetection {
    kind: Some(kind),
    confidence,
    class_id: Some(class_id),
    bbox: None,
    detection_count: 1,
  })
}

#[derive(Debug, Clone)]
struct Candidate {
  class_id: usize,
  score: f32,
  bbox: [f32; 4],
}

/// 解码检测变体输出。
/// 输出布局为 [1, 4 + 类别数, 候选框数]，框为 cx/cy/w/h（模型输入坐标系），
/// 坐标最终换算回原图像素。没有框超过阈值时返回空结果，这不是错误。
pub fn decode_material_detections(
  output: &[f32],
  input_size: u32,
  source_width: u32,
  source_height: u32,
  confidence_threshold: f32,
  nms_threshold: f32,
) -> Result<MaterialDetection, InferenceError> {
  let num_classes = MaterialKind::VOCABULARY.len();
  let attrs = 4 + num_classes;
  if output.is_empty() || output.len() % attrs != 0 {
    return Err(InferenceError::BadOutput(format!(
      "检测输出长度 {} 无法按 {} 个属性切分",
      output.len(),
      attrs
    )));
  }
  let num_anchors = output.len() / attrs;
  let side = input_size as f32;

  let mut candidates = Vec::new();
  for i in 0..num_anchors {
    // 找到最高类别分数
    let mut best_score = 0.0f32;
    let mut best_class = 0usize;
    for c in 0..num_classes {
      let score = output[(4 + c) * num_anchors + i];
      if score > best_score {
        best_score = score;
        best_class = c;
      }
    }

    if best_score < confidence_threshold {
      continue;
    }

    let cx = output[i];
    let cy = output[num_anchors + i];
    let w = output[2 * num_anchors + i];
    let h = output[3 * num_anchors + i];

    let x_min = (cx - w / 2.0).clamp(0.0, side);
    let y_min = (cy - h / 2.0).clamp(0.0, side);
    let x_max = (cx + w / 2.0).clamp(0.0, side);
    let y_max = (cy + h / 2.0).clamp(0.0, side);

    candidates.push(Candidate {
      class_id: best_class,
      score: best_score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  // 稳定排序：置信度相同的框保持检测器输出顺序，保证结果可复现
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
  let kept = nms(candidates, nms_threshold);

  let Some(best) = kept.first() else {
    return Ok(MaterialDetection::none());
  };

  let kind = MaterialKind::from_label_id(best.class_id)
    .ok_or_else(|| InferenceError::BadOutput(format!("类别下标越界: {}", best.class_id)))?;

  // 缩放回原始图像尺寸
  let scale_x = source_width as f32 / side;
  let scale_y = source_height as f32 / side;
  let bbox = [
    best.bbox[0] * scale_x,
    best.bbox[1] * scale_y,
    best.bbox[2] * scale_x,
    best.bbox[3] * scale_y,
  ];

  Ok(MaterialDetection {
    kind: Some(kind),
    confidence: best.score,
    class_id: Some(best.class_id),
    bbox: Some(bbox),
    detection_count: kept.len(),
  })
}

/// 非极大值抑制，输入须已按置信度降序排列
fn nms(mut candidates: Vec<Candidate>, nms_threshold: f32) -> Vec<Candidate> {
  let mut result = Vec::new();

  while !candidates.is_empty() {
    let best = candidates.remove(0);
    candidates.retain(|other| {
      if other.class_id != best.class_id {
        return true;
      }
      iou(&best.bbox, &other.bbox) < nms_threshold
    });
    result.push(best);
  }

  result
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NC: usize = 4;

  /// 构造 [1, 4+NC, N] 布局的检测输出
  fn build_output(anchors: &[([f32; 4], [f32; NC])]) -> Vec<f32> {
    let n = anchors.len();
    let mut output = vec![0.0f32; (4 + NC) * n];
    for (i, (bbox, scores)) in anchors.iter().enumerate() {
      for a in 0..4 {
        output[a * n + i] = bbox[a];
      }
      for c in 0..NC {
        output[(4 + c) * n + i] = scores[c];
      }
    }
    output
  }

  #[test]
  fn no_box_above_threshold_is_valid_empty_result() {
    let output = build_output(&[
      ([130.0, 130.0, 40.0, 40.0], [0.2, 0.1, 0.0, 0.0]),
      ([60.0, 60.0, 20.0, 20.0], [0.0, 0.24, 0.1, 0.0]),
    ]);
    let result =
      decode_material_detections(&output, 260, 640, 480, DETECT_CONFIDENCE_THRESH, DETECT_NMS_IOU)
        .unwrap();

    assert_eq!(result, MaterialDetection::none());
  }

  #[test]
  fn best_box_wins_and_survivors_are_counted() {
    let output = build_output(&[
      // PET_bottle，最高分
      ([130.0, 130.0, 100.0, 100.0], [0.0, 0.77, 0.0, 0.0]),
      // Aluminum_Cans，另一处位置，保留
      ([30.0, 30.0, 20.0, 20.0], [0.5, 0.0, 0.0, 0.0]),
      // 低于阈值，忽略
      ([200.0, 200.0, 10.0, 10.0], [0.0, 0.0, 0.2, 0.0]),
    ]);
    let result =
      decode_material_detections(&output, 260, 260, 260, DETECT_CONFIDENCE_THRESH, DETECT_NMS_IOU)
        .unwrap();

    assert_eq!(result.kind, Some(MaterialKind::PetBottle));
    assert_eq!(result.class_id, Some(1));
    assert!((result.confidence - 0.77).abs() < 1e-6);
    assert_eq!(result.detection_count, 2);

    let bbox = result.bbox.unwrap();
    assert!((bbox[0] - 80.0).abs() < 1e-3 && (bbox[2] - 180.0).abs() < 1e-3);
  }

  #[test]
  fn overlapping_boxes_of_same_class_are_suppressed() {
    let output = build_output(&[
      ([130.0, 130.0, 100.0, 100.0], [0.0, 0.9, 0.0, 0.0]),
      // 与上一个框几乎重合的低分重复框
      ([132.0, 131.0, 100.0, 100.0], [0.0, 0.6, 0.0, 0.0]),
    ]);
    let result =
      decode_material_detections(&output, 260, 260, 260, DETECT_CONFIDENCE_THRESH, DETECT_NMS_IOU)
        .unwrap();

    assert_eq!(result.detection_count, 1);
    assert!((result.confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn exact_score_ties_resolve_to_first_output_order() {
    let output = build_output(&[
      ([30.0, 30.0, 20.0, 20.0], [0.0, 0.0, 0.5, 0.0]),
      ([200.0, 200.0, 20.0, 20.0], [0.0, 0.0, 0.0, 0.5]),
    ]);
    let result =
      decode_material_detections(&output, 260, 260, 260, DETECT_CONFIDENCE_THRESH, DETECT_NMS_IOU)
        .unwrap();

    // 并列时取检测器输出顺序在前者
    assert_eq!(result.kind, Some(MaterialKind::CartonBox));
  }

  #[test]
  fn bbox_scales_back_to_source_resolution() {
    let output = build_output(&[([130.0, 130.0, 260.0, 260.0], [0.0, 0.8, 0.0, 0.0])]);
    let result =
      decode_material_detections(&output, 260, 520, 1040, DETECT_CONFIDENCE_THRESH, DETECT_NMS_IOU)
        .unwrap();

    let bbox = result.bbox.unwrap();
    assert_eq!(bbox, [0.0, 0.0, 520.0, 1040.0]);
  }

  #[test]
  fn malformed_output_is_inference_error() {
    let err = decode_material_detections(&[0.0; 7], 260, 260, 260, 0.25, 0.45).unwrap_err();
    assert!(matches!(err, InferenceError::BadOutput(_)));
  }

  #[test]
  fn classification_variant_reports_single_implicit_detection() {
    let result = decode_material_logits(&[0.1, 0.2, 0.3, 2.0]).unwrap();
    assert_eq!(result.kind, Some(MaterialKind::CartonDrink));
    assert_eq!(result.class_id, Some(3));
    assert_eq!(result.bbox, None);
    assert_eq!(result.detection_count, 1);
  }

  #[test]
  fn classification_variant_rejects_stale_checkpoint_width() {
    let err = decode_material_logits(&[0.1; 6]).unwrap_err();
    assert!(matches!(err, InferenceError::BadOutput(_)));
  }
}
