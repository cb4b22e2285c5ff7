// 该文件是 Fenjian （分拣） 项目的一部分。
// src/pipeline.rs - 两级分类流水线编排
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

use std::path::Path;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  input::{self, DecodeError},
  model::{Classification, MaterialDetection, Model, WasteCategory, WithLabel},
  scoring,
};

/// 当前模型代次与策略表版本，写入每条结果便于审计
pub const MODEL_VERSION: &str = "v1.0.0";

/// 流水线最终产物，构造后不再变更，由调用方持久化。
/// resell_value / co2_saved 任何情况下都有值，流水线整体失败时
/// 降级为回退记录而不是缺字段。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
  pub classification: String,
  pub confidence: f32,
  pub material_type: Option<String>,
  pub resell_value: f64,
  pub co2_saved: f64,
  pub resell_places: Vec<String>,
  pub recyclable: bool,
  pub model_version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl PipelineResult {
  /// 回退记录：解码或推理失败时返回给调用方的完整占位结果
  pub fn fallback(error: String) -> Self {
    PipelineResult {
      classification: "unknown".to_string(),
      confidence: 0.0,
      material_type: None,
      resell_value: 0.0,
      co2_saved: 0.0,
      resell_places: Vec::new(),
      recyclable: false,
      model_version: MODEL_VERSION.to_string(),
      error: Some(error),
    }
  }

  pub fn is_failed(&self) -> bool {
    self.error.is_some()
  }
}

#[derive(Error, Debug)]
enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("一级分类失败: {0}")]
  Classify(Box<dyn std::error::Error + Send + Sync>),
  #[error("二级材质识别失败: {0}")]
  Material(Box<dyn std::error::Error + Send + Sync>),
}

/// 两级流水线上下文。
/// 模型在进程启动时加载一次并由本结构持有，此后只读共享，
/// 推理入口取 `&self`，不存在惰性重载。
pub struct Pipeline<C, M> {
  classifier: C,
  material: M,
}

impl<C, M> Pipeline<C, M>
where
  C: Model<Input = RgbImage, Output = Classification>,
  M: Model<Input = RgbImage, Output = MaterialDetection>,
  C::Error: std::error::Error + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(classifier: C, material: M) -> Self {
    Pipeline {
      classifier,
      material,
    }
  }

  /// 对一张已落盘的图像执行 一级分类 → (仅 inorganic) 二级识别 → 估值。
  /// 永不向调用方抛错：任何阶段失败都转换为回退记录，
  /// 调用方总能拿到一条结构完整的结果。
  pub fn run(&self, image_path: &Path) -> PipelineResult {
    let now = std::time::Instant::now();
    let result = match self.run_inner(image_path) {
      Ok(result) => result,
      Err(e) => {
        error!("流水线处理失败: {} ({})", e, image_path.display());
        PipelineResult::fallback(e.to_string())
      }
    };
    info!(
      "流水线完成: {} -> {} (耗时 {:.2?})",
      image_path.display(),
      result.classification,
      now.elapsed()
    );
    result
  }

  fn run_inner(&self, image_path: &Path) -> Result<PipelineResult, PipelineError> {
    debug!("开始处理图像: {}", image_path.display());
    let image = input::load_rgb_image(image_path)?;

    let classification = self
      .classifier
      .infer(&image)
      .map_err(|e| PipelineError::Classify(Box::new(e)))?;
    info!(
      "一级分类: {} (置信度 {:.4})",
      classification.category.to_label_str(),
      classification.confidence
    );

    // 二级模型只在一级结果为 inorganic 时运行
    let material = if classification.category == WasteCategory::Inorganic {
      let detection = self
        .material
        .infer(&image)
        .map_err(|e| PipelineError::Material(Box::new(e)))?;
      info!(
        "二级材质: {:?} (置信度 {:.4})",
        detection.kind.map(|k| k.to_label_str()),
        detection.confidence
      );
      Some(detection)
    } else {
      debug!("跳过二级识别（一级结果非 inorganic）");
      None
    };

    let kind = material.as_ref().and_then(|detection| detection.kind);
    let estimate = scoring::score(classification.category, kind);

    Ok(PipelineResult {
      classification: classification.category.to_label_str().to_string(),
      confidence: classification.confidence,
      material_type: kind.map(|k| k.to_label_str().to_string()),
      resell_value: estimate.resell_value,
      co2_saved: estimate.co2_saved,
      resell_places: estimate
        .resell_places
        .iter()
        .map(|place| place.to_string())
        .collect(),
      recyclable: estimate.recyclable,
      model_version: MODEL_VERSION.to_string(),
      error: None,
    })
  }
}
