// 该文件是 Fenjian （分拣） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + Copy + std::fmt::Debug {
  /// 固定词表，下标即模型输出单元的下标
  const VOCABULARY: &'static [&'static str];

  fn from_label_id(id: usize) -> Option<Self>;

  fn to_label_str(&self) -> &'static str;

  fn from_label_str(label: &str) -> Option<Self> {
    Self::VOCABULARY
      .iter()
      .position(|known| *known == label)
      .and_then(Self::from_label_id)
  }
}

/// 一级分类词表，下标顺序固定，跨权重版本不得变动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasteCategory {
  Organic,
  Inorganic,
  Hazardous,
}

impl WithLabel for WasteCategory {
  const VOCABULARY: &'static [&'static str] = &["organic", "inorganic", "hazardous"];

  fn from_label_id(id: usize) -> Option<Self> {
    match id {
      0 => Some(WasteCategory::Organic),
      1 => Some(WasteCategory::Inorganic),
      2 => Some(WasteCategory::Hazardous),
      _ => None,
    }
  }

  fn to_label_str(&self) -> &'static str {
    match self {
      WasteCategory::Organic => "organic",
      WasteCategory::Inorganic => "inorganic",
      WasteCategory::Hazardous => "hazardous",
    }
  }
}

/// 二级材质词表，仅在一级结果为 inorganic 时使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
  AluminumCans,
  PetBottle,
  CartonBox,
  CartonDrink,
}

impl WithLabel for MaterialKind {
  const VOCABULARY: &'static [&'static str] =
    &["Aluminum_Cans", "PET_bottle", "carton_box", "carton_drink"];

  fn from_label_id(id: usize) -> Option<Self> {
    match id {
      0 => Some(MaterialKind::AluminumCans),
      1 => Some(MaterialKind::PetBottle),
      2 => Some(MaterialKind::CartonBox),
      3 => Some(MaterialKind::CartonDrink),
      _ => None,
    }
  }

  fn to_label_str(&self) -> &'static str {
    match self {
      MaterialKind::AluminumCans => "Aluminum_Cans",
      MaterialKind::PetBottle => "PET_bottle",
      MaterialKind::CartonBox => "carton_box",
      MaterialKind::CartonDrink => "carton_drink",
    }
  }
}

/// 一级分类结果，每张图像产出一次，产出后不可变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
  pub category: WasteCategory,
  pub confidence: f32,
  pub class_id: usize,
}

/// 二级材质结果。
/// 检测器在阈值之上一个框都没有时，kind/class_id/bbox 为空、
/// confidence 为 0.0，这是合法结果而非错误。
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDetection {
  pub kind: Option<MaterialKind>,
  pub confidence: f32,
  pub class_id: Option<usize>,
  /// 原图像素坐标系下的 [x_min, y_min, x_max, y_max]
  pub bbox: Option<[f32; 4]>,
  pub detection_count: usize,
}

impl MaterialDetection {
  pub fn none() -> Self {
    MaterialDetection {
      kind: None,
      confidence: 0.0,
      class_id: None,
      bbox: None,
      detection_count: 0,
    }
  }
}

/// 推理设备，进程启动时确定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(u32),
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cpu" => Ok(Device::Cpu),
      "cuda" => Ok(Device::Cuda(0)),
      other => match other.strip_prefix("cuda:") {
        Some(id) => id
          .parse::<u32>()
          .map(Device::Cuda)
          .map_err(|_| format!("无效的 CUDA 设备编号: {other}")),
        None => Err(format!("未知设备: {other} (支持 cpu / cuda / cuda:N)")),
      },
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("ONNX 运行时错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("标签表错误 {}: {cause}", .path.display())]
  LabelTable { path: PathBuf, cause: String },
  #[error("模型输出单元数与词表不符: 期望 {expected}, 实际 {actual}")]
  OutputShape { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("ONNX 运行时错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型输出异常: {0}")]
  BadOutput(String),
}

/// 与权重文件同级存放的版本化标签表
#[derive(Debug, Clone, Deserialize)]
pub struct LabelTable {
  pub version: String,
  pub labels: Vec<String>,
}

impl LabelTable {
  /// 默认标签表路径：权重文件同目录下的 `<名称>.labels.toml`
  pub fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("labels.toml")
  }

  pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
    let text = std::fs::read_to_string(path)?;
    let table: LabelTable = toml::from_str(&text).map_err(|e| ModelLoadError::LabelTable {
      path: path.to_path_buf(),
      cause: e.to_string(),
    })?;
    info!("标签表已加载: {} (版本 {})", path.display(), table.version);
    Ok(table)
  }

  /// 校验标签表与固定词表逐项一致。
  /// 下标顺序也必须一致，否则模型输出下标与标签会错位。
  pub fn validate_against<T: WithLabel>(&self, path: &Path) -> Result<(), ModelLoadError> {
    if self.labels.len() != T::VOCABULARY.len() {
      return Err(ModelLoadError::LabelTable {
        path: path.to_path_buf(),
        cause: format!(
          "标签数量不符: 期望 {}, 实际 {}",
          T::VOCABULARY.len(),
          self.labels.len()
        ),
      });
    }
    for (id, label) in self.labels.iter().enumerate() {
      if label != T::VOCABULARY[id] {
        return Err(ModelLoadError::LabelTable {
          path: path.to_path_buf(),
          cause: format!(
            "下标 {} 处标签不符: 期望 '{}', 实际 '{}'",
            id,
            T::VOCABULARY[id],
            label
          ),
        });
      }
    }
    Ok(())
  }

  /// 读取权重文件旁的标签表并校验；文件不存在时退回内置词表
  pub fn load_for_model<T: WithLabel>(
    model_path: &Path,
    explicit: Option<&Path>,
  ) -> Result<(), ModelLoadError> {
    let sidecar = LabelTable::sidecar_path(model_path);
    let path = match explicit {
      Some(path) => path.to_path_buf(),
      None if sidecar.exists() => sidecar,
      None => {
        warn!(
          "未找到标签表 {}，使用内置词表 {:?}",
          sidecar.display(),
          T::VOCABULARY
        );
        return Ok(());
      }
    };
    let table = LabelTable::load(&path)?;
    table.validate_against::<T>(&path)
  }
}

/// 数值稳定的 softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::MIN, f32::max);
  let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|x| x / sum).collect()
}

/// 取概率最大的类别，概率相同取下标最小者，保证确定性
pub fn argmax(probabilities: &[f32]) -> (usize, f32) {
  let mut best_id = 0usize;
  let mut best = f32::MIN;
  for (id, &p) in probabilities.iter().enumerate() {
    if p > best {
      best = p;
      best_id = id;
    }
  }
  (best_id, best)
}

mod classifier;
mod material;
mod onnx;

pub use self::classifier::{WasteClassifier, WasteClassifierBuilder};
pub use self::material::{
  MaterialClassifier, MaterialDetector, MaterialModel, MaterialModelBuilder,
};

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn softmax_sums_to_one_and_keeps_order() {
    let probs = softmax(&[1.0, 3.0, 2.0]);
    let sum: f32 = probs.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert!(probs[1] > probs[2] && probs[2] > probs[0]);
  }

  #[test]
  fn softmax_is_stable_for_large_logits() {
    let probs = softmax(&[1000.0, 1001.0]);
    assert!(probs.iter().all(|p| p.is_finite()));
    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
  }

  #[test]
  fn argmax_breaks_ties_on_first_index() {
    let (id, p) = argmax(&[0.4, 0.4, 0.2]);
    assert_eq!(id, 0);
    assert!((p - 0.4).abs() < 1e-6);
  }

  #[test]
  fn waste_vocabulary_order_is_fixed() {
    assert_eq!(WasteCategory::VOCABULARY, &["organic", "inorganic", "hazardous"]);
    assert_eq!(WasteCategory::from_label_id(1), Some(WasteCategory::Inorganic));
    assert_eq!(WasteCategory::Hazardous.to_label_str(), "hazardous");
    assert_eq!(WasteCategory::from_label_id(3), None);
  }

  #[test]
  fn material_labels_round_trip() {
    for (id, label) in MaterialKind::VOCABULARY.iter().enumerate() {
      let kind = MaterialKind::from_label_id(id).unwrap();
      assert_eq!(kind.to_label_str(), *label);
      assert_eq!(MaterialKind::from_label_str(label), Some(kind));
    }
  }

  #[test]
  fn device_parses_cpu_and_cuda() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
    assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
    assert!("npu".parse::<Device>().is_err());
  }

  #[test]
  fn label_table_rejects_reordered_vocabulary() {
    let mut file = tempfile::NamedTempFile::with_suffix(".labels.toml").unwrap();
    // 旧权重用过的顺序，下标错位，必须在加载时被拒绝
    writeln!(
      file,
      "version = \"v0.9.0\"\nlabels = [\"inorganic\", \"hazardous\", \"organic\"]"
    )
    .unwrap();

    let table = LabelTable::load(file.path()).unwrap();
    let err = table.validate_against::<WasteCategory>(file.path()).unwrap_err();
    assert!(matches!(err, ModelLoadError::LabelTable { .. }));
  }

  #[test]
  fn label_table_accepts_canonical_order() {
    let mut file = tempfile::NamedTempFile::with_suffix(".labels.toml").unwrap();
    writeln!(
      file,
      "version = \"v1.0.0\"\nlabels = [\"organic\", \"inorganic\", \"hazardous\"]"
    )
    .unwrap();

    let table = LabelTable::load(file.path()).unwrap();
    table.validate_against::<WasteCategory>(file.path()).unwrap();
  }
}
