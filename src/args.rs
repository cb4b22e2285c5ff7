// 该文件是 Fenjian （分拣） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use fenjian::model::Device;

/// Fenjian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 一级分类模型
  /// 格式: waste-cls:/path/to/model_major.onnx
  #[arg(long, value_name = "MODEL")]
  pub classifier: Url,

  /// 二级材质模型，方案名决定变体
  /// 格式: material-cls:/path/to/model.onnx 或 material-det:/path/to/model.onnx
  #[arg(long, value_name = "MODEL")]
  pub material: Url,

  /// 待分类图像路径
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,

  /// 推理设备 (cpu / cuda / cuda:N)
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 检测变体的最低置信度 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 每个模型的推理线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,
}
