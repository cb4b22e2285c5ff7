// 该文件是 Fenjian （分拣） 项目的一部分。
// src/bin/batch_classify.rs - 目录批量分类
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use fenjian::{
  FromUrl,
  input::is_image_path,
  model::{Device, MaterialModelBuilder, WasteClassifierBuilder},
  pipeline::Pipeline,
};

/// Fenjian 批量分类参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 一级分类模型 (waste-cls:/path)
  #[arg(long, value_name = "MODEL")]
  pub classifier: Url,

  /// 二级材质模型 (material-cls:/path 或 material-det:/path)
  #[arg(long, value_name = "MODEL")]
  pub material: Url,

  /// 待分类图像所在目录
  #[arg(long, value_name = "DIR")]
  pub directory: PathBuf,

  /// 推理设备 (cpu / cuda / cuda:N)
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 每个模型的推理线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("正在加载模型...");
  let classifier = WasteClassifierBuilder::from_url(&args.classifier)?
    .device(args.device)
    .num_threads(args.threads)
    .build()?;
  let material = MaterialModelBuilder::from_url(&args.material)?
    .device(args.device)
    .num_threads(args.threads)
    .build()?;
  info!("模型加载完成");

  let pipeline = Pipeline::new(classifier, material);

  // 目录条目按文件名排序，多次运行输出顺序一致
  let mut entries: Vec<PathBuf> = std::fs::read_dir(&args.directory)?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| is_image_path(path))
    .collect();
  entries.sort();

  if entries.is_empty() {
    warn!("目录中没有可识别的图像文件: {}", args.directory.display());
    return Ok(());
  }

  let mut total = 0usize;
  let mut failed = 0usize;

  let now = std::time::Instant::now();
  for path in &entries {
    let result = pipeline.run(path);
    if result.is_failed() {
      failed += 1;
    }
    total += 1;

    // 每张图一行 JSON，便于下游采集
    println!(
      "{}",
      serde_json::to_string(&serde_json::json!({
        "image": path.display().to_string(),
        "result": result,
      }))?
    );
  }

  info!("批处理完成，耗时: {:.2?}", now.elapsed());
  info!("总数: {}", total);
  info!("失败: {}", failed);

  Ok(())
}
