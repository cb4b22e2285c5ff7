// 该文件是 Fenjian （分拣） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use fenjian::{
  FromUrl,
  model::{MaterialModelBuilder, WasteClassifierBuilder},
  pipeline::Pipeline,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("一级模型: {}", args.classifier);
  info!("二级模型: {}", args.material);
  info!("图像: {}", args.image.display());
  info!("设备: {:?}", args.device);

  // 模型加载失败直接退出，进程不允许在无模型状态下提供服务
  info!("正在加载模型...");
  let classifier = WasteClassifierBuilder::from_url(&args.classifier)?
    .device(args.device)
    .num_threads(args.threads)
    .build()?;
  let material = MaterialModelBuilder::from_url(&args.material)?
    .device(args.device)
    .num_threads(args.threads)
    .confidence_threshold(args.confidence)
    .build()?;
  info!("模型加载完成");

  let pipeline = Pipeline::new(classifier, material);

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = pipeline.run(&args.image);
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}
