// 该文件是 Fenjian （分拣） 项目的一部分。
// src/model/onnx.rs - ONNX 推理上下文
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ort::session::{Session, builder::GraphOptimizationLevel};
use tracing::{debug, info};

use crate::frame::{NORM_MEAN, NORM_STD, NchwFrame};
use crate::model::{Device, InferenceError, ModelLoadError};

/// 包装单输入单输出的 ONNX 会话。
/// 会话对只读前向推理是可重入的，因此 `run` 取 `&self`，
/// 多个调用方可共享同一个已加载的模型实例。
pub struct OrtRunner {
  // ort 2.0.0-rc.10 起 `Session::run` 要求 `&mut self`，
  // 用互斥锁做内部可变以维持 `run(&self)` 的共享调用约定
  session: Mutex<Session>,
  input_name: String,
}

impl OrtRunner {
  pub fn load(path: &Path, device: Device, num_threads: usize) -> Result<Self, ModelLoadError> {
    info!("加载模型文件: {}", path.display());
    if !path.is_file() {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型文件不存在: {}",
        path.display()
      )));
    }

    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(num_threads)?;

    let builder = match device {
      Device::Cpu => builder,
      #[cfg(feature = "cuda")]
      Device::Cuda(id) => {
        use ort::execution_providers::CUDAExecutionProvider;
        info!("注册 CUDA 执行提供器 (设备 {})", id);
        builder.with_execution_providers([
          CUDAExecutionProvider::default()
            .with_device_id(id as i32)
            .build(),
        ])?
      }
      #[cfg(not(feature = "cuda"))]
      Device::Cuda(id) => {
        // 未编译 cuda 特性时退回 CPU，不阻止进程启动
        tracing::warn!("请求了 CUDA 设备 {}，但未启用 cuda 特性，退回 CPU", id);
        builder
      }
    };

    let session = builder.commit_from_file(path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| ModelLoadError::ModelInvalid("模型没有输入张量".to_string()))?;
    debug!("模型输入张量: {}", input_name);

    info!("模型加载完成: {}", path.display());
    Ok(OrtRunner {
      session: Mutex::new(session),
      input_name,
    })
  }

  /// 执行一次前向推理，返回首个输出张量的数据
  pub fn run(&self, frame: &NchwFrame) -> Result<Vec<f32>, InferenceError> {
    let shape = frame.shape();
    let value = ort::value::Value::from_array((
      shape.as_slice(),
      frame.as_slice().to_vec().into_boxed_slice(),
    ))?;

    debug!("执行模型推理");
    let mut session = self.session.lock().expect("session mutex poisoned");
    let outputs = session.run(ort::inputs![self.input_name.as_str() => value])?;

    let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
  }

  /// 启动时用全零输入跑一次前向，返回输出单元数。
  /// 用于在进入服务前校验权重输出形状与词表长度一致，
  /// 形状不符的旧权重在这里失败，而不是被悄悄截断。
  pub fn probe_output_units(&self, input_size: u32) -> Result<usize, ModelLoadError> {
    let zero = RgbImage::new(input_size, input_size);
    let frame = NchwFrame::from_rgb(&zero, input_size, NORM_MEAN, NORM_STD);
    let output = self.run(&frame).map_err(|e| match e {
      InferenceError::Ort(e) => ModelLoadError::Ort(e),
      InferenceError::BadOutput(msg) => ModelLoadError::ModelInvalid(msg),
    })?;
    debug!("启动自检输出单元数: {}", output.len());
    Ok(output.len())
  }
}
