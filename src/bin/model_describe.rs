// 该文件是 Guanlan （观澜） 项目的一部分。
// src/bin/model_describe.rs - 模型信息查看
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use guanlan::model::RknnModelBuilder;

/// 打印 RKNN 模型的输入输出概要
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型文件路径: {}", args.model.display());

  let model = RknnModelBuilder::new(&args.model)
    .build()
    .with_context(|| format!("无法加载模型 {}", args.model.display()))?;
  let description = model.description();

  println!("模型: {}", args.model.display());
  println!(
    "API 版本: {}",
    description.api_version.as_deref().unwrap_or("未知")
  );
  println!(
    "驱动版本: {}",
    description.driver_version.as_deref().unwrap_or("未知")
  );
  println!("输入数量: {}", description.num_inputs);
  println!("输出数量: {}", description.num_outputs);

  Ok(())
}
