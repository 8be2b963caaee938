// 该文件是 Guanlan （观澜） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use tracing::debug;

use crate::{
  letterbox::{LetterboxGeometry, inverse_map},
  model::{DetectItem, DetectResult, RawPrediction},
};

/// 取最大值及其下标，相同的最大值取下标最小者
///
/// 只有严格大于当前最大值才会替换，NaN 不会覆盖已有的最大值。
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (idx, &score) in scores.iter().enumerate() {
    match best {
      Some((_, max)) if !(score > max) => {}
      _ => best = Some((idx, score)),
    }
  }
  best
}

/// 将模型原始输出转换为原图坐标下的检测结果
///
/// 每个输入下标产生一个结果，不做任何阈值过滤。
pub fn postprocess(
  prediction: &RawPrediction,
  frame_height: u32,
  frame_width: u32,
  geometry: &LetterboxGeometry,
) -> DetectResult {
  debug!("后处理模型输出");
  let mut items = Vec::with_capacity(prediction.len());

  for (normalized, scores) in prediction.iter() {
    // RawPrediction 保证置信度向量非空
    let Some((class_id, confidence)) = argmax(scores) else {
      continue;
    };
    let pixel = inverse_map(normalized, geometry, frame_height, frame_width);
    debug!(
      "检测到目标 - 类别: {}, 置信度: {:.2}, 原始坐标: ({:.2}, {:.2}, {:.2}, {:.2}), 映射后坐标: ({:.2}, {:.2}, {:.2}, {:.2})",
      class_id,
      confidence,
      normalized.cx,
      normalized.cy,
      normalized.w,
      normalized.h,
      pixel.x,
      pixel.y,
      pixel.width,
      pixel.height
    );

    items.push(DetectItem {
      class_id,
      confidence,
      corners: pixel.corners(),
    });
  }

  debug!("检测到 {} 个物体", items.len());
  DetectResult::from(items)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::letterbox::{NormalizedBox, compute_geometry};
  use approx::assert_abs_diff_eq;

  #[test]
  fn argmax_picks_first_maximum() {
    assert_eq!(argmax(&[0.1, 0.9, 0.05]), Some((1, 0.9)));
    assert_eq!(argmax(&[0.4, 0.7, 0.7, 0.2]), Some((1, 0.7)));
    assert_eq!(argmax(&[0.3]), Some((0, 0.3)));
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn argmax_ignores_nan_after_maximum() {
    assert_eq!(argmax(&[0.5, f32::NAN, 0.2]), Some((0, 0.5)));
    assert_eq!(argmax(&[0.1, f32::NAN, 0.7]), Some((2, 0.7)));
  }

  #[test]
  fn selects_best_class_and_maps_corners() {
    let geometry = compute_geometry(720, 1280).unwrap();
    let prediction = RawPrediction::new(
      vec![NormalizedBox::from([0.5, 0.5, 0.2, 0.1])],
      vec![vec![0.1, 0.9, 0.05]],
    )
    .unwrap();

    let result = postprocess(&prediction, 720, 1280, &geometry);
    assert_eq!(result.len(), 1);

    let item = &result.items[0];
    assert_eq!(item.class_id, 1);
    assert_abs_diff_eq!(item.confidence, 0.9);
    let [x0, y0] = item.top_left();
    let [x1, y1] = item.bottom_right();
    assert_abs_diff_eq!(x0, 512.0, epsilon = 1e-3);
    assert_abs_diff_eq!(y0, 296.0, epsilon = 1e-3);
    assert_abs_diff_eq!(x1, 768.0, epsilon = 1e-3);
    assert_abs_diff_eq!(y1, 424.0, epsilon = 1e-3);
  }

  #[test]
  fn one_item_per_detection_without_thresholding() {
    let geometry = compute_geometry(480, 640).unwrap();
    let prediction = RawPrediction::new(
      vec![
        NormalizedBox::from([0.1, 0.5, 0.05, 0.05]),
        NormalizedBox::from([0.9, 0.5, 0.05, 0.05]),
      ],
      vec![vec![0.01, 0.02], vec![0.6, 0.3]],
    )
    .unwrap();

    let result = postprocess(&prediction, 480, 640, &geometry);
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].class_id, 1);
    assert_abs_diff_eq!(result.items[0].confidence, 0.02);
    assert_eq!(result.items[1].class_id, 0);
  }

  #[test]
  fn empty_prediction_yields_empty_result() {
    let geometry = compute_geometry(720, 1280).unwrap();
    let result = postprocess(&RawPrediction::empty(), 720, 1280, &geometry);
    assert!(result.is_empty());
  }
}
