//! Non-Maximum Suppression (NMS) に関するモジュール

use log::debug;

use crate::detection_result::{BoundingBox, ObjectDetection};
use crate::postprocess::Candidates;

/// 2 つの矩形の IoU を計算します。
///
/// 両方の面積が 0 の場合は同一の矩形とみなし 1 を返します。
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let area_a = a.area();
    let area_b = b.area();
    if area_a + area_b == 0 {
        return 1.0;
    }
    let inter = a.intersect(b).map_or(0, |r| r.area());
    inter as f32 / (area_a + area_b - inter) as f32
}

/// 貪欲法で NMS を行い、残すボックスのインデックスを返します。
///
/// # Args
/// * `boxes` - バウンディングボックス
/// * `confidences` - `boxes` に対応するコンフィデンス
/// * `score_threshold` - この値以下のボックスは対象外
/// * `nms_threshold` - 採用済みのボックスとの IoU がこの値を超えたら捨てる
///
/// # Return
/// * 採用したインデックス (コンフィデンスの降順、同値は元の順)
pub fn nms_boxes(
    boxes: &[BoundingBox],
    confidences: &[f32],
    score_threshold: f32,
    nms_threshold: f32,
) -> Vec<usize> {
    let n = boxes.len().min(confidences.len());
    let mut order: Vec<usize> = (0..n)
        .filter(|&i| confidences[i] > score_threshold)
        .collect();
    order.sort_by(|&a, &b| confidences[b].total_cmp(&confidences[a]));

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for i in order {
        if keep
            .iter()
            .all(|&k| iou(&boxes[i], &boxes[k]) <= nms_threshold)
        {
            keep.push(i);
        }
    }
    keep
}

/// 検出候補に NMS を適用し、最終的な検出結果を返します。
///
/// 候補が空の場合は NMS を実行せずに空の結果を返します。
///
/// # Args
/// * `candidates` - 閾値を通過した検出候補
/// * `confidence_threshold` - コンフィデンスの閾値
/// * `nms_threshold` - NMS の閾値
///
/// # Return
/// * 検出結果 (NMS の優先順)
pub fn suppress(
    candidates: Candidates,
    confidence_threshold: f32,
    nms_threshold: f32,
) -> Vec<ObjectDetection> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let indices = nms_boxes(
        &candidates.boxes,
        &candidates.confidences,
        confidence_threshold,
        nms_threshold,
    );
    debug!("kept {} of {} candidates", indices.len(), candidates.len());

    let mut slots: Vec<Option<ObjectDetection>> =
        candidates.detections.into_iter().map(Some).collect();
    indices
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect()
}
