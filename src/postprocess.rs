//! YOLOv3 の出力テンソルを検出候補に変換するためのモジュール

use std::collections::HashSet;

use log::{debug, warn};

use crate::detection_result::{BoundingBox, ObjectDetection};
use crate::error::{Result, YoloError};
use crate::neural_net::Tensor;

/// 行のうち、クラススコアが始まる列
const CLASS_SCORE_OFFSET: usize = 5;

/// 閾値を通過した検出候補
///
/// `boxes` と `confidences` は `detections` と同じ順序の並列配列で、NMS の入力になります。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub detections: Vec<ObjectDetection>,
    pub boxes: Vec<BoundingBox>,
    pub confidences: Vec<f32>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    fn push(&mut self, detection: ObjectDetection) {
        self.boxes.push(detection.bounding_box);
        self.confidences.push(detection.confidence);
        self.detections.push(detection);
    }
}

/// クラススコアの中で最大のものを探します。
///
/// 同じ値の場合は先に現れたインデックスが優先されます。
/// スコアが空、またはすべて 0 以下の場合は `(0, 0.0)` です。
///
/// # Args
/// * `scores` - クラススコアの配列
///
/// # Return
/// * (クラスID, コンフィデンス)
pub fn class_id_and_confidence(scores: &[f32]) -> (usize, f32) {
    let mut class_id = 0;
    let mut max = 0.0f32;
    for (i, &score) in scores.iter().enumerate() {
        if score > max {
            max = score;
            class_id = i;
        }
    }
    (class_id, max)
}

/// 正規化された `(cx, cy, w, h)` をフレームのピクセル座標に変換します。
///
/// 座標の計算は整数で行い、小数点以下は 0 方向に切り捨てます。
///
/// # Args
/// * `frame_width` - フレームの幅
/// * `frame_height` - フレームの高さ
/// * `row` - 出力テンソルの 1 行
///
/// # Return
/// * バウンディングボックス。列が 4 未満の場合は `(0, 0, 0, 0)`
pub fn calculate_bounding_box(frame_width: u32, frame_height: u32, row: &[f32]) -> BoundingBox {
    if row.len() < 4 {
        return BoundingBox::default();
    }
    // f32 -> i32 は飽和変換 (NaN は 0)。加減算は i64 で行い i32 に戻す
    let to_px = |v: f32, size: u32| i64::from((v * size as f32) as i32);
    let center_x = to_px(row[0], frame_width);
    let center_y = to_px(row[1], frame_height);
    let width = to_px(row[2], frame_width);
    let height = to_px(row[3], frame_height);
    let left = center_x - width / 2;
    let top = center_y - height / 2;
    BoundingBox::new(
        saturate(left),
        saturate(top),
        saturate(left + width),
        saturate(top + height),
    )
}

fn saturate(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// 出力テンソル群から検出候補を抽出します。
///
/// テンソルの順、行の順に走査します。除外リストに含まれるクラスは常に捨て、
/// それ以外は `confidence > confidence_threshold` の行だけを残します。
///
/// # Args
/// * `outputs` - エンジンの出力テンソル
/// * `frame_width`, `frame_height` - 元フレームのサイズ
/// * `labels` - ラベルリスト
/// * `confidence_threshold` - コンフィデンスの閾値
/// * `filter` - 除外するクラス名
///
/// # Return
/// * 検出候補。テンソルが f32 の行列として読めない場合はエラー
pub fn decode_outputs(
    outputs: &[Tensor],
    frame_width: u32,
    frame_height: u32,
    labels: &[String],
    confidence_threshold: f32,
    filter: &HashSet<String>,
) -> Result<Candidates> {
    let mut candidates = Candidates::default();

    for (index, output) in outputs.iter().enumerate() {
        let data = output.as_f32().ok_or_else(|| YoloError::TensorDecode {
            index,
            reason: format!("expected f32 elements, found {}", output.element_type()),
        })?;
        let cols = output.cols();
        if data.len() != output.rows() * cols {
            return Err(YoloError::TensorDecode {
                index,
                reason: format!(
                    "{} elements do not fill {}x{}",
                    data.len(),
                    output.rows(),
                    cols
                ),
            });
        }
        if data.is_empty() {
            continue;
        }
        debug!("output {}: {}x{}", index, output.rows(), cols);

        for row in data.chunks_exact(cols) {
            let scores = row.get(CLASS_SCORE_OFFSET..).unwrap_or(&[]);
            let (class_id, confidence) = class_id_and_confidence(scores);

            let Some(class_name) = labels.get(class_id) else {
                warn!("class id {} has no label ({} labels)", class_id, labels.len());
                return Err(YoloError::ClassOutOfRange {
                    class_id,
                    labels: labels.len(),
                });
            };
            if filter.contains(class_name) {
                continue;
            }
            if confidence > confidence_threshold {
                candidates.push(ObjectDetection {
                    class_id,
                    class_name: class_name.clone(),
                    bounding_box: calculate_bounding_box(frame_width, frame_height, row),
                    confidence,
                });
            }
        }
    }

    debug!("{} candidates above threshold", candidates.len());
    Ok(candidates)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::neural_net::TensorData;

    pub(crate) fn labels() -> Vec<String> {
        vec!["laptop".to_string(), "coffee".to_string()]
    }

    /// 2x2 フレームで (1, 1, 3, 3) になる laptop の行
    pub(crate) fn laptop_detection() -> Tensor {
        let mut t = Tensor::zeros(1, 10);
        t.set_f32_at(0, 0, 1.);
        t.set_f32_at(0, 1, 1.);
        t.set_f32_at(0, 2, 1.);
        t.set_f32_at(0, 3, 1.);
        t.set_f32_at(0, 5, 9.);
        t
    }

    /// 2x2 フレームで (-1, 1, 1, 3) になる coffee の行
    pub(crate) fn coffee_detection() -> Tensor {
        let mut t = Tensor::zeros(1, 10);
        t.set_f32_at(0, 1, 1.);
        t.set_f32_at(0, 2, 1.);
        t.set_f32_at(0, 3, 1.);
        t.set_f32_at(0, 6, 9.);
        t
    }

    fn decode(outputs: &[Tensor], threshold: f32, filter: &[&str]) -> Result<Candidates> {
        let filter = filter.iter().map(|s| s.to_string()).collect();
        decode_outputs(outputs, 2, 2, &labels(), threshold, &filter)
    }

    #[test]
    fn class_id_and_confidence_cases() {
        assert_eq!(class_id_and_confidence(&[]), (0, 0.));
        assert_eq!(class_id_and_confidence(&[99.9]), (0, 99.9));
        assert_eq!(class_id_and_confidence(&[70.0, 99.9]), (1, 99.9));
        assert_eq!(class_id_and_confidence(&[99.9, 70.0]), (0, 99.9));
    }

    #[test]
    fn tie_goes_to_lowest_index() {
        assert_eq!(class_id_and_confidence(&[0.2, 0.7, 0.7]), (1, 0.7));
    }

    #[test]
    fn non_positive_scores_give_zero() {
        assert_eq!(class_id_and_confidence(&[-1.0, 0.0]), (0, 0.));
    }

    #[test]
    fn bounding_box_from_normalized_row() {
        assert_eq!(
            calculate_bounding_box(2, 2, &[1., 1., 1., 1.]),
            BoundingBox::new(1, 1, 3, 3)
        );
    }

    #[test]
    fn short_row_gives_zero_box() {
        assert_eq!(
            calculate_bounding_box(2, 2, &[1., 1., 1.]),
            BoundingBox::new(0, 0, 0, 0)
        );
    }

    #[test]
    fn bounding_box_uses_frame_size() {
        // 640x480 フレームの中央、幅 0.25、高さ 0.5
        let b = calculate_bounding_box(640, 480, &[0.5, 0.5, 0.25, 0.5]);
        assert_eq!(b, BoundingBox::new(240, 120, 400, 360));
    }

    #[test]
    fn infinite_coordinates_saturate() {
        // cx = w = i32::MAX, left = i32::MAX - i32::MAX / 2
        let b = calculate_bounding_box(640, 480, &[f32::INFINITY, 0.5, f32::INFINITY, 0.5]);
        assert_eq!(b, BoundingBox::new(1_073_741_824, 120, i32::MAX, 360));

        let b = calculate_bounding_box(640, 480, &[0.5, f32::NEG_INFINITY, 0.25, f32::INFINITY]);
        assert_eq!(b.left, 240);
        assert_eq!(b.top, i32::MIN);
        assert_eq!(b.bottom, -1_073_741_824);
    }

    #[test]
    fn nan_coordinates_give_zero_box() {
        assert_eq!(
            calculate_bounding_box(640, 480, &[f32::NAN; 4]),
            BoundingBox::default()
        );
    }

    #[test]
    fn non_finite_row_is_decoded_without_panic() {
        let t = Tensor::from_f32(
            1,
            10,
            vec![f32::INFINITY, f32::NAN, f32::INFINITY, 1e30, 0., 9., 0., 0., 0., 0.],
        );
        let c = decode(&[t], 0., &[]).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.boxes[0].right, i32::MAX);
    }

    #[test]
    fn two_rows_two_candidates() {
        let c = decode(&[laptop_detection(), coffee_detection()], 0., &[]).unwrap();
        assert_eq!(
            c.detections,
            vec![
                ObjectDetection {
                    class_id: 0,
                    class_name: "laptop".into(),
                    bounding_box: BoundingBox::new(1, 1, 3, 3),
                    confidence: 9.,
                },
                ObjectDetection {
                    class_id: 1,
                    class_name: "coffee".into(),
                    bounding_box: BoundingBox::new(-1, 1, 1, 3),
                    confidence: 9.,
                },
            ]
        );
        assert_eq!(c.boxes, vec![BoundingBox::new(1, 1, 3, 3), BoundingBox::new(-1, 1, 1, 3)]);
        assert_eq!(c.confidences, vec![9., 9.]);
    }

    #[test]
    fn filtered_class_is_dropped() {
        let c = decode(&[coffee_detection()], 0., &["coffee"]).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn confidence_must_exceed_threshold() {
        assert!(decode(&[coffee_detection()], 999., &[]).unwrap().is_empty());
        assert!(decode(&[coffee_detection()], 9., &[]).unwrap().is_empty());
        assert_eq!(decode(&[coffee_detection()], 8.9, &[]).unwrap().len(), 1);
    }

    #[test]
    fn rows_are_decoded_with_column_stride() {
        let mut t = Tensor::zeros(2, 10);
        for col in 0..4 {
            t.set_f32_at(0, col, 1.);
        }
        t.set_f32_at(0, 5, 9.);
        t.set_f32_at(1, 1, 1.);
        t.set_f32_at(1, 2, 1.);
        t.set_f32_at(1, 3, 1.);
        t.set_f32_at(1, 6, 8.);
        let c = decode(&[t], 0., &[]).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.detections[0].class_name, "laptop");
        assert_eq!(c.detections[1].class_name, "coffee");
        assert_eq!(c.detections[1].confidence, 8.);
    }

    #[test]
    fn wrong_element_type_fails() {
        let bad = Tensor::new(1, 10, TensorData::I16(vec![0; 10]));
        let err = decode(&[laptop_detection(), bad], 0., &[]).unwrap_err();
        assert!(matches!(err, YoloError::TensorDecode { index: 1, .. }));
    }

    #[test]
    fn unreadable_element_type_reports_tensor_index() {
        // OpenCV の CV_16F (depth 7) 相当
        let bad = Tensor::new(1, 10, TensorData::Other { code: 7, len: 10 });
        match decode(&[laptop_detection(), coffee_detection(), bad], 0., &[]) {
            Err(YoloError::TensorDecode { index, reason }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("unsupported type 7"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn inconsistent_shape_fails() {
        let bad = Tensor::from_f32(2, 10, vec![0.; 15]);
        assert!(matches!(
            decode(&[bad], 0., &[]),
            Err(YoloError::TensorDecode { index: 0, .. })
        ));
    }

    #[test]
    fn class_without_label_fails() {
        let mut t = Tensor::zeros(1, 10);
        t.set_f32_at(0, 7, 0.9);
        assert!(matches!(
            decode(&[t], 0.5, &[]),
            Err(YoloError::ClassOutOfRange {
                class_id: 2,
                labels: 2
            })
        ));
    }

    #[test]
    fn empty_tensor_is_skipped() {
        let c = decode(&[Tensor::zeros(0, 10), coffee_detection()], 0., &[]).unwrap();
        assert_eq!(c.len(), 1);
    }
}
