use std::cmp::Ordering;

use ndarray::{s, ArrayView2, Axis};

pub const MAX_DETECTIONS: usize = 300;

/// Output tensor layouts produced by ultralytics ONNX exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + classes, anchors]`: raw anchors, NMS still required (v5u, v8, v11).
    Anchors { classes: usize },
    /// `[1, rows, 6]`: `x1, y1, x2, y2, score, class`, already suppressed (v10).
    EndToEnd,
}

impl OutputLayout {
    pub fn detect(dims: &[usize], known_classes: usize) -> Result<Self, String> {
        let [batch, a, b] = dims else {
            return Err(format!("expected a rank 3 output, got shape {dims:?}"));
        };
        if *batch != 1 {
            return Err(format!("expected batch size 1, got shape {dims:?}"));
        }
        if known_classes > 0 && *a == 4 + known_classes {
            return Ok(OutputLayout::Anchors {
                classes: known_classes,
            });
        }
        if *b == 6 && *a != 6 {
            return Ok(OutputLayout::EndToEnd);
        }
        if *a > 4 {
            return Ok(OutputLayout::Anchors { classes: a - 4 });
        }
        Err(format!("unrecognized output shape {dims:?}"))
    }
}

/// A scored box in model input coordinates, corner form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub xyxy: [f32; 4],
}

/// Decodes a `[4 + classes, anchors]` view, keeping anchors whose best class
/// score is above `conf_threshold`.
pub fn decode_anchors(view: ArrayView2<f32>, conf_threshold: f32) -> Vec<Candidate> {
    let mut candidates = vec![];
    for (i, column) in view.axis_iter(Axis(1)).enumerate() {
        let Some((class_id, &confidence)) = column
            .slice(s![4..])
            .indexed_iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Less))
        else {
            continue;
        };
        if confidence <= conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (view[[0, i]], view[[1, i]], view[[2, i]], view[[3, i]]);
        candidates.push(Candidate {
            class_id,
            confidence,
            xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
    }
    candidates
}

/// Decodes a `[rows, 6]` end-to-end view in its native order.
pub fn decode_end_to_end(view: ArrayView2<f32>, conf_threshold: f32) -> Vec<Candidate> {
    view.axis_iter(Axis(0))
        .filter(|row| row[4] > conf_threshold)
        .take(MAX_DETECTIONS)
        .map(|row| Candidate {
            class_id: row[5].max(0.0).round() as usize,
            confidence: row[4],
            xyxy: [row[0], row[1], row[2], row[3]],
        })
        .collect()
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class NMS. The result is ordered by descending confidence and
/// capped at `MAX_DETECTIONS`.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept: Vec<Candidate> = vec![];
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
            if kept.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    fn candidate(class_id: usize, confidence: f32, xyxy: [f32; 4]) -> Candidate {
        Candidate {
            class_id,
            confidence,
            xyxy,
        }
    }

    #[test]
    fn layout_detection() {
        assert_eq!(
            OutputLayout::detect(&[1, 6, 8400], 2),
            Ok(OutputLayout::Anchors { classes: 2 })
        );
        assert_eq!(
            OutputLayout::detect(&[1, 84, 8400], 0),
            Ok(OutputLayout::Anchors { classes: 80 })
        );
        assert_eq!(
            OutputLayout::detect(&[1, 300, 6], 2),
            Ok(OutputLayout::EndToEnd)
        );
        assert!(OutputLayout::detect(&[1, 300], 2).is_err());
        assert!(OutputLayout::detect(&[2, 6, 8400], 2).is_err());
    }

    #[test]
    fn anchors_pick_best_class_above_threshold() {
        // rows: cx, cy, w, h, fire, smoke; columns: anchors
        let raw: Array2<f32> = arr2(&[
            [50.0, 10.0, 300.0],
            [50.0, 10.0, 300.0],
            [20.0, 4.0, 40.0],
            [10.0, 4.0, 40.0],
            [0.10, 0.20, 0.90],
            [0.70, 0.10, 0.05],
        ]);
        let out = decode_anchors(raw.view(), 0.25);
        assert_eq!(
            out,
            vec![
                candidate(1, 0.70, [40.0, 45.0, 60.0, 55.0]),
                candidate(0, 0.90, [280.0, 280.0, 320.0, 320.0]),
            ]
        );
    }

    #[test]
    fn end_to_end_keeps_native_order() {
        let raw: Array2<f32> = arr2(&[
            [0.0, 0.0, 10.0, 10.0, 0.40, 1.0],
            [5.0, 5.0, 15.0, 15.0, 0.95, 0.0],
            [1.0, 1.0, 2.0, 2.0, 0.10, 0.0],
        ]);
        let out = decode_end_to_end(raw.view(), 0.25);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 1);
        assert_eq!(out[1].class_id, 0);
    }

    #[test]
    fn iou_of_known_boxes() {
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[0.0, 0.0, 10.0, 10.0]), 1.0);
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&[0.0, 0.0, 10.0, 10.0], &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_within_class_only() {
        let out = non_max_suppression(
            vec![
                candidate(0, 0.6, [1.0, 1.0, 11.0, 11.0]),
                candidate(0, 0.9, [0.0, 0.0, 10.0, 10.0]),
                candidate(1, 0.8, [0.0, 0.0, 10.0, 10.0]),
                candidate(0, 0.5, [50.0, 50.0, 60.0, 60.0]),
            ],
            0.45,
        );
        let confidences: Vec<f32> = out.iter().map(|x| x.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.8, 0.5]);
    }
}
