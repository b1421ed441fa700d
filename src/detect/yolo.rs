use std::cmp::Ordering;

use anyhow::{bail, Result};
use ndarray::{Array2, Axis};
use tracing::{span, trace, Level};

use super::{Candidate, ObjectLabel};
use crate::config::YoloConfig;

/// Columns before the objectness score: x, y, w, l, im, re.
const BOX_FIELDS: usize = 6;

/// The grid backend regresses no height; every box gets this nominal value.
const NOMINAL_BOX_HEIGHT: f32 = 1.50;

/// Decodes one sample's row matrix into confidence-filtered, suppressed
/// candidates. A sample without surviving rows yields an empty list.
pub(super) fn decode_sample(rows: &Array2<f32>, config: &YoloConfig) -> Result<Vec<Candidate>> {
    let span = span!(Level::TRACE, "yolo::decode_sample");
    let _enter = span.enter();

    let columns = rows.ncols();
    if rows.nrows() > 0 && columns <= BOX_FIELDS {
        bail!(
            "Grid output rows carry {} columns, expected at least {}",
            columns,
            BOX_FIELDS + 1
        );
    }

    let mut candidates = Vec::new();
    for row in rows.axis_iter(Axis(0)) {
        let objectness = row[BOX_FIELDS];
        if objectness < config.conf_thresh {
            continue;
        }

        // Class columns are optional; single-class exports carry none.
        let (class_index, class_score) = row
            .iter()
            .skip(BOX_FIELDS + 1)
            .copied()
            .enumerate()
            .reduce(|best, other| if other.1 > best.1 { other } else { best })
            .unwrap_or((ObjectLabel::Car as usize, 1.0));

        let Ok(label) = ObjectLabel::try_from(class_index as u32) else {
            bail!("Grid output row scored unknown class index {class_index}");
        };

        candidates.push(Candidate {
            label,
            x: row[0],
            y: row[1],
            z: 0.0,
            h: NOMINAL_BOX_HEIGHT,
            w: row[2],
            l: row[3],
            yaw: row[4].atan2(row[5]),
            score: objectness * class_score,
        });
    }
    trace!("{} rows above the confidence threshold.", candidates.len());

    let final_candidates = non_max_suppression(candidates, config.nms_thresh);
    trace!("Non-Max Suppression completed.");

    Ok(final_candidates)
}

/// Greedy per-class suppression: the best-scored candidate survives and
/// removes every same-class candidate overlapping it beyond the threshold.
pub(super) fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    nms_threshold: f32,
) -> Vec<Candidate> {
    let mut final_candidates = Vec::new();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
    });

    while !candidates.is_empty() {
        let best_candidate = candidates.remove(0);

        candidates.retain(|candidate| {
            candidate.label != best_candidate.label
                || compute_iou(&best_candidate, candidate) < nms_threshold
        });

        final_candidates.push(best_candidate);
    }

    final_candidates
}

/// Axis-aligned IoU of two candidates on the BEV plane.
fn compute_iou(box1: &Candidate, box2: &Candidate) -> f32 {
    let x1_min = box1.x - box1.w / 2.0;
    let y1_min = box1.y - box1.l / 2.0;
    let x1_max = box1.x + box1.w / 2.0;
    let y1_max = box1.y + box1.l / 2.0;

    let x2_min = box2.x - box2.w / 2.0;
    let y2_min = box2.y - box2.l / 2.0;
    let x2_max = box2.x + box2.w / 2.0;
    let y2_max = box2.y + box2.l / 2.0;

    let inter_x_min = x1_min.max(x2_min);
    let inter_y_min = y1_min.max(y2_min);
    let inter_x_max = x1_max.min(x2_max);
    let inter_y_max = y1_max.min(y2_max);

    let inter_area = (inter_x_max - inter_x_min).max(0.0) * (inter_y_max - inter_y_min).max(0.0);
    let box1_area = (x1_max - x1_min) * (y1_max - y1_min);
    let box2_area = (x2_max - x2_min) * (y2_max - y2_min);

    inter_area / (box1_area + box2_area - inter_area)
}
