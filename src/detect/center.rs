use std::cmp::Ordering;

use anyhow::{bail, Result};
use ndarray::Array4;
use tracing::{span, trace, Level};

use super::{Candidate, ObjectLabel};
use crate::config::{CenterNetConfig, HeadLayout};
use crate::model::HeatmapHeads;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One retained heatmap peak, ordered by score then scan position.
struct Peak {
    score: f32,
    /// Row-major position over (class, row, col); the deterministic tie-break.
    index: usize,
    class: usize,
    row: usize,
    col: usize,
}

/// Decodes the regression heads into at most `k` candidates per sample.
///
/// Peaks are 3x3 local maxima of the class heatmaps, ranked by confidence
/// descending with ties broken by row-major scan order, then filtered by the
/// peak threshold. The ordering is deterministic for a given input.
pub(super) fn decode(heads: &HeatmapHeads, config: &CenterNetConfig) -> Result<Vec<Candidate>> {
    let span = span!(Level::TRACE, "center::decode");
    let _enter = span.enter();

    validate_shapes(heads, &config.heads)?;

    let scores = heads.hm_cen.mapv(sigmoid);
    let offsets = heads.cen_offset.mapv(sigmoid);

    let (batch, classes, rows, cols) = scores.dim();
    let down_ratio = config.down_ratio as f32;

    let mut candidates = Vec::new();
    for sample in 0..batch {
        let mut peaks = Vec::new();
        for class in 0..classes {
            for row in 0..rows {
                for col in 0..cols {
                    if !is_local_maximum(&scores, sample, class, row, col) {
                        continue;
                    }
                    peaks.push(Peak {
                        score: scores[[sample, class, row, col]],
                        index: (class * rows + row) * cols + col,
                        class,
                        row,
                        col,
                    });
                }
            }
        }
        trace!("Sample {sample}: {} local maxima.", peaks.len());

        peaks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        peaks.truncate(config.k);

        for peak in peaks {
            if peak.score < config.peak_thresh {
                continue;
            }

            let Ok(label) = ObjectLabel::try_from(peak.class as u32) else {
                bail!("Heatmap peak scored unknown class channel {}", peak.class);
            };

            let (row, col) = (peak.row, peak.col);
            let x = (col as f32 + offsets[[sample, 0, row, col]]) * down_ratio;
            let y = (row as f32 + offsets[[sample, 1, row, col]]) * down_ratio;
            let yaw = heads.direction[[sample, 0, row, col]]
                .atan2(heads.direction[[sample, 1, row, col]]);

            candidates.push(Candidate {
                label,
                x,
                y,
                z: heads.z_coor[[sample, 0, row, col]],
                h: heads.dim[[sample, 0, row, col]],
                w: heads.dim[[sample, 1, row, col]],
                l: heads.dim[[sample, 2, row, col]],
                yaw,
                score: peak.score,
            });
        }
    }

    trace!("Decoded {} peak candidates.", candidates.len());
    Ok(candidates)
}

/// A cell is a peak iff no 3x3 neighbor in its class channel beats it;
/// an equal-scored neighbor earlier in scan order wins the tie.
fn is_local_maximum(
    scores: &Array4<f32>,
    sample: usize,
    class: usize,
    row: usize,
    col: usize,
) -> bool {
    let (_, _, rows, cols) = scores.dim();
    let score = scores[[sample, class, row, col]];

    for dr in -1_isize..=1 {
        for dc in -1_isize..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            let (nr, nc) = (row as isize + dr, col as isize + dc);
            if nr < 0 || nr >= rows as isize || nc < 0 || nc >= cols as isize {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            let neighbor = scores[[sample, class, nr, nc]];
            if neighbor > score {
                return false;
            }
            if neighbor == score && (nr, nc) < (row, col) {
                return false;
            }
        }
    }
    true
}

fn validate_shapes(heads: &HeatmapHeads, layout: &HeadLayout) -> Result<()> {
    let named = [
        ("hm_cen", &heads.hm_cen, layout.hm_cen),
        ("cen_offset", &heads.cen_offset, layout.cen_offset),
        ("direction", &heads.direction, layout.direction),
        ("z_coor", &heads.z_coor, layout.z_coor),
        ("dim", &heads.dim, layout.dim),
    ];

    let (batch, _, rows, cols) = heads.hm_cen.dim();
    for (name, tensor, channels) in named {
        let shape = tensor.dim();
        if shape.1 != channels {
            bail!(
                "Head {name} carries {} channels, the layout expects {channels}",
                shape.1
            );
        }
        if (shape.0, shape.2, shape.3) != (batch, rows, cols) {
            bail!(
                "Head {name} has shape {:?}, inconsistent with hm_cen {:?}",
                tensor.shape(),
                heads.hm_cen.shape()
            );
        }
    }
    Ok(())
}
