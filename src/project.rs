use nalgebra::Point3;
use tracing::{span, trace, Level};

use crate::config::BevConfig;
use crate::detect::{Candidate, ObjectLabel};

/// Multi-class output is not surfaced yet; every detection reports this label.
const OUTPUT_LABEL: ObjectLabel = ObjectLabel::Car;

/// A detected object in vehicle-frame metric coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: ObjectLabel,
    pub center: Point3<f32>,
    pub height: f32,
    pub width: f32,
    pub length: f32,
    pub yaw: f32,
}

impl Detection {
    /// Flattens to `[class_id, x, y, z, height, width, length, yaw]`.
    pub fn to_row(&self) -> [f32; 8] {
        [
            self.label as u32 as f32,
            self.center.x,
            self.center.y,
            self.center.z,
            self.height,
            self.width,
            self.length,
            self.yaw,
        ]
    }
}

/// Projects BEV-pixel candidates into vehicle space and gates them by the
/// configured range. Out-of-range candidates are dropped silently; objects
/// at the raster edges are expected to fall outside.
///
/// BEV rows run along the vehicle's longitudinal axis and columns along the
/// lateral axis, so the pixel coordinates swap roles here.
pub fn to_vehicle_frame(candidates: &[Candidate], bev: &BevConfig) -> Vec<Detection> {
    let span = span!(Level::TRACE, "project::to_vehicle_frame");
    let _enter = span.enter();

    let x_span = bev.lim_x[1] - bev.lim_x[0];
    let y_span = bev.lim_y[1] - bev.lim_y[0];

    candidates
        .iter()
        .filter_map(|candidate| {
            let x = candidate.y / bev.bev_height as f32 * x_span;
            let y = candidate.x / bev.bev_width as f32 * y_span - y_span / 2.0;
            let width = candidate.w / bev.bev_width as f32 * y_span;
            let length = candidate.l / bev.bev_height as f32 * x_span;

            if x < bev.lim_x[0]
                || x > bev.lim_x[1]
                || y < bev.lim_y[0]
                || y > bev.lim_y[1]
                || candidate.z < bev.lim_z[0]
                || candidate.z > bev.lim_z[1]
            {
                trace!(
                    "Dropping candidate at ({x:.2}, {y:.2}, {:.2}), out of range.",
                    candidate.z
                );
                return None;
            }

            Some(Detection {
                label: OUTPUT_LABEL,
                center: Point3::new(x, y, candidate.z),
                height: candidate.h,
                width,
                length,
                yaw: candidate.yaw,
            })
        })
        .collect()
}
