use anyhow::Result;
use assert_approx_eq::assert_approx_eq;
use ndarray::{array, Array2, Array4, ArrayView4};

use bevdet3d::{
    config::{Backend, BevConfig, CenterNetConfig, YoloConfig},
    HeatmapHeads, Infer, ObjectDetector, ObjectLabel, RawOutput,
};

/// Replays a canned raw output, standing in for a real inference session.
struct CannedModel {
    output: RawOutput,
}

impl Infer for CannedModel {
    fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<RawOutput> {
        Ok(self.output.clone())
    }
}

fn bev_input() -> Array4<f32> {
    Array4::zeros((1, 3, 608, 608))
}

fn grid_detector(rows: Array2<f32>) -> Result<ObjectDetector<CannedModel>> {
    let model = CannedModel {
        output: RawOutput::Grid(vec![rows]),
    };
    ObjectDetector::new(
        model,
        BevConfig::default(),
        Backend::Yolo(YoloConfig::default()),
    )
}

fn heads_detector(heads: HeatmapHeads) -> Result<ObjectDetector<CannedModel>> {
    let model = CannedModel {
        output: RawOutput::Heads(heads),
    };
    ObjectDetector::new(
        model,
        BevConfig::default(),
        Backend::CenterNet(CenterNetConfig::default()),
    )
}

fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

fn empty_heads(rows: usize, cols: usize) -> HeatmapHeads {
    HeatmapHeads {
        hm_cen: Array4::from_elem((1, 3, rows, cols), -10.0),
        cen_offset: Array4::zeros((1, 2, rows, cols)),
        direction: Array4::zeros((1, 2, rows, cols)),
        z_coor: Array4::zeros((1, 1, rows, cols)),
        dim: Array4::zeros((1, 3, rows, cols)),
    }
}

#[test]
fn test_grid_pipeline_end_to_end() -> Result<()> {
    // Two overlapping boxes near the raster center and one below threshold.
    let rows = array![
        [304.0, 304.0, 30.4, 60.8, 0.0, 1.0, 0.9, 0.1, 0.8, 0.1],
        [305.0, 305.0, 30.4, 60.8, 0.0, 1.0, 0.8, 0.1, 0.7, 0.1],
        [100.0, 100.0, 30.4, 60.8, 0.0, 1.0, 0.1, 0.1, 0.8, 0.1],
    ];
    let detector = grid_detector(rows)?;

    let input = bev_input();
    let objects = detector.detect(input.view())?;

    // NMS collapses the overlap, the threshold removes the weak row.
    assert_eq!(objects.len(), 1);
    let object = &objects[0];
    assert_eq!(object.label, ObjectLabel::Car);
    assert_approx_eq!(object.center.x, 25.0);
    assert_approx_eq!(object.center.y, 0.0);
    assert_approx_eq!(object.center.z, 0.0);
    assert_approx_eq!(object.height, 1.50);
    assert_approx_eq!(object.width, 2.5);
    assert_approx_eq!(object.length, 5.0);
    assert_approx_eq!(object.yaw, 0.0);

    Ok(())
}

#[test]
fn test_grid_pipeline_empty_output() -> Result<()> {
    let detector = grid_detector(Array2::zeros((0, 0)))?;

    let input = bev_input();
    let objects = detector.detect(input.view())?;
    assert!(objects.is_empty());

    Ok(())
}

#[test]
fn test_heatmap_pipeline_end_to_end() -> Result<()> {
    let mut heads = empty_heads(152, 152);
    // A confident car peak at grid cell (76, 76) with centered offset.
    heads.hm_cen[[0, 1, 76, 76]] = logit(0.9);
    heads.direction[[0, 0, 76, 76]] = 0.5;
    heads.direction[[0, 1, 76, 76]] = 0.5_f32 * 3.0_f32.sqrt();
    heads.z_coor[[0, 0, 76, 76]] = 1.0;
    heads.dim[[0, 0, 76, 76]] = 1.6;
    heads.dim[[0, 1, 76, 76]] = 30.4;
    heads.dim[[0, 2, 76, 76]] = 60.8;

    let detector = heads_detector(heads)?;

    let input = bev_input();
    let objects = detector.detect(input.view())?;

    assert_eq!(objects.len(), 1);
    let object = &objects[0];
    assert_eq!(object.label, ObjectLabel::Car);
    // (76 + 0.5) * 4 = 306 px, projected through the 608 px / 50 m raster
    assert_approx_eq!(object.center.x, 306.0 / 608.0 * 50.0, 1e-4);
    assert_approx_eq!(object.center.y, 306.0 / 608.0 * 50.0 - 25.0, 1e-4);
    assert_approx_eq!(object.center.z, 1.0);
    assert_approx_eq!(object.yaw, std::f32::consts::FRAC_PI_6, 1e-5);
    assert_approx_eq!(object.height, 1.6);
    assert_approx_eq!(object.width, 2.5);
    assert_approx_eq!(object.length, 5.0);

    Ok(())
}

#[test]
fn test_heatmap_pipeline_respects_top_k_and_range() -> Result<()> {
    let mut heads = empty_heads(152, 152);
    // Confident peaks all over the grid, including cells whose projection
    // lands outside the configured z range.
    for row in (0..152).step_by(4) {
        for col in (0..152).step_by(4) {
            heads.hm_cen[[0, 0, row, col]] = logit(0.9);
            heads.z_coor[[0, 0, row, col]] = if (row + col) % 8 == 0 { 1.0 } else { 9.0 };
        }
    }

    let detector = heads_detector(heads)?;

    let input = bev_input();
    let objects = detector.detect(input.view())?;

    let config = CenterNetConfig::default();
    assert!(objects.len() <= config.k);

    let bev = BevConfig::default();
    for object in &objects {
        assert!(object.center.x >= bev.lim_x[0] && object.center.x <= bev.lim_x[1]);
        assert!(object.center.y >= bev.lim_y[0] && object.center.y <= bev.lim_y[1]);
        assert!(object.center.z >= bev.lim_z[0] && object.center.z <= bev.lim_z[1]);
    }

    Ok(())
}

#[test]
fn test_pipeline_is_deterministic() -> Result<()> {
    let mut heads = empty_heads(152, 152);
    for (class, row, col) in [(0, 10, 10), (1, 10, 14), (2, 80, 80), (1, 140, 20)] {
        heads.hm_cen[[0, class, row, col]] = logit(0.8);
        heads.dim[[0, 0, row, col]] = 1.5;
        heads.dim[[0, 1, row, col]] = 20.0;
        heads.dim[[0, 2, row, col]] = 40.0;
    }
    let detector = heads_detector(heads)?;

    let input = bev_input();
    let first = detector.detect(input.view())?;
    let second = detector.detect(input.view())?;

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_row(), b.to_row());
    }

    Ok(())
}

#[test]
fn test_backend_output_mismatch_is_fatal() -> Result<()> {
    let model = CannedModel {
        output: RawOutput::Heads(empty_heads(8, 8)),
    };
    let detector = ObjectDetector::new(
        model,
        BevConfig::default(),
        Backend::Yolo(YoloConfig::default()),
    )?;

    let input = bev_input();
    assert!(detector.detect(input.view()).is_err());

    Ok(())
}
