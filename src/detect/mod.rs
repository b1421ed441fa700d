mod center;
mod yolo;

use std::fmt::{self, Display};

use anyhow::{anyhow, bail, Context, Result};
use ndarray::ArrayView4;
use rayon::prelude::*;
use tracing::{debug, span, trace, Level};

use crate::{
    config::{Backend, BevConfig, DetectorConfig},
    model::{Execution, Infer, OnnxModel, OutputKind, RawOutput},
    project::{self, Detection},
};

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ObjectLabel {
    Pedestrian,
    Car,
    Cyclist,
}

impl Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ObjectLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectLabel::Pedestrian => "Pedestrian",
            ObjectLabel::Car => "Car",
            ObjectLabel::Cyclist => "Cyclist",
        }
    }

    pub fn as_str_short(&self) -> &'static str {
        match self {
            ObjectLabel::Pedestrian => "Ped",
            ObjectLabel::Car => "Car",
            ObjectLabel::Cyclist => "Cyc",
        }
    }
}

impl TryFrom<u32> for ObjectLabel {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectLabel::Pedestrian),
            1 => Ok(ObjectLabel::Car),
            2 => Ok(ObjectLabel::Cyclist),
            _ => Err(anyhow!("Invalid value for ObjectLabel")),
        }
    }
}

/// A decoded object hypothesis, still in BEV pixel units.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: ObjectLabel,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub h: f32,
    pub w: f32,
    pub l: f32,
    pub yaw: f32,
    pub score: f32,
}

pub struct ObjectDetector<M> {
    model: M,
    bev: BevConfig,
    backend: Backend,
}

impl<M: Infer> ObjectDetector<M> {
    pub fn new(model: M, bev: BevConfig, backend: Backend) -> Result<Self> {
        let span = span!(Level::TRACE, "ObjectDetector::new");
        let _enter = span.enter();

        bev.validate().context("Invalid BEV configuration")?;
        backend
            .validate()
            .context("Invalid backend configuration")?;

        debug!(
            "Initializing object detector with bev: {:?}, backend: {:?}",
            bev, backend
        );
        Ok(Self {
            model,
            bev,
            backend,
        })
    }

    /// Runs inference on one batch of BEV maps and returns every detection
    /// inside the configured spatial range, in vehicle-frame coordinates.
    ///
    /// An empty result is a regular outcome, not an error.
    pub fn detect(&self, input: ArrayView4<'_, f32>) -> Result<Vec<Detection>> {
        let span = span!(Level::TRACE, "ObjectDetector::detect");
        let _enter = span.enter();

        trace!("Running inference on input {:?}...", input.shape());
        let raw = self.model.infer(input).context("Inference failed")?;

        let candidates = self.decode(raw)?;
        debug!("Decoded {} candidates.", candidates.len());

        let objects = project::to_vehicle_frame(&candidates, &self.bev);
        debug!("{} detections inside the configured range.", objects.len());

        Ok(objects)
    }

    fn decode(&self, raw: RawOutput) -> Result<Vec<Candidate>> {
        match (&self.backend, raw) {
            (Backend::Yolo(config), RawOutput::Grid(samples)) => {
                let per_sample: Vec<Vec<Candidate>> = samples
                    .par_iter()
                    .map(|rows| yolo::decode_sample(rows, config))
                    .collect::<Result<_>>()?;
                Ok(per_sample.into_iter().flatten().collect())
            }
            (Backend::CenterNet(config), RawOutput::Heads(heads)) => {
                center::decode(&heads, config)
            }
            (Backend::Yolo(_), RawOutput::Heads(_)) => {
                bail!("Grid backend received heatmap head tensors")
            }
            (Backend::CenterNet(_), RawOutput::Grid(_)) => {
                bail!("Heatmap backend received grid row tensors")
            }
        }
    }
}

impl ObjectDetector<OnnxModel> {
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let span = span!(Level::TRACE, "ObjectDetector::from_config");
        let _enter = span.enter();

        let execution = Execution::try_from(config.model.execution.as_str())
            .context("Unrecognized execution provider")?;
        let kind = match config.backend {
            Backend::Yolo(_) => OutputKind::Grid,
            Backend::CenterNet(_) => OutputKind::Heads,
        };

        let model = OnnxModel::load(&config.model.onnx_path, kind, execution)
            .context("Failed to load ONNX model")?;
        Self::new(model, config.bev.clone(), config.backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array4};

    use super::*;
    use crate::config::{CenterNetConfig, YoloConfig};

    struct CannedModel {
        output: RawOutput,
    }

    impl Infer for CannedModel {
        fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<RawOutput> {
            Ok(self.output.clone())
        }
    }

    fn dummy_input() -> Array4<f32> {
        Array4::zeros((1, 3, 8, 8))
    }

    #[test]
    fn test_label_round_trip() -> Result<()> {
        assert_eq!(ObjectLabel::try_from(1)?, ObjectLabel::Car);
        assert_eq!(ObjectLabel::Cyclist.as_str_short(), "Cyc");
        assert!(ObjectLabel::try_from(7).is_err());

        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let model = CannedModel {
            output: RawOutput::Grid(vec![]),
        };
        let bev = BevConfig {
            lim_z: [3.0, -1.0],
            ..BevConfig::default()
        };

        let result = ObjectDetector::new(model, bev, Backend::Yolo(YoloConfig::default()));
        assert!(result.is_err());
    }

    #[test]
    fn test_mismatched_raw_output_fails() -> Result<()> {
        let model = CannedModel {
            output: RawOutput::Grid(vec![Array2::zeros((0, 0))]),
        };
        let detector = ObjectDetector::new(
            model,
            BevConfig::default(),
            Backend::CenterNet(CenterNetConfig::default()),
        )?;

        let input = dummy_input();
        assert!(detector.detect(input.view()).is_err());

        Ok(())
    }

    #[test]
    fn test_empty_grid_output_yields_no_detections() -> Result<()> {
        let model = CannedModel {
            output: RawOutput::Grid(vec![Array2::zeros((0, 0))]),
        };
        let detector = ObjectDetector::new(
            model,
            BevConfig::default(),
            Backend::Yolo(YoloConfig::default()),
        )?;

        let input = dummy_input();
        let objects = detector.detect(input.view())?;
        assert!(objects.is_empty());

        Ok(())
    }
}
