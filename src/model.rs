use std::{fmt::Debug, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array2, Array4, ArrayView4, Axis, Ix3, Ix4};
use ort::{
    inputs, CUDAExecutionProvider, GraphOptimizationLevel, OpenVINOExecutionProvider, Session,
    TensorRTExecutionProvider,
};
use tracing::{debug, error, span, trace, Level};

/// Raw network output, still in BEV pixel units.
#[derive(Debug, Clone)]
pub enum RawOutput {
    /// One row matrix per batch sample; each row is
    /// `(x, y, w, l, im, re, objectness, class scores...)`.
    Grid(Vec<Array2<f32>>),
    /// Named regression heads on the down-sampled heatmap grid.
    Heads(HeatmapHeads),
}

/// Head tensors of the keypoint backend, each `(batch, channels, rows, cols)`.
#[derive(Debug, Clone)]
pub struct HeatmapHeads {
    pub hm_cen: Array4<f32>,
    pub cen_offset: Array4<f32>,
    pub direction: Array4<f32>,
    pub z_coor: Array4<f32>,
    pub dim: Array4<f32>,
}

/// Maps a BEV input tensor to the raw output of the configured backend.
///
/// The decode pipeline only depends on this trait, so tests can substitute
/// a model that replays canned tensors.
pub trait Infer {
    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<RawOutput>;
}

/// Which family of raw output the loaded network produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Grid,
    Heads,
}

#[derive(Debug, Clone, Copy)]
pub enum Execution {
    TensorRT,
    CUDA,
    OpenVINO,
    CPU,
    Default,
}

impl TryFrom<&str> for Execution {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "tensorrt" => Ok(Execution::TensorRT),
            "cuda" => Ok(Execution::CUDA),
            "openvino" => Ok(Execution::OpenVINO),
            "cpu" => Ok(Execution::CPU),
            "default" => Ok(Execution::Default),
            _ => Err(anyhow!("Failed to convert {value} to execution")),
        }
    }
}

pub struct OnnxModel {
    session: Session,
    kind: OutputKind,
}

impl OnnxModel {
    /// Builds an inference session from an ONNX weight file.
    ///
    /// A missing weight file or a session failure aborts construction; the
    /// returned handle is immutable and ready for inference.
    pub fn load<P>(onnx_path: P, kind: OutputKind, execution: Execution) -> Result<Self>
    where
        P: AsRef<Path> + Debug,
    {
        let span = span!(Level::TRACE, "OnnxModel::load");
        let _enter = span.enter();

        if !onnx_path.as_ref().is_file() {
            bail!("No model weight file at {:?}", onnx_path);
        }

        debug!(
            "Building the ONNX model from onnx: {:?} and execution: {:?}",
            onnx_path, execution
        );
        let providers = match execution {
            Execution::TensorRT => vec![TensorRTExecutionProvider::default().build()],
            Execution::CUDA => vec![CUDAExecutionProvider::default().build()],
            Execution::OpenVINO => vec![OpenVINOExecutionProvider::default().build()],
            Execution::CPU => vec![],
            _ => vec![
                CUDAExecutionProvider::default().build(),
                OpenVINOExecutionProvider::default().build(),
                TensorRTExecutionProvider::default().build(),
            ],
        };

        let session = Session::builder()
            .map_err(|e| {
                error!("Failed to build session builder: {e}");
                e
            })?
            .with_execution_providers(providers)
            .map_err(|e| {
                error!("Failed to register execution providers: {e}");
                e
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                error!("Failed to set optimization level: {e}");
                e
            })?
            .commit_from_file(onnx_path.as_ref())
            .map_err(|e| {
                error!("Failed to commit from file: {e}");
                e
            })?;

        trace!("ONNX model successfully built.");
        Ok(Self { session, kind })
    }
}

impl Infer for OnnxModel {
    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<RawOutput> {
        let span = span!(Level::TRACE, "OnnxModel::infer");
        let _enter = span.enter();

        trace!("Running session on input {:?}...", input.shape());
        let outputs = self
            .session
            .run(inputs!["input" => input]?)
            .map_err(|e| {
                error!("Failed to run session: {e}");
                e
            })?;

        match self.kind {
            OutputKind::Grid => {
                let output = outputs["output"]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| {
                        error!("Failed to extract tensor: {e}");
                        e
                    })?
                    .into_owned();

                // (batch, rows, columns), split per sample
                let output = output
                    .into_dimensionality::<Ix3>()
                    .context("Grid output is not a (batch, rows, columns) tensor")?;
                let samples: Vec<Array2<f32>> = output
                    .axis_iter(Axis(0))
                    .map(|sample| sample.to_owned())
                    .collect();

                trace!("Extracted {} grid samples.", samples.len());
                Ok(RawOutput::Grid(samples))
            }
            OutputKind::Heads => {
                let fetch = |name: &str| -> Result<Array4<f32>> {
                    let value = outputs
                        .get(name)
                        .ok_or_else(|| anyhow!("Missing output head {name}"))?;
                    value
                        .try_extract_tensor::<f32>()
                        .map_err(|e| {
                            error!("Failed to extract head {name}: {e}");
                            anyhow!(e)
                        })?
                        .into_owned()
                        .into_dimensionality::<Ix4>()
                        .with_context(|| format!("Head {name} is not a 4-dimensional tensor"))
                };

                let heads = HeatmapHeads {
                    hm_cen: fetch("hm_cen")?,
                    cen_offset: fetch("cen_offset")?,
                    direction: fetch("direction")?,
                    z_coor: fetch("z_coor")?,
                    dim: fetch("dim")?,
                };

                trace!("Extracted the five regression heads.");
                Ok(RawOutput::Heads(heads))
            }
        }
    }
}
