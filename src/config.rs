use std::fs;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, span, trace, Level};

/// Spatial detection range and raster resolution of the BEV input.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BevConfig {
    pub lim_x: [f32; 2],
    pub lim_y: [f32; 2],
    pub lim_z: [f32; 2],
    pub bev_width: u32,
    pub bev_height: u32,
}

impl Default for BevConfig {
    fn default() -> Self {
        Self {
            lim_x: [0.0, 50.0],
            lim_y: [-25.0, 25.0],
            lim_z: [-1.0, 3.0],
            bev_width: 608,
            bev_height: 608,
        }
    }
}

impl BevConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, lim) in [
            ("lim_x", self.lim_x),
            ("lim_y", self.lim_y),
            ("lim_z", self.lim_z),
        ] {
            if !lim[0].is_finite() || !lim[1].is_finite() {
                bail!("{name} must be finite, got [{}, {}]", lim[0], lim[1]);
            }
            if lim[0] > lim[1] {
                bail!("{name} range is inverted: [{}, {}]", lim[0], lim[1]);
            }
        }
        if self.bev_width == 0 || self.bev_height == 0 {
            bail!(
                "BEV resolution must be nonzero, got {}x{}",
                self.bev_width,
                self.bev_height
            );
        }
        Ok(())
    }
}

/// Network architecture the raw output is decoded for.
///
/// The decode path dispatches exhaustively over this enum, so adding or
/// removing a backend is a compile-time-checked change.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "arch", rename_all = "snake_case")]
pub enum Backend {
    /// Dense grid regression with one row per box proposal.
    Yolo(YoloConfig),
    /// Keypoint heatmap with per-cell regression heads.
    CenterNet(CenterNetConfig),
}

impl Backend {
    pub fn validate(&self) -> Result<()> {
        match self {
            Backend::Yolo(config) => config.validate(),
            Backend::CenterNet(config) => config.validate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YoloConfig {
    pub conf_thresh: f32,
    pub nms_thresh: f32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            conf_thresh: 0.5,
            nms_thresh: 0.4,
        }
    }
}

impl YoloConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.conf_thresh) {
            bail!("conf_thresh must lie in [0, 1], got {}", self.conf_thresh);
        }
        if !(0.0..=1.0).contains(&self.nms_thresh) {
            bail!("nms_thresh must lie in [0, 1], got {}", self.nms_thresh);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CenterNetConfig {
    /// Number of heatmap peaks retained per sample.
    pub k: usize,
    pub peak_thresh: f32,
    /// Spatial stride between the heatmap grid and the BEV raster.
    pub down_ratio: u32,
    pub heads: HeadLayout,
}

impl Default for CenterNetConfig {
    fn default() -> Self {
        Self {
            k: 50,
            peak_thresh: 0.2,
            down_ratio: 4,
            heads: HeadLayout::default(),
        }
    }
}

impl CenterNetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            bail!("top-k peak count must be positive");
        }
        if !(0.0..=1.0).contains(&self.peak_thresh) {
            bail!("peak_thresh must lie in [0, 1], got {}", self.peak_thresh);
        }
        if self.down_ratio == 0 {
            bail!("down_ratio must be positive");
        }
        self.heads.validate()
    }
}

/// Channel counts of the named regression heads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeadLayout {
    pub hm_cen: usize,
    pub cen_offset: usize,
    pub direction: usize,
    pub z_coor: usize,
    pub dim: usize,
}

impl Default for HeadLayout {
    fn default() -> Self {
        Self {
            hm_cen: 3,
            cen_offset: 2,
            direction: 2,
            z_coor: 1,
            dim: 3,
        }
    }
}

impl HeadLayout {
    pub fn validate(&self) -> Result<()> {
        if self.hm_cen == 0 || self.hm_cen > 3 {
            bail!(
                "hm_cen must carry between 1 and 3 class channels, got {}",
                self.hm_cen
            );
        }
        for (name, channels, expected) in [
            ("cen_offset", self.cen_offset, 2),
            ("direction", self.direction, 2),
            ("z_coor", self.z_coor, 1),
            ("dim", self.dim, 3),
        ] {
            if channels != expected {
                bail!("{name} must carry {expected} channels, got {channels}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub onnx_path: String,
    pub execution: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub bev_path: String,
    pub output_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub bev: BevConfig,
    pub backend: Backend,
    pub model: ModelConfig,
    pub source: SourceConfig,
}

impl DetectorConfig {
    pub fn from_file<P>(file_path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Debug,
    {
        let span = span!(Level::TRACE, "DetectorConfig::from_file");
        let _enter = span.enter();

        trace!("Reading content from file {:?}...", file_path);
        let config_content =
            fs::read_to_string(file_path).context("Failed to read config from file")?;

        trace!("Deserializing content to DetectorConfig...");
        let config: Self = toml::from_str(&config_content)
            .context("Failed to deserialize content to DetectorConfig")?;

        debug!("Configurations: {:#?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bev.validate().context("Invalid BEV configuration")?;
        self.backend
            .validate()
            .context("Invalid backend configuration")?;
        Ok(())
    }
}
