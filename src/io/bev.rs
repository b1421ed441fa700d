use std::{fmt::Debug, path::Path};

use anyhow::{Context, Result};
use image::{imageops::FilterType, GenericImageView};
use ndarray::Array4;
use tracing::{span, trace, Level};

use crate::config::BevConfig;

/// Loads a rasterized BEV map and normalizes it into a `(1, 3, H, W)`
/// network input tensor with values in `[0, 1]`.
pub fn bev_to_tensor<P>(path: P, bev: &BevConfig) -> Result<Array4<f32>>
where
    P: AsRef<Path> + Debug,
{
    let span = span!(Level::TRACE, "bev::bev_to_tensor");
    let _enter = span.enter();

    trace!("Reading BEV map from {:?}...", path);
    let img = image::open(path.as_ref()).context("Failed to read BEV map")?;

    let (width, height) = (bev.bev_width, bev.bev_height);
    let img = if img.dimensions() == (width, height) {
        img
    } else {
        trace!(
            "Resizing BEV map from {:?} to {}x{}",
            img.dimensions(),
            width,
            height
        );
        img.resize_exact(width, height, FilterType::Nearest)
    };
    let rgb = img.to_rgb8();

    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = pixel.0[0] as f32 / 255.0;
        input[[0, 1, y, x]] = pixel.0[1] as f32 / 255.0;
        input[[0, 2, y, x]] = pixel.0[2] as f32 / 255.0;
    }

    Ok(input)
}
