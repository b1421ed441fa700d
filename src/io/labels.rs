use std::{
    fmt::Debug,
    fs::File,
    io::{BufWriter, Write as _},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::{error, span, trace, Level};

use crate::project::Detection;

/// Writes detections one per line: short label name, center, box size, yaw.
pub fn save_detections<P>(detections: &[Detection], path: P) -> Result<()>
where
    P: AsRef<Path> + Debug,
{
    let span = span!(Level::TRACE, "labels::save_detections");
    let _enter = span.enter();

    trace!("Writing {} detections to {:?}...", detections.len(), path);
    let file = File::create(path.as_ref()).map_err(|e| {
        error!("Failed to create {:?}: {e}", path);
        e
    })?;

    let mut writer = BufWriter::new(file);
    for detection in detections {
        let line = format!(
            "{} {:.2} {:.2} {:.2} {:.2} {:.2} {:.2} {:.2}\n",
            detection.label.as_str_short(),
            detection.center.x,
            detection.center.y,
            detection.center.z,
            detection.height,
            detection.width,
            detection.length,
            detection.yaw,
        );
        writer
            .write_all(line.as_bytes())
            .context("Failed to write detection line")?;
    }

    Ok(())
}
