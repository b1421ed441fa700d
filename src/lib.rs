pub mod config;
pub mod detect;
pub mod io;
pub mod model;
pub mod project;

pub use detect::{Candidate, ObjectDetector, ObjectLabel};
pub use model::{Execution, HeatmapHeads, Infer, OnnxModel, OutputKind, RawOutput};
pub use project::Detection;
