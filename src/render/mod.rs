//! Live preview of annotated frames

pub mod sink;
pub mod surface;

pub use sink::{RenderPolicy, RenderSink};
pub use surface::{ImageSurface, Surface};
