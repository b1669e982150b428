//! Loss function building blocks.

mod classification;
mod localization;
mod loss;
mod mask;
mod misc;
mod segmentation;

pub use classification::*;
pub use localization::*;
pub use loss::*;
pub use mask::*;
pub use misc::*;
pub use segmentation::*;
