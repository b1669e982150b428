//! Composite training loss of YOLACT-style instance segmentation models.

mod common;
pub mod config;
pub mod loss;
pub mod profiling;
