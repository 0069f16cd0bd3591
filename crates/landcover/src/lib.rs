//! BDOT10k land-cover classification and rasterization pipeline.
//!
//! Stages, in order: discover matching layer files in an input directory,
//! classify each layer's features into land-cover classes, merge the
//! classified layers into one feature set, rasterize the merged set into a
//! single-band u8 grid. Discovery order and per-file record order together
//! define raster paint precedence, so the stages never reorder features.

pub mod catalog;
pub mod classify;
pub mod error;
pub mod merge;
pub mod raster;
pub mod vector;
