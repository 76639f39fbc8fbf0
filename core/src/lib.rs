//! # meshweave core
//!
//! Engine-agnostic building blocks for the meshweave asset pipeline:
//! cooperative slicing, background work, cancellation, vertex layouts and
//! vertex repacking.

pub mod compute;
pub mod mesh;
pub mod profiling;
