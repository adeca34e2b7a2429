//! Feature pipeline crate.
//!
//! Transforms raw tabular financial-activity datasets into numeric
//! feature matrices. The transformation is split into a `fit` step that
//! freezes every data-dependent decision into a [`FeatureSpec`], and an
//! `apply` step that replays a frozen spec bit-for-bit at inference
//! time.

mod dataset;
mod pipeline;
mod spec;

pub use dataset::Dataset;
pub use pipeline::{FeatureMatrix, apply, fit};
pub use spec::{FeatureSpec, ScalerParams};
