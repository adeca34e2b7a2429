//! Run lifecycle orchestration for training and inference.
//!
//! Each invocation is an independent, short-lived batch process: the
//! stages of a run execute strictly sequentially (download, feature
//! transform, score, persist, audit), any stage error is caught at the
//! top of the run and converted into a `failed` terminal status, and
//! nothing is retried internally; a retry is a brand-new run.

pub mod inference;
pub mod training;
