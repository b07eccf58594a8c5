//! Reconflow Manifest
//!
//! This crate defines the fixed vocabulary of typed result buckets that every
//! tool adapter reads from and writes to, along with the per-bucket
//! normalization rules and the run-level manifest that aggregates results
//! across the steps of a run.
//!
//! Key properties:
//! - Every bucket has an idempotent normalization function
//! - Items are deduplicated per bucket in stable (first-seen) order
//! - Provenance records the first step/tool that contributed each item

mod bucket;
mod classify;
mod manifest;

pub use bucket::{BucketKind, ParseBucketError, item_key, normalize_items};
pub use classify::{bucketize, classify, split_values};
pub use manifest::{MergeOutcome, Provenance, RunManifest, StepSummary};
