//! # kinema-model
//!
//! Record and payload types for the Kinema pose-landmark pipeline.
//!
//! This crate provides the shapes shared by every other layer:
//!
//! - **LandmarkRecord** - A persisted pose recording
//! - **LandmarkBatch** - One client-submitted set of frames to ingest
//! - **LandmarkUpdate** - The public payload for broadcasts and list items
//! - **Validation** - Sampled structural checks on incoming batches
//!
//! The landmarks payload itself stays an opaque [`serde_json::Value`]: the
//! pipeline never interprets coordinate values beyond structural checks,
//! and rounds the payload through storage and broadcast value-for-value.

pub mod record;
pub mod validate;

pub use record::{
    approx_duration_ms, format_timestamp_ms, unix_millis, LandmarkBatch, LandmarkRecord,
    LandmarkUpdate, NewRecord, RecordId, ASSUMED_FPS, DEFAULT_RECORDING_NAME,
};
pub use validate::{validate_batch, SkeletonMode, ValidationError};
