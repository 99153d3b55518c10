//! # kinema-core
//!
//! Rate gating, live fan-out, and the ingest pipeline for Kinema.
//!
//! This crate provides the behavioral heart of the system:
//!
//! - **RateGate** - Per-user throttle deciding whether a broadcast may fire
//! - **Hub** - Fan-out delivering accepted updates to live subscribers
//! - **IngestPipeline** - Validate → persist → throttle-check → broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐     ┌──────────────┐     ┌─────────┐
//! │  Batch  │────▶│IngestPipeline│────▶│  Store  │
//! └─────────┘     └──────────────┘     └─────────┘
//!                        │
//!                 ┌──────┴──────┐
//!                 ▼             ▼
//!           ┌──────────┐  ┌──────────┐
//!           │ RateGate │  │   Hub    │
//!           └──────────┘  └──────────┘
//! ```
//!
//! Durability and broadcast are independent: every valid batch is stored,
//! while live notification is throttled per user.

pub mod gate;
pub mod hub;
pub mod pipeline;

pub use gate::RateGate;
pub use hub::{Hub, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use pipeline::{
    IngestError, IngestPipeline, IngestReceipt, PipelineConfig, DEFAULT_BROADCAST_INTERVAL,
};
