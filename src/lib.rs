//! Farmgate - frame ingestion pipeline for farm camera streams
//!
//! This library decodes compressed camera frames, normalizes them into
//! fixed-layout float32 payloads, and publishes them to a keyed, versioned
//! object store. It handles:
//!
//! - Frame decoding and normalization (fixed resolution, [0,1] float32)
//! - Flat little-endian payload encoding
//! - Store key derivation from source tag and frame index
//! - Asynchronous publishing with per-put pending handles
//! - Per-frame outcome reporting (failures are surfaced, never swallowed)
//!
//! # Example
//!
//! ```rust,no_run
//! use farmgate::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FarmgateConfig::load()?;
//!     config.validate()?;
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let decoder = FrameDecoder::new(352, 240, ChannelOrder::Rgb)?;
//!     let formatter = KeyFormatter::new(&config.store.key_prefix)?;
//!     let publisher = Publisher::new(store, config.store.clone());
//!
//!     let pipeline = IngestPipeline::new(decoder, formatter, publisher, false);
//!     let mut source = FileSource::new(config.source.file.clone());
//!     let outcomes = pipeline.run(&mut source).await;
//!
//!     for outcome in &outcomes {
//!         println!("frame {:?}: {:?}", outcome.index, outcome.result.is_ok());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod keys;
pub mod payload;
pub mod pipeline;
pub mod publisher;
pub mod source;
pub mod store;

// Re-export main types
pub use config::{
    ConfigValidationError, FarmgateConfig, FileSourceConfig, LoggingConfig, ProcessingConfig,
    SourceConfig, SourceMode, StoreConfig, StreamSourceConfig,
};
pub use decoder::{ChannelOrder, DecodeError, FrameDecoder, NormalizedImage};
pub use keys::{KeyError, KeyFormatter, StoreKey};
pub use payload::{encode_payload, payload_len, EncodeError, SAMPLE_BYTES};
pub use pipeline::{FrameOutcome, IngestPipeline, PipelineError, PipelineStats};
pub use publisher::{Publisher, PublisherStats};
pub use source::{
    encode_record, FileSource, Frame, FrameRecord, FrameSource, RecordFraming, SourceError,
    StreamSource, LENGTH_PREFIX_BYTES,
};
pub use store::{
    MemoryStore, PendingResult, PublishError, PutOutcome, PutState, ResultSlot, StoreClient,
    StoredObject,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FarmgateConfig, SourceMode, StoreConfig};
    pub use crate::decoder::{ChannelOrder, FrameDecoder, NormalizedImage};
    pub use crate::keys::KeyFormatter;
    pub use crate::payload::encode_payload;
    pub use crate::pipeline::{FrameOutcome, IngestPipeline};
    pub use crate::publisher::Publisher;
    pub use crate::source::{FileSource, Frame, FrameSource, StreamSource};
    pub use crate::store::{MemoryStore, PendingResult, StoreClient};
}
