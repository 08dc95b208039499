//! Per-frame ingestion pipeline.
//!
//! Executes decode -> encode -> key-format -> publish for each incoming
//! frame and reports an explicit [`FrameOutcome`] per frame. A failure in
//! any stage is fatal to that single frame only; subsequent frames keep
//! flowing. Frames are processed strictly in source order and each publish
//! is awaited before the next is issued, so puts reach the store in order.

use crate::decoder::{DecodeError, FrameDecoder};
use crate::keys::{KeyError, KeyFormatter, StoreKey};
use crate::payload::{encode_payload, EncodeError};
use crate::publisher::Publisher;
use crate::source::{Frame, FrameSource, SourceError};
use crate::store::{PublishError, PutOutcome};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A per-frame failure, tagged by the stage that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Explicit result of processing one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    /// Position of the frame in this run (assigned by the pipeline)
    pub sequence: u64,

    /// Source-assigned frame index, when the frame was readable
    pub index: Option<u64>,

    /// Store key, once key formatting succeeded
    pub key: Option<StoreKey>,

    /// Final outcome of the frame
    pub result: Result<PutOutcome, PipelineError>,
}

impl FrameOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Statistics for the pipeline.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_published: u64,
    pub frames_failed: u64,
    pub bytes_published: u64,
}

/// The frame ingestion pipeline.
///
/// Owns the decoder, key formatter and publisher for one run. The sequence
/// counter is single-writer: it is incremented only by the loop that
/// assigns positions to incoming frames.
pub struct IngestPipeline {
    decoder: FrameDecoder,
    formatter: KeyFormatter,
    publisher: Publisher,
    timestamped_keys: bool,
    sequence: AtomicU64,
    stats: Arc<RwLock<PipelineStats>>,
    running: Arc<AtomicBool>,
}

impl IngestPipeline {
    pub fn new(
        decoder: FrameDecoder,
        formatter: KeyFormatter,
        publisher: Publisher,
        timestamped_keys: bool,
    ) -> Self {
        Self {
            decoder,
            formatter,
            publisher,
            timestamped_keys,
            sequence: AtomicU64::new(0),
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Current pipeline statistics.
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Whether the pipeline is accepting further frames.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request a stop. The frame currently in flight is allowed to resolve;
    /// no further frames are taken from the source.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn format_key(&self, frame: &Frame) -> Result<StoreKey, KeyError> {
        if self.timestamped_keys {
            self.formatter
                .format_with_timestamp(&frame.source, frame.index, frame.captured_at_ns)
        } else {
            self.formatter.format(&frame.source, frame.index)
        }
    }

    /// Process a single frame end to end.
    ///
    /// Never panics or propagates past the frame: every stage failure is
    /// captured in the returned outcome.
    pub async fn process_frame(&self, frame: &Frame) -> FrameOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.stats.write().frames_processed += 1;

        let image = match self.decoder.decode(&frame.data) {
            Ok(image) => image,
            Err(e) => return self.failed(sequence, Some(frame.index), None, e.into()),
        };

        let payload = match encode_payload(&image) {
            Ok(payload) => payload,
            Err(e) => return self.failed(sequence, Some(frame.index), None, e.into()),
        };

        let key = match self.format_key(frame) {
            Ok(key) => key,
            Err(e) => return self.failed(sequence, Some(frame.index), None, e.into()),
        };

        let size = payload.len() as u64;
        match self.publisher.publish_and_wait(&key, payload).await {
            Ok(outcome) => {
                {
                    let mut stats = self.stats.write();
                    stats.frames_published += 1;
                    stats.bytes_published += size;
                }
                debug!(
                    key = %key,
                    index = frame.index,
                    version = outcome.version,
                    "Frame published"
                );
                FrameOutcome {
                    sequence,
                    index: Some(frame.index),
                    key: Some(key),
                    result: Ok(outcome),
                }
            }
            Err(e) => self.failed(sequence, Some(frame.index), Some(key), e.into()),
        }
    }

    /// Drain a source to completion, processing frames strictly in order.
    ///
    /// Source read errors and per-frame stage errors both become failed
    /// outcomes; the run continues until the source is exhausted or a stop
    /// is requested.
    pub async fn run(&self, source: &mut dyn FrameSource) -> Vec<FrameOutcome> {
        let mut outcomes = Vec::new();

        while self.running.load(Ordering::SeqCst) {
            match source.next_frame().await {
                Ok(Some(frame)) => {
                    outcomes.push(self.process_frame(&frame).await);
                }
                Ok(None) => {
                    info!("Source exhausted");
                    break;
                }
                Err(e) => {
                    let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                    {
                        let mut stats = self.stats.write();
                        stats.frames_processed += 1;
                        stats.frames_failed += 1;
                    }
                    warn!(sequence = sequence, error = %e, "Frame unreadable, continuing");
                    outcomes.push(FrameOutcome {
                        sequence,
                        index: None,
                        key: None,
                        result: Err(e.into()),
                    });
                }
            }
        }

        outcomes
    }

    fn failed(
        &self,
        sequence: u64,
        index: Option<u64>,
        key: Option<StoreKey>,
        error: PipelineError,
    ) -> FrameOutcome {
        self.stats.write().frames_failed += 1;
        warn!(
            sequence = sequence,
            index = ?index,
            error = %error,
            "Frame failed"
        );
        FrameOutcome {
            sequence,
            index,
            key,
            result: Err(error),
        }
    }
}
