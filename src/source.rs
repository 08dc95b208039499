//! Frame sources.
//!
//! Two ways frames enter the pipeline:
//!
//! - [`FileSource`]: reads `{base}{index}.jpg` from the filesystem for a
//!   bounded index range.
//! - [`StreamSource`]: accepts one TCP peer sending length-prefixed
//!   [`FrameRecord`]s. Framing is an explicit state machine
//!   ([`RecordFraming`]): an 8-byte big-endian unsigned length precedes
//!   each bincode-serialized record.

use crate::config::{FileSourceConfig, StreamSourceConfig};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Size of the wire length prefix: a fixed-width unsigned 64-bit integer.
pub const LENGTH_PREFIX_BYTES: usize = 8;

/// Errors produced by frame sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read frame file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(std::io::Error),

    #[error("Failed to read from peer: {0}")]
    PeerRead(std::io::Error),

    #[error("Wire record of {len} bytes exceeds limit of {max}")]
    RecordTooLarge { len: u64, max: usize },

    #[error("Failed to decode wire record: {0}")]
    BadRecord(String),
}

/// A captured frame: compressed image bytes plus identity and timing.
///
/// Immutable after creation; discarded after a successful publish or an
/// unrecoverable per-frame failure.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Compressed image bytes (JPEG or PNG)
    pub data: Bytes,

    /// Logical source tag (camera identifier)
    pub source: String,

    /// Monotonically increasing frame index within the source
    pub index: u64,

    /// Capture timestamp, nanoseconds since the epoch
    pub captured_at_ns: u64,
}

impl Frame {
    /// Create a frame captured now.
    pub fn new(data: Bytes, source: impl Into<String>, index: u64) -> Self {
        Self {
            data,
            source: source.into(),
            index,
            captured_at_ns: now_ns(),
        }
    }
}

fn now_ns() -> u64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
}

/// Serialized frame record as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Logical source tag
    pub source: String,

    /// Frame index assigned by the sender
    pub index: u64,

    /// Capture timestamp, nanoseconds since the epoch
    pub timestamp_ns: u64,

    /// Compressed image bytes
    pub frame: Vec<u8>,
}

impl FrameRecord {
    /// Convert the record into a pipeline frame.
    pub fn into_frame(self) -> Frame {
        Frame {
            data: Bytes::from(self.frame),
            source: self.source,
            index: self.index,
            captured_at_ns: self.timestamp_ns,
        }
    }
}

/// Encode a record with its length prefix, as a sender would.
pub fn encode_record(record: &FrameRecord) -> Result<Vec<u8>, SourceError> {
    let body = bincode::serialize(record).map_err(|e| SourceError::BadRecord(e.to_string()))?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Source of frames for the pipeline, drained strictly in order.
#[async_trait]
pub trait FrameSource: Send {
    /// Produce the next frame.
    ///
    /// `Ok(None)` ends the run. An `Err` is fatal to that single frame
    /// only; the source remains usable and the caller decides whether to
    /// keep draining.
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// File-based source reading `{base_path}{index}.jpg`.
pub struct FileSource {
    config: FileSourceConfig,
    next_index: u64,
    started: bool,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Self {
        let next_index = config.start_index;
        Self {
            config,
            next_index,
            started: false,
        }
    }

    fn frame_path(&self, index: u64) -> String {
        format!("{}{}.jpg", self.config.base_path, index)
    }
}

#[async_trait]
impl FrameSource for FileSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.next_index > self.config.end_index {
            return Ok(None);
        }

        if self.started {
            if let Some(interval) = self.config.frame_interval() {
                tokio::time::sleep(interval).await;
            }
        }
        self.started = true;

        let index = self.next_index;
        self.next_index += 1;

        let path = self.frame_path(index);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            warn!(path = %path, error = %e, "Frame file unreadable");
            SourceError::FileRead { path, source: e }
        })?;

        debug!(index = index, size_bytes = data.len(), "Read frame file");

        Ok(Some(Frame::new(
            Bytes::from(data),
            self.config.source_tag.clone(),
            index,
        )))
    }
}

/// State of the wire framing machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingState {
    /// Waiting for the 8-byte big-endian length prefix
    AwaitingLength,
    /// Waiting for the record body of the given length
    AwaitingBody { len: usize },
    /// Discarding the body of a rejected oversized record
    Discarding { remaining: u64 },
}

/// Incremental decoder for length-prefixed frame records.
///
/// Feed raw bytes with [`push`](RecordFraming::push), then drain complete
/// records with [`next_record`](RecordFraming::next_record). A length
/// exceeding the configured limit is rejected before any allocation.
#[derive(Debug)]
pub struct RecordFraming {
    state: FramingState,
    buf: BytesMut,
    max_record_bytes: usize,
}

impl RecordFraming {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            state: FramingState::AwaitingLength,
            buf: BytesMut::new(),
            max_record_bytes,
        }
    }

    /// Append raw bytes received from the peer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to decode the next complete record from the buffer.
    pub fn next_record(&mut self) -> Result<Option<FrameRecord>, SourceError> {
        loop {
            match self.state {
                FramingState::AwaitingLength => {
                    if self.buf.len() < LENGTH_PREFIX_BYTES {
                        return Ok(None);
                    }
                    let len = self.buf.get_u64();
                    if len > self.max_record_bytes as u64 {
                        // The rejected body must still be consumed, or later
                        // body bytes would be parsed as length prefixes.
                        self.state = FramingState::Discarding { remaining: len };
                        return Err(SourceError::RecordTooLarge {
                            len,
                            max: self.max_record_bytes,
                        });
                    }
                    self.state = FramingState::AwaitingBody { len: len as usize };
                }
                FramingState::AwaitingBody { len } => {
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let body = self.buf.split_to(len);
                    self.state = FramingState::AwaitingLength;
                    let record = bincode::deserialize(&body)
                        .map_err(|e| SourceError::BadRecord(e.to_string()))?;
                    return Ok(Some(record));
                }
                FramingState::Discarding { remaining } => {
                    let drop = remaining.min(self.buf.len() as u64);
                    self.buf.advance(drop as usize);
                    let remaining = remaining - drop;
                    if remaining > 0 {
                        self.state = FramingState::Discarding { remaining };
                        return Ok(None);
                    }
                    self.state = FramingState::AwaitingLength;
                }
            }
        }
    }
}

/// Streamed source: one TCP peer sending length-prefixed frame records.
pub struct StreamSource {
    listener: TcpListener,
    conn: Option<TcpStream>,
    framing: RecordFraming,
    config: StreamSourceConfig,
}

impl StreamSource {
    /// Bind the listener and prepare to accept a peer.
    pub async fn bind(config: StreamSourceConfig) -> Result<Self, SourceError> {
        let addr = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SourceError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        info!(addr = %addr, "Stream source listening");

        Ok(Self {
            listener,
            conn: None,
            framing: RecordFraming::new(config.max_record_bytes),
            config,
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept a peer, retrying transient accept failures with backoff.
    async fn accept_with_retry(&mut self) -> Result<(), SourceError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.accept_base_delay(),
            max_interval: self.config.accept_max_delay(),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "Peer connected");
                    self.conn = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    let delay = match backoff.next_backoff() {
                        Some(d) => d,
                        None => {
                            backoff.reset();
                            self.config.accept_base_delay()
                        }
                    };
                    warn!(error = %e, delay_ms = delay.as_millis(), "Accept failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for StreamSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            // Drain any record already buffered before touching the socket.
            if let Some(record) = self.framing.next_record()? {
                debug!(
                    source = %record.source,
                    index = record.index,
                    size_bytes = record.frame.len(),
                    "Received frame record"
                );
                return Ok(Some(record.into_frame()));
            }

            if self.conn.is_none() {
                self.accept_with_retry().await?;
            }

            let mut chunk = [0u8; 4096];
            let n = match self.conn.as_mut() {
                Some(conn) => conn
                    .read(&mut chunk)
                    .await
                    .map_err(SourceError::PeerRead)?,
                None => return Ok(None),
            };

            if n == 0 {
                info!("Peer disconnected, ending stream");
                self.conn = None;
                return Ok(None);
            }

            self.framing.push(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record(index: u64) -> FrameRecord {
        FrameRecord {
            source: "cow1".to_string(),
            index,
            timestamp_ns: 1_700_000_000_000_000_000 + index,
            frame: vec![0xFF, 0xD8, 0xFF, index as u8],
        }
    }

    #[test]
    fn test_framing_round_trip() {
        let record = create_test_record(1);
        let wire = encode_record(&record).unwrap();

        let mut framing = RecordFraming::new(1024);
        framing.push(&wire);

        let decoded = framing.next_record().unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(framing.buffered(), 0);
    }

    #[test]
    fn test_framing_byte_at_a_time() {
        let record = create_test_record(2);
        let wire = encode_record(&record).unwrap();

        let mut framing = RecordFraming::new(1024);
        for (i, byte) in wire.iter().enumerate() {
            framing.push(std::slice::from_ref(byte));
            let result = framing.next_record().unwrap();
            if i + 1 < wire.len() {
                assert!(result.is_none(), "record completed early at byte {i}");
            } else {
                assert_eq!(result.unwrap(), record);
            }
        }
    }

    #[test]
    fn test_framing_two_records_one_buffer() {
        let first = create_test_record(1);
        let second = create_test_record(2);

        let mut wire = encode_record(&first).unwrap();
        wire.extend(encode_record(&second).unwrap());

        let mut framing = RecordFraming::new(1024);
        framing.push(&wire);

        assert_eq!(framing.next_record().unwrap().unwrap(), first);
        assert_eq!(framing.next_record().unwrap().unwrap(), second);
        assert!(framing.next_record().unwrap().is_none());
    }

    #[test]
    fn test_framing_rejects_oversized_length() {
        let mut framing = RecordFraming::new(16);
        framing.push(&1024u64.to_be_bytes());

        let result = framing.next_record();
        assert!(matches!(
            result,
            Err(SourceError::RecordTooLarge { len: 1024, max: 16 })
        ));
    }

    #[test]
    fn test_framing_resyncs_after_oversized_record() {
        let record = create_test_record(5);
        let wire = encode_record(&record).unwrap();

        // Oversized record (declared 1000 bytes, limit 64) followed by a
        // valid one; the valid record must still decode.
        let mut framing = RecordFraming::new(64);
        framing.push(&1000u64.to_be_bytes());
        framing.push(&[0xCD; 1000]);
        framing.push(&wire);

        assert!(matches!(
            framing.next_record(),
            Err(SourceError::RecordTooLarge { len: 1000, max: 64 })
        ));
        assert_eq!(framing.next_record().unwrap().unwrap(), record);
    }

    #[test]
    fn test_framing_discards_oversized_body_in_chunks() {
        let record = create_test_record(6);
        let wire = encode_record(&record).unwrap();

        let mut framing = RecordFraming::new(64);
        framing.push(&300u64.to_be_bytes());
        assert!(matches!(
            framing.next_record(),
            Err(SourceError::RecordTooLarge { len: 300, max: 64 })
        ));

        // Body of the rejected record trickles in; no record surfaces
        // until it is fully discarded and the valid one arrives.
        for _ in 0..3 {
            framing.push(&[0xEE; 100]);
        }
        assert!(framing.next_record().unwrap().is_none());

        framing.push(&wire);
        assert_eq!(framing.next_record().unwrap().unwrap(), record);
    }

    #[test]
    fn test_framing_bad_body() {
        let garbage = vec![0xAB; 4];
        let mut wire = (garbage.len() as u64).to_be_bytes().to_vec();
        wire.extend(&garbage);

        let mut framing = RecordFraming::new(1024);
        framing.push(&wire);

        assert!(matches!(
            framing.next_record(),
            Err(SourceError::BadRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_reads_range() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("frame").to_string_lossy().to_string();

        for idx in 1..=2u64 {
            tokio::fs::write(format!("{base}{idx}.jpg"), vec![idx as u8; 8])
                .await
                .unwrap();
        }

        let mut source = FileSource::new(FileSourceConfig {
            base_path: base,
            source_tag: "cow1".to_string(),
            start_index: 1,
            end_index: 2,
            frame_interval_ms: 0,
        });

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.source, "cow1");
        assert_eq!(first.data.as_ref(), &[1u8; 8]);

        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.index, 2);

        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_per_frame_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("frame").to_string_lossy().to_string();

        // Only frames 1 and 3 exist.
        for idx in [1u64, 3] {
            tokio::fs::write(format!("{base}{idx}.jpg"), vec![idx as u8; 4])
                .await
                .unwrap();
        }

        let mut source = FileSource::new(FileSourceConfig {
            base_path: base,
            source_tag: "cow1".to_string(),
            start_index: 1,
            end_index: 3,
            frame_interval_ms: 0,
        });

        assert_eq!(source.next_frame().await.unwrap().unwrap().index, 1);
        assert!(matches!(
            source.next_frame().await,
            Err(SourceError::FileRead { .. })
        ));
        // The source advances past the failed index.
        assert_eq!(source.next_frame().await.unwrap().unwrap().index, 3);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_source_receives_records() {
        use tokio::io::AsyncWriteExt;

        let config = StreamSourceConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            max_record_bytes: 1024,
            accept_base_delay_ms: 10,
            accept_max_delay_ms: 100,
        };

        let mut source = StreamSource::bind(config).await.unwrap();
        let addr = source.local_addr().unwrap();

        let sender = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for idx in 1..=3u64 {
                let wire = encode_record(&create_test_record(idx)).unwrap();
                stream.write_all(&wire).await.unwrap();
            }
            stream.shutdown().await.unwrap();
        });

        for idx in 1..=3u64 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.index, idx);
            assert_eq!(frame.source, "cow1");
        }
        assert!(source.next_frame().await.unwrap().is_none());

        sender.await.unwrap();
    }
}
