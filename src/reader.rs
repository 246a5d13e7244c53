//! Receiving side of GELF over UDP.
//!
//! [`Reassembler`] rebuilds payloads from chunks that may arrive in any
//! order; [`UdpReader`] drives it from a socket and decodes the result.
//! Incomplete messages are evicted after a timeout and never reported:
//! UDP gives no delivery guarantee, so a missing chunk is not an error.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::compression;
use crate::error::GelfError;
use crate::message::GelfMessage;
use crate::udp::{MessageId, CHUNK_HEADER_LEN, CHUNK_MAGIC, MAX_CHUNKS};

pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Large enough for any UDP datagram.
const RECV_BUFFER_SIZE: usize = 65_536;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Age after which an incomplete message is discarded.
    pub reassembly_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Parsed chunk header plus a view of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub id: MessageId,
    pub sequence: u8,
    pub total: u8,
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Parse a datagram known to start with [`CHUNK_MAGIC`].
    pub fn parse(datagram: &'a [u8]) -> Result<Self, GelfError> {
        if datagram.len() < CHUNK_HEADER_LEN {
            return Err(GelfError::MalformedChunk("datagram shorter than chunk header"));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&datagram[2..10]);
        let sequence = datagram[10];
        let total = datagram[11];
        if total == 0 || usize::from(total) > MAX_CHUNKS {
            return Err(GelfError::MalformedChunk("chunk count out of range"));
        }
        if sequence >= total {
            return Err(GelfError::MalformedChunk("sequence number beyond chunk count"));
        }
        Ok(Self {
            id,
            sequence,
            total,
            payload: &datagram[CHUNK_HEADER_LEN..],
        })
    }
}

struct PendingMessage {
    parts: BTreeMap<u8, Vec<u8>>,
    total: u8,
    first_seen: Instant,
}

/// Table of partially received messages keyed by message id.
///
/// Safe to share between concurrent receive loops.
pub struct Reassembler {
    pending: Mutex<HashMap<MessageId, PendingMessage>>,
    timeout: Duration,
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Feed one datagram; returns the full payload once it is complete.
    pub fn ingest(&self, datagram: &[u8]) -> Result<Option<Vec<u8>>, GelfError> {
        self.ingest_at(datagram, Instant::now())
    }

    pub fn ingest_at(&self, datagram: &[u8], now: Instant) -> Result<Option<Vec<u8>>, GelfError> {
        if !datagram.starts_with(&CHUNK_MAGIC) {
            return Ok(Some(datagram.to_vec()));
        }
        let chunk = Chunk::parse(datagram)?;

        let mut pending = self.pending.lock();
        // A late chunk of an expired message starts a new one.
        if pending
            .get(&chunk.id)
            .is_some_and(|entry| now.saturating_duration_since(entry.first_seen) > self.timeout)
        {
            pending.remove(&chunk.id);
        }
        let entry = pending.entry(chunk.id).or_insert_with(|| PendingMessage {
            parts: BTreeMap::new(),
            total: chunk.total,
            first_seen: now,
        });
        if entry.total != chunk.total {
            return Err(GelfError::MalformedChunk("chunk count changed within one message"));
        }
        entry.parts.insert(chunk.sequence, chunk.payload.to_vec());
        if entry.parts.len() < usize::from(entry.total) {
            return Ok(None);
        }

        let Some(complete) = pending.remove(&chunk.id) else {
            return Ok(None);
        };
        let size = complete.parts.values().map(Vec::len).sum();
        let mut payload = Vec::with_capacity(size);
        for part in complete.parts.into_values() {
            payload.extend_from_slice(&part);
        }
        Ok(Some(payload))
    }

    /// Drop entries older than the timeout; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| now.saturating_duration_since(entry.first_seen) <= self.timeout);
        before - pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Decompress (sniffing gzip/zlib headers) and decode a complete payload.
pub fn decode_payload(payload: &[u8]) -> Result<GelfMessage, GelfError> {
    let raw = compression::decompress(payload)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// GELF UDP listener.
pub struct UdpReader {
    socket: UdpSocket,
    reassembler: Arc<Reassembler>,
    config: ReaderConfig,
    last_sweep: Mutex<Instant>,
}

impl UdpReader {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        Self::bind_with_config(addr, ReaderConfig::default()).await
    }

    pub async fn bind_with_config(addr: &str, config: ReaderConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            reassembler: Arc::new(Reassembler::new(config.reassembly_timeout)),
            config,
            last_sweep: Mutex::new(Instant::now()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn reassembler(&self) -> &Arc<Reassembler> {
        &self.reassembler
    }

    /// Wait for the next complete payload, as sent (still compressed).
    ///
    /// Malformed chunks are logged and skipped. Stale entries are swept
    /// every `sweep_interval` while reading, with or without
    /// [`spawn_sweeper`](Self::spawn_sweeper).
    pub async fn read_payload(&self) -> Result<Vec<u8>, GelfError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            self.sweep_if_due();
            match self.reassembler.ingest(&buf[..len]) {
                Ok(Some(payload)) => return Ok(payload),
                Ok(None) => {}
                Err(err) => debug!(%peer, error = %err, "skipping datagram"),
            }
        }
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.config.sweep_interval {
                return;
            }
            *last = now;
        }
        let evicted = self.reassembler.sweep_at(now);
        if evicted > 0 {
            debug!(evicted, "dropped incomplete GELF messages");
        }
    }

    /// Wait for the next complete message and decode it.
    pub async fn read_message(&self) -> Result<GelfMessage, GelfError> {
        let payload = self.read_payload().await?;
        decode_payload(&payload)
    }

    /// Periodically evict stale reassembly entries until the handle is aborted.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let reassembler = Arc::clone(&self.reassembler);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = reassembler.sweep();
                if evicted > 0 {
                    debug!(evicted, "dropped incomplete GELF messages");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udp::frame_datagrams;
    use proptest::prelude::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn unchunked_datagrams_pass_through() {
        let r = Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT);
        assert_eq!(r.ingest(b"{\"a\":1}").unwrap(), Some(b"{\"a\":1}".to_vec()));
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn completes_once_every_sequence_arrived() {
        let r = Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT);
        let data = payload(300);
        let chunks = frame_datagrams(&data, 112, [3; 8]).unwrap();

        assert_eq!(r.ingest(&chunks[2]).unwrap(), None);
        assert_eq!(r.ingest(&chunks[0]).unwrap(), None);
        // duplicates do not complete a message
        assert_eq!(r.ingest(&chunks[0]).unwrap(), None);
        assert_eq!(r.pending_len(), 1);
        assert_eq!(r.ingest(&chunks[1]).unwrap(), Some(data));
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn interleaved_messages_stay_separate() {
        let r = Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT);
        let a = payload(250);
        let b: Vec<u8> = payload(250).into_iter().rev().collect();
        let ca = frame_datagrams(&a, 112, [1; 8]).unwrap();
        let cb = frame_datagrams(&b, 112, [2; 8]).unwrap();

        let mut done = Vec::new();
        for (x, y) in ca.iter().zip(cb.iter()) {
            done.extend(r.ingest(x).unwrap());
            done.extend(r.ingest(y).unwrap());
        }
        assert_eq!(done, vec![a, b]);
    }

    #[test]
    fn stale_entries_are_swept_silently() {
        let r = Reassembler::new(Duration::from_millis(100));
        let start = Instant::now();
        let chunks = frame_datagrams(&payload(300), 112, [4; 8]).unwrap();
        r.ingest_at(&chunks[0], start).unwrap();

        assert_eq!(r.sweep_at(start + Duration::from_millis(50)), 0);
        assert_eq!(r.sweep_at(start + Duration::from_millis(150)), 1);
        assert_eq!(r.pending_len(), 0);
        // late remainder starts a fresh, incomplete entry
        assert_eq!(r.ingest(&chunks[1]).unwrap(), None);
    }

    #[test]
    fn expired_entries_are_not_completed_by_late_chunks() {
        let r = Reassembler::new(Duration::from_millis(100));
        let start = Instant::now();
        let chunks = frame_datagrams(&payload(200), 112, [5; 8]).unwrap();
        assert_eq!(chunks.len(), 2);

        r.ingest_at(&chunks[0], start).unwrap();
        let late = start + Duration::from_millis(150);
        assert_eq!(r.ingest_at(&chunks[1], late).unwrap(), None);
        assert_eq!(r.pending_len(), 1);
        // the restarted entry still completes within its own window
        let data = r.ingest_at(&chunks[0], late + Duration::from_millis(10)).unwrap();
        assert_eq!(data, Some(payload(200)));
    }

    #[tokio::test]
    async fn reading_sweeps_stale_entries() {
        let reader = UdpReader::bind_with_config(
            "127.0.0.1:0",
            ReaderConfig {
                reassembly_timeout: Duration::from_millis(100),
                sweep_interval: Duration::from_millis(100),
            },
        )
        .await
        .unwrap();
        let addr = reader.local_addr().unwrap();
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let chunks = frame_datagrams(&payload(300), 112, [6; 8]).unwrap();
        socket.send_to(&chunks[0], addr).unwrap();
        socket.send_to(b"{\"first\":1}", addr).unwrap();
        assert_eq!(reader.read_payload().await.unwrap(), b"{\"first\":1}".to_vec());
        assert_eq!(reader.reassembler().pending_len(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        socket.send_to(b"{\"second\":2}", addr).unwrap();
        assert_eq!(reader.read_payload().await.unwrap(), b"{\"second\":2}".to_vec());
        assert_eq!(reader.reassembler().pending_len(), 0);
    }

    #[test]
    fn rejects_malformed_headers() {
        let r = Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT);
        assert!(matches!(r.ingest(&[0x1e, 0x0f, 1]), Err(GelfError::MalformedChunk(_))));

        let mut bad = vec![0x1e, 0x0f, 0, 0, 0, 0, 0, 0, 0, 0, 5, 5];
        bad.extend_from_slice(b"x");
        assert!(matches!(r.ingest(&bad), Err(GelfError::MalformedChunk(_))));
        bad[10] = 0;
        bad[11] = 0;
        assert!(matches!(r.ingest(&bad), Err(GelfError::MalformedChunk(_))));
    }

    #[test]
    fn plain_json_decodes_without_decompression() {
        let msg = decode_payload(br#"{"version":"1.1","host":"h","short_message":"s","timestamp":1.0,"level":6,"_k":"v"}"#)
            .unwrap();
        assert_eq!(msg.short_message, "s");
        assert_eq!(msg.full_message, "");
        assert_eq!(msg.extra["_k"], "v");
    }

    proptest! {
        #[test]
        fn any_arrival_order_rebuilds_the_payload(
            (data, order) in (1usize..2_000).prop_flat_map(|len| {
                let chunks = if len <= 52 { 1 } else { len.div_ceil(40) };
                (Just(payload(len)), Just((0..chunks).collect::<Vec<_>>()).prop_shuffle())
            })
        ) {
            let r = Reassembler::new(DEFAULT_REASSEMBLY_TIMEOUT);
            let chunks = frame_datagrams(&data, 52, [7; 8]).unwrap();
            let mut rebuilt = None;
            for (n, idx) in order.iter().enumerate() {
                let out = r.ingest(&chunks[*idx]).unwrap();
                if n + 1 < order.len() {
                    prop_assert!(out.is_none());
                }
                rebuilt = out;
            }
            prop_assert_eq!(rebuilt, Some(data));
        }
    }
}
