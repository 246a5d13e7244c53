//! GELF over UDP: compression and chunked framing.
//!
//! Payloads that fit in one datagram go out as-is. Larger payloads are cut
//! into at most [`MAX_CHUNKS`] datagrams, each prefixed with a 12-byte header:
//!
//! ```text
//! +------+------+------------------+-----+-------+---------------+
//! | 0x1e | 0x0f | message id (8)   | seq | total | payload slice |
//! +------+------+------------------+-----+-------+---------------+
//! ```

use async_trait::async_trait;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::trace;

use crate::compression::{CompressionPool, CompressionType, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{ConfigError, GelfError};
use crate::message::GelfMessage;
use crate::sink::LogSink;

pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
pub const CHUNK_HEADER_LEN: usize = 12;
pub const MAX_CHUNKS: usize = 128;
/// Datagram size, header included.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Identifier shared by every chunk of one encoded message.
pub type MessageId = [u8; 8];

/// Configuration for [`UdpSink`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Largest datagram sent, chunk header included.
    pub chunk_size: usize,
    pub compression: CompressionType,
    pub compression_level: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: CompressionType::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Cut an encoded payload into datagrams.
///
/// Returns the payload untouched when it fits in `chunk_size`, otherwise
/// one framed datagram per chunk in sequence order.
pub fn frame_datagrams(
    payload: &[u8],
    chunk_size: usize,
    id: MessageId,
) -> Result<Vec<Vec<u8>>, GelfError> {
    if payload.len() <= chunk_size {
        return Ok(vec![payload.to_vec()]);
    }
    let data_len = chunk_size
        .checked_sub(CHUNK_HEADER_LEN)
        .filter(|len| *len > 0)
        .ok_or(ConfigError::ChunkSizeTooSmall(chunk_size))?;
    let total = payload.len().div_ceil(data_len);
    if total > MAX_CHUNKS {
        return Err(GelfError::MessageTooLarge {
            chunks: total,
            max: MAX_CHUNKS,
        });
    }

    Ok(payload
        .chunks(data_len)
        .enumerate()
        .map(|(seq, slice)| {
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + slice.len());
            datagram.extend_from_slice(&CHUNK_MAGIC);
            datagram.extend_from_slice(&id);
            datagram.push(seq as u8);
            datagram.push(total as u8);
            datagram.extend_from_slice(slice);
            datagram
        })
        .collect())
}

/// [`LogSink`] writing GELF datagrams to a UDP endpoint.
///
/// The socket is a plain connected `std` socket: UDP sends complete without
/// waiting on the peer, and the sink stays usable from any runtime.
pub struct UdpSink {
    socket: UdpSocket,
    chunk_size: usize,
    pool: CompressionPool,
}

impl UdpSink {
    /// Connect to `addr` (`host:port`) using `config`.
    pub fn new(addr: &str, config: UdpConfig) -> Result<Self, ConfigError> {
        let pool = CompressionPool::new(config.compression, config.compression_level)?;
        Self::with_pool(addr, config.chunk_size, pool)
    }

    /// Connect to `addr` with an externally built compression pool.
    pub fn with_pool(addr: &str, chunk_size: usize, pool: CompressionPool) -> Result<Self, ConfigError> {
        if chunk_size <= CHUNK_HEADER_LEN {
            return Err(ConfigError::ChunkSizeTooSmall(chunk_size));
        }
        let invalid = |source| ConfigError::InvalidAddress {
            addr: addr.to_string(),
            source,
        };
        let target = addr
            .to_socket_addrs()
            .map_err(invalid)?
            .next()
            .ok_or_else(|| {
                invalid(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "address resolved to nothing",
                ))
            })?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(invalid)?;
        socket.connect(target).map_err(invalid)?;
        Ok(Self {
            socket,
            chunk_size,
            pool,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    pub fn compression(&self) -> CompressionType {
        self.pool.kind()
    }

    /// Serialize, compress and frame `message` under a fresh message id.
    pub fn encode(&self, message: &GelfMessage) -> Result<Vec<Vec<u8>>, GelfError> {
        let mut compressor = self.pool.acquire();
        serde_json::to_writer(&mut *compressor, message)?;
        let payload = compressor.finish()?;
        frame_datagrams(payload, self.chunk_size, rand::random())
    }

    /// Send `message`, returning the first socket error encountered.
    pub fn write_message(&self, message: &GelfMessage) -> Result<(), GelfError> {
        let datagrams = self.encode(message)?;
        trace!(datagrams = datagrams.len(), "sending GELF message");
        for datagram in &datagrams {
            self.socket.send(datagram)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for UdpSink {
    async fn send(&self, message: &GelfMessage) -> Result<(), GelfError> {
        self.write_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn message(body: String) -> GelfMessage {
        GelfMessage {
            version: "1.1".into(),
            host: "h".into(),
            short_message: body,
            full_message: String::new(),
            timestamp: 1.5,
            level: 6,
            file: String::new(),
            line: 0,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn small_payloads_are_not_framed() {
        let out = frame_datagrams(b"{}", 100, [1; 8]).unwrap();
        assert_eq!(out, vec![b"{}".to_vec()]);
    }

    #[test]
    fn payload_at_threshold_stays_whole() {
        let payload = vec![b'x'; 100];
        let out = frame_datagrams(&payload, 100, [1; 8]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], payload);
    }

    #[test]
    fn large_payloads_get_headers_in_order() {
        let payload: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let id = [9, 8, 7, 6, 5, 4, 3, 2];
        let out = frame_datagrams(&payload, 112, id).unwrap();

        assert_eq!(out.len(), 3);
        for (seq, datagram) in out.iter().enumerate() {
            assert_eq!(&datagram[..2], &CHUNK_MAGIC);
            assert_eq!(&datagram[2..10], &id);
            assert_eq!(datagram[10] as usize, seq);
            assert_eq!(datagram[11], 3);
            assert!(datagram.len() <= 112);
        }
        let joined: Vec<u8> = out.iter().flat_map(|d| d[CHUNK_HEADER_LEN..].to_vec()).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn refuses_more_than_max_chunks() {
        let data_len = 20 - CHUNK_HEADER_LEN;
        let payload = vec![0u8; data_len * MAX_CHUNKS + 1];
        match frame_datagrams(&payload, 20, [0; 8]) {
            Err(GelfError::MessageTooLarge { chunks, max }) => {
                assert_eq!(chunks, MAX_CHUNKS + 1);
                assert_eq!(max, MAX_CHUNKS);
            }
            other => panic!("unexpected {other:?}"),
        }
        let exact = vec![0u8; data_len * MAX_CHUNKS];
        assert_eq!(frame_datagrams(&exact, 20, [0; 8]).unwrap().len(), MAX_CHUNKS);
    }

    #[test]
    fn each_send_uses_a_fresh_id() {
        let sink = UdpSink::new(
            "127.0.0.1:9",
            UdpConfig {
                chunk_size: 64,
                compression: CompressionType::None,
                compression_level: 0,
            },
        )
        .unwrap();
        let msg = message("y".repeat(300));
        let a = sink.encode(&msg).unwrap();
        let b = sink.encode(&msg).unwrap();
        assert!(a.len() > 1);
        assert_ne!(&a[0][2..10], &b[0][2..10]);
    }

    #[test]
    fn rejects_tiny_chunk_sizes() {
        let config = UdpConfig {
            chunk_size: CHUNK_HEADER_LEN,
            ..UdpConfig::default()
        };
        assert!(matches!(
            UdpSink::new("127.0.0.1:9", config),
            Err(ConfigError::ChunkSizeTooSmall(_))
        ));
    }
}
