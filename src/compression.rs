//! Pooled payload compressors for the UDP transport.
//!
//! A [`CompressionPool`] hands out [`PooledCompressor`]s: buffer-backed
//! writers that collect a serialized message and compress it on
//! [`Compressor::finish`]. Instances go back to the pool when the guard is
//! dropped and are reset in place on the next acquire, so the deflate state
//! tables are allocated once per instance rather than once per message.

use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use crate::error::ConfigError;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const ZLIB_MAGIC: u8 = 0x78;

/// `flate2` "fast" level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

const MAX_IDLE: usize = 16;

/// Payload encoding applied before chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    Gzip,
    Zlib,
    None,
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionType::Gzip => "gzip",
            CompressionType::Zlib => "zlib",
            CompressionType::None => "none",
        })
    }
}

impl FromStr for CompressionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(CompressionType::Gzip),
            "zlib" => Ok(CompressionType::Zlib),
            "none" | "identity" => Ok(CompressionType::None),
            other => Err(ConfigError::UnknownCompression(other.to_string())),
        }
    }
}

/// Reusable compressor bound to one [`CompressionType`] and level.
pub struct Compressor {
    kind: CompressionType,
    level: Compression,
    deflate: Option<Compress>,
    crc: Crc,
    input: Vec<u8>,
    output: Vec<u8>,
    finished: bool,
}

impl Compressor {
    fn new(kind: CompressionType, level: Compression) -> Self {
        let deflate = match kind {
            // gzip framing is written by hand around a raw deflate stream
            CompressionType::Gzip => Some(Compress::new(level, false)),
            CompressionType::Zlib => Some(Compress::new(level, true)),
            CompressionType::None => None,
        };
        Self {
            kind,
            level,
            deflate,
            crc: Crc::new(),
            input: Vec::new(),
            output: Vec::new(),
            finished: false,
        }
    }

    fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.crc.reset();
        self.finished = false;
        if let Some(deflate) = self.deflate.as_mut() {
            deflate.reset();
        }
    }

    pub fn kind(&self) -> CompressionType {
        self.kind
    }

    /// Compress everything written so far and return the encoded bytes.
    ///
    /// Identity compressors return the written bytes unchanged.
    pub fn finish(&mut self) -> io::Result<&[u8]> {
        if !self.finished {
            match self.kind {
                CompressionType::None => {}
                CompressionType::Zlib => {
                    if let Some(deflate) = self.deflate.as_mut() {
                        deflate_all(deflate, &self.input, &mut self.output)?;
                    }
                }
                CompressionType::Gzip => {
                    self.output.extend_from_slice(&gzip_header(self.level));
                    if let Some(deflate) = self.deflate.as_mut() {
                        deflate_all(deflate, &self.input, &mut self.output)?;
                    }
                    self.crc.update(&self.input);
                    self.output.extend_from_slice(&self.crc.sum().to_le_bytes());
                    self.output.extend_from_slice(&self.crc.amount().to_le_bytes());
                }
            }
            self.finished = true;
        }
        Ok(match self.kind {
            CompressionType::None => self.input.as_slice(),
            _ => self.output.as_slice(),
        })
    }
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("compressor already finished"));
        }
        self.input.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn gzip_header(level: Compression) -> [u8; 10] {
    let xfl = match level.level() {
        9 => 2,
        1 => 4,
        _ => 0,
    };
    // magic, CM=deflate, no flags, mtime 0, XFL, OS unknown
    [GZIP_MAGIC[0], GZIP_MAGIC[1], 8, 0, 0, 0, 0, 0, xfl, 255]
}

fn deflate_all(deflate: &mut Compress, input: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
    let start = deflate.total_in();
    loop {
        let consumed = (deflate.total_in() - start) as usize;
        output.reserve((input.len() - consumed) / 2 + 64);
        let status = deflate
            .compress_vec(&input[consumed..], output, FlushCompress::Finish)
            .map_err(io::Error::other)?;
        if let Status::StreamEnd = status {
            return Ok(());
        }
    }
}

/// Pool of [`Compressor`]s sharing one type and level.
pub struct CompressionPool {
    kind: CompressionType,
    level: Compression,
    idle: Mutex<Vec<Compressor>>,
}

impl fmt::Debug for CompressionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionPool")
            .field("kind", &self.kind)
            .field("level", &self.level.level())
            .field("idle", &self.idle.lock().len())
            .finish()
    }
}

impl CompressionPool {
    /// Build a pool; levels above 9 are rejected here, once.
    pub fn new(kind: CompressionType, level: u32) -> Result<Self, ConfigError> {
        if level > 9 {
            return Err(ConfigError::InvalidCompressionLevel(level));
        }
        Ok(Self {
            kind,
            level: Compression::new(level),
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> CompressionType {
        self.kind
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }

    /// Borrow a reset compressor; it returns to the pool on drop.
    pub fn acquire(&self) -> PooledCompressor<'_> {
        let mut compressor = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Compressor::new(self.kind, self.level));
        compressor.reset();
        PooledCompressor {
            pool: self,
            compressor,
        }
    }

    /// Return a compressor explicitly; equivalent to dropping it.
    pub fn release(&self, compressor: PooledCompressor<'_>) {
        drop(compressor);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn put_back(&self, compressor: Compressor) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(compressor);
        }
    }
}

/// Exclusive loan of a [`Compressor`] from a [`CompressionPool`].
pub struct PooledCompressor<'a> {
    pool: &'a CompressionPool,
    compressor: Compressor,
}

impl Deref for PooledCompressor<'_> {
    type Target = Compressor;

    fn deref(&self) -> &Compressor {
        &self.compressor
    }
}

impl DerefMut for PooledCompressor<'_> {
    fn deref_mut(&mut self) -> &mut Compressor {
        &mut self.compressor
    }
}

impl Drop for PooledCompressor<'_> {
    fn drop(&mut self) {
        // identity placeholder allocates nothing
        let placeholder = Compressor::new(CompressionType::None, Compression::none());
        let compressor = std::mem::replace(&mut self.compressor, placeholder);
        self.pool.put_back(compressor);
    }
}

/// Detect the payload encoding from its leading bytes.
pub fn sniff(payload: &[u8]) -> CompressionType {
    match payload {
        [a, b, ..] if [*a, *b] == GZIP_MAGIC => CompressionType::Gzip,
        [a, b, ..] if *a == ZLIB_MAGIC && (u16::from(*a) * 256 + u16::from(*b)) % 31 == 0 => {
            CompressionType::Zlib
        }
        _ => CompressionType::None,
    }
}

/// Undo whatever compression [`sniff`] detects; plain payloads are borrowed.
pub fn decompress(payload: &[u8]) -> io::Result<Cow<'_, [u8]>> {
    let mut decoded = Vec::with_capacity(payload.len() * 4);
    match sniff(payload) {
        CompressionType::Gzip => {
            flate2::read::GzDecoder::new(payload).read_to_end(&mut decoded)?;
        }
        CompressionType::Zlib => {
            flate2::read::ZlibDecoder::new(payload).read_to_end(&mut decoded)?;
        }
        CompressionType::None => return Ok(Cow::Borrowed(payload)),
    }
    Ok(Cow::Owned(decoded))
}
