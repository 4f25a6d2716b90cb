//! Incremental decoder for the raw record stream.
//!
//! A read may end anywhere: in the middle of a header, in the middle of a name, or exactly on a
//! record boundary. The decoder keeps whatever has not been decoded yet and only ever produces a
//! record once all of its bytes are buffered.
//!
//! Record layout, native byte order:
//!
//! ```text
//! +-----------+-----------+-----------+---------------+--------------------------+
//! | wd: i32   | mask: u32 | cookie:u32| name_len: u32 | name: name_len bytes,    |
//! |           |           |           |               | NUL terminated + padded  |
//! +-----------+-----------+-----------+---------------+--------------------------+
//! ```

use crate::{
    config::{Config, HEADER_SIZE},
    Error, Result,
};
use notify_mux_types::{
    event::{Event, WatchId},
    mask::EventMask,
};
use std::{ffi::OsString, fmt};

/// Fixed-size buffer turning raw reads into [`Event`]s.
///
/// The buffer never grows: it holds one read chunk plus one partially received record, and is
/// compacted after each batch of decoded records.
#[derive(Debug)]
pub struct Decoder {
    buf: Box<[u8]>,
    used: usize,
    consumed: usize,
    read_chunk_size: usize,
    max_name_len: usize,
    /// Stream offset of `buf[0]`.
    offset: u64,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    wd: i32,
    mask: u32,
    cookie: u32,
    name_len: u32,
}

impl Header {
    fn parse(bytes: &[u8]) -> Header {
        let field = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Header {
            wd: i32::from_ne_bytes(field(0)),
            mask: u32::from_ne_bytes(field(4)),
            cookie: u32::from_ne_bytes(field(8)),
            name_len: u32::from_ne_bytes(field(12)),
        }
    }
}

impl Decoder {
    /// Creates an empty decoder sized for `config`.
    pub fn new(config: &Config) -> Self {
        Decoder {
            buf: vec![0; config.buffer_capacity()].into_boxed_slice(),
            used: 0,
            consumed: 0,
            read_chunk_size: config.read_chunk_size(),
            max_name_len: config.max_name_len(),
            offset: 0,
        }
    }

    /// Writable region for the next read, at most one read chunk long.
    pub fn spare(&mut self) -> &mut [u8] {
        let end = (self.used + self.read_chunk_size).min(self.buf.len());
        &mut self.buf[self.used..end]
    }

    /// Accounts for `n` bytes written into [`Decoder::spare`].
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.used + n <= self.buf.len(), "commit past the buffer end");
        self.used = (self.used + n).min(self.buf.len());
    }

    /// Copies `bytes` into the buffer, returning how many fit.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let spare = self.spare();
        let n = bytes.len().min(spare.len());
        spare[..n].copy_from_slice(&bytes[..n]);
        self.commit(n);
        n
    }

    /// Bytes received but not decoded yet.
    pub fn pending(&self) -> usize {
        self.used - self.consumed
    }

    /// Total size of the buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Stream offset of the next undecoded byte.
    pub fn position(&self) -> u64 {
        self.offset + self.consumed as u64
    }

    /// Decodes the next complete record, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A record announcing a name longer than the
    /// configured maximum can never be completed and fails with
    /// [`Error::MalformedEventStream`].
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        let available = &self.buf[self.consumed..self.used];
        if available.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(available);
        let name_len = header.name_len as usize;
        if name_len > self.max_name_len {
            return Err(Error::MalformedEventStream {
                offset: self.position(),
                reason: format!(
                    "name length {name_len} exceeds the maximum of {}",
                    self.max_name_len
                ),
            });
        }

        let record_len = HEADER_SIZE + name_len;
        if available.len() < record_len {
            return Ok(None);
        }

        let name = decode_name(&available[HEADER_SIZE..record_len]);
        let event = Event::new(
            WatchId::new(header.wd),
            EventMask::from_bits_retain(header.mask),
        )
        .with_cookie(header.cookie)
        .with_some_name(name);

        self.consumed += record_len;
        Ok(Some(event))
    }

    /// Moves the undecoded tail to the front of the buffer.
    pub fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.buf.copy_within(self.consumed..self.used, 0);
        self.used -= self.consumed;
        self.offset += self.consumed as u64;
        self.consumed = 0;
    }
}

/// Cuts the kernel's NUL padding off a name field.
fn decode_name(field: &[u8]) -> Option<OsString> {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if len == 0 {
        return None;
    }
    Some(os_string_from_bytes(&field[..len]))
}

#[cfg(unix)]
fn os_string_from_bytes(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(bytes).to_owned()
}

#[cfg(not(unix))]
fn os_string_from_bytes(bytes: &[u8]) -> OsString {
    String::from_utf8_lossy(bytes).into_owned().into()
}

/// Hex and ASCII rendering of raw bytes, sixteen per line.
///
/// ```text
/// 00000000 : 07 00 00 00 00 01 00 00 00 00 00 00 10 00 00 00 : ................
/// 00000010 : 78 2e 74 78 74 00 00 00 00 00 00 00 00 00 00 00 : x.txt...........
/// 00000020
/// ```
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LINE: usize = 16;
        for (i, line) in self.0.chunks(LINE).enumerate() {
            write!(f, "{:08x} : ", i * LINE)?;
            for b in line {
                write!(f, "{b:02x} ")?;
            }
            for _ in line.len()..LINE {
                f.write_str("   ")?;
            }
            f.write_str(": ")?;
            for &b in line {
                let c = if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        write!(f, "{:08x}", self.0.len())
    }
}

impl fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
