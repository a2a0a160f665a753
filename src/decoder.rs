// src/decoder.rs

//! Splits a buffer read from an inotify descriptor into event records.
//!
//! Each record is a fixed `struct inotify_event` header (watch descriptor,
//! mask, cookie, name length) followed by `len` bytes of NUL-padded name.
//! The kernel never splits a record across reads, so any buffer that does
//! not frame into whole records is reported as corruption.

use log::trace;

use crate::error::{NotifyError, Result};

/// Size of the fixed record header: `i32 wd, u32 mask, u32 cookie, u32 len`.
pub const HEADER_LEN: usize = 16;

/// One undecoded kernel event, borrowing its name from the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub wd: i32,
    pub mask: u32,
    pub cookie: u32,
    /// Name bytes up to the first NUL; `None` when the event is about the
    /// watched entry itself.
    pub name: Option<&'a [u8]>,
    /// Bytes this record occupied in the buffer, padding included.
    pub len: usize,
}

/// Lazily decodes `buf`. Performs no I/O.
pub fn decode(buf: &[u8]) -> Records<'_> {
    Records {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Iterator over the records of one buffer. Yields at most one error, after
/// which it is exhausted.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Records<'a> {
    /// Bytes not yet decoded.
    pub fn remaining(&self) -> usize {
        if self.failed {
            0
        } else {
            self.buf.len() - self.offset
        }
    }

    fn corrupt(&mut self, reason: &'static str) -> NotifyError {
        self.failed = true;
        NotifyError::Corruption {
            offset: self.offset,
            reason,
        }
    }

    fn next_record(&mut self) -> Result<RawRecord<'a>> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.offset..];
        if rest.len() < HEADER_LEN {
            return Err(self.corrupt("truncated record header"));
        }

        let wd = i32::from_ne_bytes(word(rest, 0));
        let mask = u32::from_ne_bytes(word(rest, 4));
        let cookie = u32::from_ne_bytes(word(rest, 8));
        let name_len = u32::from_ne_bytes(word(rest, 12)) as usize;

        let total = match HEADER_LEN.checked_add(name_len) {
            Some(total) if total <= rest.len() => total,
            _ => return Err(self.corrupt("name length runs past end of buffer")),
        };

        let name = if name_len == 0 {
            None
        } else {
            let raw = &rest[HEADER_LEN..total];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Some(&raw[..end])
        };

        trace!(
            "Decoded record at offset {}: wd={} mask={:#x} cookie={} name_len={}",
            self.offset,
            wd,
            mask,
            cookie,
            name_len
        );
        self.offset += total;

        Ok(RawRecord {
            wd,
            mask,
            cookie,
            name,
            len: total,
        })
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        Some(self.next_record())
    }
}

impl std::iter::FusedIterator for Records<'_> {}

fn word(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

#[cfg(test)]
mod tests;
