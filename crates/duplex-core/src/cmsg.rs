//! Control-message codecs
//!
//! Two encodings live here:
//!
//! - The caller-facing control buffer uses the Linux `cmsghdr` layout
//!   (`len: usize`, `level: i32`, `type: i32`, data aligned to `usize`).
//! - Inside the ring each control message is a compact record:
//!   `{data_len: u32, level: i32, type: i32}` followed by `data_len` bytes.
//!   For `SCM_RIGHTS` the record data is a run of 8-byte ownership tokens
//!   rather than descriptor numbers.

use core::mem::size_of;
use crate::error::{ChanError, ChanResult};

pub const SOL_SOCKET: i32 = libc::SOL_SOCKET;
pub const SCM_RIGHTS: i32 = libc::SCM_RIGHTS;

/// Most descriptors one `SCM_RIGHTS` message may carry
pub const MAX_RIGHTS_PER_MESSAGE: usize = 253;

const FD_SIZE: usize = size_of::<i32>();

/// Round `len` up to the control-buffer alignment
#[inline]
pub const fn cmsg_align(len: usize) -> usize {
    (len + size_of::<usize>() - 1) & !(size_of::<usize>() - 1)
}

/// Size of a caller-facing `cmsghdr`
pub const CMSG_HEADER_SIZE: usize = cmsg_align(size_of::<usize>() + 2 * size_of::<i32>());

/// Value of `cmsg_len` for `data_len` bytes of payload
#[inline]
pub const fn cmsg_len(data_len: usize) -> usize {
    CMSG_HEADER_SIZE + data_len
}

/// Control-buffer bytes consumed by one message with `data_len` payload bytes
#[inline]
pub const fn cmsg_space(data_len: usize) -> usize {
    CMSG_HEADER_SIZE + cmsg_align(data_len)
}

/// Control-buffer bytes for one `SCM_RIGHTS` message carrying `count` descriptors
#[inline]
pub const fn rights_space(count: usize) -> usize {
    cmsg_space(count * FD_SIZE)
}

// ============================================================================
// Caller-facing control buffers
// ============================================================================

/// One parsed caller-facing control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmsg<'a> {
    pub level: i32,
    pub kind: i32,
    pub data: &'a [u8],
}

impl<'a> Cmsg<'a> {
    #[inline]
    pub fn is_rights(&self) -> bool {
        self.level == SOL_SOCKET && self.kind == SCM_RIGHTS
    }

    /// Descriptor numbers carried by an `SCM_RIGHTS` message
    pub fn rights(&self) -> ChanResult<Vec<i32>> {
        if !self.is_rights() {
            return Err(ChanError::InvalidArgument("not an SCM_RIGHTS message"));
        }
        if self.data.len() % FD_SIZE != 0 {
            return Err(ChanError::InvalidArgument("ragged SCM_RIGHTS payload"));
        }
        Ok(self
            .data
            .chunks_exact(FD_SIZE)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Iterator over the messages in a caller-facing control buffer
pub struct CmsgIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CmsgIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for CmsgIter<'a> {
    type Item = ChanResult<Cmsg<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos.min(buf.len())..];
        if rest.len() < CMSG_HEADER_SIZE {
            return None;
        }
        let mut len_raw = [0u8; size_of::<usize>()];
        len_raw.copy_from_slice(&rest[..size_of::<usize>()]);
        let len = usize::from_ne_bytes(len_raw);
        let at = size_of::<usize>();
        let level = i32::from_ne_bytes([rest[at], rest[at + 1], rest[at + 2], rest[at + 3]]);
        let kind = i32::from_ne_bytes([rest[at + 4], rest[at + 5], rest[at + 6], rest[at + 7]]);

        if len < CMSG_HEADER_SIZE || len > rest.len() {
            self.pos = self.buf.len();
            return Some(Err(ChanError::InvalidArgument("bad cmsg_len")));
        }
        self.pos += cmsg_align(len);
        Some(Ok(Cmsg {
            level,
            kind,
            data: &rest[CMSG_HEADER_SIZE..len],
        }))
    }
}

/// Parse a send-side control buffer into one descriptor list per message.
///
/// Only `SOL_SOCKET`/`SCM_RIGHTS` is accepted. Empty messages are dropped.
pub fn parse_rights(control: &[u8]) -> ChanResult<Vec<Vec<i32>>> {
    let mut out = Vec::new();
    for cmsg in CmsgIter::new(control) {
        let cmsg = cmsg?;
        if !cmsg.is_rights() {
            return Err(ChanError::InvalidArgument("unsupported control message"));
        }
        let fds = cmsg.rights()?;
        if fds.len() > MAX_RIGHTS_PER_MESSAGE {
            return Err(ChanError::InvalidArgument("too many descriptors in one message"));
        }
        if !fds.is_empty() {
            out.push(fds);
        }
    }
    Ok(out)
}

/// Builds a send-side control buffer
#[derive(Debug, Default)]
pub struct CmsgBuilder {
    buf: Vec<u8>,
}

impl CmsgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: i32, kind: i32, data: &[u8]) -> &mut Self {
        let start = self.buf.len();
        self.buf.resize(start + cmsg_space(data.len()), 0);
        let out = &mut self.buf[start..];
        write_header(out, cmsg_len(data.len()), level, kind);
        out[CMSG_HEADER_SIZE..CMSG_HEADER_SIZE + data.len()].copy_from_slice(data);
        self
    }

    /// Append an `SCM_RIGHTS` message
    pub fn rights(&mut self, fds: &[i32]) -> &mut Self {
        let data: Vec<u8> = fds.iter().flat_map(|fd| fd.to_ne_bytes()).collect();
        self.push(SOL_SOCKET, SCM_RIGHTS, &data)
    }

    /// Append an arbitrary message (the channel only accepts `SCM_RIGHTS`)
    pub fn raw(&mut self, level: i32, kind: i32, data: &[u8]) -> &mut Self {
        self.push(level, kind, data)
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

fn write_header(out: &mut [u8], len: usize, level: i32, kind: i32) {
    let at = size_of::<usize>();
    out[..at].copy_from_slice(&len.to_ne_bytes());
    out[at..at + 4].copy_from_slice(&level.to_ne_bytes());
    out[at + 4..at + 8].copy_from_slice(&kind.to_ne_bytes());
}

/// Fills a receive-side control buffer, tracking truncation
pub struct CmsgWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> CmsgWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0, truncated: false }
    }

    /// Descriptors that still fit in one more `SCM_RIGHTS` message
    pub fn rights_capacity(&self) -> usize {
        let remaining = self.buf.len() - self.len;
        if remaining < CMSG_HEADER_SIZE {
            0
        } else {
            (remaining - CMSG_HEADER_SIZE) / FD_SIZE
        }
    }

    /// Write an `SCM_RIGHTS` message; `fds` must fit `rights_capacity()`
    pub fn push_rights(&mut self, fds: &[i32]) {
        if fds.is_empty() {
            return;
        }
        debug_assert!(fds.len() <= self.rights_capacity());
        let data_len = fds.len() * FD_SIZE;
        let out = &mut self.buf[self.len..];
        write_header(out, cmsg_len(data_len), SOL_SOCKET, SCM_RIGHTS);
        for (i, fd) in fds.iter().enumerate() {
            let at = CMSG_HEADER_SIZE + i * FD_SIZE;
            out[at..at + FD_SIZE].copy_from_slice(&fd.to_ne_bytes());
        }
        self.len = (self.len + cmsg_space(data_len)).min(self.buf.len());
    }

    #[inline]
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    #[inline]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes of the control buffer filled so far
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// Ring records
// ============================================================================

/// Encoded size of a ring record header
pub const RECORD_HEADER_SIZE: usize = 12;

/// Encoded size of one ownership token inside an `SCM_RIGHTS` record
pub const HANDLE_SIZE: usize = 8;

/// Ring bytes needed for an `SCM_RIGHTS` record carrying `count` handles
#[inline]
pub const fn rights_record_size(count: usize) -> usize {
    RECORD_HEADER_SIZE + count * HANDLE_SIZE
}

/// Header of one control record stored in the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub data_len: u32,
    pub level: i32,
    pub kind: i32,
}

impl RecordHeader {
    pub fn rights(count: usize) -> Self {
        Self {
            data_len: (count * HANDLE_SIZE) as u32,
            level: SOL_SOCKET,
            kind: SCM_RIGHTS,
        }
    }

    #[inline]
    pub fn is_rights(&self) -> bool {
        self.level == SOL_SOCKET && self.kind == SCM_RIGHTS
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut out = [0u8; RECORD_HEADER_SIZE];
        out[..4].copy_from_slice(&self.data_len.to_ne_bytes());
        out[4..8].copy_from_slice(&self.level.to_ne_bytes());
        out[8..].copy_from_slice(&self.kind.to_ne_bytes());
        out
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            data_len: u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            level: i32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
            kind: i32::from_ne_bytes([raw[8], raw[9], raw[10], raw[11]]),
        }
    }
}

/// One record decoded from a drained ancillary region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub data: Vec<u8>,
}

impl Record {
    /// Raw ownership tokens of an `SCM_RIGHTS` record
    pub fn handles(&self) -> Vec<u64> {
        if !self.header.is_rights() {
            return Vec::new();
        }
        self.data
            .chunks_exact(HANDLE_SIZE)
            .map(|c| {
                let mut raw = [0u8; HANDLE_SIZE];
                raw.copy_from_slice(c);
                u64::from_ne_bytes(raw)
            })
            .collect()
    }
}

/// Split an ancillary region into its records
pub fn decode_records(region: &[u8]) -> Vec<Record> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + RECORD_HEADER_SIZE <= region.len() {
        let header = RecordHeader::decode(&region[pos..pos + RECORD_HEADER_SIZE]);
        let start = pos + RECORD_HEADER_SIZE;
        let end = (start + header.data_len as usize).min(region.len());
        out.push(Record {
            header,
            data: region[start..end].to_vec(),
        });
        pos = end;
    }
    out
}

/// Encode one handle for storage in an `SCM_RIGHTS` record
#[inline]
pub fn encode_handle(raw: u64) -> [u8; HANDLE_SIZE] {
    raw.to_ne_bytes()
}
