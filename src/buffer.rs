//! Raw event-buffer decoder (`SPEC_FULL.md` §4.4) and PPME event-code
//! tables (§6).
//!
//! The packed layout: a fixed header, then `nparams` 16-bit length
//! prefixes, then the param payloads back to back. This module only
//! walks that layout; it assumes the host handed over a well-formed
//! buffer (bounds violations return `ParseBufferMalformed` rather than
//! panicking).

use crate::error::PluginError;

/// PPME event type codes the extractor and dispatch loop recognize.
/// Values are internal to this crate; a real host integration maps its
/// own event-type codes onto these before calling `parse`/`extract`.
pub mod event_codes {
    pub const OPEN: i32 = 1;
    pub const CREAT: i32 = 2;
    pub const OPENAT: i32 = 3;
    pub const OPENAT2: i32 = 4;
    pub const OPEN_BY_HANDLE_AT: i32 = 5;
    pub const ACCEPT: i32 = 6;
    pub const ACCEPT4: i32 = 7;
    pub const CONNECT: i32 = 8;
    pub const EXECVE: i32 = 9;
    pub const EXECVEAT: i32 = 10;
    pub const CLONE: i32 = 11;
    pub const CLONE3: i32 = 12;
}

use event_codes::*;

/// The event-type codes that produce a file descriptor (§6 "fd-producing
/// event-type set").
pub fn fd_producing_codes() -> &'static [i32] {
    &[OPEN, CREAT, OPENAT, OPENAT2, OPEN_BY_HANDLE_AT, ACCEPT, ACCEPT4, CONNECT]
}

/// The full set of event types any profile may subscribe to (§6
/// "Any-profile supported event set").
pub fn any_profile_codes() -> &'static [i32] {
    &[
        OPEN, CREAT, OPENAT, OPENAT2, OPEN_BY_HANDLE_AT, ACCEPT, ACCEPT4, CONNECT, EXECVE, EXECVEAT, CLONE, CLONE3,
    ]
}

/// The packed parameter slot holding the fd produced by `event_type`, or
/// `None` if it doesn't produce one. `CONNECT` uses slot 2; every other
/// fd-producing type uses slot 0 (§4.6 step 1).
pub fn produced_fd_slot(event_type: i32) -> Option<usize> {
    if event_type == CONNECT {
        Some(2)
    } else if fd_producing_codes().contains(&event_type) {
        Some(0)
    } else {
        None
    }
}

/// Parameter slots carrying the path components of a path-producing
/// event, as `(dirfd_slot, name_slot)`. `dirfd_slot` is `None` for
/// events with no directory-relative argument.
pub fn path_param_slots(event_type: i32) -> Option<(Option<usize>, usize)> {
    match event_type {
        OPEN | CREAT => Some((None, 1)),
        OPENAT | OPENAT2 | OPEN_BY_HANDLE_AT => Some((Some(1), 2)),
        _ => None,
    }
}

/// A single decoded event: its type, originating thread id, and a view
/// over its packed parameter buffer.
pub struct RawEvent<'a> {
    pub event_type: i32,
    pub tid: i64,
    lens: &'a [u16],
    payload: &'a [u8],
}

impl<'a> RawEvent<'a> {
    /// `lens` holds one 16-bit length per parameter; `payload` is the
    /// concatenation of all parameter bytes in order.
    pub fn new(event_type: i32, tid: i64, lens: &'a [u16], payload: &'a [u8]) -> Self {
        Self { event_type, tid, lens, payload }
    }

    pub fn nparams(&self) -> usize {
        self.lens.len()
    }

    /// Byte slice for parameter `n`, or an error if `n` is out of range
    /// or the declared lengths overrun the payload.
    pub fn get_param(&self, n: usize) -> Result<&'a [u8], PluginError> {
        if n >= self.lens.len() {
            return Err(PluginError::ParseBufferMalformed(format!(
                "parameter {n} requested but event has {} params",
                self.lens.len()
            )));
        }
        let start: usize = self.lens[..n].iter().map(|&l| l as usize).sum();
        let len = self.lens[n] as usize;
        let end = start + len;
        self.payload.get(start..end).ok_or_else(|| {
            PluginError::ParseBufferMalformed(format!("parameter {n} range {start}..{end} overruns payload"))
        })
    }
}

pub fn decode_i64(bytes: &[u8]) -> Result<i64, PluginError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| PluginError::ParseBufferMalformed(format!("expected 8 bytes for i64, got {}", bytes.len())))?;
    Ok(i64::from_le_bytes(arr))
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64, PluginError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| PluginError::ParseBufferMalformed(format!("expected 8 bytes for u64, got {}", bytes.len())))?;
    Ok(u64::from_le_bytes(arr))
}

pub fn decode_u32(bytes: &[u8]) -> Result<u32, PluginError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| PluginError::ParseBufferMalformed(format!("expected 4 bytes for u32, got {}", bytes.len())))?;
    Ok(u32::from_le_bytes(arr))
}

/// Decode a null-terminated (or bare) path/string parameter.
pub fn decode_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
