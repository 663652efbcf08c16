// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound WebSocket frame encoding.
//!
//! Only single, final, unmasked text frames are produced. Server-to-client
//! frames are never masked.

use bytes::{BufMut, Bytes, BytesMut};

/// FIN bit set, opcode 0x1 (text).
pub const FIN_TEXT: u8 = 0x80 | 0x1;

const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Encode `payload` as one text frame.
pub fn encode_text_frame(payload: &[u8]) -> Bytes {
    let len = payload.len();
    let mut buf = BytesMut::with_capacity(len + 10);
    buf.put_u8(FIN_TEXT);
    if len <= 125 {
        buf.put_u8(len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        buf.put_u8(LEN_16);
        buf.put_u16(short);
    } else {
        buf.put_u8(LEN_64);
        buf.put_u64(len as u64);
    }
    buf.put_slice(payload);
    buf.freeze()
}

/// Length of the header [`encode_text_frame`] emits for a payload of `len` bytes.
pub fn header_len(len: usize) -> usize {
    match len {
        0..=125 => 2,
        126..=65535 => 4,
        _ => 10,
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
