//! Outbound wire header
//!
//! Every transmitted buffer starts with a 3-byte header:
//!
//! ```text
//! [0..2]  total length (u16 little-endian, includes the header)
//! [2]     message tag
//! [3..]   tag-specific body
//! ```

/// Size of the length prefix plus tag
pub const HEADER_LEN: usize = 3;

/// Message tags the send path cares about
pub mod tag {
    /// Greeting sent after a client is accepted
    pub const HELLO: u8 = 0x01;
    /// Keep-alive
    pub const HEARTBEAT: u8 = 0x02;
    /// Server-initiated removal of a client
    pub const KICK: u8 = 0xFE;
    /// Orderly close
    pub const DISCONNECT: u8 = 0xFF;
}

/// Whether a tag ends the session once it has been written
#[inline]
pub fn is_disconnect(tag: u8) -> bool {
    matches!(tag, tag::KICK | tag::DISCONNECT)
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total packet length, header included
    pub len: u16,
    pub tag: u8,
}

impl Header {
    /// Header for a body of `body_len` bytes, or `None` if the total overflows u16
    pub fn for_body(tag: u8, body_len: usize) -> Option<Self> {
        let len = u16::try_from(body_len.checked_add(HEADER_LEN)?).ok()?;
        Some(Self { len, tag })
    }

    /// Read a header from the front of `buf`
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            len: u16::from_le_bytes([buf[0], buf[1]]),
            tag: buf[2],
        })
    }

    /// Write this header to the front of `buf`.
    ///
    /// Panics if `buf` is shorter than [`HEADER_LEN`].
    pub fn write(&self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.len.to_le_bytes());
        buf[2] = self.tag;
    }

    pub fn total_len(&self) -> usize {
        self.len as usize
    }
}
