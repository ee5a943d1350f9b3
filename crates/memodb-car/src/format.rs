//! Archive file framing.
//!
//! ```text
//! file    = block*
//! block   = varint(len) raw_bytes(len)
//! block0  = header = canonical_cbor({format, version, roots})
//! body    = cid_binary cbor_payload
//! ```

use std::io::Read;

use memodb_node::varint::decode_varint;
use memodb_store::{Result, StoreError};

/// Required `format` value in the header map.
pub const FORMAT_NAME: &str = "MemoDB archive";

/// Required `version` value in the header map.
pub const FORMAT_VERSION: i64 = 0;

/// Read one varint from a sequential reader. `Ok(None)` means clean EOF at
/// a block boundary; EOF inside a varint is corruption.
pub(crate) fn read_varint_opt(reader: &mut impl Read) -> Result<Option<u64>> {
    let mut raw = Vec::with_capacity(2);
    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte)? {
            0 => {
                if raw.is_empty() {
                    return Ok(None);
                }
                return Err(StoreError::Corrupt(
                    "archive ends inside a block length".to_string(),
                ));
            }
            _ => {
                raw.push(byte[0]);
                if byte[0] & 0x80 == 0 {
                    let (value, _) = decode_varint(&raw)
                        .map_err(|e| StoreError::Corrupt(format!("bad block length: {e}")))?;
                    return Ok(Some(value));
                }
                if raw.len() > 9 {
                    return Err(StoreError::Corrupt("block length varint too long".into()));
                }
            }
        }
    }
}

/// A reader that tracks how many bytes it has consumed, so the scan can
/// record block offsets.
pub(crate) struct CountingReader<R> {
    inner: R,
    pub position: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        CountingReader { inner, position: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}
