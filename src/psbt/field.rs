//! Raw key/value pairs and the compact-size framing shared by every PSBT map.

use crate::error::{Error, Result};

/// Separator byte closing a map.
pub const SEPARATOR: u8 = 0x00;

/// A single key/value pair exactly as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    /// Full key: type byte followed by key data. Never empty.
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Pair {
    pub fn new(key_type: u8, key_data: &[u8], value: Vec<u8>) -> Self {
        let mut key = Vec::with_capacity(1 + key_data.len());
        key.push(key_type);
        key.extend_from_slice(key_data);
        Self { key, value }
    }

    pub fn key_type(&self) -> u8 {
        self.key[0]
    }

    pub fn key_data(&self) -> &[u8] {
        &self.key[1..]
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        write_compact_size(buf, self.key.len() as u64);
        buf.extend_from_slice(&self.key);
        write_compact_size(buf, self.value.len() as u64);
        buf.extend_from_slice(&self.value);
    }
}

pub fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Bounds-checked cursor over an input buffer. Every short read is a
/// `MalformedInput` error rather than a panic or an oversized allocation.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::malformed(format!(
                "truncated {} at offset {}: need {} bytes, {} left",
                what,
                self.pos,
                n,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_compact_size(&mut self, what: &str) -> Result<u64> {
        let first = self.take(1, what)?[0];
        let n = match first {
            0xfd => {
                let b = self.take(2, what)?;
                let n = u16::from_le_bytes([b[0], b[1]]) as u64;
                if n < 0xfd {
                    return Err(Error::malformed(format!("non-canonical compact size for {}", what)));
                }
                n
            }
            0xfe => {
                let b = self.take(4, what)?;
                let n = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64;
                if n <= 0xffff {
                    return Err(Error::malformed(format!("non-canonical compact size for {}", what)));
                }
                n
            }
            0xff => {
                let b = self.take(8, what)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                let n = u64::from_le_bytes(arr);
                if n <= 0xffff_ffff {
                    return Err(Error::malformed(format!("non-canonical compact size for {}", what)));
                }
                n
            }
            n => n as u64,
        };
        Ok(n)
    }

    /// Reads a length-prefixed byte string whose length must fit in the buffer.
    fn read_prefixed(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_compact_size(what)?;
        if len > self.remaining() as u64 {
            return Err(Error::malformed(format!(
                "{} length {} exceeds remaining {} bytes",
                what,
                len,
                self.remaining()
            )));
        }
        self.take(len as usize, what)
    }

    /// Reads one map up to and including its separator. Duplicate keys are rejected.
    pub fn read_map(&mut self, map: &str) -> Result<Vec<Pair>> {
        let mut pairs: Vec<Pair> = Vec::new();
        loop {
            if self.remaining() == 0 {
                return Err(Error::malformed(format!("{} map is missing its separator", map)));
            }
            let key = self.read_prefixed("key")?;
            if key.is_empty() {
                // a zero-length key is the separator
                return Ok(pairs);
            }
            let value = self.read_prefixed("value")?;
            if pairs.iter().any(|p| p.key == key) {
                return Err(Error::malformed(format!(
                    "duplicate key {} in {} map",
                    hex::encode(key),
                    map
                )));
            }
            pairs.push(Pair {
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
    }
}
