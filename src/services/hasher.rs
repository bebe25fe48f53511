//! MD5 and CRC32C digests for object integrity metadata.
//!
//! Both values are reported base64-encoded; CRC32C is the Castagnoli
//! polynomial encoded as four big-endian bytes, which is what client
//! libraries compare against.

use base64::{Engine as _, engine::general_purpose};

/// Digests of one complete payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub md5_base64: String,
    pub crc32c_base64: String,
    /// Lowercase hex MD5, used as the entity tag.
    pub md5_hex: String,
}

/// Incremental hasher fed while a payload is streamed to disk.
pub struct ContentHasher {
    md5: md5::Context,
    crc32c: u32,
    len: u64,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            crc32c: 0,
            len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.crc32c = crc32c::crc32c_append(self.crc32c, data);
        self.len += data.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn finalize(self) -> ContentDigest {
        let md5 = self.md5.compute();
        ContentDigest {
            md5_base64: general_purpose::STANDARD.encode(md5.0),
            crc32c_base64: general_purpose::STANDARD.encode(self.crc32c.to_be_bytes()),
            md5_hex: format!("{:x}", md5),
        }
    }
}

/// One-shot digest of an in-memory payload.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
