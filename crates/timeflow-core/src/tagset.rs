//! Encoded dimensional tag values
//!
//! A `TagSet` is the byte encoding of one series' tag values, ordered
//! according to the query's group-by tag-key list. The encoding is a
//! concatenation of length-prefixed UTF-8 segments: a 2-byte big-endian
//! unsigned length followed by that many bytes. Positional matching against
//! the tag-key list is mandatory, so the encoding must be bit-exact to keep
//! hashing and equality deterministic.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Encoded tag values of one series, used as a grouping key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagSet(Vec<u8>);

impl TagSet {
    /// Encode an ordered list of tag values.
    pub fn encode<S: AsRef<str>>(values: &[S]) -> Self {
        let mut buf = Vec::new();
        for v in values {
            let s = v.as_ref().as_bytes();
            buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
            buf.extend_from_slice(s);
        }
        TagSet(buf)
    }

    /// Decode back into the ordered list of tag values.
    pub fn decode(&self) -> Result<Vec<String>> {
        let mut values = Vec::new();
        let mut rest = &self.0[..];
        let mut offset = 0;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(CoreError::TruncatedTagSet(offset));
            }
            let n = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + n {
                return Err(CoreError::TruncatedTagSet(offset));
            }
            let segment = std::str::from_utf8(&rest[2..2 + n])
                .map_err(|_| CoreError::InvalidTagSegment(offset))?;
            values.push(segment.to_string());
            rest = &rest[2 + n..];
            offset += 2 + n;
        }
        Ok(values)
    }

    /// The raw encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the empty tagset (a query with no group-by tags).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for TagSet {
    fn from(bytes: Vec<u8>) -> Self {
        TagSet(bytes)
    }
}
