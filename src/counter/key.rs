// Copyright 2025 metrika
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical encoding of a metric name and its ordered tag list into a
//! single registry key.
//!
//! The first byte of a key is a marker: `0` means the rest of the key is the
//! name and the tag list is empty; any other value is the byte offset at
//! which the tag span begins (`name.len() + 1`). Tags are joined with the
//! reserved `;` separator. The marker is a single byte, which caps names at
//! 254 bytes; oversized names and tags containing the separator are rejected
//! at encode time rather than producing a key that cannot round-trip.
//!
//! Keys are raw bytes rather than `String` because marker values above 0x7F
//! are not valid UTF-8 on their own.

use std::fmt::{self, Display};

/// Separator joining tags inside an encoded key. Reserved: tag content must
/// not contain it.
pub const TAG_SEPARATOR: u8 = b';';

/// Largest name length the single-byte marker can address.
pub const MAX_NAME_LEN: usize = u8::MAX as usize - 1;

/// A counter registry key: marker byte, name bytes, optional tag span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey(Box<[u8]>);

impl CounterKey {
    /// Encodes a name and ordered tag list into a key.
    ///
    /// Fails if the name is longer than [`MAX_NAME_LEN`] bytes or any tag
    /// contains the reserved separator.
    pub fn encode<S: AsRef<str>>(name: &str, tags: &[S]) -> KeyResult<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(KeyError::NameTooLong { len: name.len() });
        }
        for tag in tags {
            let tag = tag.as_ref();
            if tag.bytes().any(|b| b == TAG_SEPARATOR) {
                return Err(KeyError::TagContainsSeparator {
                    tag: tag.to_string(),
                });
            }
        }

        let mut key = Vec::with_capacity(1 + name.len());
        if tags.is_empty() {
            key.push(0);
            key.extend_from_slice(name.as_bytes());
        } else {
            key.push(name.len() as u8 + 1);
            key.extend_from_slice(name.as_bytes());
            for (i, tag) in tags.iter().enumerate() {
                if i != 0 {
                    key.push(TAG_SEPARATOR);
                }
                key.extend_from_slice(tag.as_ref().as_bytes());
            }
        }

        Ok(Self(key.into_boxed_slice()))
    }

    /// Recovers the name and ordered tag list from a key.
    ///
    /// For every key produced by [`encode`](Self::encode),
    /// `decode` returns exactly the inputs that produced it.
    pub fn decode(&self) -> KeyResult<(String, Vec<String>)> {
        let bytes = &self.0;
        let Some((&marker, rest)) = bytes.split_first() else {
            return Err(KeyError::Malformed("empty key".to_string()));
        };

        if marker == 0 {
            let name = utf8(rest)?;
            return Ok((name, Vec::new()));
        }

        let tag_pos = marker as usize;
        if tag_pos > bytes.len() {
            return Err(KeyError::Malformed(format!(
                "tag offset {} past end of {}-byte key",
                tag_pos,
                bytes.len()
            )));
        }

        let name = utf8(&bytes[1..tag_pos])?;
        let tags = bytes[tag_pos..]
            .split(|&b| b == TAG_SEPARATOR)
            .map(utf8)
            .collect::<KeyResult<Vec<String>>>()?;
        Ok((name, tags))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn utf8(bytes: &[u8]) -> KeyResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| KeyError::Malformed(format!("invalid UTF-8 in key: {e}")))
}

/// Result type for key codec operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors produced by the key codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Name exceeds what the single-byte marker can address.
    NameTooLong { len: usize },
    /// A tag contains the reserved separator.
    TagContainsSeparator { tag: String },
    /// A key that was not produced by `encode`.
    Malformed(String),
}

impl Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::NameTooLong { len } => {
                write!(f, "metric name is {len} bytes, limit is {MAX_NAME_LEN}")
            }
            KeyError::TagContainsSeparator { tag } => {
                write!(f, "tag {tag:?} contains the reserved separator ';'")
            }
            KeyError::Malformed(msg) => write!(f, "malformed counter key: {msg}"),
        }
    }
}

impl std::error::Error for KeyError {}
