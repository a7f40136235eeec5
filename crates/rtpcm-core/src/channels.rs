//! Channel descriptor tables.
//!
//! A table tells the consumer where each logical channel lives inside the
//! interleaved block of its direction: sample `frame` of channel `c` sits at
//! word `frame * stride + offset`. Tables are computed once when a session is
//! opened and handed out as shared read-only copies.

use std::convert::TryFrom;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AllocationError, SessionError};
use crate::format::{Direction, SampleFormat};

/// Size of the NUL-terminated label field in the wire descriptor.
pub const CHANNEL_NAME_SIZE: usize = 32;

/// Bytes occupied by one encoded descriptor.
pub const DESCRIPTOR_WIRE_SIZE: usize = 4 + CHANNEL_NAME_SIZE + 4 + 4;

/// Index value reserved on the wire for "no channel".
pub const CHANNEL_NOT_VALID: u8 = 255;

const OFFSET_FIELD: usize = 4 + CHANNEL_NAME_SIZE;
const STRIDE_FIELD: usize = OFFSET_FIELD + 4;

/// Metadata for one logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    logical_index: u8,
    hardware_index: u8,
    direction: Direction,
    sample_format: SampleFormat,
    label: String,
    offset_words: u32,
    stride_words: u32,
}

impl ChannelDescriptor {
    #[inline]
    pub fn logical_index(&self) -> u8 {
        self.logical_index
    }

    #[inline]
    pub fn hardware_index(&self) -> u8 {
        self.hardware_index
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Word offset of this channel inside one interleaved frame.
    #[inline]
    pub fn offset_words(&self) -> u32 {
        self.offset_words
    }

    /// Words between two consecutive samples of this channel.
    #[inline]
    pub fn stride_words(&self) -> u32 {
        self.stride_words
    }

    /// Word index of `frame` for this channel, relative to the start of the
    /// direction's block.
    #[inline]
    pub fn word_index(&self, frame: usize) -> usize {
        frame * self.stride_words as usize + self.offset_words as usize
    }

    /// Encodes the descriptor in the fixed C layout used by the character
    /// device: four `u8` fields, a 32 byte label, then offset and stride as
    /// native-endian `u32`.
    pub fn to_wire(&self) -> [u8; DESCRIPTOR_WIRE_SIZE] {
        let mut out = [0u8; DESCRIPTOR_WIRE_SIZE];
        out[0] = self.logical_index;
        out[1] = self.hardware_index;
        out[2] = self.direction.tag();
        out[3] = self.sample_format.tag();
        let label = self.label.as_bytes();
        out[4..4 + label.len()].copy_from_slice(label);
        out[OFFSET_FIELD..STRIDE_FIELD].copy_from_slice(&self.offset_words.to_ne_bytes());
        out[STRIDE_FIELD..].copy_from_slice(&self.stride_words.to_ne_bytes());
        out
    }

    /// Decodes a descriptor written by [`to_wire`](Self::to_wire).
    pub fn from_wire(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() < DESCRIPTOR_WIRE_SIZE {
            return Err(SessionError::CopyFault {
                needed: DESCRIPTOR_WIRE_SIZE,
                available: bytes.len(),
            });
        }
        let name = &bytes[4..OFFSET_FIELD];
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let label = String::from_utf8_lossy(&name[..end]).into_owned();
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[OFFSET_FIELD..STRIDE_FIELD]);
        let offset_words = u32::from_ne_bytes(word);
        word.copy_from_slice(&bytes[STRIDE_FIELD..DESCRIPTOR_WIRE_SIZE]);
        let stride_words = u32::from_ne_bytes(word);

        Ok(Self {
            logical_index: bytes[0],
            hardware_index: bytes[1],
            direction: Direction::try_from(bytes[2])?,
            sample_format: SampleFormat::try_from(bytes[3])?,
            label,
            offset_words,
            stride_words,
        })
    }
}

/// Immutable descriptor table for one direction.
///
/// Cloning is cheap and shares the entries; there is no way to mutate a table
/// once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTable {
    direction: Direction,
    frame_width: usize,
    entries: Arc<[ChannelDescriptor]>,
}

impl ChannelTable {
    /// Builds the identity mapping for `channel_count` channels laid out in
    /// frames of `frame_width` words.
    pub fn build(
        direction: Direction,
        channel_count: usize,
        sample_format: SampleFormat,
        frame_width: usize,
    ) -> Result<Self, AllocationError> {
        if channel_count >= CHANNEL_NOT_VALID as usize {
            return Err(AllocationError::TooManyChannels {
                direction: direction.name(),
                channels: channel_count,
            });
        }
        if frame_width < channel_count {
            return Err(AllocationError::FrameTooNarrow {
                channels: channel_count,
                frame_width,
            });
        }

        let stride_words = u32::try_from(frame_width).map_err(|_| {
            AllocationError::TooManyChannels {
                direction: direction.name(),
                channels: frame_width,
            }
        })?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(channel_count)
            .map_err(|_| AllocationError::OutOfMemory {
                bytes: channel_count * std::mem::size_of::<ChannelDescriptor>(),
            })?;

        for index in 0..channel_count {
            // channel_count < 255 so the index always fits
            let id = index as u8;
            entries.push(ChannelDescriptor {
                logical_index: id,
                hardware_index: id,
                direction,
                sample_format,
                label: channel_label(direction, index),
                offset_words: index as u32,
                stride_words,
            });
        }

        tracing::debug!(%direction, channels = channel_count, frame_width, "built channel table");

        Ok(Self {
            direction,
            frame_width,
            entries: entries.into(),
        })
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn frame_width(&self) -> usize {
        self.frame_width
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelDescriptor> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[ChannelDescriptor] {
        &self.entries
    }

    /// Bytes needed to encode the whole table.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.entries.len() * DESCRIPTOR_WIRE_SIZE
    }

    /// Copies the encoded table into caller memory.
    ///
    /// Nothing is written when `dst` is too small.
    pub fn encode_into(&self, dst: &mut [u8]) -> Result<usize, SessionError> {
        let needed = self.wire_len();
        if dst.len() < needed {
            return Err(SessionError::CopyFault {
                needed,
                available: dst.len(),
            });
        }
        for (entry, chunk) in self
            .entries
            .iter()
            .zip(dst.chunks_exact_mut(DESCRIPTOR_WIRE_SIZE))
        {
            chunk.copy_from_slice(&entry.to_wire());
        }
        Ok(needed)
    }
}

impl<'a> IntoIterator for &'a ChannelTable {
    type Item = &'a ChannelDescriptor;
    type IntoIter = std::slice::Iter<'a, ChannelDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn channel_label(direction: Direction, index: usize) -> String {
    let mut label = format!("{}-{}", direction.label_prefix(), index);
    // Leave room for the terminating NUL of the wire field.
    label.truncate(CHANNEL_NAME_SIZE - 1);
    label
}
