//! # Chunk codec
//!
//! Splits logical messages into datagrams and joins them back together.
//!
//! ```text
//! offset 0..3   sequence_index   3-digit zero-padded decimal ASCII
//! offset 3..6   total_chunks     3-digit zero-padded decimal ASCII
//! offset 6..9   buffer_slot      3-digit zero-padded decimal ASCII
//! offset 9..    body             raw bytes
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::io::Write;

use log::trace;
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Width in characters of a single header field.
pub const HEADER_FIELD_WIDTH: usize = 3;

/// Length of the full chunk header.
pub const HEADER_LEN: usize = 3 * HEADER_FIELD_WIDTH;

/// Largest value representable in a header field.
pub const MAX_HEADER_FIELD: u32 = 999;

/// Default maximum body size of a single datagram. Keeps the datagram under common host UDP
/// size limits with room for the header.
pub const DEFAULT_MAX_BODY: usize = 9000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Header placed at the start of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Position of this chunk within the message, `0..total_chunks`
    pub sequence_index: u32,

    /// Number of chunks making up the message
    pub total_chunks: u32,

    /// Rotating slot identifying the message on its channel
    pub buffer_slot: u32,
}

/// Splits payloads into datagrams for one channel.
///
/// The buffer slot advances after each full message, wrapping at `num_buffers`.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_body: usize,
    num_buffers: u32,
    slot: u32,
}

/// Best-effort reassembly of chunked messages keyed by buffer slot.
#[derive(Debug)]
pub struct Reassembler {
    num_buffers: u32,
    slots: HashMap<u32, SlotAccum>,

    /// Slot of the last accepted chunk
    last_slot: Option<u32>,

    stats: ReassemblyStats,
}

/// Counters describing what the reassembler has done with incoming chunks.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReassemblyStats {
    /// Messages completed and emitted
    pub completed: u64,

    /// Partial messages thrown away because a new message reused their slot
    pub superseded: u64,

    /// Datagrams rejected as malformed
    pub malformed: u64,
}

#[derive(Debug)]
struct SlotAccum {
    total_chunks: u32,
    pieces: Vec<Option<Vec<u8>>>,
    received: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Cannot chunk an empty payload")]
    EmptyPayload,

    #[error("Payload of {len} bytes needs more than {max_chunks} chunks of {max_body} bytes")]
    PayloadTooLarge {
        len: usize,
        max_body: usize,
        max_chunks: u32,
    },

    #[error("Maximum datagram body must be at least one byte")]
    ZeroMaxBody,

    #[error("Number of buffers must be between 1 and 999, found {0}")]
    InvalidNumBuffers(u32),

    #[error("Header field {0} does not fit in three digits")]
    FieldOverflow(u32),

    #[error("Datagram of {0} bytes is shorter than the chunk header")]
    TooShort(usize),

    #[error("Header field {0} is not a zero-padded decimal")]
    BadHeaderField(&'static str),

    #[error("Chunk reports zero total chunks")]
    ZeroTotal,

    #[error("Sequence index {seq} is outside a message of {total} chunks")]
    SeqOutOfRange { seq: u32, total: u32 },

    #[error("Buffer slot {slot} is outside the {num_buffers} buffers of this channel")]
    SlotOutOfRange { slot: u32, num_buffers: u32 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChunkHeader {
    /// Append the ASCII rendering of this header to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), ChunkError> {
        for field in [self.sequence_index, self.total_chunks, self.buffer_slot].iter() {
            if *field > MAX_HEADER_FIELD {
                return Err(ChunkError::FieldOverflow(*field));
            }
        }

        // Writing into a Vec cannot fail
        write!(
            buf,
            "{:03}{:03}{:03}",
            self.sequence_index, self.total_chunks, self.buffer_slot
        )
        .ok();

        Ok(())
    }

    /// Parse the header from the start of a datagram, returning it with the body.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), ChunkError> {
        if datagram.len() < HEADER_LEN {
            return Err(ChunkError::TooShort(datagram.len()));
        }

        let field = |i: usize, name: &'static str| {
            parse_field(&datagram[i * HEADER_FIELD_WIDTH..(i + 1) * HEADER_FIELD_WIDTH])
                .ok_or(ChunkError::BadHeaderField(name))
        };

        let header = Self {
            sequence_index: field(0, "sequence_index")?,
            total_chunks: field(1, "total_chunks")?,
            buffer_slot: field(2, "buffer_slot")?,
        };

        if header.total_chunks == 0 {
            return Err(ChunkError::ZeroTotal);
        }
        if header.sequence_index >= header.total_chunks {
            return Err(ChunkError::SeqOutOfRange {
                seq: header.sequence_index,
                total: header.total_chunks,
            });
        }

        Ok((header, &datagram[HEADER_LEN..]))
    }
}

impl Chunker {
    /// Create a new chunker.
    ///
    /// `num_buffers` must fit in a header field and `max_body` must be non-zero.
    pub fn new(max_body: usize, num_buffers: u32) -> Result<Self, ChunkError> {
        if max_body == 0 {
            return Err(ChunkError::ZeroMaxBody);
        }
        validate_num_buffers(num_buffers)?;

        Ok(Self {
            max_body,
            num_buffers,
            slot: 0,
        })
    }

    /// The slot the next message will be sent in.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn num_buffers(&self) -> u32 {
        self.num_buffers
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }

    /// Largest payload which can be sent as a single message.
    pub fn max_payload(&self) -> usize {
        self.max_body * MAX_HEADER_FIELD as usize
    }

    /// Split the payload into complete datagrams (header + body) and advance the buffer slot.
    pub fn chunk(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, ChunkError> {
        if payload.is_empty() {
            return Err(ChunkError::EmptyPayload);
        }
        if payload.len() > self.max_payload() {
            return Err(ChunkError::PayloadTooLarge {
                len: payload.len(),
                max_body: self.max_body,
                max_chunks: MAX_HEADER_FIELD,
            });
        }

        let bodies = payload.chunks(self.max_body);
        let total_chunks = bodies.len() as u32;

        let mut datagrams = Vec::with_capacity(total_chunks as usize);

        for (i, body) in bodies.enumerate() {
            let mut datagram = Vec::with_capacity(HEADER_LEN + body.len());
            ChunkHeader {
                sequence_index: i as u32,
                total_chunks,
                buffer_slot: self.slot,
            }
            .write_to(&mut datagram)?;
            datagram.extend_from_slice(body);

            datagrams.push(datagram);
        }

        self.slot = (self.slot + 1) % self.num_buffers;

        Ok(datagrams)
    }
}

impl Reassembler {
    pub fn new(num_buffers: u32) -> Result<Self, ChunkError> {
        validate_num_buffers(num_buffers)?;

        Ok(Self {
            num_buffers,
            slots: HashMap::new(),
            last_slot: None,
            stats: ReassemblyStats::default(),
        })
    }

    /// Push a raw datagram.
    ///
    /// Returns the joined message when this datagram completes one. Malformed datagrams are
    /// counted and returned as an error, callers are expected to just drop them.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        match ChunkHeader::parse(datagram) {
            Ok((header, body)) => self.push_chunk(header, body),
            Err(e) => {
                self.stats.malformed += 1;
                Err(e)
            }
        }
    }

    /// Push an already parsed chunk.
    pub fn push_chunk(
        &mut self,
        header: ChunkHeader,
        body: &[u8],
    ) -> Result<Option<Vec<u8>>, ChunkError> {
        if header.buffer_slot >= self.num_buffers {
            self.stats.malformed += 1;
            return Err(ChunkError::SlotOutOfRange {
                slot: header.buffer_slot,
                num_buffers: self.num_buffers,
            });
        }

        // Senders walk their slots in a fixed rotation, so chunks moving into a slot from another
        // one belong to a new message. Within a slot reuse is also spotted by a differing chunk
        // count or a piece arriving twice.
        let superseded = match self.slots.get(&header.buffer_slot) {
            Some(acc) => {
                self.last_slot != Some(header.buffer_slot)
                    || acc.total_chunks != header.total_chunks
                    || acc.pieces[header.sequence_index as usize].is_some()
            }
            None => false,
        };
        self.last_slot = Some(header.buffer_slot);

        if superseded {
            trace!(
                "Slot {} reused before completion, discarding partial message",
                header.buffer_slot
            );
            self.slots.remove(&header.buffer_slot);
            self.stats.superseded += 1;
        }

        let acc = self
            .slots
            .entry(header.buffer_slot)
            .or_insert_with(|| SlotAccum {
                total_chunks: header.total_chunks,
                pieces: vec![None; header.total_chunks as usize],
                received: 0,
            });

        acc.pieces[header.sequence_index as usize] = Some(body.to_vec());
        acc.received += 1;

        if acc.received < acc.total_chunks {
            return Ok(None);
        }

        // Complete, join and clear the slot
        let acc = match self.slots.remove(&header.buffer_slot) {
            Some(a) => a,
            None => return Ok(None),
        };
        let message = acc.pieces.into_iter().flatten().flatten().collect();
        self.stats.completed += 1;

        Ok(Some(message))
    }

    /// Number of slots holding a partial message.
    pub fn pending_slots(&self) -> usize {
        self.slots.len()
    }

    /// Drop all partial messages.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.last_slot = None;
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn validate_num_buffers(num_buffers: u32) -> Result<(), ChunkError> {
    if num_buffers == 0 || num_buffers > MAX_HEADER_FIELD {
        Err(ChunkError::InvalidNumBuffers(num_buffers))
    } else {
        Ok(())
    }
}

fn parse_field(bytes: &[u8]) -> Option<u32> {
    if !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }

    Some(
        bytes
            .iter()
            .fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32),
    )
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
