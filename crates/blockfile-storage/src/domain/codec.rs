//! # Block Codec
//!
//! Record framing for blockfiles:
//!
//! ```text
//! record := varint(len) || payload[len]
//! ```
//!
//! `payload` is the serializer's encoding of one block. Varints are unsigned
//! LEB128, seven bits per byte, least significant group first, at most ten
//! bytes. No I/O happens here.

use ledger_types::Block;

use crate::domain::errors::CodecError;
use crate::ports::outbound::BlockSerializer;

/// Longest varint encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `out`.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes `encode_varint` produces for `value`.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.max(1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(CodecError::LengthOverflow);
        }
        let group = u64::from(byte & 0x7F);
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(CodecError::LengthOverflow);
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if bytes.len() >= MAX_VARINT_LEN {
        Err(CodecError::LengthOverflow)
    } else {
        Err(CodecError::TruncatedLength)
    }
}

/// An encoded record ready to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Length prefix followed by payload.
    pub bytes: Vec<u8>,
    /// Size of the length prefix.
    pub header_len: usize,
}

impl EncodedRecord {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload_len(&self) -> u64 {
        (self.bytes.len() - self.header_len) as u64
    }
}

/// Frame a payload as a record.
pub fn frame(payload: &[u8]) -> EncodedRecord {
    let mut bytes = Vec::with_capacity(payload.len() + MAX_VARINT_LEN);
    encode_varint(payload.len() as u64, &mut bytes);
    let header_len = bytes.len();
    bytes.extend_from_slice(payload);
    EncodedRecord { bytes, header_len }
}

/// Split a complete record into its payload.
///
/// Fails when the declared length does not match the bytes given.
pub fn unframe(record: &[u8]) -> Result<&[u8], CodecError> {
    let (declared, header_len) = decode_varint(record)?;
    let available = (record.len() - header_len) as u64;
    if declared != available {
        return Err(CodecError::LengthMismatch {
            declared,
            available,
        });
    }
    Ok(&record[header_len..])
}

/// Encodes and decodes blocks through a [`BlockSerializer`].
#[derive(Debug, Default, Clone)]
pub struct BlockCodec<BS> {
    serializer: BS,
}

impl<BS: BlockSerializer> BlockCodec<BS> {
    pub fn new(serializer: BS) -> Self {
        Self { serializer }
    }

    /// Serialize a block (payload only, no length prefix).
    pub fn encode(&self, block: &Block) -> Result<Vec<u8>, CodecError> {
        self.serializer.serialize(block)
    }

    /// Exact inverse of [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> Result<Block, CodecError> {
        self.serializer.deserialize(bytes)
    }

    /// Serialize and frame a block.
    pub fn encode_record(&self, block: &Block) -> Result<EncodedRecord, CodecError> {
        Ok(frame(&self.encode(block)?))
    }

    /// Decode a complete framed record.
    pub fn decode_record(&self, record: &[u8]) -> Result<Block, CodecError> {
        self.decode(unframe(record)?)
    }
}
