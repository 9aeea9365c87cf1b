//! Message set encoding
//!
//! the producer hands every batch of `(payload, key)` pairs for one partition
//! to a [MessageSetEncoder]. [KafkaMessageSetEncoder] writes the version 0
//! message set layout:
//!
//! ```text
//! offset: i64 | size: i32 | crc: u32 | magic: i8 | attributes: i8 | key: bytes | value: bytes
//! ```
//!
//! where `bytes` is an `i32` length (`-1` for null) followed by the data, and
//! the low three bits of `attributes` name the compression codec. A
//! compressed set is the uncompressed set, compressed, stored as the value of
//! a single wrapper message.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::compression::{self, Compression, CODEC_NONE};
use crate::error::{CodecError, Error};

const MAGIC_V0: i8 = 0;
const CODEC_MASK: i8 = 0x07;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Helper trait for message serialization
///
/// payloads are raw bytes: the trait is implemented for byte containers
/// only, other types have to implement it to state how they are encoded
pub trait SerializeMessage {
    fn serialize_message(input: Self) -> Result<Bytes, Error>;
}

impl SerializeMessage for Bytes {
    fn serialize_message(input: Self) -> Result<Bytes, Error> {
        Ok(input)
    }
}

impl SerializeMessage for Vec<u8> {
    fn serialize_message(input: Self) -> Result<Bytes, Error> {
        Ok(Bytes::from(input))
    }
}

impl<'a> SerializeMessage for &'a [u8] {
    fn serialize_message(input: Self) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(input))
    }
}

impl<'a, const N: usize> SerializeMessage for &'a [u8; N] {
    fn serialize_message(input: Self) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(input))
    }
}

impl<'a> SerializeMessage for &'a Vec<u8> {
    fn serialize_message(input: Self) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(input))
    }
}

/// an encoded, possibly compressed, set of messages ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSet {
    pub data: Bytes,
    /// number of messages before compression
    pub count: usize,
}

/// encodes the messages of one produce request
pub trait MessageSetEncoder: Send + Sync + 'static {
    fn encode_message_set(
        &self,
        messages: &[(Bytes, Option<Bytes>)],
        compression: &Compression,
    ) -> Result<MessageSet, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaMessageSetEncoder;

impl MessageSetEncoder for KafkaMessageSetEncoder {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
    fn encode_message_set(
        &self,
        messages: &[(Bytes, Option<Bytes>)],
        compression: &Compression,
    ) -> Result<MessageSet, CodecError> {
        let mut plain = BytesMut::new();
        for (offset, (payload, key)) in messages.iter().enumerate() {
            put_message(
                &mut plain,
                offset as i64,
                CODEC_NONE as i8,
                key.as_deref(),
                Some(&payload[..]),
            );
        }

        let data = match compression {
            Compression::None => plain.freeze(),
            compression => {
                let compressed = compression.compress(&plain)?;
                let mut wrapper = BytesMut::new();
                put_message(
                    &mut wrapper,
                    0,
                    compression.codec_id() as i8,
                    None,
                    Some(&compressed[..]),
                );
                wrapper.freeze()
            }
        };

        Ok(MessageSet {
            data,
            count: messages.len(),
        })
    }
}

fn put_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        None => buf.put_i32(-1),
        Some(data) => {
            buf.put_i32(data.len() as i32);
            buf.put_slice(data);
        }
    }
}

fn put_message(
    buf: &mut BytesMut,
    offset: i64,
    attributes: i8,
    key: Option<&[u8]>,
    value: Option<&[u8]>,
) {
    let mut body = BytesMut::new();
    body.put_i8(MAGIC_V0);
    body.put_i8(attributes);
    put_bytes(&mut body, key);
    put_bytes(&mut body, value);

    buf.put_i64(offset);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_u32(CRC32.checksum(&body));
    buf.put_slice(&body);
}

/// a message read back from a message set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
}

/// reads a message set, unwrapping compressed messages
pub fn decode_message_set(mut data: &[u8]) -> Result<Vec<DecodedMessage>, CodecError> {
    let mut messages = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 12 {
            return Err(CodecError::Truncated);
        }
        let offset = data.get_i64();
        let size = data.get_i32();
        if size < 4 || data.remaining() < size as usize {
            return Err(CodecError::Truncated);
        }
        let expected = data.get_u32();
        let (body, rest) = data.split_at(size as usize - 4);
        data = rest;

        let actual = CRC32.checksum(body);
        if actual != expected {
            return Err(CodecError::Checksum { expected, actual });
        }

        let mut body = body;
        if body.remaining() < 2 {
            return Err(CodecError::Truncated);
        }
        let magic = body.get_i8();
        if magic != MAGIC_V0 {
            return Err(CodecError::InvalidMagic(magic));
        }
        let attributes = body.get_i8();
        let key = get_bytes(&mut body)?;
        let payload = get_bytes(&mut body)?;

        let codec = (attributes & CODEC_MASK) as u8;
        if codec == CODEC_NONE {
            messages.push(DecodedMessage {
                offset,
                key,
                payload,
            });
        } else {
            let compressed = payload.ok_or(CodecError::Truncated)?;
            let inner = compression::decompress(codec, &compressed)?;
            messages.extend(decode_message_set(&inner)?);
        }
    }
    Ok(messages)
}

fn get_bytes(buf: &mut &[u8]) -> Result<Option<Bytes>, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_i32();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(Some(data))
}
