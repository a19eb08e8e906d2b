// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire format shared by the listener and the forwarder.
//!
//! A frame carries one record's fields:
//!
//! ```text
//! [8 bytes big-endian: compressed length C]
//! [8 bytes big-endian: uncompressed length U]
//! [C bytes: zlib-compressed MessagePack map]
//! ```
//!
//! Binary strings and extension values in the payload are mapped onto JSON values, see
//! [`crate::msgpack`].
//!
//! The forwarder's default encoding is a bare MessagePack `[tag, time, fields]` array
//! instead, see [`encode_forward`].

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::FrameError;
use crate::msgpack;
use crate::record::Fields;

/// Size of the two length prefixes.
pub const HEADER_LEN: usize = 16;

/// Upper bound for either declared length. Larger frames are rejected before allocating.
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Reads one frame and deserializes its payload.
///
/// Returns [`FrameError::Closed`] when the stream ends cleanly before the first header byte.
/// The caller bounds the whole read with its own deadline.
pub async fn read_frame<R>(reader: &mut R) -> Result<Fields, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader
        .read(&mut header[..1])
        .await
        .map_err(FrameError::Header)?;
    if first == 0 {
        return Err(FrameError::Closed);
    }
    reader
        .read_exact(&mut header[1..])
        .await
        .map_err(FrameError::Header)?;

    let (compressed_len, uncompressed_len) = parse_header(&header)?;

    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_SIZE
    let mut body = vec![0u8; compressed_len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|source| FrameError::Body {
            expected: compressed_len,
            source,
        })?;

    decode_body(&body, uncompressed_len)
}

/// Inflates and deserializes a frame body whose header declared `uncompressed_len`.
pub fn decode_body(body: &[u8], uncompressed_len: u64) -> Result<Fields, FrameError> {
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_SIZE
    let mut payload = Vec::with_capacity(uncompressed_len as usize);
    // One byte past the declared length is enough to detect an oversized stream.
    ZlibDecoder::new(body)
        .take(uncompressed_len + 1)
        .read_to_end(&mut payload)
        .map_err(FrameError::Inflate)?;
    if payload.len() as u64 != uncompressed_len {
        return Err(FrameError::LengthMismatch {
            declared: uncompressed_len,
            actual: payload.len() as u64,
        });
    }
    Ok(msgpack::fields_from_slice(&payload)?)
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(u64, u64), FrameError> {
    let mut compressed = [0u8; 8];
    let mut uncompressed = [0u8; 8];
    compressed.copy_from_slice(&header[..8]);
    uncompressed.copy_from_slice(&header[8..]);
    let compressed = u64::from_be_bytes(compressed);
    let uncompressed = u64::from_be_bytes(uncompressed);

    for (kind, length) in [("compressed", compressed), ("uncompressed", uncompressed)] {
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::Oversized {
                kind,
                length,
                limit: MAX_FRAME_SIZE,
            });
        }
    }
    Ok((compressed, uncompressed))
}

/// Serializes, compresses and frames `fields`.
pub fn encode_frame(fields: &Fields) -> Result<Vec<u8>, FrameError> {
    let payload = rmp_serde::to_vec(fields)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&payload).map_err(FrameError::Deflate)?;
    let compressed = encoder.finish().map_err(FrameError::Deflate)?;

    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.extend_from_slice(&(compressed.len() as u64).to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Serializes a `[tag, time, fields]` entry, time in nanoseconds since the epoch.
pub fn encode_forward(tag: &str, time_nanos: i64, fields: &Fields) -> Result<Vec<u8>, FrameError> {
    Ok(rmp_serde::to_vec(&(tag, time_nanos, fields))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    async fn decode(bytes: &[u8]) -> Result<Fields, FrameError> {
        let mut reader = bytes;
        read_frame(&mut reader).await
    }

    fn raw_frame(compressed_len: u64, uncompressed_len: u64, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&compressed_len.to_be_bytes());
        frame.extend_from_slice(&uncompressed_len.to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    fn zlib(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_decode_hello() {
        let payload = rmp_serde::to_vec(&fields(json!({"msg": "hello"}))).unwrap();
        let body = zlib(&payload);
        let frame = raw_frame(body.len() as u64, payload.len() as u64, &body);

        let decoded = decode(&frame).await.unwrap();
        assert_eq!(decoded["msg"], json!("hello"));
    }

    #[tokio::test]
    async fn test_decode_consecutive_frames() {
        let first = encode_frame(&fields(json!({"n": 1}))).unwrap();
        let second = encode_frame(&fields(json!({"n": 2}))).unwrap();
        let stream = [first, second].concat();

        let mut reader = &stream[..];
        assert_eq!(read_frame(&mut reader).await.unwrap()["n"], json!(1));
        assert_eq!(read_frame(&mut reader).await.unwrap()["n"], json!(2));
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_close() {
        assert!(matches!(decode(&[]).await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_short_header_is_framing_error() {
        assert!(matches!(
            decode(&[0, 0, 0, 0, 0]).await,
            Err(FrameError::Header(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_framing_error() {
        let frame = encode_frame(&fields(json!({"msg": "hello world"}))).unwrap();
        let truncated = &frame[..frame.len() - 3];
        assert!(matches!(
            decode(truncated).await,
            Err(FrameError::Body { .. })
        ));
    }

    #[tokio::test]
    async fn test_declared_length_larger_than_stream() {
        let payload = rmp_serde::to_vec(&fields(json!({"msg": "hello"}))).unwrap();
        let body = zlib(&payload);
        let frame = raw_frame(body.len() as u64 + 100, payload.len() as u64, &body);
        assert!(matches!(decode(&frame).await, Err(FrameError::Body { .. })));
    }

    #[tokio::test]
    async fn test_uncompressed_length_mismatch() {
        let payload = rmp_serde::to_vec(&fields(json!({"msg": "hello"}))).unwrap();
        let body = zlib(&payload);

        let too_long = raw_frame(body.len() as u64, payload.len() as u64 + 1, &body);
        assert!(matches!(
            decode(&too_long).await,
            Err(FrameError::LengthMismatch { .. })
        ));

        let too_short = raw_frame(body.len() as u64, payload.len() as u64 - 1, &body);
        assert!(matches!(
            decode(&too_short).await,
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_reading_body() {
        let frame = raw_frame(MAX_FRAME_SIZE + 1, 10, &[]);
        assert!(matches!(
            decode(&frame).await,
            Err(FrameError::Oversized {
                kind: "compressed",
                ..
            })
        ));

        let frame = raw_frame(10, u64::MAX, &[]);
        assert!(matches!(
            decode(&frame).await,
            Err(FrameError::Oversized {
                kind: "uncompressed",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_body_that_is_not_zlib() {
        let body = b"definitely not deflate";
        let frame = raw_frame(body.len() as u64, 10, body);
        assert!(matches!(decode(&frame).await, Err(FrameError::Inflate(_))));
    }

    #[tokio::test]
    async fn test_payload_that_is_not_a_map() {
        let payload = rmp_serde::to_vec(&vec![1, 2, 3]).unwrap();
        let body = zlib(&payload);
        let frame = raw_frame(body.len() as u64, payload.len() as u64, &body);

        let err = decode(&frame).await.unwrap_err();
        assert!(err.is_payload(), "unexpected error: {err}");
    }

    async fn decode_payload(payload: &[u8]) -> Result<Fields, FrameError> {
        let body = zlib(payload);
        decode(&raw_frame(body.len() as u64, payload.len() as u64, &body)).await
    }

    #[tokio::test]
    async fn test_decode_bin_value() {
        // {"msg": bin8 "hi"}
        let payload = [0x81, 0xa3, b'm', b's', b'g', 0xc4, 0x02, b'h', b'i'];
        let decoded = decode_payload(&payload).await.unwrap();
        assert_eq!(decoded["msg"], json!("hi"));
    }

    #[tokio::test]
    async fn test_decode_timestamp_ext_value() {
        // {"@timestamp": fixext4 type -1}
        let mut payload = vec![0x81, 0xaa];
        payload.extend_from_slice(b"@timestamp");
        payload.extend_from_slice(&[0xd6, 0xff]);
        payload.extend_from_slice(&1_714_566_645u32.to_be_bytes());

        let decoded = decode_payload(&payload).await.unwrap();
        assert_eq!(decoded["@timestamp"], json!("2024-05-01T12:30:45.000Z"));
    }

    #[test]
    fn test_encode_forward_layout() {
        let record = fields(json!({"msg": "hello", "host": "box-1"}));
        let bytes = encode_forward("app", 1_700_000_000_123_456_789, &record).unwrap();

        let (tag, time, decoded): (String, i64, Fields) = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(tag, "app");
        assert_eq!(time, 1_700_000_000_123_456_789);
        assert_eq!(decoded, record);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            (-1.0e12f64..1.0e12f64).prop_map(Value::from),
            ".{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z@_]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_frame_round_trip(
            entries in prop::collection::btree_map("[a-z@_]{1,12}", arb_value(), 0..10)
        ) {
            let original: Fields = entries.into_iter().collect();
            let frame = encode_frame(&original).unwrap();

            let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
            let (compressed_len, uncompressed_len) = parse_header(&header).unwrap();
            prop_assert_eq!(compressed_len as usize, frame.len() - HEADER_LEN);

            let decoded = decode_body(&frame[HEADER_LEN..], uncompressed_len).unwrap();
            prop_assert_eq!(decoded, original);
        }
    }
}
