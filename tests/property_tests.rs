//! Property-based tests using proptest
//!
//! These tests validate wire invariants across randomly generated requests,
//! responses and frames.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use privilege_broker::core::codec::FrameCodec;
use privilege_broker::core::serialization::{decode, encode};
use privilege_broker::{Request, RequestTask, Response, ResponseCode, UnknownCode};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn response_code() -> impl Strategy<Value = ResponseCode> {
    prop_oneof![
        Just(ResponseCode::None),
        Just(ResponseCode::Success),
        Just(ResponseCode::Error),
    ]
}

// Property: any request survives encode/decode, whatever its task code
proptest! {
    #[test]
    fn prop_request_roundtrip(code in any::<u32>(), body in ".*") {
        let request = Request::new(RequestTask::from(code), body);

        let wire = encode(&request).expect("Encoding should not fail");
        let decoded: Request = decode(&wire).expect("Decoding should not fail");

        prop_assert_eq!(decoded.request_task.code(), code);
        prop_assert_eq!(decoded, request);
    }
}

// Property: an unrecognized task can only carry a code outside the task
// table, so it decodes back as itself and never as a real task
proptest! {
    #[test]
    fn prop_unrecognized_task_roundtrip(code in any::<u32>(), body in ".{0,64}") {
        match UnknownCode::new(code) {
            Some(unknown) => {
                let request = Request::new(RequestTask::Unrecognized(unknown), body);
                let decoded: Request = decode(&encode(&request).unwrap()).unwrap();
                prop_assert!(!decoded.request_task.is_recognized());
                prop_assert_eq!(decoded, request);
            }
            None => prop_assert!(RequestTask::from(code).is_recognized()),
        }
    }
}

#[test]
fn test_unrecognized_cannot_wrap_known_codes() {
    for code in [0u32, 1, 2] {
        assert!(UnknownCode::new(code).is_none(), "code {code} wrapped");
    }
    for code in [3u32, 9999] {
        let task = RequestTask::Unrecognized(UnknownCode::new(code).unwrap());
        let request = Request::new(task, "x");
        let decoded: Request = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }
}

// Property: any response survives encode/decode
proptest! {
    #[test]
    fn prop_response_roundtrip(response_code in response_code(), message_body in ".*") {
        let response = Response { response_code, message_body };

        let wire = encode(&response).expect("Encoding should not fail");
        let decoded: Response = decode(&wire).expect("Decoding should not fail");

        prop_assert_eq!(decoded, response);
    }
}

// Property: encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic(code in any::<u32>(), body in ".{0,256}") {
        let request = Request::new(RequestTask::from(code), body);
        prop_assert_eq!(encode(&request).unwrap(), encode(&request).unwrap());
    }
}

// Property: arbitrary text never panics the request decoder
proptest! {
    #[test]
    fn prop_decode_arbitrary_text_is_total(text in ".{0,512}") {
        let _ = decode::<Request>(&text);
    }
}

// Property: a frame written by the codec reads back unchanged, even when it
// arrives in two pieces
proptest! {
    #[test]
    fn prop_frame_roundtrip_split(payload in ".{0,2048}", split in 0usize..4096) {
        let mut codec = FrameCodec::default();
        let mut encoded = BytesMut::new();
        codec.encode(payload.as_str(), &mut encoded).expect("Encoding should not fail");

        let split = split.min(encoded.len());
        let mut buf = BytesMut::from(&encoded[..split]);
        let first = codec.decode(&mut buf).expect("Partial decode should not fail");

        let frame = match first {
            Some(frame) => frame,
            None => {
                buf.extend_from_slice(&encoded[split..]);
                codec
                    .decode(&mut buf)
                    .expect("Decode should not fail")
                    .expect("Frame should be complete")
            }
        };

        prop_assert_eq!(frame, payload);
        prop_assert!(buf.is_empty());
    }
}

// Property: declared lengths above the limit are always rejected
proptest! {
    #[test]
    fn prop_oversized_prefix_rejected(excess in 1u32..1_000_000) {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(1024 + excess).to_be_bytes());

        prop_assert!(codec.decode(&mut buf).is_err());
    }
}
