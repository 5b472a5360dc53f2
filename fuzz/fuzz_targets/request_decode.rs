//! Fuzz target for request frame decoding
//!
//! # Strategy
//!
//! - Random bytes: arbitrary input straight into `decode_frame`
//! - Lying prefix: a valid CBOR body under a length prefix that claims more or
//!   less than is present, or more than the frame limit
//! - Huge lengths: CBOR claiming massive byte/string/array lengths
//! - Nested: arrays nested to arbitrary depth
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A prefix above the frame limit is rejected before allocation
//! - Anything that decodes re-encodes and decodes to the same request

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use keyline_proto::{
    decode_frame, encode_frame, ChatPayload, Request, RequestBody, MAX_FRAME_SIZE,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum FrameAttack {
    RandomBytes { bytes: Vec<u8> },
    LyingPrefix { claimed: u32, username: String, password: String },
    HugeLength { exponent: u8, major: u8 },
    Nested { depth: u8 },
}

fuzz_target!(|attack: FrameAttack| {
    match attack {
        FrameAttack::RandomBytes { bytes } => {
            if let Ok(request) = decode_frame::<Request>(&bytes) {
                check_round_trip(&request);
            }
            let _ = ChatPayload::decode(&bytes);
        },

        FrameAttack::LyingPrefix { claimed, username, password } => {
            let request = Request::anonymous(RequestBody::Login { username, password });
            let mut buf = BytesMut::new();
            if encode_frame(&request, &mut buf).is_err() {
                return;
            }
            let actual = (buf.len() - 4) as u32;
            buf[..4].copy_from_slice(&claimed.to_be_bytes());

            let result = decode_frame::<Request>(&buf);
            if claimed != actual {
                assert!(result.is_err(), "lying prefix accepted");
            }
            if claimed as usize > MAX_FRAME_SIZE {
                assert!(result.is_err(), "oversized prefix accepted");
            }
        },

        FrameAttack::HugeLength { exponent, major } => {
            let claimed = 1u32 << (exponent % 32);
            let header = match major % 3 {
                0 => 0x5A,
                1 => 0x7A,
                _ => 0x9A,
            };
            let mut body = vec![header];
            body.extend_from_slice(&claimed.to_be_bytes());
            body.extend_from_slice(&[0x01; 8]);

            let mut frame = (body.len() as u32).to_be_bytes().to_vec();
            frame.extend_from_slice(&body);
            let _ = decode_frame::<Request>(&frame);
        },

        FrameAttack::Nested { depth } => {
            let mut body = vec![0x81; depth as usize];
            body.push(0x01);

            let mut frame = (body.len() as u32).to_be_bytes().to_vec();
            frame.extend_from_slice(&body);
            let _ = decode_frame::<Request>(&frame);
        },
    }
});

fn check_round_trip(request: &Request) {
    let mut buf = BytesMut::new();
    encode_frame(request, &mut buf).expect("decoded request must re-encode");
    let again: Request = decode_frame(&buf).expect("re-encoded request must decode");
    assert_eq!(&again, request);
}
