//! Property-based tests for request/response framing.
//!
//! Decoding untrusted bytes must never panic, and any strict prefix of a valid
//! frame must be rejected rather than partially decoded.

use keyline_proto::{
    ProtocolError, Request, RequestBody, Response, decode_frame, encode_frame,
};
use proptest::prelude::*;

fn arbitrary_body() -> impl Strategy<Value = RequestBody> {
    prop_oneof![
        ("[a-z]{1,12}", "[ -~]{0,24}", prop::collection::vec(any::<u8>(), 0..64)).prop_map(
            |(username, password, public_key)| RequestBody::Register {
                username,
                password,
                public_key
            }
        ),
        ("[a-z]{1,12}", prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(username, signature)| RequestBody::CompleteCertificateLogin {
                username,
                signature
            }),
        ("[a-z]{1,12}", prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(to, ciphertext)| RequestBody::SendMessage { to, ciphertext }),
        "[a-z]{1,12}".prop_map(|from| RequestBody::FetchMessages { from }),
        Just(RequestBody::ListUsers),
    ]
}

fn arbitrary_request() -> impl Strategy<Value = Request> {
    ("[a-z]{1,12}", any::<[u8; 32]>(), arbitrary_body(), any::<bool>()).prop_map(
        |(username, token, body, authorized)| {
            if authorized {
                Request::authorized(username, &token, body)
            } else {
                Request::anonymous(body)
            }
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn request_survives_framing(request in arbitrary_request()) {
        let mut buf = Vec::new();
        encode_frame(&request, &mut buf).unwrap();

        let decoded: Request = decode_frame(&buf).unwrap();
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn truncated_frames_are_rejected(
        request in arbitrary_request(),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut buf = Vec::new();
        encode_frame(&request, &mut buf).unwrap();

        let len = cut.index(buf.len());
        let result: Result<Request, ProtocolError> = decode_frame(&buf[..len]);
        prop_assert!(result.is_err());
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _: Result<Request, ProtocolError> = decode_frame(&bytes);
        let _: Result<Response, ProtocolError> = decode_frame(&bytes);
    }
}
