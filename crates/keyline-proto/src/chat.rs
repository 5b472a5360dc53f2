//! Mailbox payloads.
//!
//! The server treats mailbox ciphertexts as opaque. Clients encode one of
//! these variants into every message they enqueue so the receiver can tell a
//! first-contact key apart from a text message without trial decryption.

use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    frame::{from_cbor, to_cbor},
};

/// Content of a mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatPayload {
    /// Conversation key sealed to the receiver's public identity. Always the
    /// first message the initiator sends.
    KeyWrap {
        /// Sealed box of the 32-byte conversation key
        wrapped: Vec<u8>,
    },

    /// Text message encrypted under the conversation key.
    Text {
        /// `nonce || ciphertext`
        ciphertext: Vec<u8>,
    },
}

impl ChatPayload {
    /// Encode to CBOR bytes for the mailbox.
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    /// Decode from mailbox bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_does_not_decode() {
        assert!(ChatPayload::decode(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn variants_stay_distinct() {
        let wrap = ChatPayload::KeyWrap { wrapped: vec![1, 2, 3] }.encode().unwrap();
        let text = ChatPayload::Text { ciphertext: vec![1, 2, 3] }.encode().unwrap();

        assert_ne!(wrap, text);
        assert!(matches!(ChatPayload::decode(&wrap).unwrap(), ChatPayload::KeyWrap { .. }));
    }
}
