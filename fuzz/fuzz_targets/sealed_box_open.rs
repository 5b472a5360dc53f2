//! Fuzz target for sealed-box opening
//!
//! # Strategy
//!
//! - Random boxes: arbitrary bytes opened with a fixed identity
//! - Bit flips: a genuine box with one bit flipped
//! - Truncation: a genuine box cut short
//!
//! # Invariants
//!
//! - NEVER panic, whatever the input
//! - A modified box never opens
//! - `unwrap_key` only ever yields a key from an unmodified wrap

#![no_main]

use arbitrary::Arbitrary;
use keyline_crypto::{open, seal, unwrap_key, wrap_key, IdentityKeyPair, SymmetricKey};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum BoxAttack {
    Random { bytes: Vec<u8> },
    BitFlip { plaintext: Vec<u8>, random: [u8; 56], position: u16, bit: u8 },
    Truncate { key: [u8; 32], random: [u8; 56], keep: u16 },
}

fuzz_target!(|attack: BoxAttack| {
    let identity = IdentityKeyPair::from_secret_bytes(&[7u8; 64]);

    match attack {
        BoxAttack::Random { bytes } => {
            let _ = open(&identity, &bytes);
            let _ = unwrap_key(&identity, &bytes);
        },

        BoxAttack::BitFlip { plaintext, random, position, bit } => {
            let Ok(mut sealed) = seal(&identity.public(), &plaintext, random) else {
                return;
            };
            let index = position as usize % sealed.len();
            sealed[index] ^= 1 << (bit % 8);
            assert!(open(&identity, &sealed).is_err(), "tampered box opened");
        },

        BoxAttack::Truncate { key, random, keep } => {
            let key = SymmetricKey::from_bytes(key);
            let Ok(wrapped) = wrap_key(&identity.public(), &key, random) else {
                return;
            };
            let keep = keep as usize % wrapped.len();
            assert!(unwrap_key(&identity, &wrapped[..keep]).is_err(), "truncated wrap opened");
            assert_eq!(unwrap_key(&identity, &wrapped).ok(), Some(key));
        },
    }
});
