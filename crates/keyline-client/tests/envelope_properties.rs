//! Property tests for envelope storage.

use std::sync::Arc;

use keyline_client::{Chat, ChatMessage, ClientError, EnvelopeStore};
use keyline_core::SystemEnv;
use keyline_crypto::{IdentityKeyPair, SymmetricKey};
use proptest::prelude::*;

fn identity() -> Arc<IdentityKeyPair> {
    Arc::new(IdentityKeyPair::from_secret_bytes(&[9u8; 64]))
}

fn message_strategy() -> impl Strategy<Value = ChatMessage> {
    (prop_oneof![Just("alice"), Just("bob")], ".{0,64}", any::<u64>()).prop_map(
        |(sender, text, timestamp)| ChatMessage { sender: sender.to_string(), text, timestamp },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever was saved is what a later load returns, and each save keeps
    /// the previously established save key.
    #[test]
    fn prop_saved_transcript_loads_back(
        key in proptest::option::of(any::<[u8; 32]>()),
        batches in prop::collection::vec(prop::collection::vec(message_strategy(), 0..6), 1..5),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvelopeStore::new(SystemEnv::new(), dir.path(), "alice", identity()).unwrap();

        let mut chat = Chat::new("alice", "bob");
        chat.key = key.map(SymmetricKey::from_bytes);

        let mut save_key: Option<SymmetricKey> = None;
        for batch in batches {
            chat.messages.extend(batch);
            let used = store.save(&chat, save_key.as_ref()).unwrap();
            if let Some(previous) = &save_key {
                prop_assert_eq!(previous, &used);
            }
            save_key = Some(used);

            let loaded = store.load("bob").unwrap().unwrap();
            prop_assert_eq!(&loaded.chat, &chat);
            prop_assert_eq!(Some(&loaded.save_key), save_key.as_ref());
        }
    }

    /// Flipping any byte of the transcript artifact is detected.
    #[test]
    fn prop_any_transcript_bit_flip_is_corrupt(
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvelopeStore::new(SystemEnv::new(), dir.path(), "alice", identity()).unwrap();

        let mut chat = Chat::new("alice", "bob");
        chat.messages.push(ChatMessage { sender: "bob".into(), text: "hi".into(), timestamp: 1 });
        store.save(&chat, None).unwrap();

        let path = store.chat_path("bob");
        let mut bytes = std::fs::read(&path).unwrap();
        let at = index.index(bytes.len());
        bytes[at] ^= 1 << bit;
        std::fs::write(&path, &bytes).unwrap();

        let result = store.load("bob");
        let is_storage_corrupt = matches!(result, Err(ClientError::StorageCorrupt { .. }));
        prop_assert!(is_storage_corrupt);
    }
}
