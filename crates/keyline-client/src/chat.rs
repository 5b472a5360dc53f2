//! Local conversation state.

use keyline_crypto::SymmetricKey;
use serde::{Deserialize, Serialize};

/// One decrypted message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub sender: String,
    /// Plaintext
    pub text: String,
    /// Server timestamp assigned at enqueue
    pub timestamp: u64,
}

impl std::fmt::Debug for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatMessage")
            .field("sender", &self.sender)
            .field("text_len", &self.text.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Why a conversation stopped accepting traffic.
///
/// Recorded on the first fatal error and kept, on disk too, until the
/// conversation is forgotten. While set, no open drains and no key is
/// generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationFault {
    /// A key offer did not unwrap with our identity
    KeyUnwrapFailed,
    /// A message did not decrypt under the shared key
    DecryptionFailed,
    /// A second key offer arrived after a key was established
    KeyConflict,
}

/// A pairwise conversation as seen by `owner`.
///
/// `key` is the shared conversation key, present once key exchange has
/// completed. The whole struct, key included, only ever leaves memory
/// encrypted under the envelope save key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Local user
    pub owner: String,
    /// Other participant
    pub peer: String,
    /// Shared key, once established
    pub key: Option<SymmetricKey>,
    /// Transcript in local append order
    pub messages: Vec<ChatMessage>,
    /// Set once the conversation has failed fatally
    #[serde(default)]
    pub fault: Option<ConversationFault>,
}

impl Chat {
    /// Empty conversation with no key.
    pub fn new(owner: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            peer: peer.into(),
            key: None,
            messages: Vec::new(),
            fault: None,
        }
    }

    /// Order-independent identity of the conversation.
    pub fn participants(&self) -> (&str, &str) {
        if self.owner <= self.peer {
            (&self.owner, &self.peer)
        } else {
            (&self.peer, &self.owner)
        }
    }

    /// Whether key exchange has completed.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether the conversation is stopped until forgotten.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("owner", &self.owner)
            .field("peer", &self.peer)
            .field("has_key", &self.key.is_some())
            .field("messages", &self.messages.len())
            .field("fault", &self.fault)
            .finish()
    }
}
