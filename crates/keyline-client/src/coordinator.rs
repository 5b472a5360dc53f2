//! Key-exchange coordinator.
//!
//! Opening a conversation combines two facts: whether we already hold a
//! transcript with an established key (`has_local`) and whether the peer has
//! queued anything for us (`has_unread`). [`classify`] maps them onto one of
//! four branches:
//!
//! ```text
//! has_local  has_unread   branch
//! ---------  ----------   ---------------------------------------------
//! false      false        InitiateFirstContact: new key, wrap, deliver
//! false      true         AcceptFirstContact:   unwrap first entry, then
//!                                               decrypt the rest
//! true       true         Continue:             decrypt all in order
//! true       false        UpToDate:             nothing to do
//! ```
//!
//! A key is established once per pair and never replaced implicitly. A key
//! offer on a conversation that already has one is `KeyConflict`; a key that
//! does not unwrap is `KeyUnwrapFailed`; a message that does not open under
//! the shared key is `DecryptionFailed`. Each is recorded on the transcript
//! as a [`ConversationFault`]. Until the user calls
//! [`Coordinator::forget_conversation`], every open and send returns the
//! recorded error without touching the mailbox.
//!
//! # Concurrency
//!
//! Each peer has its own async mutex, held across the whole drain, decrypt
//! and save sequence. Two opens of the same conversation run one after the
//! other: the second sees the first's result and cannot drain or generate a
//! key again. Different conversations proceed independently.

use std::{collections::HashMap, sync::Arc};

use keyline_core::{Environment, validate_username};
use keyline_crypto::{
    IdentityKeyPair, PublicIdentity, SymmetricKey, decrypt, encrypt, unwrap_key, wrap_key,
};
use keyline_proto::{ChatPayload, MailboxMessage};
use tokio::sync::Mutex;

use crate::{
    api::ApiClient,
    chat::{Chat, ChatMessage, ConversationFault},
    config::ClientConfig,
    envelope::EnvelopeStore,
    error::ClientError,
    session::Session,
    transport::Transport,
};

const MESSAGE_LABEL: &[u8] = b"keyline message v1";

/// The four mutually exclusive ways to open a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeBranch {
    /// No key, nothing queued: we generate and deliver the key
    InitiateFirstContact,
    /// No key, mail queued: the first entry is the peer's wrapped key
    AcceptFirstContact,
    /// Key held, mail queued: decrypt and append
    Continue,
    /// Key held, nothing queued
    UpToDate,
}

/// Pick the branch for a conversation.
pub fn classify(has_local: bool, has_unread: bool) -> KeyExchangeBranch {
    match (has_local, has_unread) {
        (false, false) => KeyExchangeBranch::InitiateFirstContact,
        (false, true) => KeyExchangeBranch::AcceptFirstContact,
        (true, true) => KeyExchangeBranch::Continue,
        (true, false) => KeyExchangeBranch::UpToDate,
    }
}

/// Per-peer state, loaded from the envelope store on first use.
#[derive(Default)]
struct Conversation {
    loaded: Option<Loaded>,
}

struct Loaded {
    chat: Chat,
    save_key: Option<SymmetricKey>,
}

/// Drives key exchange and messaging for one logged-in user.
pub struct Coordinator<E: Environment, T: Transport> {
    env: E,
    api: ApiClient<T>,
    session: Session,
    identity: Arc<IdentityKeyPair>,
    envelopes: EnvelopeStore<E>,
    conversations: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl<E: Environment, T: Transport> Coordinator<E, T> {
    /// Coordinator for `session`, keeping transcripts under the configured
    /// envelope root.
    pub fn new(
        env: E,
        api: ApiClient<T>,
        session: Session,
        identity: Arc<IdentityKeyPair>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let envelopes = EnvelopeStore::new(
            env.clone(),
            &config.envelope_root,
            session.username(),
            Arc::clone(&identity),
        )?;
        Ok(Self {
            env,
            api,
            session,
            identity,
            envelopes,
            conversations: Mutex::new(HashMap::new()),
        })
    }

    /// The session this coordinator acts for.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// API client (for calls outside a conversation).
    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    /// Envelope store backing this coordinator.
    pub fn envelopes(&self) -> &EnvelopeStore<E> {
        &self.envelopes
    }

    /// Bring the conversation with `peer` up to date and return its
    /// transcript.
    ///
    /// Drains the `peer → self` mailbox. Drained messages are persisted
    /// before this returns; if it fails after the drain, they are lost.
    pub async fn open_conversation(&self, peer: &str) -> Result<Vec<ChatMessage>, ClientError> {
        self.check_peer(peer)?;
        let slot = self.slot(peer).await;
        let mut conversation = slot.lock().await;
        let loaded = self.ensure_loaded(&mut conversation, peer)?;
        check_fault(loaded, peer)?;

        let unread = self.api.fetch_messages(&self.session, peer).await?;
        let branch = classify(loaded.chat.has_key(), !unread.is_empty());
        tracing::info!(
            target: "keyline::audit",
            owner = self.session.username(),
            peer,
            ?branch,
            unread = unread.len(),
            "key exchange branch"
        );

        if let Err(err) = self.advance(loaded, peer, branch, &unread).await {
            if let Some(fault) = err.conversation_fault() {
                self.record_fault(loaded, peer, fault);
            }
            return Err(err);
        }

        Ok(loaded.chat.messages.clone())
    }

    /// Encrypt `text` for `peer`, queue it, and append it locally.
    ///
    /// Requires an established key; open the conversation first.
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<u64, ClientError> {
        self.check_peer(peer)?;
        let slot = self.slot(peer).await;
        let mut conversation = slot.lock().await;
        let loaded = self.ensure_loaded(&mut conversation, peer)?;
        check_fault(loaded, peer)?;

        let key = loaded
            .chat
            .key
            .clone()
            .ok_or_else(|| ClientError::NoSharedKey { peer: peer.to_string() })?;

        let aad = message_aad(self.session.username(), peer);
        let ciphertext = encrypt(&key, text.as_bytes(), &aad, self.env.random_array());
        let payload = encode_payload(&ChatPayload::Text { ciphertext })?;

        let timestamp = self.api.send_message(&self.session, peer, payload).await?;
        loaded.chat.messages.push(ChatMessage {
            sender: self.session.username().to_string(),
            text: text.to_string(),
            timestamp,
        });
        self.persist(loaded)?;

        Ok(timestamp)
    }

    /// Discard the conversation with `peer`: envelope artifacts and
    /// in-memory state. The next open starts first contact again.
    ///
    /// This is the only way out of a conversation that failed with a fatal
    /// error. It is never called automatically.
    pub async fn forget_conversation(&self, peer: &str) -> Result<(), ClientError> {
        self.check_peer(peer)?;
        let slot = self.slot(peer).await;
        let mut conversation = slot.lock().await;

        self.envelopes.remove(peer)?;
        conversation.loaded = None;
        tracing::info!(
            target: "keyline::audit",
            owner = self.session.username(),
            peer,
            "conversation forgotten"
        );
        Ok(())
    }

    /// Fingerprint of the shared key with `peer`, if one is established.
    ///
    /// Both sides compute the same value, so users can compare it out of
    /// band.
    pub async fn key_fingerprint(&self, peer: &str) -> Result<Option<[u8; 32]>, ClientError> {
        self.check_peer(peer)?;
        let slot = self.slot(peer).await;
        let mut conversation = slot.lock().await;
        let loaded = self.ensure_loaded(&mut conversation, peer)?;
        Ok(loaded.chat.key.as_ref().map(SymmetricKey::fingerprint))
    }

    fn check_peer(&self, peer: &str) -> Result<(), ClientError> {
        validate_username(peer)?;
        if peer == self.session.username() {
            return Err(ClientError::SelfConversation);
        }
        Ok(())
    }

    async fn slot(&self, peer: &str) -> Arc<Mutex<Conversation>> {
        let mut conversations = self.conversations.lock().await;
        Arc::clone(conversations.entry(peer.to_string()).or_default())
    }

    fn ensure_loaded<'a>(
        &self,
        conversation: &'a mut Conversation,
        peer: &str,
    ) -> Result<&'a mut Loaded, ClientError> {
        if conversation.loaded.is_none() {
            let loaded = match self.envelopes.load(peer)? {
                Some(envelope) => Loaded { chat: envelope.chat, save_key: Some(envelope.save_key) },
                None => Loaded { chat: Chat::new(self.session.username(), peer), save_key: None },
            };
            conversation.loaded = Some(loaded);
        }

        conversation
            .loaded
            .as_mut()
            .ok_or_else(|| ClientError::UnexpectedResponse("conversation not loaded".to_string()))
    }

    async fn advance(
        &self,
        loaded: &mut Loaded,
        peer: &str,
        branch: KeyExchangeBranch,
        unread: &[MailboxMessage],
    ) -> Result<(), ClientError> {
        match branch {
            KeyExchangeBranch::InitiateFirstContact => self.initiate(loaded, peer).await,
            KeyExchangeBranch::AcceptFirstContact => {
                let (first, rest) = unread.split_first().ok_or_else(|| {
                    ClientError::UnexpectedResponse("empty mailbox on accept".to_string())
                })?;
                let key = self.accept_key(peer, first)?;
                let appended = self.decrypt_all(&key, peer, rest)?;

                loaded.chat.key = Some(key);
                loaded.chat.messages.extend(appended);
                self.persist(loaded)
            },
            KeyExchangeBranch::Continue => {
                let key = loaded.chat.key.clone().ok_or_else(|| ClientError::NoSharedKey {
                    peer: peer.to_string(),
                })?;
                let appended = self.decrypt_all(&key, peer, unread)?;

                loaded.chat.messages.extend(appended);
                self.persist(loaded)
            },
            KeyExchangeBranch::UpToDate => Ok(()),
        }
    }

    /// Latch `fault` on the conversation. The in-memory latch holds even if
    /// the envelope write fails.
    fn record_fault(&self, loaded: &mut Loaded, peer: &str, fault: ConversationFault) {
        loaded.chat.fault = Some(fault);
        tracing::warn!(
            target: "keyline::audit",
            owner = self.session.username(),
            peer,
            ?fault,
            "conversation stopped"
        );
        if let Err(e) = self.persist(loaded) {
            tracing::error!(peer, error = %e, "failed to persist conversation fault");
        }
    }

    async fn initiate(&self, loaded: &mut Loaded, peer: &str) -> Result<(), ClientError> {
        let public_key = self.api.public_key(&self.session, peer).await?;
        let peer_identity = PublicIdentity::from_bytes(&public_key).map_err(|e| {
            ClientError::UnexpectedResponse(format!("public key for {peer} unusable: {e}"))
        })?;

        let key = SymmetricKey::from_bytes(self.env.random_array());
        let wrapped = wrap_key(&peer_identity, &key, self.env.random_array()).map_err(|e| {
            ClientError::UnexpectedResponse(format!("public key for {peer} unusable: {e}"))
        })?;
        let payload = encode_payload(&ChatPayload::KeyWrap { wrapped })?;

        self.api.send_message(&self.session, peer, payload).await?;

        loaded.chat.key = Some(key);
        self.persist(loaded)
    }

    fn accept_key(&self, peer: &str, first: &MailboxMessage) -> Result<SymmetricKey, ClientError> {
        let unwrap_failed = || ClientError::KeyUnwrapFailed { peer: peer.to_string() };

        match ChatPayload::decode(&first.ciphertext) {
            Ok(ChatPayload::KeyWrap { wrapped }) => {
                unwrap_key(&self.identity, &wrapped).map_err(|_| unwrap_failed())
            },
            Ok(ChatPayload::Text { .. }) | Err(_) => Err(unwrap_failed()),
        }
    }

    /// Decrypt every entry in mailbox order. All or nothing: one bad entry
    /// fails the whole batch and nothing is appended.
    fn decrypt_all(
        &self,
        key: &SymmetricKey,
        peer: &str,
        messages: &[MailboxMessage],
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let aad = message_aad(peer, self.session.username());
        let failed = || ClientError::DecryptionFailed { peer: peer.to_string() };

        messages
            .iter()
            .map(|message| {
                let ciphertext = match ChatPayload::decode(&message.ciphertext) {
                    Ok(ChatPayload::Text { ciphertext }) => ciphertext,
                    Ok(ChatPayload::KeyWrap { .. }) => {
                        return Err(ClientError::KeyConflict { peer: peer.to_string() });
                    },
                    Err(_) => return Err(failed()),
                };
                let plaintext = decrypt(key, &ciphertext, &aad).map_err(|_| failed())?;
                let text = String::from_utf8(plaintext).map_err(|_| failed())?;

                Ok(ChatMessage {
                    sender: message.sender.clone(),
                    text,
                    timestamp: message.timestamp,
                })
            })
            .collect()
    }

    fn persist(&self, loaded: &mut Loaded) -> Result<(), ClientError> {
        let save_key = self.envelopes.save(&loaded.chat, loaded.save_key.as_ref())?;
        loaded.save_key = Some(save_key);
        Ok(())
    }
}

fn check_fault(loaded: &Loaded, peer: &str) -> Result<(), ClientError> {
    match loaded.chat.fault {
        Some(fault) => Err(ClientError::from_fault(fault, peer)),
        None => Ok(()),
    }
}

fn message_aad(sender: &str, receiver: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(MESSAGE_LABEL.len() + sender.len() + receiver.len() + 1);
    aad.extend_from_slice(MESSAGE_LABEL);
    aad.extend_from_slice(sender.as_bytes());
    aad.push(0);
    aad.extend_from_slice(receiver.as_bytes());
    aad
}

fn encode_payload(payload: &ChatPayload) -> Result<Vec<u8>, ClientError> {
    payload
        .encode()
        .map_err(|e| ClientError::UnexpectedResponse(format!("payload encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify(false, false), KeyExchangeBranch::InitiateFirstContact);
        assert_eq!(classify(false, true), KeyExchangeBranch::AcceptFirstContact);
        assert_eq!(classify(true, true), KeyExchangeBranch::Continue);
        assert_eq!(classify(true, false), KeyExchangeBranch::UpToDate);
    }

    proptest! {
        /// Key-establishing branches happen only without a local key, and
        /// only the unread flag decides between them.
        #[test]
        fn prop_key_established_only_without_local(has_local: bool, has_unread: bool) {
            let branch = classify(has_local, has_unread);
            let establishes = matches!(
                branch,
                KeyExchangeBranch::InitiateFirstContact | KeyExchangeBranch::AcceptFirstContact
            );
            prop_assert_eq!(establishes, !has_local);

            let drains = matches!(
                branch,
                KeyExchangeBranch::AcceptFirstContact | KeyExchangeBranch::Continue
            );
            prop_assert_eq!(drains, has_unread);
        }
    }

    #[test]
    fn message_aad_is_directional() {
        assert_ne!(message_aad("alice", "bob"), message_aad("bob", "alice"));
        assert_ne!(message_aad("al", "icebob"), message_aad("alice", "bob"));
    }
}
