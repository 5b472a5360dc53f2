//! Envelope-encrypted transcript storage.
//!
//! Two artifacts per (owner, peer) under `root/owner/`:
//!
//! ```text
//! peer.key   save key sealed to the owner's public identity
//! peer.chat  nonce || XChaCha20-Poly1305(save key, CBOR(Chat))
//! ```
//!
//! The save key is generated once per conversation and reused by every later
//! save, so older transcript ciphertext stays readable. It never touches disk
//! unwrapped. Corrupt artifacts are reported and left exactly as found.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use keyline_core::{Environment, validate_username};
use keyline_crypto::{IdentityKeyPair, SymmetricKey, decrypt, encrypt, unwrap_key, wrap_key};

use crate::{chat::Chat, error::ClientError};

const KEY_EXTENSION: &str = "key";
const CHAT_EXTENSION: &str = "chat";
const TRANSCRIPT_LABEL: &[u8] = b"keyline transcript v1";

/// A transcript recovered from disk together with its save key.
#[derive(Debug)]
pub struct Envelope {
    /// Unwrapped save key, held in memory only
    pub save_key: SymmetricKey,
    /// Decrypted conversation
    pub chat: Chat,
}

/// Reads and writes envelope artifacts for one owner.
pub struct EnvelopeStore<E: Environment> {
    dir: PathBuf,
    owner: String,
    identity: Arc<IdentityKeyPair>,
    env: E,
}

impl<E: Environment> EnvelopeStore<E> {
    /// Store for `owner` under `root`. Nothing is created until the first
    /// save.
    pub fn new(
        env: E,
        root: impl AsRef<Path>,
        owner: &str,
        identity: Arc<IdentityKeyPair>,
    ) -> Result<Self, ClientError> {
        validate_username(owner)?;
        Ok(Self { dir: root.as_ref().join(owner), owner: owner.to_string(), identity, env })
    }

    /// Path of the wrapped save key for `peer`.
    pub fn key_path(&self, peer: &str) -> PathBuf {
        self.dir.join(format!("{peer}.{KEY_EXTENSION}"))
    }

    /// Path of the encrypted transcript for `peer`.
    pub fn chat_path(&self, peer: &str) -> PathBuf {
        self.dir.join(format!("{peer}.{CHAT_EXTENSION}"))
    }

    /// Load the conversation with `peer`.
    ///
    /// `Ok(None)` when no wrapped key exists: there is no prior
    /// conversation. Any artifact that exists but does not open is
    /// `StorageCorrupt`.
    pub fn load(&self, peer: &str) -> Result<Option<Envelope>, ClientError> {
        validate_username(peer)?;
        let Some(save_key) = self.read_save_key(peer)? else {
            return Ok(None);
        };

        let chat_path = self.chat_path(peer);
        let blob = fs::read(&chat_path).map_err(|e| corrupt(&chat_path, &e.to_string()))?;
        let plaintext = decrypt(&save_key, &blob, &self.transcript_aad(peer))
            .map_err(|_| corrupt(&chat_path, "transcript does not decrypt"))?;
        let chat: Chat = ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| corrupt(&chat_path, &format!("transcript does not decode: {e}")))?;

        if chat.owner != self.owner || chat.peer != peer {
            return Err(corrupt(&chat_path, "transcript belongs to another conversation"));
        }

        Ok(Some(Envelope { save_key, chat }))
    }

    /// Persist `chat`, returning the save key used.
    ///
    /// Pass the key from a previous load or save when it is at hand. Without
    /// one, the key already on disk is reused, and only a conversation with
    /// no key artifact gets a fresh one.
    pub fn save(
        &self,
        chat: &Chat,
        save_key: Option<&SymmetricKey>,
    ) -> Result<SymmetricKey, ClientError> {
        validate_username(&chat.peer)?;
        if chat.owner != self.owner {
            return Err(ClientError::UnexpectedResponse(format!(
                "chat owned by {} saved in store for {}",
                chat.owner, self.owner
            )));
        }
        let peer = chat.peer.as_str();

        let save_key = match save_key {
            Some(key) => key.clone(),
            None => match self.read_save_key(peer)? {
                Some(key) => key,
                None => self.create_save_key(peer)?,
            },
        };

        let mut plaintext = Vec::new();
        ciborium::into_writer(chat, &mut plaintext)
            .map_err(|e| io::Error::other(format!("transcript encode failed: {e}")))?;
        let blob =
            encrypt(&save_key, &plaintext, &self.transcript_aad(peer), self.env.random_array());
        write_atomic(&self.chat_path(peer), &blob)?;

        Ok(save_key)
    }

    /// Delete both artifacts for `peer`. Missing files are not an error.
    pub fn remove(&self, peer: &str) -> Result<(), ClientError> {
        validate_username(peer)?;
        for path in [self.chat_path(peer), self.key_path(peer)] {
            match fs::remove_file(&path) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_save_key(&self, peer: &str) -> Result<Option<SymmetricKey>, ClientError> {
        let key_path = self.key_path(peer);
        let wrapped = match fs::read(&key_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        unwrap_key(&self.identity, &wrapped)
            .map(Some)
            .map_err(|_| corrupt(&key_path, "save key does not unwrap"))
    }

    fn create_save_key(&self, peer: &str) -> Result<SymmetricKey, ClientError> {
        let key = SymmetricKey::from_bytes(self.env.random_array());
        let wrapped = wrap_key(&self.identity.public(), &key, self.env.random_array())
            .map_err(|e| io::Error::other(format!("save key wrap failed: {e}")))?;

        fs::create_dir_all(&self.dir)?;
        write_atomic(&self.key_path(peer), &wrapped)?;
        Ok(key)
    }

    fn transcript_aad(&self, peer: &str) -> Vec<u8> {
        let mut aad =
            Vec::with_capacity(TRANSCRIPT_LABEL.len() + self.owner.len() + peer.len() + 1);
        aad.extend_from_slice(TRANSCRIPT_LABEL);
        aad.extend_from_slice(self.owner.as_bytes());
        aad.push(0);
        aad.extend_from_slice(peer.as_bytes());
        aad
    }
}

fn corrupt(path: &Path, reason: &str) -> ClientError {
    ClientError::StorageCorrupt { path: path.to_path_buf(), reason: reason.to_string() }
}

/// Write via a temporary sibling and rename, so a crash never leaves a
/// half-written artifact under the real name.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
