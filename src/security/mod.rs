//! Security & label layer: combines the label header
//! and AES-GCM envelope encryption into the encode/decode pipeline the
//! transport layer's bytes pass through before reaching the message codec.

pub mod encryption;
pub mod label;

use parking_lot::RwLock;

use crate::error::{AgentError, Result};
use encryption::{Key, EncryptionVersion};

/// The set of AES keys this node accepts, ordered primary-first. Mutated at
/// runtime by the key manager.
#[derive(Default)]
pub struct Keyring {
    keys: RwLock<Vec<Key>>,
}

impl Keyring {
    pub fn new(primary: Option<Key>) -> Self {
        let keys = primary.into_iter().collect();
        Self { keys: RwLock::new(keys) }
    }

    /// Add `key` to the keyring if not already present. Does not change the
    /// primary key.
    pub fn install(&self, key: Key) {
        let mut keys = self.keys.write();
        if !keys.iter().any(|k| k.as_bytes() == key.as_bytes()) {
            keys.push(key);
        }
    }

    /// Promote `key` to primary (moves it to the front). The key must
    /// already be installed.
    pub fn use_key(&self, key: &Key) -> Result<()> {
        let mut keys = self.keys.write();
        let idx = keys
            .iter()
            .position(|k| k.as_bytes() == key.as_bytes())
            .ok_or_else(|| AgentError::Config("key must be installed before use".into()))?;
        let k = keys.remove(idx);
        keys.insert(0, k);
        Ok(())
    }

    /// Remove a non-primary key. Removing the primary key is rejected;
    /// callers must `use_key` a different key first.
    pub fn remove(&self, key: &Key) -> Result<()> {
        let mut keys = self.keys.write();
        if let Some(first) = keys.first() {
            if first.as_bytes() == key.as_bytes() {
                return Err(AgentError::Config("cannot remove the primary key".into()));
            }
        }
        keys.retain(|k| k.as_bytes() != key.as_bytes());
        Ok(())
    }

    pub fn primary(&self) -> Option<Key> {
        self.keys.read().first().cloned()
    }

    pub fn snapshot(&self) -> Vec<Key> {
        self.keys.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

/// Encode/decode policy wrapping the label and encryption layers, per
/// `Config`'s `label`, `encrypt_outgoing`, `require_incoming_encryption`,
/// and `stealth_udp` fields.
pub struct SecurityManager {
    pub keyring: Keyring,
    label: Option<String>,
    encrypt_outgoing: bool,
    require_incoming_encryption: bool,
    pub stealth_udp: bool,
}

impl SecurityManager {
    pub fn new(
        keyring: Keyring,
        label: Option<String>,
        encrypt_outgoing: bool,
        require_incoming_encryption: bool,
        stealth_udp: bool,
    ) -> Self {
        Self { keyring, label, encrypt_outgoing, require_incoming_encryption, stealth_udp }
    }

    fn associated_data(&self) -> Vec<u8> {
        self.label.as_deref().map(|l| l.as_bytes().to_vec()).unwrap_or_default()
    }

    /// Wrap an outbound message body: optionally encrypt with the primary
    /// key, then prepend the label header.
    pub fn encode_outgoing(&self, body: &[u8]) -> Result<Vec<u8>> {
        let payload = if self.encrypt_outgoing {
            let key = self
                .keyring
                .primary()
                .ok_or_else(|| AgentError::Crypto("encrypt_outgoing set but keyring is empty".into()))?;
            encryption::encrypt(EncryptionVersion::V1, &key, body, &self.associated_data())?
        } else {
            body.to_vec()
        };
        label::add_label(&payload, self.label.as_deref())
    }

    /// Unwrap an inbound packet: strip and verify the label, then decrypt if
    /// required or if the payload looks encrypted.
    pub fn decode_incoming(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (received_label, rest) = label::remove_label(data)?;
        if !label::verify_label(received_label.as_deref(), self.label.as_deref()) {
            return Err(AgentError::Crypto("label mismatch".into()));
        }

        let looks_encrypted = matches!(rest.first(), Some(0) | Some(1)) && !self.keyring.is_empty();
        if self.require_incoming_encryption || looks_encrypted {
            if self.keyring.is_empty() {
                return Err(AgentError::Crypto("incoming encryption required but keyring is empty".into()));
            }
            encryption::decrypt(&self.keyring.snapshot(), rest, &self.associated_data())
        } else {
            Ok(rest.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encryption::Key;

    #[test]
    fn round_trip_with_encryption_and_label() {
        let key = Key::new(vec![9u8; 16]).unwrap();
        let sm = SecurityManager::new(
            Keyring::new(Some(key)),
            Some("lab".into()),
            true,
            true,
            false,
        );
        let wire = sm.encode_outgoing(b"payload").unwrap();
        let plain = sm.decode_incoming(&wire).unwrap();
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn plaintext_fallback_when_encryption_not_required() {
        let sm = SecurityManager::new(Keyring::new(None), None, false, false, false);
        let wire = sm.encode_outgoing(b"payload").unwrap();
        let plain = sm.decode_incoming(&wire).unwrap();
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn keyring_use_key_promotes_to_primary() {
        let a = Key::new(vec![1u8; 16]).unwrap();
        let b = Key::new(vec![2u8; 16]).unwrap();
        let kr = Keyring::new(Some(a.clone()));
        kr.install(b.clone());
        assert_eq!(kr.primary().unwrap().as_bytes(), a.as_bytes());
        kr.use_key(&b).unwrap();
        assert_eq!(kr.primary().unwrap().as_bytes(), b.as_bytes());
    }

    #[test]
    fn keyring_rejects_removing_primary() {
        let a = Key::new(vec![1u8; 16]).unwrap();
        let kr = Keyring::new(Some(a.clone()));
        assert!(kr.remove(&a).is_err());
    }
}
