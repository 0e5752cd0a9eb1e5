//! AES-GCM packet encryption with a keyring of accepted keys, narrowed to
//! exactly the two wire versions the protocol fixes.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{AgentError, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BLOCK_SIZE: usize = 16;

/// The two encryption envelope versions fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionVersion {
    /// PKCS7-padded AES-GCM. Overhead: 1 (version) + 12 (nonce) + 16 (tag) +
    /// padding (1..=16 bytes), 45 B in the worst case.
    V0 = 0,
    /// Unpadded AES-GCM. Overhead: 1 + 12 + 16 = 29 B.
    V1 = 1,
}

impl EncryptionVersion {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(EncryptionVersion::V0),
            1 => Ok(EncryptionVersion::V1),
            other => Err(AgentError::Crypto(format!("unknown encryption version {other}"))),
        }
    }
}

/// A single AES key, sized for AES-128-GCM (16 B) or AES-256-GCM (32 B).
#[derive(Clone)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 16 && bytes.len() != 32 {
            return Err(AgentError::Config(format!(
                "key length {} is not 16 or 32 bytes",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn for_key(key: &Key) -> Cipher {
        match key.0.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(&key.0).expect("validated length")),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(&key.0).expect("validated length")),
            _ => unreachable!("Key::new validates length"),
        }
    }

    fn encrypt(&self, nonce: &Nonce, payload: Payload) -> std::result::Result<Vec<u8>, ()> {
        match self {
            Cipher::Aes128(c) => c.encrypt(nonce, payload).map_err(|_| ()),
            Cipher::Aes256(c) => c.encrypt(nonce, payload).map_err(|_| ()),
        }
    }

    fn decrypt(&self, nonce: &Nonce, payload: Payload) -> std::result::Result<Vec<u8>, ()> {
        match self {
            Cipher::Aes128(c) => c.decrypt(nonce, payload).map_err(|_| ()),
            Cipher::Aes256(c) => c.decrypt(nonce, payload).map_err(|_| ()),
        }
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    let pad_len = *data
        .last()
        .ok_or_else(|| AgentError::Crypto("empty plaintext after decryption".into()))? as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return Err(AgentError::Crypto("invalid PKCS7 padding".into()));
    }
    let (body, pad) = data.split_at(data.len() - pad_len);
    if pad.iter().any(|&b| b as usize != pad_len) {
        return Err(AgentError::Crypto("invalid PKCS7 padding".into()));
    }
    Ok(body)
}

/// Encrypt `plaintext` under `key`, with `associated_data` (the label bytes,
/// or empty) bound into the AEAD tag. Returns `[version][nonce][ciphertext+tag]`.
pub fn encrypt(version: EncryptionVersion, key: &Key, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Cipher::for_key(key);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let body = match version {
        EncryptionVersion::V0 => pkcs7_pad(plaintext),
        EncryptionVersion::V1 => plaintext.to_vec(),
    };

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: &body, aad: associated_data })
        .map_err(|_| AgentError::Crypto("AES-GCM encryption failed".into()))?;

    let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    out.push(version as u8);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Try to decrypt `data` against every key in `keyring`, primary first.
pub fn decrypt(keyring: &[Key], data: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 1 + NONCE_LEN + TAG_LEN {
        return Err(AgentError::Crypto("encrypted packet too short".into()));
    }
    let version = EncryptionVersion::from_byte(data[0])?;
    let nonce = Nonce::from_slice(&data[1..1 + NONCE_LEN]);
    let ciphertext = &data[1 + NONCE_LEN..];

    let mut last_err = AgentError::Crypto("no keys in keyring".into());
    for key in keyring {
        let cipher = Cipher::for_key(key);
        match cipher.decrypt(nonce, Payload { msg: ciphertext, aad: associated_data }) {
            Ok(plaintext) => {
                return match version {
                    EncryptionVersion::V0 => pkcs7_unpad(&plaintext).map(|p| p.to_vec()),
                    EncryptionVersion::V1 => Ok(plaintext),
                };
            }
            Err(_) => {
                last_err = AgentError::Crypto("AES-GCM authentication failed".into());
            }
        }
    }
    Err(last_err)
}

/// Per-packet overhead in bytes for a given version.
pub fn overhead(version: EncryptionVersion) -> usize {
    match version {
        EncryptionVersion::V0 => 1 + NONCE_LEN + TAG_LEN + BLOCK_SIZE,
        EncryptionVersion::V1 => 1 + NONCE_LEN + TAG_LEN,
    }
}
