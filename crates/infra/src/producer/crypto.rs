//! AES-256-GCM sealing of outbound payloads.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. Every
//! call draws a fresh random nonce from the system CSPRNG.

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use super::ProducerError;

pub struct MessageCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageCipher(AES-256-GCM)")
    }
}

impl MessageCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, ProducerError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| ProducerError::InvalidKey("failed to create AES-256-GCM key".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Key given as 64 hex characters.
    pub fn from_hex(key: &str) -> Result<Self, ProducerError> {
        let bytes = hex::decode(key.trim())
            .map_err(|e| ProducerError::InvalidKey(format!("key is not hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ProducerError::InvalidKey(format!("key must be 32 bytes, got {}", b.len()))
        })?;
        Self::new(&key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProducerError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| ProducerError::Crypto("failed to generate random nonce".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| ProducerError::Crypto("AES-256-GCM encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, ProducerError> {
        if sealed.len() < NONCE_LEN {
            return Err(ProducerError::Crypto("sealed payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| ProducerError::Crypto("bad nonce".into()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| ProducerError::Crypto("wrong key or corrupted payload".into()))?;
        Ok(plaintext.to_vec())
    }
}
