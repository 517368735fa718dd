//! Decryption of Lark's encrypted callback envelopes.
//!
//! With an encrypt key configured in the developer console, Lark posts
//! `{"encrypt": "<base64>"}`. The decoded bytes are a 16-byte IV followed by
//! AES-256-CBC ciphertext (PKCS#7 padded), keyed by the SHA-256 digest of the
//! encrypt key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use sha2::{Digest, Sha256};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_LEN: usize = 16;

pub struct EventCipher {
    key: [u8; 32],
}

impl EventCipher {
    pub fn new(encrypt_key: &str) -> Self {
        Self {
            key: Sha256::digest(encrypt_key.as_bytes()).into(),
        }
    }

    /// Build a cipher from the configured key; blank keys disable decryption.
    pub fn from_key(encrypt_key: Option<&str>) -> Option<Self> {
        encrypt_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    /// Decrypt the `encrypt` field of an envelope into the inner JSON text.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encrypted.trim())
            .context("Encrypted payload is not valid base64")?;
        if raw.len() <= BLOCK_LEN || raw.len() % BLOCK_LEN != 0 {
            bail!("Encrypted payload has invalid length {}", raw.len());
        }

        let (iv, ciphertext) = raw.split_at(BLOCK_LEN);
        let plain = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| anyhow!("Invalid AES key or IV length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| anyhow!("Bad padding after decryption, check the encrypt key"))?;
        String::from_utf8(plain).context("Decrypted payload is not UTF-8")
    }
}
