use crate::error::{AssistantError, Result};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use anyhow::{anyhow, bail, ensure, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const NONCE_LEN: usize = 12;

type Aes192Gcm = AesGcm<Aes192, U12>;

#[derive(Clone)]
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM sealing of sensitive blobs. Output is base64(nonce || ciphertext).
#[derive(Clone)]
pub struct Encryptor {
    cipher: Cipher,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = match self.cipher {
            Cipher::Aes128(_) => 128,
            Cipher::Aes192(_) => 192,
            Cipher::Aes256(_) => 256,
        };
        write!(f, "Encryptor(aes-{bits}-gcm)")
    }
}

impl Encryptor {
    /// Key must decode to 16, 24 or 32 bytes.
    pub fn from_base64_key(key: &str) -> anyhow::Result<Self> {
        let raw = STANDARD
            .decode(key.trim())
            .context("ENCRYPTION_KEY is not valid base64")?;
        Self::from_key_bytes(&raw)
    }

    pub fn from_key_bytes(raw: &[u8]) -> anyhow::Result<Self> {
        let cipher = match raw.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(raw).map_err(|e| anyhow!("{e}"))?),
            24 => Cipher::Aes192(Aes192Gcm::new_from_slice(raw).map_err(|e| anyhow!("{e}"))?),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(raw).map_err(|e| anyhow!("{e}"))?),
            n => bail!("encryption key must be 16, 24 or 32 bytes (got {n})"),
        };
        Ok(Self { cipher })
    }

    /// Fresh 256-bit key, used when no key is configured.
    pub fn random() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self {
            cipher: Cipher::Aes256(Aes256Gcm::new(&key)),
        }
    }

    pub fn from_env_key(key: Option<&str>) -> anyhow::Result<Self> {
        match key {
            Some(key) => Self::from_base64_key(key),
            None => {
                tracing::warn!("ENCRYPTION_KEY not set; using a random per-process key");
                Ok(Self::random())
            }
        }
    }

    pub fn encrypt(&self, plain: &[u8]) -> Result<String> {
        let sealed = match &self.cipher {
            Cipher::Aes128(c) => seal(c, plain),
            Cipher::Aes192(c) => seal(c, plain),
            Cipher::Aes256(c) => seal(c, plain),
        }
        .map_err(AssistantError::External)?;
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let data = STANDARD
            .decode(encoded.trim())
            .context("ciphertext is not valid base64")
            .map_err(AssistantError::External)?;
        match &self.cipher {
            Cipher::Aes128(c) => open(c, &data),
            Cipher::Aes192(c) => open(c, &data),
            Cipher::Aes256(c) => open(c, &data),
        }
        .map_err(AssistantError::External)
    }

    pub fn encrypt_string(&self, plain: &str) -> Result<String> {
        self.encrypt(plain.as_bytes())
    }

    pub fn decrypt_string(&self, encoded: &str) -> Result<String> {
        let plain = self.decrypt(encoded)?;
        String::from_utf8(plain)
            .context("decrypted data is not valid UTF-8")
            .map_err(AssistantError::External)
    }
}

fn seal<C: Aead + AeadCore>(cipher: &C, plain: &[u8]) -> anyhow::Result<Vec<u8>> {
    let nonce = C::generate_nonce(OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain)
        .map_err(|e| anyhow!("encrypt: {e}"))?;
    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open<C: Aead + AeadCore>(cipher: &C, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    ensure!(data.len() > NONCE_LEN, "ciphertext too short");
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow!("decrypt: authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_every_key_size() {
        for len in [16usize, 24, 32] {
            let key = STANDARD.encode(vec![7u8; len]);
            let enc = Encryptor::from_base64_key(&key).unwrap();
            let sealed = enc.encrypt_string("wallet seed").unwrap();
            assert_eq!(enc.decrypt_string(&sealed).unwrap(), "wallet seed");
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let enc = Encryptor::random();
        assert_ne!(enc.encrypt_string("same").unwrap(), enc.encrypt_string("same").unwrap());
    }

    #[test]
    fn rejects_bad_key_lengths() {
        let key = STANDARD.encode([1u8; 20]);
        let err = Encryptor::from_base64_key(&key).unwrap_err();
        assert!(err.to_string().contains("16, 24 or 32"));
    }

    #[test]
    fn tampered_ciphertext_fails_loudly() {
        let enc = Encryptor::random();
        let sealed = enc.encrypt_string("secret").unwrap();
        let mut raw = STANDARD.decode(sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = enc.decrypt(&STANDARD.encode(raw)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::External);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = Encryptor::random().encrypt_string("secret").unwrap();
        assert!(Encryptor::random().decrypt_string(&sealed).is_err());
    }
}
