use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;

/// The deployment-wide shared secret.
///
/// One 256-bit key serves both purposes a credential needs: the HMAC-SHA256
/// signature over the signed fields, and AES-256-GCM encryption of the
/// caller's secret material.
#[derive(Clone)]
pub struct SharedKey {
    key: [u8; 32],
}

impl SharedKey {
    pub fn from_hex(hex: &str) -> anyhow::Result<Self> {
        Ok(Self {
            key: parse_secret_key(hex)?,
        })
    }

    /// Lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the signature of `payload` and compare it with `signature`.
    pub fn verify(&self, payload: &str, signature: &str) -> bool {
        let expected = self.sign(payload);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }

    /// Encrypt a caller secret. Output is base64 of `nonce || ciphertext`,
    /// which never contains the `:` field separator.
    pub fn encrypt_secret(&self, plaintext: &str) -> anyhow::Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    pub fn decrypt_secret(&self, encoded: &str) -> anyhow::Result<String> {
        let blob = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if blob.len() <= NONCE_LEN {
            anyhow::bail!("encrypted secret is too short");
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        let result = String::from_utf8(plaintext.clone());
        plaintext.zeroize();
        Ok(result?)
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

pub fn parse_secret_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "PAAS_SECRET_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_secret_encryption_roundtrip() {
        let key = SharedKey::from_hex(KEY).unwrap();
        let enc = key.encrypt_secret("hunter2").unwrap();
        assert!(!enc.contains(':'));
        assert_eq!(key.decrypt_secret(&enc).unwrap(), "hunter2");
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let key = SharedKey::from_hex(KEY).unwrap();
        let other = SharedKey::from_hex(&"ff".repeat(32)).unwrap();
        let enc = key.encrypt_secret("hunter2").unwrap();
        assert!(other.decrypt_secret(&enc).is_err());
    }

    #[test]
    fn test_signature_deterministic_and_keyed() {
        let key = SharedKey::from_hex(KEY).unwrap();
        let other = SharedKey::from_hex(&"ff".repeat(32)).unwrap();
        assert_eq!(key.sign("a:b:c:1"), key.sign("a:b:c:1"));
        assert_ne!(key.sign("a:b:c:1"), other.sign("a:b:c:1"));
        assert!(key.verify("a:b:c:1", &key.sign("a:b:c:1")));
        assert!(!key.verify("a:b:c:2", &key.sign("a:b:c:1")));
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(SharedKey::from_hex("abcd").is_err());
        assert!(SharedKey::from_hex(&"zz".repeat(32)).is_err());
    }
}
