//! Credential encryption: AES-256-GCM with a PBKDF2-derived key.
//!
//! Stored ciphertexts use the `<iv-hex>:<auth-tag-hex>:<ciphertext-hex>` wire
//! format; existing directory rows were written in this format, so it must not
//! change without a data migration.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

const KDF_SALT: &[u8] = b"clubdeck-directory-v1";
const KDF_ITERATIONS: u32 = 100_000;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric cipher for tenant database passwords, keyed by the process-wide
/// credential secret. Cheap to clone; the derived key is computed once.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    /// Derive the cipher key from the process-wide secret
    /// (PBKDF2-HMAC-SHA256, fixed salt and iteration count).
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        CredentialCipher { key }
    }

    /// Encrypt a plaintext password into the `iv:tag:data` hex format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // aes-gcm appends the tag to the ciphertext; the wire format keeps them separate.
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Malformed("encryption failed"))?;
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(data)
        ))
    }

    /// Decrypt a stored `iv:tag:data` ciphertext back to the plaintext password.
    /// Wrong part count, bad hex, or a tag mismatch all fail; callers treat any
    /// failure as fatal for the request, never retried.
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = stored.split(':').collect();
        if parts.len() != 3 {
            return Err(CryptoError::Malformed("expected iv:tag:data"));
        }
        let iv = hex::decode(parts[0]).map_err(|_| CryptoError::Malformed("iv is not hex"))?;
        let tag = hex::decode(parts[1]).map_err(|_| CryptoError::Malformed("tag is not hex"))?;
        let data = hex::decode(parts[2]).map_err(|_| CryptoError::Malformed("data is not hex"))?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::Malformed("iv length"));
        }
        if tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed("tag length"));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&iv);
        let mut sealed = data;
        sealed.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CryptoError::AuthFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("plaintext is not utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = CredentialCipher::from_secret("test-secret");
        for pw in ["", "hunter2", "påsswörd with spaces", "a".repeat(200).as_str()] {
            let stored = cipher.encrypt(pw).unwrap();
            assert_eq!(stored.split(':').count(), 3);
            assert_eq!(cipher.decrypt(&stored).unwrap(), pw);
        }
    }

    #[test]
    fn wrong_part_count_is_malformed() {
        let cipher = CredentialCipher::from_secret("test-secret");
        for bad in ["", "abc", "ab:cd", "ab:cd:ef:01", "not hex at all"] {
            match cipher.decrypt(bad) {
                Err(CryptoError::Malformed(_)) => {}
                other => panic!("expected Malformed for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let cipher = CredentialCipher::from_secret("test-secret");
        let stored = cipher.encrypt("hunter2").unwrap();
        let mut parts: Vec<String> = stored.split(':').map(String::from).collect();
        // Flip one nibble of the data part.
        let flipped = if parts[2].starts_with('0') { "1" } else { "0" };
        parts[2].replace_range(0..1, flipped);
        assert_eq!(
            cipher.decrypt(&parts.join(":")),
            Err(CryptoError::AuthFailed)
        );
    }

    #[test]
    fn wrong_secret_fails_auth() {
        let stored = CredentialCipher::from_secret("secret-a")
            .encrypt("hunter2")
            .unwrap();
        assert_eq!(
            CredentialCipher::from_secret("secret-b").decrypt(&stored),
            Err(CryptoError::AuthFailed)
        );
    }
}
