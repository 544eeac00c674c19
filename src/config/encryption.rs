//! Secret encryption for the configuration file and synced profiles.
//!
//! Both key sources produce AES-256-GCM ciphertext encoded as base64:
//! passwords in the config file use a machine-bound PBKDF2 key
//! (`salt | nonce | ciphertext`), profile blobs use the SHA-256 of a
//! passphrase (`nonce | ciphertext`).

use std::num::NonZeroU32;

use base64::{Engine as _, engine::general_purpose};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::digest::{SHA256, digest};
use ring::pbkdf2::{PBKDF2_HMAC_SHA256, derive};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AppError, Result};

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 100_000;

fn random_bytes<const N: usize>(rng: &SystemRandom, what: &str) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes)
        .map_err(|_| AppError::EncryptionError(format!("Failed to generate {what}")))?;
    Ok(bytes)
}

fn aead_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
        .map_err(|_| AppError::EncryptionError("Failed to create key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(key_bytes: &[u8; KEY_LEN], nonce_bytes: [u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = aead_key(key_bytes)?;
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| AppError::EncryptionError("Failed to encrypt".to_string()))?;
    Ok(in_out)
}

fn open(key_bytes: &[u8; KEY_LEN], nonce_bytes: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = aead_key(key_bytes)?;
    let nonce: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| AppError::EncryptionError("Invalid nonce length".to_string()))?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| AppError::EncryptionError("Failed to decrypt".to_string()))?;
    Ok(plaintext.to_vec())
}

fn decode(encoded: &str, min_len: usize) -> Result<Vec<u8>> {
    let data = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::EncryptionError("Invalid base64 encoding".to_string()))?;
    if data.len() < min_len {
        return Err(AppError::EncryptionError(
            "Invalid encrypted data length".to_string(),
        ));
    }
    Ok(data)
}

/// Passwords stored in the config file, keyed to this machine and user.
pub struct PasswordEncryption {
    rng: SystemRandom,
}

impl PasswordEncryption {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| AppError::EncryptionError("Invalid iteration count".to_string()))?;
        derive(
            PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            Self::machine_identity().as_bytes(),
            &mut key,
        );
        Ok(key)
    }

    fn machine_identity() -> String {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "default_host".to_string());
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default_user".to_string());
        format!("ssm_{}_{}", hostname, username)
    }

    pub fn encrypt_password(&self, password: &str) -> Result<String> {
        let salt: [u8; SALT_LEN] = random_bytes(&self.rng, "salt")?;
        let nonce: [u8; NONCE_LEN] = random_bytes(&self.rng, "nonce")?;
        let key = self.derive_key(&salt)?;
        let sealed = seal(&key, nonce, password.as_bytes())?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(&out))
    }

    pub fn decrypt_password(&self, encrypted: &str) -> Result<String> {
        let data = decode(encrypted, SALT_LEN + NONCE_LEN + TAG_LEN)?;
        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let key = self.derive_key(salt)?;
        let plaintext = open(&key, nonce, ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| AppError::EncryptionError("Invalid UTF-8 in password".to_string()))
    }
}

impl Default for PasswordEncryption {
    fn default() -> Self {
        Self::new()
    }
}

/// Profile blobs sealed with a shared passphrase, so another machine can open them.
///
/// `ssm` itself never uploads profiles. This is the exported contract a sync
/// client builds on: `seal_profile` output is base64 of `nonce | ciphertext`,
/// and `open_profile` accepts exactly that with the same passphrase.
pub struct ProfileCipher {
    key: [u8; KEY_LEN],
    rng: SystemRandom,
}

impl ProfileCipher {
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(AppError::ValidationError(
                "Passphrase cannot be empty".to_string(),
            ));
        }
        let hash = digest(&SHA256, passphrase.as_bytes());
        let key: [u8; KEY_LEN] = hash
            .as_ref()
            .try_into()
            .map_err(|_| AppError::EncryptionError("Invalid key length".to_string()))?;
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    pub fn seal_profile(&self, plaintext: &[u8]) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = random_bytes(&self.rng, "nonce")?;
        let sealed = seal(&self.key, nonce, plaintext)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(&out))
    }

    pub fn open_profile(&self, sealed: &str) -> Result<Vec<u8>> {
        let data = decode(sealed, NONCE_LEN + TAG_LEN)?;
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        open(&self.key, nonce, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_password() {
        let encryption = PasswordEncryption::new();
        for password in ["test_password_123", "", "пароль_测试_🔐"] {
            let encrypted = encryption.encrypt_password(password).unwrap();
            assert_ne!(encrypted, password);
            assert_eq!(encryption.decrypt_password(&encrypted).unwrap(), password);
        }
    }

    #[test]
    fn test_same_password_encrypts_differently() {
        let encryption = PasswordEncryption::new();
        let a = encryption.encrypt_password("same").unwrap();
        let b = encryption.encrypt_password("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(encryption.decrypt_password(&a).unwrap(), "same");
        assert_eq!(encryption.decrypt_password(&b).unwrap(), "same");
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let result = PasswordEncryption::new().decrypt_password("not_valid_base64!@#");
        match result {
            Err(AppError::EncryptionError(msg)) => assert!(msg.contains("base64")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decrypt_too_short_data() {
        let short = general_purpose::STANDARD.encode([1, 2, 3, 4, 5]);
        match PasswordEncryption::new().decrypt_password(&short) {
            Err(AppError::EncryptionError(msg)) => assert!(msg.contains("length")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decrypt_corrupted_data() {
        let encryption = PasswordEncryption::new();
        let encrypted = encryption.encrypt_password("test_password").unwrap();

        let mut data = general_purpose::STANDARD.decode(&encrypted).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let corrupted = general_purpose::STANDARD.encode(&data);

        assert!(matches!(
            encryption.decrypt_password(&corrupted),
            Err(AppError::EncryptionError(_))
        ));
    }

    #[test]
    fn test_key_derivation_depends_on_salt() {
        let encryption = PasswordEncryption::new();
        let a1 = encryption.derive_key(&[1u8; SALT_LEN]).unwrap();
        let a2 = encryption.derive_key(&[1u8; SALT_LEN]).unwrap();
        let b = encryption.derive_key(&[2u8; SALT_LEN]).unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn test_profile_round_trip_with_passphrase() {
        let cipher = ProfileCipher::from_passphrase("correct horse").unwrap();
        let blob = b"[[groups]]\nname = \"web\"\n";

        let sealed = cipher.seal_profile(blob).unwrap();
        assert_ne!(sealed, cipher.seal_profile(blob).unwrap());

        let reopened = ProfileCipher::from_passphrase("correct horse").unwrap();
        assert_eq!(reopened.open_profile(&sealed).unwrap(), blob.to_vec());
    }

    #[test]
    fn test_profile_wrong_passphrase_fails() {
        let sealed = ProfileCipher::from_passphrase("right")
            .unwrap()
            .seal_profile(b"data")
            .unwrap();
        let result = ProfileCipher::from_passphrase("wrong")
            .unwrap()
            .open_profile(&sealed);
        assert!(matches!(result, Err(AppError::EncryptionError(_))));
    }

    #[test]
    fn test_sealed_profile_is_nonce_then_ciphertext() {
        let cipher = ProfileCipher::from_passphrase("layout").unwrap();
        let sealed = cipher.seal_profile(b"groups = []").unwrap();

        let raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + b"groups = []".len() + TAG_LEN);
        assert_eq!(cipher.open_profile(&sealed).unwrap(), b"groups = []");
    }

    #[test]
    fn test_empty_passphrase_is_rejected() {
        assert!(matches!(
            ProfileCipher::from_passphrase(""),
            Err(AppError::ValidationError(_))
        ));
    }
}
