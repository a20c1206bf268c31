//! Passphrase sealing of the wallet seed
//!
//! The seed is encrypted with AES-256-GCM under a key stretched from the passphrase
//! with scrypt. Only the sealed form is ever written to the database.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::KdfParams;
use crate::error::WalletError;
use crate::wallet::keys::Seed;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const SEED_AAD: &[u8] = b"hd-wallet/seed/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSeed {
    pub kdf: KdfParams,
    /// scrypt salt, hex
    pub salt: String,
    /// AES-GCM nonce, hex
    pub nonce: String,
    /// Encrypted seed with authentication tag, hex
    pub ciphertext: String,
}

impl SealedSeed {
    pub fn seal(seed: &Seed, passphrase: &[u8], kdf: KdfParams) -> Result<Self, WalletError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key = derive_key(passphrase, &salt, kdf)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| WalletError::Bitcoin(format!("Failed to create cipher: {}", e)))?;

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: seed.as_bytes(),
                    aad: SEED_AAD,
                },
            )
            .map_err(|e| WalletError::Bitcoin(format!("Seed encryption failed: {}", e)))?;

        Ok(Self {
            kdf,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Decrypt the seed; a wrong passphrase fails with `Authentication`
    pub fn unseal(&self, passphrase: &[u8]) -> Result<Seed, WalletError> {
        let salt = decode_field("salt", &self.salt)?;
        let nonce = decode_field("nonce", &self.nonce)?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;
        if nonce.len() != NONCE_LEN {
            return Err(WalletError::Authentication(
                "sealed seed has a malformed nonce".into(),
            ));
        }

        let key = derive_key(passphrase, &salt, self.kdf)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| WalletError::Bitcoin(format!("Failed to create cipher: {}", e)))?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: SEED_AAD,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| WalletError::Authentication("passphrase does not unlock the wallet".into()))?;

        Seed::new(&plaintext)
    }
}

fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    let params = scrypt::Params::new(kdf.log_n, kdf.r, kdf.p, 32)
        .map_err(|e| WalletError::InvalidArgument(format!("Invalid scrypt parameters: {}", e)))?;
    let mut key = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(passphrase, salt, &params, key.as_mut_slice())
        .map_err(|e| WalletError::InvalidArgument(format!("scrypt failed: {}", e)))?;
    Ok(key)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    hex::decode(value).map_err(|e| {
        WalletError::Storage(crate::error::StorageError::corrupt(
            format!("sealed_seed.{}", name),
            e.to_string(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST_KDF: KdfParams = KdfParams { log_n: 4, r: 8, p: 1 };

    #[test]
    fn test_unseal_with_correct_passphrase() {
        let seed = Seed::new(&[3u8; 32]).unwrap();
        let sealed = SealedSeed::seal(&seed, b"hunter2", FAST_KDF).unwrap();

        let opened = sealed.unseal(b"hunter2").unwrap();
        assert_eq!(opened.as_bytes(), seed.as_bytes());
    }

    #[test]
    fn test_wrong_passphrase_is_authentication_error() {
        let seed = Seed::new(&[3u8; 32]).unwrap();
        let sealed = SealedSeed::seal(&seed, b"hunter2", FAST_KDF).unwrap();

        assert!(matches!(
            sealed.unseal(b"hunter3"),
            Err(WalletError::Authentication(_))
        ));
    }

    #[test]
    fn test_sealed_form_hides_seed() {
        let seed = Seed::new(&[0x5a; 32]).unwrap();
        let sealed = SealedSeed::seal(&seed, b"pw", FAST_KDF).unwrap();
        assert!(!sealed.ciphertext.contains(&hex::encode(seed.as_bytes())));

        let again = SealedSeed::seal(&seed, b"pw", FAST_KDF).unwrap();
        assert_ne!(sealed.ciphertext, again.ciphertext);
    }
}
