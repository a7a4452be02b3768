//! `chord-crypto`: the RSA key pair every Chord node uses to encrypt file
//! content in transit and in backup storage.
//!
//! This is deliberately thin: key generation, PEM persistence, and
//! PKCS1-v1.5 encrypt/decrypt. No rotation, no revocation, no multi-key
//! support — those are out of scope for this crate (see `SPEC_FULL.md` §1,
//! §4.12).

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use thiserror::Error;

/// Key size used for every node's key pair. 2048 bits is the conventional
/// minimum for PKCS1-v1.5 in non-legacy deployments.
const KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to generate RSA key pair")]
    Generate(#[source] rsa::Error),

    #[error("failed to read key file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write key file '{path}'")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PEM key material")]
    Parse(#[source] rsa::pkcs1::Error),

    #[error("RSA encryption failed")]
    Encrypt(#[source] rsa::Error),

    #[error("RSA decryption failed")]
    Decrypt(#[source] rsa::Error),
}

/// A node's RSA key pair.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS).map_err(|err| {
            tracing::error!(error = %err, "failed to generate RSA key pair");
            CryptoError::Generate(err)
        })?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair { private, public })
    }

    /// Load an existing key pair from `<dir>/private.pem` and
    /// `<dir>/public.pem` if both exist, otherwise generate a fresh pair
    /// and persist it there. This is the one entry point `chord-engine`
    /// calls at node startup.
    pub fn load_or_generate(dir: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let dir = dir.as_ref();
        let private_path = dir.join("private.pem");
        let public_path = dir.join("public.pem");

        if private_path.exists() && public_path.exists() {
            return Self::load(&private_path, &public_path);
        }

        let pair = Self::generate()?;
        pair.save(&private_path, &public_path)?;
        Ok(pair)
    }

    fn load(private_path: &Path, public_path: &Path) -> Result<Self, CryptoError> {
        let private_pem = std::fs::read_to_string(private_path).map_err(|source| CryptoError::Read {
            path: private_path.display().to_string(),
            source,
        })?;
        let public_pem = std::fs::read_to_string(public_path).map_err(|source| CryptoError::Read {
            path: public_path.display().to_string(),
            source,
        })?;
        let private =
            RsaPrivateKey::from_pkcs1_pem(&private_pem).map_err(CryptoError::Parse)?;
        let public = RsaPublicKey::from_pkcs1_pem(&public_pem).map_err(CryptoError::Parse)?;
        Ok(KeyPair { private, public })
    }

    fn save(&self, private_path: &Path, public_path: &Path) -> Result<(), CryptoError> {
        let private_pem = self
            .private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|_| CryptoError::Write {
                path: private_path.display().to_string(),
                source: std::io::Error::other("PEM encode failed"),
            })?;
        let public_pem = self
            .public
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|_| CryptoError::Write {
                path: public_path.display().to_string(),
                source: std::io::Error::other("PEM encode failed"),
            })?;
        std::fs::write(private_path, private_pem.as_bytes()).map_err(|source| CryptoError::Write {
            path: private_path.display().to_string(),
            source,
        })?;
        std::fs::write(public_path, public_pem.as_bytes()).map_err(|source| CryptoError::Write {
            path: public_path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// DER-encoded public key, as served by the `get_public_key` RPC.
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        use rsa::pkcs1::EncodeRsaPublicKey as _;
        self.public
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|_| CryptoError::Write {
                path: "<public key DER>".into(),
                source: std::io::Error::other("DER encode failed"),
            })
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private.decrypt(Pkcs1v15Encrypt, ciphertext).map_err(|err| {
            tracing::warn!(error = %err, "RSA decryption failed");
            CryptoError::Decrypt(err)
        })
    }
}

/// A remote public key, as received over RPC from `get_public_key`.
pub struct RemotePublicKey(RsaPublicKey);

impl RemotePublicKey {
    pub fn from_der(bytes: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_pkcs1_der(bytes)
            .map(RemotePublicKey)
            .map_err(CryptoError::Parse)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext).map_err(|err| {
            tracing::warn!(error = %err, "RSA encryption failed");
            CryptoError::Encrypt(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_encrypt_decrypt_round_trips() {
        let pair = KeyPair::generate().unwrap();
        let der = pair.public_key_bytes().unwrap();
        let remote = RemotePublicKey::from_der(&der).unwrap();

        let plaintext = b"the quick brown fox";
        let ciphertext = remote.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = pair.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn load_or_generate_persists_across_calls() {
        let dir = std::env::temp_dir().join(format!(
            "chord-crypto-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let first = KeyPair::load_or_generate(&dir).unwrap();
        let second = KeyPair::load_or_generate(&dir).unwrap();

        assert_eq!(
            first.public_key_bytes().unwrap(),
            second.public_key_bytes().unwrap()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
