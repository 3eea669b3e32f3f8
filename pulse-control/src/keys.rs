//! Control plane signing key

use std::path::Path;

use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use pulse_plugin::security::{encode_public_key, sign_token};
use tokio::fs;

use crate::error::ControlError;

/// ECDSA P-256 keypair the control plane signs plugin tokens with
pub struct ControlKeyPair {
    signing_key: SigningKey,
    public_key: String,
}

impl ControlKeyPair {
    /// Generate a keypair that lives as long as this process
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Load a PEM (PKCS#8) private key, generating and saving one if absent
    pub async fn load_or_generate(path: &Path) -> Result<Self, ControlError> {
        if fs::try_exists(path).await.unwrap_or(false) {
            let pem = fs::read_to_string(path)
                .await
                .map_err(|e| ControlError::Key(format!("failed to read control key: {e}")))?;
            let signing_key = SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| ControlError::Key(format!("invalid control key: {e}")))?;
            return Ok(Self::from_signing_key(signing_key));
        }

        let keys = Self::generate();
        let pem = keys
            .signing_key
            .to_pkcs8_pem(Default::default())
            .map_err(|e| ControlError::Key(format!("failed to encode control key: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ControlError::Key(format!("failed to create key dir: {e}")))?;
        }
        fs::write(path, pem.as_bytes())
            .await
            .map_err(|e| ControlError::Key(format!("failed to write control key: {e}")))?;
        tracing::info!(path = %path.display(), "Generated control key");
        Ok(keys)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = encode_public_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Public key as passed to plugins (base64url, uncompressed SEC1 point)
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a plugin's session token
    pub fn sign_token(&self, token: &str) -> String {
        sign_token(&self.signing_key, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_plugin::SessionVerifier;
    use tempfile::tempdir;

    #[test]
    fn signatures_verify_against_public_key() {
        let keys = ControlKeyPair::generate();
        let verifier = SessionVerifier::from_public_key(keys.public_key()).unwrap();

        let signature = keys.sign_token("plugin-token");
        assert!(verifier.verify("plugin-token", Some(&signature)).is_ok());
        assert!(verifier.verify("other-token", Some(&signature)).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(
            ControlKeyPair::generate().public_key(),
            ControlKeyPair::generate().public_key()
        );
    }

    #[tokio::test]
    async fn load_or_generate_persists_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("control.pem");

        let first = ControlKeyPair::load_or_generate(&path).await.unwrap();
        assert!(path.exists());

        let second = ControlKeyPair::load_or_generate(&path).await.unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[tokio::test]
    async fn corrupt_key_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control.pem");
        std::fs::write(&path, "not a key").unwrap();

        let err = ControlKeyPair::load_or_generate(&path).await.err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Security);
    }
}
