//! Session credentials
//!
//! A plugin proves its identity with a token it generates itself and hands
//! to the control plane during the handshake. Every later call must echo that
//! token back. As a hardening layer the control plane can also sign the token
//! with its P-256 key; a plugin that was launched with the matching public
//! key then rejects calls whose signature does not verify.

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;

use crate::error::PluginError;

/// Random bytes in a session token
const TOKEN_BYTES: usize = 32;

/// Generate a fresh session token (base64url, 43 chars)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Compare two tokens without leaking where they differ
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Encode a verifying key the way it travels in [`crate::Arg`]
pub fn encode_public_key(key: &VerifyingKey) -> String {
    Base64UrlUnpadded::encode_string(key.to_encoded_point(false).as_bytes())
}

/// Sign a plugin token with the control plane's key
pub fn sign_token(key: &SigningKey, token: &str) -> String {
    let signature: Signature = key.sign(token.as_bytes());
    Base64UrlUnpadded::encode_string(&signature.to_bytes())
}

/// Verifies control plane signatures over a session token
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    key: VerifyingKey,
}

impl SessionVerifier {
    /// Decode the public key passed in [`crate::Arg::control_public_key`]
    pub fn from_public_key(encoded: &str) -> Result<Self, PluginError> {
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| PluginError::InvalidPublicKey(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|e| PluginError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Check a base64url signature over `token`
    pub fn verify(&self, token: &str, signature: Option<&str>) -> Result<(), PluginError> {
        let encoded = signature
            .ok_or_else(|| PluginError::InvalidSignature("missing control signature".into()))?;
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| PluginError::InvalidSignature(e.to_string()))?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| PluginError::InvalidSignature(e.to_string()))?;
        self.key
            .verify(token.as_bytes(), &signature)
            .map_err(|_| PluginError::InvalidSignature("control signature does not verify".into()))
    }
}
