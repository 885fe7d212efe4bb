//! The keypair capability consumed by the store and router.
//!
//! The node core never encrypts or decrypts payloads; it only holds, clones,
//! imports and exports keys, and derives public halves for key matching. The
//! content key object doubles as a *template*: `clone_box()` produces a fresh
//! instance that `from_b64()` imports into.

use base64::Engine;
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: {0} bytes")]
    InvalidLength(usize),
}

/// An asymmetric keypair held by the node.
///
/// Object safe so that store rows and router callbacks can traffic in
/// `Box<dyn KeyPair>` without caring which curve backs it.
pub trait KeyPair: Send + Sync {
    /// Replace the key material with a freshly generated secret.
    fn generate(&mut self);

    /// Import base64-encoded private key material.
    fn from_b64(&mut self, data: &str) -> Result<(), KeyError>;

    /// Export the private key material as base64.
    fn to_b64(&self) -> String;

    /// Export the derived public key as base64.
    fn public_b64(&self) -> String;

    fn clone_box(&self) -> Box<dyn KeyPair>;
}

impl Clone for Box<dyn KeyPair> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// X25519 keypair. The default content/routing key implementation.
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: StaticSecret,
}

impl EcdhKeyPair {
    pub fn new() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }
}

impl Default for EcdhKeyPair {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPair for EcdhKeyPair {
    fn generate(&mut self) {
        self.secret = StaticSecret::random_from_rng(OsRng);
    }

    fn from_b64(&mut self, data: &str) -> Result<(), KeyError> {
        let raw = base64::engine::general_purpose::STANDARD.decode(data)?;
        let bytes: [u8; KEY_SIZE] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(raw.len()))?;
        self.secret = StaticSecret::from(bytes);
        Ok(())
    }

    fn to_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.secret.to_bytes())
    }

    fn public_b64(&self) -> String {
        let public = PublicKey::from(&self.secret);
        base64::engine::general_purpose::STANDARD.encode(public.as_bytes())
    }

    fn clone_box(&self) -> Box<dyn KeyPair> {
        Box::new(self.clone())
    }
}
