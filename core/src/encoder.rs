use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};

use crate::cfg::PublicKeyCfg;
use crate::error::RenewError;

/// Builds the encrypted payload the licensing service expects for one key request.
///
/// The payload is `serial|domain|user` in ASCII, RSA encrypted with PKCS#1 v1.5
/// padding (the deployed verifier does not accept OAEP) and base64 encoded.
#[derive(Clone, Debug)]
pub struct RequestEncoder {
    key: RsaPublicKey,
}

impl RequestEncoder {
    /// Use an already loaded public key.
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Build from the base64 modulus/exponent pair of an `<RSAKeyValue>` document.
    pub fn from_components(modulus_b64: &str, exponent_b64: &str) -> Result<Self, RenewError> {
        let n = decode_component("modulus", modulus_b64)?;
        let e = decode_component("exponent", exponent_b64)?;
        let key = RsaPublicKey::new(n, e)
            .map_err(|e| RenewError::Config(format!("service public key: {e}")))?;
        Ok(Self::new(key))
    }

    /// Build from the configured key.
    pub fn from_config(cfg: &PublicKeyCfg) -> Result<Self, RenewError> {
        Self::from_components(&cfg.modulus, &cfg.exponent)
    }

    /// Build from a SubjectPublicKeyInfo PEM document.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, RenewError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| RenewError::Config(format!("service public key pem: {e}")))?;
        Ok(Self::new(key))
    }

    /// Encrypt `serial|domain|user` and return it base64 encoded.
    pub fn encode(&self, serial: &str, domain: &str, user_name: &str) -> Result<String, RenewError> {
        let plain = format!("{serial}|{domain}|{user_name}");
        if !plain.is_ascii() {
            return Err(RenewError::Encoding(format!(
                "request fields must be ASCII (domain {domain:?})"
            )));
        }
        let cipher = self
            .key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain.as_bytes())
            .map_err(|e| RenewError::Encoding(e.to_string()))?;
        Ok(STANDARD.encode(cipher))
    }
}

fn decode_component(what: &str, b64: &str) -> Result<BigUint, RenewError> {
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| RenewError::Config(format!("service public key {what}: {e}")))?;
    Ok(BigUint::from_bytes_be(&bytes))
}
