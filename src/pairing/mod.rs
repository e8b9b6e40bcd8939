//! Pairing crypto: key generation (X25519, Ed25519), QR challenge payloads,
//! device identity verification (HMAC) and signed device identity for
//! persistence.

mod device;

pub use device::Device;

use crate::error::{Error, PairingError};
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use x25519_dalek::{PublicKey, StaticSecret};

/// HMAC-SHA256 tag length in bytes.
const HMAC_LEN: usize = 32;

/// A short-lived pairing code shown to a human as a QR code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QrChallenge {
    pub payload: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QrChallenge {
    pub fn new(payload: String, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            payload,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Keys generated for pairing: Noise key, identity key, and adv secret.
#[derive(Clone, Debug)]
pub struct PairingKeys {
    /// X25519 Noise public key (32 bytes).
    pub noise_public: [u8; 32],
    /// X25519 Noise private key (32 bytes).
    pub noise_private: [u8; 32],
    /// Ed25519 identity public key (32 bytes).
    pub identity_public: [u8; 32],
    /// Ed25519 identity private key (32 bytes).
    pub identity_private: [u8; 32],
    /// Adv secret; the phone keys the device identity HMAC with it.
    pub adv_secret: [u8; 32],
}

/// Generate fresh pairing keys: Noise (X25519), identity (Ed25519), and adv secret.
pub fn generate_pairing_keys() -> PairingKeys {
    let mut noise_private = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut noise_private);
    let secret = StaticSecret::from(noise_private);
    let noise_public = PublicKey::from(&secret).to_bytes();

    let identity_signing = SigningKey::generate(&mut rand::thread_rng());
    let identity_public = identity_signing.verifying_key().to_bytes();
    let identity_private = identity_signing.to_bytes();

    let mut adv_secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut adv_secret);

    PairingKeys {
        noise_public,
        noise_private,
        identity_public,
        identity_private,
        adv_secret,
    }
}

/// Contents of a scanned QR payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrContents {
    pub reference: String,
    pub noise_public: [u8; 32],
    pub identity_public: [u8; 32],
    pub adv_secret: [u8; 32],
}

/// Build the QR payload for a server-issued pairing reference:
/// `ref,base64(noise pub),base64(identity pub),base64(adv secret)`.
pub fn qr_payload(reference: &str, keys: &PairingKeys) -> String {
    [
        reference.to_string(),
        BASE64.encode(keys.noise_public),
        BASE64.encode(keys.identity_public),
        BASE64.encode(keys.adv_secret),
    ]
    .join(",")
}

/// Parse a payload produced by [`qr_payload`] (what the phone does on scan).
pub fn parse_qr_payload(payload: &str) -> Result<QrContents> {
    let mut parts = payload.split(',');
    let (Some(reference), Some(noise), Some(identity), Some(adv), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PairingError::MalformedQr.into());
    };
    if reference.is_empty() {
        return Err(PairingError::MalformedQr.into());
    }
    let key = |part: &str| -> Result<[u8; 32]> {
        BASE64
            .decode(part)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| PairingError::MalformedQr.into())
    };
    Ok(QrContents {
        reference: reference.to_string(),
        noise_public: key(noise)?,
        identity_public: key(identity)?,
        adv_secret: key(adv)?,
    })
}

/// Append an HMAC-SHA256 tag over `payload` keyed by `key`.
pub fn tag_device_identity(payload: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| Error::Pairing(PairingError::Protocol("invalid HMAC key length".into())))?;
    mac.update(payload);
    let mut out = payload.to_vec();
    out.extend_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verify device identity payload: last HMAC_LEN bytes are HMAC-SHA256 of the rest with the given key.
/// Returns the payload without the tag, or error if verification fails.
pub fn verify_device_identity(payload_with_tag: &[u8], hmac_key: &[u8]) -> Result<Vec<u8>> {
    if payload_with_tag.len() < HMAC_LEN {
        return Err(Error::Pairing(PairingError::InvalidDeviceIdentityHmac));
    }
    let (payload, tag) = payload_with_tag.split_at(payload_with_tag.len() - HMAC_LEN);

    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|_| Error::Pairing(PairingError::Protocol("invalid HMAC key length".into())))?;
    mac.update(payload);
    mac.verify_slice(tag)
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceIdentityHmac))?;

    Ok(payload.to_vec())
}

/// Build a signed device identity blob for storage: verifying_key (32) || signature (64) || payload.
pub fn sign_device_identity(payload: &[u8], identity_private: &[u8; 32]) -> Vec<u8> {
    let signing_key = SigningKey::from_bytes(identity_private);
    let verifying_key = signing_key.verifying_key();
    let signature = signing_key.sign(payload);

    let mut out = Vec::with_capacity(32 + 64 + payload.len());
    out.extend_from_slice(verifying_key.as_bytes());
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Verify a stored signed device identity blob (verifying_key || signature || payload).
/// Returns the inner payload on success.
pub fn verify_signed_identity(signed_blob: &[u8]) -> Result<Vec<u8>> {
    if signed_blob.len() < 32 + 64 {
        return Err(Error::Pairing(PairingError::InvalidDeviceSignature));
    }
    let key_bytes: [u8; 32] = signed_blob[..32]
        .try_into()
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let sig_bytes: [u8; 64] = signed_blob[32..96]
        .try_into()
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    let payload = &signed_blob[96..];
    verifying_key
        .verify_strict(payload, &signature)
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_verify_roundtrip() {
        let key = b"test-hmac-key-32-bytes-long!!!!!!";
        let payload = b"device-identity-payload";
        let tagged = tag_device_identity(payload, key).unwrap();
        assert_eq!(verify_device_identity(&tagged, key).unwrap(), payload);
    }

    #[test]
    fn hmac_reject_tampered() {
        let key = b"test-hmac-key-32-bytes-long!!!!!!";
        let mut tagged = tag_device_identity(b"device-identity-payload", key).unwrap();
        tagged[0] ^= 1;
        assert!(verify_device_identity(&tagged, key).is_err());
        assert!(verify_device_identity(b"short", key).is_err());
    }

    #[test]
    fn qr_payload_carries_keys() {
        let keys = generate_pairing_keys();
        let payload = qr_payload("2@abc==", &keys);
        let parsed = parse_qr_payload(&payload).unwrap();
        assert_eq!(parsed.reference, "2@abc==");
        assert_eq!(parsed.noise_public, keys.noise_public);
        assert_eq!(parsed.identity_public, keys.identity_public);
        assert_eq!(parsed.adv_secret, keys.adv_secret);
    }

    #[test]
    fn malformed_qr_payloads_are_rejected() {
        for bad in ["", "ref", "ref,a,b,c", ",AAAA,AAAA,AAAA", "a,b,c,d,e"] {
            assert!(parse_qr_payload(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn challenge_expiry() {
        let qr = QrChallenge::new("p".into(), Duration::from_secs(60));
        assert!(!qr.is_expired());
        assert!(qr.is_expired_at(qr.expires_at));
        assert_eq!(qr.expires_at - qr.issued_at, chrono::Duration::seconds(60));
    }

    #[test]
    fn sign_verify_identity_roundtrip() {
        let keys = generate_pairing_keys();
        let payload = b"account-payload-to-store";
        let mut signed = sign_device_identity(payload, &keys.identity_private);
        assert_eq!(verify_signed_identity(&signed).unwrap(), payload);
        let last = signed.len() - 1;
        signed[last] ^= 0xff;
        assert!(verify_signed_identity(&signed).is_err());
    }
}
