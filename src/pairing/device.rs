use super::{sign_device_identity, verify_device_identity, verify_signed_identity, PairingKeys};
use crate::error::Error;
use crate::session::ConnectedUser;
use crate::store::Credential;
use crate::types::Jid;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Identity and keys of one linked device; the decoded form of a stored
/// [`Credential`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Our JID after pairing.
    pub id: Jid,
    pub push_name: String,
    pub platform: String,
    #[serde(with = "b64")]
    pub noise_key_pub: [u8; 32],
    #[serde(with = "b64")]
    pub identity_key_pub: [u8; 32],
    #[serde(with = "b64")]
    pub identity_key_priv: [u8; 32],
    #[serde(with = "b64")]
    pub adv_secret_key: [u8; 32],
    /// Signed device identity: verifying key || signature || payload.
    #[serde(with = "b64")]
    pub account: Vec<u8>,
}

impl Device {
    /// Complete pairing from the phone's pair-success answer.
    ///
    /// `device_identity` is the identity payload followed by an HMAC-SHA256
    /// tag keyed by the adv secret that was shown in the QR code.
    pub fn from_pairing(
        keys: &PairingKeys,
        id: Jid,
        push_name: impl Into<String>,
        platform: impl Into<String>,
        device_identity: &[u8],
    ) -> Result<Self> {
        let payload = verify_device_identity(device_identity, &keys.adv_secret)?;
        Ok(Self {
            id,
            push_name: push_name.into(),
            platform: platform.into(),
            noise_key_pub: keys.noise_public,
            identity_key_pub: keys.identity_public,
            identity_key_priv: keys.identity_private,
            adv_secret_key: keys.adv_secret,
            account: sign_device_identity(&payload, &keys.identity_private),
        })
    }

    pub fn encode(&self) -> Result<Credential> {
        let blob = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        Ok(Credential::new(blob))
    }

    /// Parse and verify a stored credential. Any failure means the material
    /// is unusable and is reported as [`Error::CredentialCorrupt`].
    pub fn decode(credential: &Credential) -> Result<Self> {
        let device: Device = serde_json::from_slice(credential.as_bytes())
            .map_err(|e| Error::CredentialCorrupt(e.to_string()))?;
        verify_signed_identity(&device.account)
            .map_err(|e| Error::CredentialCorrupt(e.to_string()))?;
        if device.account[..32] != device.identity_key_pub {
            return Err(Error::CredentialCorrupt(
                "signed identity does not match identity key".into(),
            ));
        }
        Ok(device)
    }

    pub fn user(&self) -> ConnectedUser {
        ConnectedUser {
            id: self.id.to_non_ad(),
            name: self.push_name.clone(),
        }
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&BASE64.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(s).map_err(serde::de::Error::custom)?;
        T::try_from(bytes).map_err(|_| serde::de::Error::custom("unexpected key length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::{generate_pairing_keys, tag_device_identity};
    use crate::types::DEFAULT_USER_SERVER;

    fn paired_device() -> Device {
        let keys = generate_pairing_keys();
        let identity = tag_device_identity(b"adv-device-identity", &keys.adv_secret).unwrap();
        Device::from_pairing(
            &keys,
            Jid::new("628123", DEFAULT_USER_SERVER),
            "Toko Ikan",
            "android",
            &identity,
        )
        .unwrap()
    }

    #[test]
    fn credential_roundtrip_verifies() {
        let device = paired_device();
        let credential = device.encode().unwrap();
        let decoded = Device::decode(&credential).unwrap();
        assert_eq!(decoded, device);
        assert_eq!(decoded.user().name, "Toko Ikan");
        assert_eq!(decoded.user().id.to_string(), "628123@s.whatsapp.net");
    }

    #[test]
    fn pairing_rejects_wrong_hmac_key() {
        let keys = generate_pairing_keys();
        let identity = tag_device_identity(b"adv-device-identity", b"some other key").unwrap();
        let err = Device::from_pairing(
            &keys,
            Jid::new("628123", DEFAULT_USER_SERVER),
            "x",
            "android",
            &identity,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Pairing(crate::error::PairingError::InvalidDeviceIdentityHmac)
        ));
    }

    #[test]
    fn garbage_credential_is_corrupt() {
        let err = Device::decode(&Credential::new(&b"{not json"[..])).unwrap_err();
        assert!(matches!(err, Error::CredentialCorrupt(_)));
    }

    #[test]
    fn tampered_signature_is_corrupt() {
        let mut device = paired_device();
        let last = device.account.len() - 1;
        device.account[last] ^= 0x01;
        let credential = device.encode().unwrap();
        assert!(matches!(
            Device::decode(&credential),
            Err(Error::CredentialCorrupt(_))
        ));
    }
}
