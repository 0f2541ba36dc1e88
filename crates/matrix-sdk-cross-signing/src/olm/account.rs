// Copyright 2020 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::BTreeMap, fmt};

use ruma::{DeviceId, OwnedDeviceId, OwnedUserId, UserId};
use serde_json::Value;
use vodozemac::{olm::IdentityKeys, Ed25519PublicKey, Ed25519Signature};

use super::utility::canonical_signable;
use crate::{
    error::SignatureError,
    identities::{DeviceData, TrustLevel},
    types::{ed25519_key_id, CrossSigningKey, DeviceKeys, MasterPubkey},
};

/// Our own Olm account, the long-term identity of the current device.
///
/// Only the Ed25519 identity key is used here, it acts as the device signer
/// for our own device keys and for the signature our device adds to our
/// master key.
pub struct Account {
    user_id: OwnedUserId,
    device_id: OwnedDeviceId,
    inner: Box<vodozemac::olm::Account>,
    identity_keys: IdentityKeys,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("ed25519_key", &self.identity_keys.ed25519.to_base64())
            .finish()
    }
}

impl Account {
    /// The algorithms our device advertises in its device keys.
    pub const ALGORITHMS: &'static [&'static str] =
        &["m.olm.v1.curve25519-aes-sha2", "m.megolm.v1.aes-sha2"];

    /// Create a fresh new account, this will generate the identity key-pair.
    pub fn new(user_id: &UserId, device_id: &DeviceId) -> Self {
        Self::new_helper(vodozemac::olm::Account::new(), user_id, device_id)
    }

    fn new_helper(account: vodozemac::olm::Account, user_id: &UserId, device_id: &DeviceId) -> Self {
        let identity_keys = account.identity_keys();

        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            inner: Box::new(account),
            identity_keys,
        }
    }

    /// Get the user id of the owner of the account.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Get the device ID that owns this account.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Get the public parts of the identity keys for the account.
    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity_keys
    }

    /// Get the public Ed25519 identity key of the account.
    pub fn ed25519_key(&self) -> Ed25519PublicKey {
        self.identity_keys.ed25519
    }

    /// The key ID of our device key, `ed25519:<device_id>`.
    fn key_id(&self) -> String {
        ed25519_key_id(self.device_id.as_str())
    }

    /// Sign the given string using the accounts signing key.
    ///
    /// Returns the signature as a base64 encoded string.
    pub fn sign(&self, string: &str) -> Ed25519Signature {
        self.inner.sign(string)
    }

    /// Sign the canonical form of the given JSON object.
    pub fn sign_json(&self, json: Value) -> Result<Ed25519Signature, SignatureError> {
        Ok(self.sign(&canonical_signable(json)?))
    }

    /// Get the device keys of our device without any signatures.
    pub fn unsigned_device_keys(&self) -> DeviceKeys {
        let keys = BTreeMap::from([
            (format!("curve25519:{}", self.device_id), self.identity_keys.curve25519.to_base64()),
            (self.key_id(), self.identity_keys.ed25519.to_base64()),
        ]);

        DeviceKeys::new(
            self.user_id.clone(),
            self.device_id.clone(),
            Self::ALGORITHMS.iter().map(|a| (*a).to_owned()).collect(),
            keys,
            Default::default(),
        )
    }

    /// Get the device keys of our device, signed by our device key.
    pub fn device_keys(&self) -> DeviceKeys {
        let mut device_keys = self.unsigned_device_keys();

        let json_device_keys =
            serde_json::to_value(&device_keys).expect("device key is always safe to serialize");
        let signature = self
            .sign_json(json_device_keys)
            .expect("Newly created device keys can always be signed");

        device_keys.signatures.add_signature(self.user_id.clone(), self.key_id(), signature);

        device_keys
    }

    /// Get our own device as a device object, our own device is always
    /// locally verified.
    pub fn own_device_data(&self) -> DeviceData {
        DeviceData::new_unchecked(
            self.device_keys(),
            TrustLevel { locally_verified: true, cross_signing_verified: false },
        )
    }

    /// Add a signature of our device key to the given cross signing key.
    pub fn sign_cross_signing_key(
        &self,
        cross_signing_key: &mut CrossSigningKey,
    ) -> Result<(), SignatureError> {
        let signature = self.sign(&cross_signing_key.canonical_signable()?);

        cross_signing_key.signatures.add_signature(self.user_id.clone(), self.key_id(), signature);

        Ok(())
    }

    /// Sign the given master key with our device key.
    ///
    /// Returns a copy of the master key that carries only the signature of
    /// our device.
    pub fn sign_master_key(&self, master_key: &MasterPubkey) -> Result<CrossSigningKey, SignatureError> {
        let mut cross_signing_key: CrossSigningKey = master_key.as_ref().clone();
        cross_signing_key.signatures.clear();
        self.sign_cross_signing_key(&mut cross_signing_key)?;

        Ok(cross_signing_key)
    }
}

#[cfg(test)]
mod tests {
    use ruma::{device_id, user_id};

    use super::Account;
    use crate::{identities::DeviceData, olm::{MasterSigning, VerifyJson}};

    #[test]
    fn test_device_keys_are_self_signed() {
        let account = Account::new(user_id!("@alice:localhost"), device_id!("ALICEDEVICE"));
        let device_keys = account.device_keys();

        assert_eq!(device_keys.ed25519_key(), Some(account.ed25519_key()));
        DeviceData::try_from(&device_keys).expect("Our own device keys should be valid");
    }

    #[test]
    fn test_master_key_signature() {
        let account = Account::new(user_id!("@alice:localhost"), device_id!("ALICEDEVICE"));
        let master = MasterSigning::new(account.user_id().to_owned());

        let signed = account.sign_master_key(master.public_key()).unwrap();

        assert_eq!(signed.signatures.signature_count(), 1);
        account
            .ed25519_key()
            .verify_json(account.user_id(), "ed25519:ALICEDEVICE", &signed)
            .expect("The master key should carry a valid signature of our device");
    }
}
