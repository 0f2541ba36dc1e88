// Copyright 2022 The Matrix.org Foundation C.I.C.
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

mod master;
mod self_signing;
mod user_signing;

use std::collections::BTreeMap;

pub use master::*;
use ruma::{OwnedUserId, UserId};
pub use self_signing::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
pub use user_signing::*;
use vodozemac::Ed25519PublicKey;

use super::{ed25519_key_id, parse_ed25519_entry, KeyUsage, Signatures};
use crate::{error::SignatureError, olm::utility::canonical_signable};

/// A cross signing key, the public part of one of the three keys forming the
/// cross-signing hierarchy of a user.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CrossSigningKey {
    /// The ID of the user the key belongs to.
    pub user_id: OwnedUserId,

    /// What the key is used for.
    pub usage: Vec<KeyUsage>,

    /// The public key.
    ///
    /// The object must have exactly one property, mapping `ed25519:<pubkey>`
    /// to the unpadded base64 encoded public key.
    pub keys: BTreeMap<String, String>,

    /// Signatures of the key.
    #[serde(default, skip_serializing_if = "Signatures::is_empty")]
    pub signatures: Signatures,

    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl CrossSigningKey {
    /// Create a new, unsigned, cross signing key with the given usage for the
    /// given public key.
    pub fn new(user_id: OwnedUserId, usage: KeyUsage, public_key: Ed25519PublicKey) -> Self {
        let public_key = public_key.to_base64();
        let keys = BTreeMap::from([(ed25519_key_id(&public_key), public_key)]);

        Self { user_id, usage: vec![usage], keys, signatures: Signatures::new(), other: BTreeMap::new() }
    }

    /// Get the first Ed25519 key of this cross signing key together with its
    /// key ID.
    pub fn get_first_key_and_id(&self) -> Option<(&str, Ed25519PublicKey)> {
        self.keys.iter().find_map(|(key_id, key)| {
            parse_ed25519_entry(key_id, key).map(|k| (key_id.as_str(), k))
        })
    }

    /// Get the canonical JSON form of this key, the exact string the signing
    /// key of a parent key signs.
    pub fn canonical_signable(&self) -> Result<String, SignatureError> {
        canonical_signable(serde_json::to_value(self)?)
    }

    /// Get the user id of the key owner.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

macro_rules! impl_pubkey_wrapper {
    ($key_type:ident, $usage:expr) => {
        impl $key_type {
            /// Get the user id of the key owner.
            pub fn user_id(&self) -> &UserId {
                &self.0.user_id
            }

            /// Get the keys map containing the public keys.
            pub fn keys(&self) -> &BTreeMap<String, String> {
                &self.0.keys
            }

            /// Get the list of `KeyUsage` that is set for this key.
            pub fn usage(&self) -> &[KeyUsage] {
                &self.0.usage
            }

            /// Get the signatures of this key.
            pub fn signatures(&self) -> &Signatures {
                &self.0.signatures
            }

            /// Get the first available public key.
            ///
            /// There's usually only a single key so this will usually fetch
            /// the only key.
            pub fn get_first_key(&self) -> Option<Ed25519PublicKey> {
                self.0.get_first_key_and_id().map(|(_, k)| k)
            }

            /// Get the ID of the first available public key, i.e.
            /// `ed25519:<pubkey>`.
            pub fn key_id(&self) -> Option<&str> {
                self.0.get_first_key_and_id().map(|(id, _)| id)
            }

            /// Get the first available public key as an unpadded base64
            /// string.
            pub fn public_key_base64(&self) -> Option<String> {
                self.get_first_key().map(|k| k.to_base64())
            }

            /// Get the canonical JSON form of this key.
            pub fn canonical_signable(&self) -> Result<String, SignatureError> {
                self.0.canonical_signable()
            }
        }

        impl TryFrom<CrossSigningKey> for $key_type {
            type Error = serde_json::Error;

            fn try_from(key: CrossSigningKey) -> Result<Self, Self::Error> {
                if key.usage.len() == 1 && key.usage.contains(&$usage) {
                    Ok(Self(key))
                } else {
                    Err(serde::de::Error::custom(format!(
                        "Expected cross signing key usage {} was not found",
                        $usage
                    )))
                }
            }
        }

        impl From<$key_type> for CrossSigningKey {
            fn from(key: $key_type) -> Self {
                key.0
            }
        }

        impl AsRef<CrossSigningKey> for $key_type {
            fn as_ref(&self) -> &CrossSigningKey {
                &self.0
            }
        }

        impl AsMut<CrossSigningKey> for $key_type {
            fn as_mut(&mut self) -> &mut CrossSigningKey {
                &mut self.0
            }
        }

        impl PartialEq for $key_type {
            /// The `PartialEq` implementation compares the user ID, the usage
            /// and the key material, ignoring signatures.
            ///
            /// The signatures are provided by other devices and don't alter the
            /// identity of the key itself.
            fn eq(&self, other: &Self) -> bool {
                self.user_id() == other.user_id()
                    && self.keys() == other.keys()
                    && self.usage() == other.usage()
            }
        }

        impl Eq for $key_type {}
    };
}

impl_pubkey_wrapper!(MasterPubkey, KeyUsage::Master);
impl_pubkey_wrapper!(SelfSigningPubkey, KeyUsage::SelfSigning);
impl_pubkey_wrapper!(UserSigningPubkey, KeyUsage::UserSigning);

#[cfg(test)]
mod tests {
    use ruma::user_id;
    use serde_json::json;
    use similar_asserts::assert_eq;
    use vodozemac::{Ed25519SecretKey, Ed25519Signature};

    use super::{CrossSigningKey, MasterPubkey, SelfSigningPubkey, UserSigningPubkey};
    use crate::types::{ed25519_key_id, KeyUsage};

    fn master_key_json() -> serde_json::Value {
        json!({
            "user_id": "@example:localhost",
            "usage": [
                "master"
            ],
            "keys": {
                "ed25519:rJ2TAGkEOP6dX41Ksll6cl8K3J48l8s/59zaXyvl2p0": "rJ2TAGkEOP6dX41Ksll6cl8K3J48l8s/59zaXyvl2p0"
            },
            "signatures": {
                "@example:localhost": {
                    "ed25519:WSKKLTJZCL": "ZzJp1wtmRdykXAUEItEjNiFlBrxx8L6/Vaen9am8AuGwlxxJtOkuY4m+4MPLvDPOgavKHLsrRuNLAfCeakMlCQ"
                }
            },
            "other_data": "other"
        })
    }

    #[test]
    fn test_serialization() {
        let json = master_key_json();

        let key: CrossSigningKey =
            serde_json::from_value(json.clone()).expect("Can't deserialize cross signing key");

        assert_eq!(key.user_id, user_id!("@example:localhost"));

        let serialized = serde_json::to_value(key).expect("Can't reserialize cross signing key");

        assert_eq!(json, serialized);
    }

    #[test]
    fn test_canonical_form_skips_signatures() {
        let key: CrossSigningKey = serde_json::from_value(master_key_json()).unwrap();

        assert_eq!(
            key.canonical_signable().unwrap(),
            "{\"keys\":{\"ed25519:rJ2TAGkEOP6dX41Ksll6cl8K3J48l8s/59zaXyvl2p0\":\
             \"rJ2TAGkEOP6dX41Ksll6cl8K3J48l8s/59zaXyvl2p0\"},\"other_data\":\"other\",\
             \"usage\":[\"master\"],\"user_id\":\"@example:localhost\"}"
        );
    }

    #[test]
    fn test_wrappers_enforce_usage() {
        let json = master_key_json();

        let master: MasterPubkey = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(master.usage(), &[KeyUsage::Master]);
        assert_eq!(
            master.public_key_base64().as_deref(),
            Some("rJ2TAGkEOP6dX41Ksll6cl8K3J48l8s/59zaXyvl2p0")
        );

        serde_json::from_value::<SelfSigningPubkey>(json.clone())
            .expect_err("A master key can't be used as a self-signing key");
        serde_json::from_value::<UserSigningPubkey>(json)
            .expect_err("A master key can't be used as a user-signing key");

        let mut multi_usage: CrossSigningKey = serde_json::from_value(master_key_json()).unwrap();
        multi_usage.usage.push(KeyUsage::SelfSigning);
        MasterPubkey::try_from(multi_usage).expect_err("A key may only have a single usage");
    }

    #[test]
    fn test_partial_eq_ignores_signatures() {
        let user_id = user_id!("@example:localhost");
        let key: MasterPubkey = serde_json::from_value(master_key_json()).unwrap();

        let mut other: CrossSigningKey = serde_json::from_value(master_key_json()).unwrap();
        let signature = Ed25519Signature::from_base64(
            "mia28GKixFzOWKJ0h7Bdrdy2fjxiHCsst1qpe467FbW85H61UlshtKBoAXfTLlVfi0FX+/noJ8B3noQPnY+9Cg",
        )
        .expect("The signature can always be decoded");
        other.signatures.add_signature(user_id.to_owned(), ed25519_key_id("DEVICEID"), signature);
        let other: MasterPubkey = other.try_into().unwrap();

        assert_eq!(key, other);

        // Another user with the same key material is a different key.
        let mut other: CrossSigningKey = serde_json::from_value(master_key_json()).unwrap();
        other.user_id = user_id!("@example2:localhost").to_owned();
        let other: MasterPubkey = other.try_into().unwrap();

        assert_ne!(key, other);

        let different = MasterPubkey::try_from(CrossSigningKey::new(
            user_id.to_owned(),
            KeyUsage::Master,
            Ed25519SecretKey::new().public_key(),
        ))
        .unwrap();

        assert_ne!(key, different);
    }
}
