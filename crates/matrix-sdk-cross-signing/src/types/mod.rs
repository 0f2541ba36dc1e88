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

//! Module containing the types modeling the keys that take part in
//! cross-signing.
//!
//! The types support lossless serialization cycles in a canonical JSON
//! supported way, meaning the white-space and field order won't be preserved
//! but the data will. This is what makes it possible to re-create the exact
//! bytes that were signed by a remote party.

mod cross_signing;
mod device_keys;

use std::{collections::BTreeMap, fmt};

pub use cross_signing::*;
pub use device_keys::*;
use ruma::{OwnedUserId, UserId};
use serde::{Deserialize, Serialize, Serializer};
use vodozemac::{Ed25519PublicKey, Ed25519Signature};

/// The prefix of every key ID that identifies an Ed25519 key.
pub const ED25519_PREFIX: &str = "ed25519";

/// Build the ID of an Ed25519 key, i.e. `ed25519:<key_name>`.
///
/// For device keys the key name is the device ID, for cross-signing keys it is
/// the unpadded base64 encoded public key itself.
pub fn ed25519_key_id(key_name: &str) -> String {
    format!("{ED25519_PREFIX}:{key_name}")
}

/// The usage of a cross-signing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    /// The master key, the root of the cross-signing hierarchy of a user.
    Master,
    /// The self-signing key, signs the devices of its owner.
    SelfSigning,
    /// The user-signing key, signs the master keys of other users.
    UserSigning,
}

impl KeyUsage {
    /// The short, human readable, abbreviation of the key usage.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            KeyUsage::Master => "MSK",
            KeyUsage::SelfSigning => "SSK",
            KeyUsage::UserSigning => "USK",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = match self {
            KeyUsage::Master => "master",
            KeyUsage::SelfSigning => "self_signing",
            KeyUsage::UserSigning => "user_signing",
        };

        f.write_str(usage)
    }
}

/// An enum over all the signature types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signature {
    /// A Ed25519 digital signature.
    Ed25519(Ed25519Signature),
    /// An unknown digital signature as a base64 encoded string.
    Other(String),
    /// An invalid signature that could not be decoded, left unmodified as a
    /// string.
    Invalid(String),
}

impl Signature {
    /// Get the Ed25519 signature, if this is one.
    pub fn ed25519(&self) -> Option<Ed25519Signature> {
        if let Self::Ed25519(signature) = &self {
            Some(*signature)
        } else {
            None
        }
    }

    /// Convert the signature to a base64 encoded string.
    pub fn to_base64(&self) -> String {
        match self {
            Signature::Ed25519(s) => s.to_base64(),
            Signature::Other(s) => s.to_owned(),
            Signature::Invalid(s) => s.to_owned(),
        }
    }
}

impl From<Ed25519Signature> for Signature {
    fn from(signature: Ed25519Signature) -> Self {
        Self::Ed25519(signature)
    }
}

/// Signatures for a signed object.
///
/// The collection maps the ID of the signing user to a map of key IDs, e.g.
/// `ed25519:DEVICEID`, to the signature the key produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signatures(BTreeMap<OwnedUserId, BTreeMap<String, Signature>>);

impl Signatures {
    /// Create a new, empty, signatures collection.
    pub fn new() -> Self {
        Signatures(Default::default())
    }

    /// Add the given signature from the given signer and the given key_id to
    /// the collection.
    pub fn add_signature(
        &mut self,
        signer: OwnedUserId,
        key_id: String,
        signature: Ed25519Signature,
    ) -> Option<Signature> {
        self.0.entry(signer).or_default().insert(key_id, signature.into())
    }

    /// Get the signature from the given signer with the given key id, no
    /// matter if it can be decoded or not.
    pub fn get_raw(&self, signer: &UserId, key_id: &str) -> Option<&Signature> {
        self.get(signer)?.get(key_id)
    }

    /// Try to find an Ed25519 signature from the given signer with the given
    /// key id.
    pub fn get_signature(&self, signer: &UserId, key_id: &str) -> Option<Ed25519Signature> {
        self.get_raw(signer, key_id)?.ed25519()
    }

    /// Get the map of signatures that belong to the given user.
    pub fn get(&self, signer: &UserId) -> Option<&BTreeMap<String, Signature>> {
        self.0.get(signer)
    }

    /// Remove the signatures of the given signer.
    pub fn remove_signer(&mut self, signer: &UserId) {
        self.0.remove(signer);
    }

    /// Remove all the signatures we currently hold.
    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// Do we hold any signatures or is our collection completely empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// How many signatures do we currently hold.
    pub fn signature_count(&self) -> usize {
        self.0.values().map(|u| u.len()).sum()
    }

    /// Merge all the signatures of the other collection into this one.
    pub fn extend(&mut self, other: Signatures) {
        for (user_id, signatures) in other {
            self.0.entry(user_id).or_default().extend(signatures);
        }
    }
}

impl IntoIterator for Signatures {
    type Item = (OwnedUserId, BTreeMap<String, Signature>);

    type IntoIter = std::collections::btree_map::IntoIter<OwnedUserId, BTreeMap<String, Signature>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'de> Deserialize<'de> for Signatures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map: BTreeMap<OwnedUserId, BTreeMap<String, String>> =
            Deserialize::deserialize(deserializer)?;

        let map = map
            .into_iter()
            .map(|(user, signatures)| {
                let signatures = signatures
                    .into_iter()
                    .map(|(key_id, s)| {
                        let signature = if key_id.starts_with(&format!("{ED25519_PREFIX}:")) {
                            Ed25519Signature::from_base64(&s)
                                .map(Signature::from)
                                .unwrap_or_else(|_| Signature::Invalid(s))
                        } else {
                            Signature::Other(s)
                        };

                        (key_id, signature)
                    })
                    .collect();

                (user, signatures)
            })
            .collect();

        Ok(Signatures(map))
    }
}

impl Serialize for Signatures {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let signatures: BTreeMap<&OwnedUserId, BTreeMap<&String, String>> = self
            .0
            .iter()
            .map(|(u, m)| (u, m.iter().map(|(d, s)| (d, s.to_base64())).collect()))
            .collect();

        Serialize::serialize(&signatures, serializer)
    }
}

/// Parse an unpadded base64 encoded Ed25519 public key out of a keys map
/// entry, if the entry is an Ed25519 one.
pub(crate) fn parse_ed25519_entry(key_id: &str, key: &str) -> Option<Ed25519PublicKey> {
    let (algorithm, _) = key_id.split_once(':')?;

    if algorithm == ED25519_PREFIX {
        Ed25519PublicKey::from_base64(key).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use ruma::user_id;
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::{ed25519_key_id, KeyUsage, Signature, Signatures};

    #[test]
    fn test_key_usage_serialization() {
        assert_eq!(serde_json::to_value(KeyUsage::SelfSigning).unwrap(), json!("self_signing"));
        assert_eq!(
            serde_json::from_value::<KeyUsage>(json!("user_signing")).unwrap(),
            KeyUsage::UserSigning
        );
        assert_eq!(KeyUsage::Master.to_string(), "master");
    }

    #[test]
    fn test_invalid_signatures_are_kept() {
        let json = json!({
            "@example:localhost": {
                "ed25519:DEVICEID": "not a signature",
                "curve25519:DEVICEID": "something else",
            }
        });

        let signatures: Signatures = serde_json::from_value(json.clone()).unwrap();
        let user_id = user_id!("@example:localhost");

        assert_eq!(
            signatures.get_raw(user_id, &ed25519_key_id("DEVICEID")),
            Some(&Signature::Invalid("not a signature".to_owned()))
        );
        assert!(signatures.get_signature(user_id, &ed25519_key_id("DEVICEID")).is_none());
        assert_eq!(signatures.signature_count(), 2);
        assert_eq!(serde_json::to_value(&signatures).unwrap(), json);
    }
}
