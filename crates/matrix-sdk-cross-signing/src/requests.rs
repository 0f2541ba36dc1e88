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

//! The requests the cross-signing service hands to a [`KeysUploader`] and the
//! responses it expects back.
//!
//! [`KeysUploader`]: crate::uploads::KeysUploader

use std::collections::BTreeMap;

use ruma::{OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::SignatureError,
    types::{CrossSigningKey, DeviceKeys},
};

/// Request that will publish a cross signing identity.
///
/// This uploads the public cross signing key triplet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSigningKeysRequest {
    /// The user's master key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<CrossSigningKey>,
    /// The user's self-signing key. Must be signed with the accompanied master,
    /// or by the user's most recently uploaded master key if no master key
    /// is included in the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signing_key: Option<CrossSigningKey>,
    /// The user's user-signing key. Must be signed with the accompanied master,
    /// or by the user's most recently uploaded master key if no master key
    /// is included in the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_signing_key: Option<CrossSigningKey>,
}

/// Request that publishes new signatures of device keys and cross-signing
/// keys.
///
/// The signed objects are grouped by the user that owns them, then keyed by
/// the device ID for device keys or by the unpadded base64 public key for
/// cross-signing keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureUploadRequest {
    signed_keys: BTreeMap<OwnedUserId, BTreeMap<String, Value>>,
}

impl SignatureUploadRequest {
    /// Create a new, empty, signature upload request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add signed device keys to the request.
    pub fn add_device_keys(&mut self, device_keys: &DeviceKeys) -> Result<(), SignatureError> {
        let value = serde_json::to_value(device_keys)?;

        self.signed_keys
            .entry(device_keys.user_id.clone())
            .or_default()
            .insert(device_keys.device_id.to_string(), value);

        Ok(())
    }

    /// Add a signed cross-signing key to the request.
    pub fn add_cross_signing_key(&mut self, key: &CrossSigningKey) -> Result<(), SignatureError> {
        let (_, public_key) =
            key.get_first_key_and_id().ok_or(SignatureError::MissingSigningKey)?;
        let value = serde_json::to_value(key)?;

        self.signed_keys
            .entry(key.user_id.clone())
            .or_default()
            .insert(public_key.to_base64(), value);

        Ok(())
    }

    /// Get the signed objects of the given user.
    pub fn get(&self, user_id: &UserId) -> Option<&BTreeMap<String, Value>> {
        self.signed_keys.get(user_id)
    }

    /// The total number of signed objects in this request.
    pub fn len(&self) -> usize {
        self.signed_keys.values().map(BTreeMap::len).sum()
    }

    /// Does this request contain no signed objects at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the signed objects, as `(owner, key, object)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &str, &Value)> {
        self.signed_keys.iter().flat_map(|(user_id, objects)| {
            objects.iter().map(move |(key, value)| (user_id.as_ref(), key.as_str(), value))
        })
    }
}

/// A single signature the server refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureUploadFailure {
    /// The Matrix error code.
    pub errcode: String,
    /// The human readable error message.
    #[serde(default)]
    pub error: String,
}

/// The response to a [`SignatureUploadRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureUploadResponse {
    /// The signatures that failed to be uploaded, grouped by the owner of the
    /// signed object and the key of the object in the request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<OwnedUserId, BTreeMap<String, SignatureUploadFailure>>,
}

impl SignatureUploadResponse {
    /// Did every signature get accepted.
    pub fn is_success(&self) -> bool {
        self.failures.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use ruma::{device_id, user_id};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::{SignatureUploadRequest, SignatureUploadResponse};
    use crate::olm::{Account, PrivateCrossSigningIdentity};

    #[tokio::test]
    async fn test_signature_upload_request_groups_by_owner() {
        let user_id = user_id!("@alice:localhost");
        let account = Account::new(user_id, device_id!("ALICEDEVICE"));
        let identity = PrivateCrossSigningIdentity::new(user_id.to_owned());

        let mut device_keys = account.unsigned_device_keys();
        identity.sign_device_keys(&mut device_keys).await.unwrap();

        let master_key = identity.master_public_key().await.unwrap();
        let signed_master = account.sign_master_key(&master_key).unwrap();

        let mut request = SignatureUploadRequest::new();
        assert!(request.is_empty());

        request.add_device_keys(&device_keys).unwrap();
        request.add_cross_signing_key(&signed_master).unwrap();

        assert_eq!(request.len(), 2);

        let objects = request.get(user_id).unwrap();
        assert!(objects.contains_key("ALICEDEVICE"));
        assert!(objects.contains_key(&master_key.public_key_base64().unwrap()));
        assert_eq!(request.iter().count(), 2);
    }

    #[test]
    fn test_signature_upload_response_failures() {
        let response: SignatureUploadResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.is_success());

        let response: SignatureUploadResponse = serde_json::from_value(json!({
            "failures": {
                "@alice:localhost": {
                    "ALICEDEVICE": {
                        "errcode": "M_INVALID_SIGNATURE",
                        "error": "Invalid signature"
                    }
                }
            }
        }))
        .unwrap();

        assert!(!response.is_success());
        assert_eq!(
            response.failures[user_id!("@alice:localhost")]["ALICEDEVICE"].errcode,
            "M_INVALID_SIGNATURE"
        );
    }
}
