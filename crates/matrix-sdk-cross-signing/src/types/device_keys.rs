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

use std::collections::BTreeMap;

use ruma::{DeviceId, OwnedDeviceId, OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vodozemac::Ed25519PublicKey;

use super::{ed25519_key_id, Signatures};
use crate::{error::SignatureError, olm::utility::canonical_signable};

/// The identity keys of a single device, as published by the device.
///
/// The keys are signed by the device's own Ed25519 key, once the owner has
/// set up cross-signing they additionally carry a signature of the owner's
/// self-signing key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceKeys {
    /// The ID of the user the device belongs to.
    pub user_id: OwnedUserId,

    /// The ID of the device these keys belong to.
    pub device_id: OwnedDeviceId,

    /// The encryption algorithms supported by this device.
    pub algorithms: Vec<String>,

    /// Public identity keys, `<algorithm>:<device_id>` to the unpadded base64
    /// encoded key.
    pub keys: BTreeMap<String, String>,

    /// Signatures for the device key object.
    #[serde(default)]
    pub signatures: Signatures,

    /// Additional data added to the device key information by intermediate
    /// servers, not covered by the signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,

    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl DeviceKeys {
    /// Creates a new `DeviceKeys` from the given user id, device ID,
    /// algorithms, keys and signatures.
    pub fn new(
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        algorithms: Vec<String>,
        keys: BTreeMap<String, String>,
        signatures: Signatures,
    ) -> Self {
        Self { user_id, device_id, algorithms, keys, signatures, unsigned: None, other: BTreeMap::new() }
    }

    /// Get the user id of the device owner.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Get the id of the device.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Get the Ed25519 identity key of the device, `ed25519:<device_id>`.
    pub fn ed25519_key(&self) -> Option<Ed25519PublicKey> {
        self.keys
            .get(&ed25519_key_id(self.device_id.as_str()))
            .and_then(|k| Ed25519PublicKey::from_base64(k).ok())
    }

    /// Get the Curve25519 key of the device, as an unpadded base64 string.
    pub fn curve25519_key(&self) -> Option<&str> {
        self.keys.get(&format!("curve25519:{}", self.device_id)).map(String::as_str)
    }

    /// Get the display name the device advertises in its unsigned section.
    pub fn display_name(&self) -> Option<&str> {
        self.unsigned.as_ref()?.get("device_display_name")?.as_str()
    }

    /// Get the canonical JSON form of the device keys, the string that the
    /// device and the self-signing key sign.
    pub fn canonical_signable(&self) -> Result<String, SignatureError> {
        canonical_signable(serde_json::to_value(self)?)
    }
}
