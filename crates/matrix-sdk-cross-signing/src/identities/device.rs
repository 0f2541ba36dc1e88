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

use std::sync::Arc;

use ruma::{DeviceId, MilliSecondsSinceUnixEpoch, UserId};
use serde::{Deserialize, Serialize};
use vodozemac::Ed25519PublicKey;

use super::TrustLevel;
use crate::{
    error::SignatureError,
    olm::VerifyJson,
    types::{ed25519_key_id, DeviceKeys},
};

/// A read-only version of a device, the public keys of a device together with
/// the trust we put into it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceData {
    pub(crate) device_keys: Arc<DeviceKeys>,
    #[serde(default)]
    trust_level: TrustLevel,
    /// First time this device was seen in milliseconds since epoch.
    #[serde(default = "default_timestamp")]
    first_time_seen_ts: MilliSecondsSinceUnixEpoch,
}

fn default_timestamp() -> MilliSecondsSinceUnixEpoch {
    MilliSecondsSinceUnixEpoch(ruma::UInt::default())
}

impl DeviceData {
    /// Create a new device from device keys without checking their
    /// self-signature.
    pub fn new_unchecked(device_keys: DeviceKeys, trust_level: TrustLevel) -> Self {
        Self {
            device_keys: device_keys.into(),
            trust_level,
            first_time_seen_ts: MilliSecondsSinceUnixEpoch::now(),
        }
    }

    /// The user id of the device owner.
    pub fn user_id(&self) -> &UserId {
        &self.device_keys.user_id
    }

    /// The unique ID of the device.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_keys.device_id
    }

    /// Get the human readable name of the device.
    pub fn display_name(&self) -> Option<&str> {
        self.device_keys.display_name()
    }

    /// Get the Ed25519 identity key of the device.
    pub fn ed25519_key(&self) -> Option<Ed25519PublicKey> {
        self.device_keys.ed25519_key()
    }

    /// Get the Curve25519 key of the device.
    pub fn curve25519_key(&self) -> Option<&str> {
        self.device_keys.curve25519_key()
    }

    /// Get the device keys of the device.
    pub fn as_device_keys(&self) -> &DeviceKeys {
        &self.device_keys
    }

    /// The trust we currently put into this device.
    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    /// Replace the trust level of this device, used by store implementations
    /// when they apply the outcome of a trust evaluation.
    pub fn set_trust_level(&mut self, trust_level: TrustLevel) {
        self.trust_level = trust_level;
    }

    /// Is the device locally marked as trusted.
    pub fn is_locally_trusted(&self) -> bool {
        self.trust_level.locally_verified
    }

    /// Is the device verified through cross-signing.
    pub fn is_cross_signing_verified(&self) -> bool {
        self.trust_level.cross_signing_verified
    }

    /// Is the device verified, either locally or through cross-signing.
    pub fn is_verified(&self) -> bool {
        self.trust_level.is_verified()
    }

    /// Timestamp representing the first time this device has been seen (in
    /// milliseconds).
    pub fn first_time_seen_ts(&self) -> MilliSecondsSinceUnixEpoch {
        self.first_time_seen_ts
    }

    /// Check that the device keys carry a valid signature of the device's own
    /// Ed25519 key.
    pub(crate) fn check_self_signature(device_keys: &DeviceKeys) -> Result<(), SignatureError> {
        let signing_key = device_keys.ed25519_key().ok_or(SignatureError::MissingSigningKey)?;

        signing_key.verify_json(
            &device_keys.user_id,
            &ed25519_key_id(device_keys.device_id.as_str()),
            device_keys,
        )
    }
}

impl TryFrom<&DeviceKeys> for DeviceData {
    type Error = SignatureError;

    fn try_from(device_keys: &DeviceKeys) -> Result<Self, Self::Error> {
        Self::check_self_signature(device_keys)?;
        Ok(Self::new_unchecked(device_keys.clone(), TrustLevel::default()))
    }
}

impl PartialEq for DeviceData {
    fn eq(&self, other: &Self) -> bool {
        self.user_id() == other.user_id() && self.device_id() == other.device_id()
    }
}
