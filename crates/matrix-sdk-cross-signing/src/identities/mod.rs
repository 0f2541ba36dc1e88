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

//! Collection of public identities used in Matrix.
//!
//! Matrix supports two main types of identities, a per-device identity and a
//! per-user identity.
//!
//! ## Device
//!
//! Every E2EE capable Matrix client will create a new Olm account and upload
//! the public keys of the Olm account to the server. This is represented as a
//! [`DeviceData`].
//!
//! ## User
//!
//! Cross-signing capable devices will upload 3 additional Ed25519 public keys
//! which represent the user identity owning all the devices. This is
//! represented as a [`CrossSigningInfo`], the key set of a user.

mod device;
mod user;

pub use device::DeviceData;
use serde::{Deserialize, Serialize};
pub use user::CrossSigningInfo;

/// The trust we put into a device.
///
/// The two flags are independent, a device can be verified locally, e.g. by
/// comparing fingerprints out of band, and it can be verified through a valid
/// cross-signing chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrustLevel {
    /// The device has been manually verified on this device.
    pub locally_verified: bool,
    /// The device is signed by the self-signing key of its owner and the
    /// owner's key set is trusted.
    pub cross_signing_verified: bool,
}

impl TrustLevel {
    /// Is the device verified, either locally or through cross-signing.
    pub fn is_verified(&self) -> bool {
        self.locally_verified || self.cross_signing_verified
    }

    /// Is the device verified through cross-signing.
    pub fn is_cross_signing_verified(&self) -> bool {
        self.cross_signing_verified
    }

    /// Is the device manually verified on this device.
    pub fn is_locally_verified(&self) -> bool {
        self.locally_verified
    }
}
