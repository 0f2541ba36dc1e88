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

//! Evaluation and propagation of cross-signing trust.
//!
//! The trust of a user is derived from the signature chain that starts at our
//! own master key:
//!
//! ```text
//!      ALICE                               BOB
//!
//!  MSK ──┬──▶ SSK ──▶ Alice's devices   ┌──▶ MSK ──▶ SSK ──▶ Bob's devices
//!        │                              │
//!        └──▶ USK ──────────────────────┘
//! ```
//!
//! The outcome of an evaluation is a value, a [`UserTrustResult`] or a
//! [`DeviceTrustResult`], operational failures like a broken store are
//! reported separately.

use std::fmt;

use ruma::{OwnedDeviceId, OwnedUserId};
use serde::{Deserialize, Serialize};

mod evaluator;
mod propagation;
mod room;

pub use evaluator::{
    check_device_trust, check_other_msk_trusted, check_self_trust_with, legacy_fallback_trust,
    TrustEvaluator,
};
pub use propagation::{
    DeviceListUpdate, RoomInfo, RoomMembersProvider, TrustEvent, TrustPropagator,
};
pub use room::compute_room_trust;

use crate::{identities::TrustLevel, types::KeyUsage};

/// The trust level of a room, derived from the trust of its members and their
/// devices.
///
/// The level is a view for the room list and never used to decide if we
/// trust a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomEncryptionTrustLevel {
    /// No member of the room is trusted.
    #[default]
    Default,
    /// At least one trusted member has a device we don't trust.
    Warning,
    /// All the members and all their devices are trusted.
    Trusted,
}

/// The outcome of the evaluation of a user's cross-signing keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserTrustResult {
    /// The user is trusted.
    Success,
    /// The user, either us or the other user, hasn't set up cross-signing.
    CrossSigningNotConfigured(OwnedUserId),
    /// The keys of the user aren't trusted, for other users this means that
    /// our own keys aren't trusted.
    KeysNotTrusted(OwnedUserId),
    /// We don't know the cross-signing keys of the other user.
    UnknownCrossSignatureInfo(OwnedUserId),
    /// The key with the given usage doesn't carry the signature that links it
    /// into the chain.
    KeyNotSigned(KeyUsage),
    /// The key with the given usage carries a signature that doesn't verify.
    InvalidSignature {
        /// The usage of the key carrying the signature.
        usage: KeyUsage,
        /// The unpadded base64 encoded signature.
        signature: String,
    },
    /// The private keys with the given usages don't match our public keys.
    PrivateKeyMismatch(Vec<KeyUsage>),
    /// The evaluation couldn't be done.
    Failure(String),
}

impl UserTrustResult {
    /// Is the user trusted.
    pub fn is_verified(&self) -> bool {
        matches!(self, UserTrustResult::Success)
    }

    /// The usages of the private keys that didn't match, if this is a
    /// [`UserTrustResult::PrivateKeyMismatch`].
    pub fn mismatched_keys(&self) -> Option<&[KeyUsage]> {
        as_variant::as_variant!(self, UserTrustResult::PrivateKeyMismatch).map(Vec::as_slice)
    }
}

impl fmt::Display for UserTrustResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserTrustResult::Success => write!(f, "Trusted"),
            UserTrustResult::CrossSigningNotConfigured(user_id) => {
                write!(f, "Cross-signing not configured for {user_id}")
            }
            UserTrustResult::KeysNotTrusted(user_id) => {
                write!(f, "Keys not trusted for {user_id}")
            }
            UserTrustResult::UnknownCrossSignatureInfo(user_id) => {
                write!(f, "Unknown MSK for {user_id}")
            }
            UserTrustResult::KeyNotSigned(KeyUsage::Master) => write!(f, "MSK not signed by my USK"),
            UserTrustResult::KeyNotSigned(usage) => {
                write!(f, "{} not signed by MSK", usage.abbreviation())
            }
            UserTrustResult::InvalidSignature { usage, .. } => {
                write!(f, "Invalid signature on {}", usage.abbreviation())
            }
            UserTrustResult::PrivateKeyMismatch(usages) => {
                let usages: Vec<_> = usages.iter().map(KeyUsage::abbreviation).collect();
                write!(f, "Private keys don't match: {}", usages.join(", "))
            }
            UserTrustResult::Failure(message) => write!(f, "Failure: {message}"),
        }
    }
}

/// The outcome of the evaluation of a single device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceTrustResult {
    /// The device is trusted with the given trust level.
    Success(TrustLevel),
    /// The device isn't known.
    UnknownDevice(OwnedDeviceId),
    /// The user, either us or the owner of the device, hasn't set up
    /// cross-signing.
    CrossSigningNotConfigured(OwnedUserId),
    /// The keys of the given user aren't trusted.
    KeysNotTrusted(OwnedUserId),
    /// The device isn't signed by the self-signing key of its owner.
    MissingDeviceSignature {
        /// The ID of the device.
        device_id: OwnedDeviceId,
        /// The unpadded base64 encoded self-signing key of the owner.
        key: String,
    },
    /// The device carries a self-signing key signature that doesn't verify.
    InvalidDeviceSignature {
        /// The ID of the device.
        device_id: OwnedDeviceId,
        /// The unpadded base64 encoded signature.
        signature: String,
        /// Why the signature check failed.
        reason: String,
    },
}

impl DeviceTrustResult {
    /// Get the trust level, if the evaluation succeeded.
    pub fn trust_level(&self) -> Option<TrustLevel> {
        as_variant::as_variant!(self, Self::Success).copied()
    }

    /// Is the device trusted, either through cross-signing or locally.
    pub fn is_verified(&self) -> bool {
        self.trust_level().is_some_and(|t| t.is_verified())
    }

    /// Is the device trusted through cross-signing.
    pub fn is_cross_signing_verified(&self) -> bool {
        self.trust_level().is_some_and(|t| t.is_cross_signing_verified())
    }

    /// Is the device locally trusted.
    pub fn is_locally_verified(&self) -> bool {
        self.trust_level().is_some_and(|t| t.is_locally_verified())
    }
}

impl fmt::Display for DeviceTrustResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTrustResult::Success(level) => write!(
                f,
                "Trusted (cross-signed: {}, local: {})",
                level.cross_signing_verified, level.locally_verified
            ),
            DeviceTrustResult::UnknownDevice(device_id) => write!(f, "Unknown device {device_id}"),
            DeviceTrustResult::CrossSigningNotConfigured(user_id) => {
                write!(f, "Cross-signing not configured for {user_id}")
            }
            DeviceTrustResult::KeysNotTrusted(user_id) => {
                write!(f, "Keys not trusted for {user_id}")
            }
            DeviceTrustResult::MissingDeviceSignature { device_id, .. } => {
                write!(f, "Device {device_id} not signed by its SSK")
            }
            DeviceTrustResult::InvalidDeviceSignature { device_id, reason, .. } => {
                write!(f, "Invalid signature on device {device_id}: {reason}")
            }
        }
    }
}
