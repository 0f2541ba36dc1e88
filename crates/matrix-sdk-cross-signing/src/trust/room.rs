// Copyright 2021 The Matrix.org Foundation C.I.C.
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

use ruma::{OwnedUserId, UserId};
use tracing::trace;

use super::RoomEncryptionTrustLevel;
use crate::store::{DynCryptoStore, Result};

/// Compute the trust level of a room from the stored trust of its members.
///
/// * No trusted member, the room gets the [`Default`] level.
/// * A trusted member has a device that isn't verified through
///   cross-signing, the room gets the [`Warning`] level. If we don't have
///   cross-signing keys ourselves, any kind of verification of the device is
///   accepted.
/// * All members are trusted, the room gets the [`Trusted`] level.
///
/// # Arguments
///
/// * `own_user_id` - Our own user ID.
///
/// * `members` - The active members of the room.
///
/// * `exclude_own_user` - Ignore our own membership, usually done for direct
///   messages and rooms with at most two members.
///
/// [`Default`]: RoomEncryptionTrustLevel::Default
/// [`Warning`]: RoomEncryptionTrustLevel::Warning
/// [`Trusted`]: RoomEncryptionTrustLevel::Trusted
pub async fn compute_room_trust(
    store: &DynCryptoStore,
    own_user_id: &UserId,
    members: &[OwnedUserId],
    exclude_own_user: bool,
) -> Result<RoomEncryptionTrustLevel> {
    let to_check: Vec<&UserId> = members
        .iter()
        .map(AsRef::as_ref)
        .filter(|user_id| !exclude_own_user || *user_id != own_user_id)
        .collect();

    let mut trusted_users = Vec::new();

    for user_id in &to_check {
        if store.get_cross_signing_info(user_id).await?.is_some_and(|info| info.is_trusted()) {
            trusted_users.push(*user_id);
        }
    }

    if trusted_users.is_empty() {
        return Ok(RoomEncryptionTrustLevel::Default);
    }

    let has_own_keys = store.get_my_cross_signing_info().await?.is_some();

    for user_id in &trusted_users {
        for device in store.get_user_devices(user_id).await? {
            let verified = if has_own_keys {
                device.is_cross_signing_verified()
            } else {
                device.is_verified()
            };

            if !verified {
                trace!(
                    user_id = %device.user_id(),
                    device_id = %device.device_id(),
                    "Found a device of a trusted user that isn't verified"
                );
                return Ok(RoomEncryptionTrustLevel::Warning);
            }
        }
    }

    Ok(if trusted_users.len() == to_check.len() {
        RoomEncryptionTrustLevel::Trusted
    } else {
        RoomEncryptionTrustLevel::Default
    })
}
