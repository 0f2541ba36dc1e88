// Copyright 2023 The Matrix.org Foundation C.I.C.
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

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use ruma::{DeviceId, OwnedUserId, RoomId, UserId};

use super::{PrivateKeysInfo, Result};
use crate::{
    identities::{CrossSigningInfo, DeviceData, TrustLevel},
    trust::RoomEncryptionTrustLevel,
    types::KeyUsage,
};

/// Represents a store that the cross-signing engine uses to store its data,
/// the public key sets and devices of users, our private cross-signing seeds
/// and the trust flags derived from them.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait CryptoStore: Debug + Send + Sync {
    /// Get the cross-signing key set of our own user, if we know it.
    async fn get_my_cross_signing_info(&self) -> Result<Option<CrossSigningInfo>>;

    /// Get the cross-signing key set of the given user.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user for which we should get the key set.
    async fn get_cross_signing_info(&self, user_id: &UserId) -> Result<Option<CrossSigningInfo>>;

    /// Replace or forget the cross-signing key set of our own user.
    ///
    /// Replacing our master key with a different one resets the local trust
    /// flag of our master key.
    async fn set_my_cross_signing_info(&self, info: Option<CrossSigningInfo>) -> Result<()>;

    /// Save the cross-signing key set of a user.
    ///
    /// Keys are replaced wholesale.
    async fn save_cross_signing_info(&self, info: CrossSigningInfo) -> Result<()>;

    /// Get all the users we know a key set or devices of.
    async fn get_known_users(&self) -> Result<Vec<OwnedUserId>>;

    /// Set the trust flag of the key set of the given user.
    ///
    /// Returns the previous value of the flag.
    async fn set_user_keys_as_trusted(&self, user_id: &UserId, trusted: bool) -> Result<bool>;

    /// Apply the trust flags of many users at once.
    ///
    /// The whole map is applied atomically, users without a key set are
    /// skipped.
    async fn update_users_trust(&self, trust: BTreeMap<OwnedUserId, bool>) -> Result<()>;

    /// Set the flag telling if we manually verified our own master key.
    async fn mark_my_master_key_as_locally_trusted(&self, trusted: bool) -> Result<()>;

    /// Did we manually verify our own master key.
    async fn is_my_master_key_locally_trusted(&self) -> Result<bool>;

    /// Get the private cross-signing seeds we have stored.
    async fn get_cross_signing_private_keys(&self) -> Result<PrivateKeysInfo>;

    /// Replace all the stored private cross-signing seeds.
    async fn store_private_keys_info(&self, info: PrivateKeysInfo) -> Result<()>;

    /// Store the seed of a single private cross-signing key.
    async fn store_private_key(&self, usage: KeyUsage, seed: &str) -> Result<()>;

    /// Forget all the stored private cross-signing seeds.
    async fn clear_private_keys(&self) -> Result<()>;

    /// Get the device for the given user with the given device ID.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user that the device belongs to.
    ///
    /// * `device_id` - The unique id of the device.
    async fn get_user_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceData>>;

    /// Get all the devices of the given user.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user for which we should get all the devices.
    async fn get_user_devices(&self, user_id: &UserId) -> Result<Vec<DeviceData>>;

    /// Save the given devices, replacing devices with the same ID.
    async fn save_devices(&self, devices: Vec<DeviceData>) -> Result<()>;

    /// Replace the trust level of a single device.
    async fn set_device_trust(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        trust_level: TrustLevel,
    ) -> Result<()>;

    /// Remember the derived trust level of a room.
    async fn set_room_trust_level(
        &self,
        room_id: &RoomId,
        level: RoomEncryptionTrustLevel,
    ) -> Result<()>;

    /// Get the last derived trust level of a room.
    async fn get_room_trust_level(&self, room_id: &RoomId)
        -> Result<Option<RoomEncryptionTrustLevel>>;
}

/// A type-erased [`CryptoStore`].
pub type DynCryptoStore = dyn CryptoStore;

/// A type that can be type-erased into `Arc<dyn CryptoStore>`.
///
/// This trait is not meant to be implemented directly outside
/// `matrix-sdk-cross-signing`, but it is automatically implemented for
/// everything that implements `CryptoStore`.
pub trait IntoCryptoStore {
    #[doc(hidden)]
    fn into_crypto_store(self) -> Arc<DynCryptoStore>;
}

impl<T> IntoCryptoStore for T
where
    T: CryptoStore + 'static,
{
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        Arc::new(self)
    }
}

impl<T> IntoCryptoStore for Arc<T>
where
    T: CryptoStore + 'static,
{
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        self
    }
}

impl IntoCryptoStore for Arc<DynCryptoStore> {
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        self
    }
}
