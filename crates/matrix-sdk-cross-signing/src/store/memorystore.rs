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

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use ruma::{DeviceId, OwnedDeviceId, OwnedRoomId, OwnedUserId, RoomId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CryptoStore, CryptoStoreError, PrivateKeysInfo, Result};
use crate::{
    identities::{CrossSigningInfo, DeviceData, TrustLevel},
    trust::RoomEncryptionTrustLevel,
    types::KeyUsage,
};

/// An in-memory only store that will forget all the data once it's dropped.
#[derive(Debug)]
pub struct MemoryStore {
    own_user_id: OwnedUserId,
    cross_signing_info: RwLock<BTreeMap<OwnedUserId, CrossSigningInfo>>,
    master_key_locally_trusted: RwLock<bool>,
    private_keys: RwLock<PrivateKeysInfo>,
    devices: RwLock<BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, DeviceData>>>,
    room_trust_levels: RwLock<BTreeMap<OwnedRoomId, RoomEncryptionTrustLevel>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore` for the given local user.
    pub fn new(own_user_id: &UserId) -> Self {
        Self {
            own_user_id: own_user_id.to_owned(),
            cross_signing_info: Default::default(),
            master_key_locally_trusted: Default::default(),
            private_keys: Default::default(),
            devices: Default::default(),
            room_trust_levels: Default::default(),
        }
    }

    /// Store a key set, resetting the local master key flag if our own master
    /// key changes.
    async fn replace_info(&self, info: CrossSigningInfo) {
        let mut infos = self.cross_signing_info.write().await;

        if info.user_id() == &*self.own_user_id {
            let master_key_changed =
                infos.get(info.user_id()).is_some_and(|old| !old.has_same_master_key(&info));

            if master_key_changed {
                debug!("Our master key changed, resetting its local trust");
                *self.master_key_locally_trusted.write().await = false;
            }
        }

        infos.insert(info.user_id().to_owned(), info);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl CryptoStore for MemoryStore {
    async fn get_my_cross_signing_info(&self) -> Result<Option<CrossSigningInfo>> {
        Ok(self.cross_signing_info.read().await.get(&self.own_user_id).cloned())
    }

    async fn get_cross_signing_info(&self, user_id: &UserId) -> Result<Option<CrossSigningInfo>> {
        Ok(self.cross_signing_info.read().await.get(user_id).cloned())
    }

    async fn set_my_cross_signing_info(&self, info: Option<CrossSigningInfo>) -> Result<()> {
        match info {
            Some(info) => {
                if info.user_id() != &*self.own_user_id {
                    return Err(CryptoStoreError::UnknownUser(info.user_id().to_owned()));
                }

                self.replace_info(info).await;
            }
            None => {
                self.cross_signing_info.write().await.remove(&self.own_user_id);
                *self.master_key_locally_trusted.write().await = false;
            }
        }

        Ok(())
    }

    async fn save_cross_signing_info(&self, info: CrossSigningInfo) -> Result<()> {
        self.replace_info(info).await;
        Ok(())
    }

    async fn get_known_users(&self) -> Result<Vec<OwnedUserId>> {
        let mut users: BTreeSet<OwnedUserId> =
            self.cross_signing_info.read().await.keys().cloned().collect();
        users.extend(self.devices.read().await.keys().cloned());

        Ok(users.into_iter().collect())
    }

    async fn set_user_keys_as_trusted(&self, user_id: &UserId, trusted: bool) -> Result<bool> {
        let mut infos = self.cross_signing_info.write().await;
        let info =
            infos.get_mut(user_id).ok_or_else(|| CryptoStoreError::UnknownUser(user_id.to_owned()))?;

        let previous = info.is_trusted();
        info.set_trusted(trusted);

        Ok(previous)
    }

    async fn update_users_trust(&self, trust: BTreeMap<OwnedUserId, bool>) -> Result<()> {
        let mut infos = self.cross_signing_info.write().await;

        for (user_id, trusted) in trust {
            if let Some(info) = infos.get_mut(&user_id) {
                info.set_trusted(trusted);
            }
        }

        Ok(())
    }

    async fn mark_my_master_key_as_locally_trusted(&self, trusted: bool) -> Result<()> {
        *self.master_key_locally_trusted.write().await = trusted;
        Ok(())
    }

    async fn is_my_master_key_locally_trusted(&self) -> Result<bool> {
        Ok(*self.master_key_locally_trusted.read().await)
    }

    async fn get_cross_signing_private_keys(&self) -> Result<PrivateKeysInfo> {
        Ok(self.private_keys.read().await.clone())
    }

    async fn store_private_keys_info(&self, info: PrivateKeysInfo) -> Result<()> {
        *self.private_keys.write().await = info;
        Ok(())
    }

    async fn store_private_key(&self, usage: KeyUsage, seed: &str) -> Result<()> {
        self.private_keys.write().await.set(usage, seed.to_owned());
        Ok(())
    }

    async fn clear_private_keys(&self) -> Result<()> {
        *self.private_keys.write().await = PrivateKeysInfo::default();
        Ok(())
    }

    async fn get_user_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceData>> {
        Ok(self.devices.read().await.get(user_id).and_then(|d| d.get(device_id)).cloned())
    }

    async fn get_user_devices(&self, user_id: &UserId) -> Result<Vec<DeviceData>> {
        Ok(self
            .devices
            .read()
            .await
            .get(user_id)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_devices(&self, devices: Vec<DeviceData>) -> Result<()> {
        let mut stored = self.devices.write().await;

        for device in devices {
            stored
                .entry(device.user_id().to_owned())
                .or_default()
                .insert(device.device_id().to_owned(), device);
        }

        Ok(())
    }

    async fn set_device_trust(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        trust_level: TrustLevel,
    ) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(user_id).and_then(|d| d.get_mut(device_id)).ok_or_else(|| {
            CryptoStoreError::UnknownDevice(user_id.to_owned(), device_id.to_owned())
        })?;

        device.set_trust_level(trust_level);

        Ok(())
    }

    async fn set_room_trust_level(
        &self,
        room_id: &RoomId,
        level: RoomEncryptionTrustLevel,
    ) -> Result<()> {
        self.room_trust_levels.write().await.insert(room_id.to_owned(), level);
        Ok(())
    }

    async fn get_room_trust_level(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomEncryptionTrustLevel>> {
        Ok(self.room_trust_levels.read().await.get(room_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches2::assert_matches;
    use ruma::{device_id, user_id};

    use super::MemoryStore;
    use crate::{
        identities::TrustLevel,
        olm::{Account, PrivateCrossSigningIdentity},
        store::{CryptoStore, CryptoStoreError},
        types::KeyUsage,
    };

    #[tokio::test]
    async fn test_cross_signing_info_round_trip() {
        let alice = user_id!("@alice:localhost");
        let bob = user_id!("@bob:localhost");
        let store = MemoryStore::new(alice);

        let own = PrivateCrossSigningIdentity::new(alice.to_owned()).to_public_identity().await.unwrap();
        let other = PrivateCrossSigningIdentity::new(bob.to_owned()).to_public_identity().await.unwrap();

        store.set_my_cross_signing_info(Some(own.clone())).await.unwrap();
        store.save_cross_signing_info(other.clone()).await.unwrap();

        assert_eq!(store.get_my_cross_signing_info().await.unwrap(), Some(own));
        assert_eq!(store.get_cross_signing_info(bob).await.unwrap(), Some(other));
        assert_eq!(store.get_known_users().await.unwrap(), vec![alice.to_owned(), bob.to_owned()]);

        assert_matches!(
            store.set_my_cross_signing_info(Some(store.get_cross_signing_info(bob).await.unwrap().unwrap())).await,
            Err(CryptoStoreError::UnknownUser(_))
        );
    }

    #[tokio::test]
    async fn test_trust_flags() {
        let alice = user_id!("@alice:localhost");
        let bob = user_id!("@bob:localhost");
        let store = MemoryStore::new(alice);

        let other = PrivateCrossSigningIdentity::new(bob.to_owned()).to_public_identity().await.unwrap();
        store.save_cross_signing_info(other).await.unwrap();

        assert!(!store.set_user_keys_as_trusted(bob, true).await.unwrap());
        assert!(store.set_user_keys_as_trusted(bob, true).await.unwrap());

        store
            .update_users_trust(BTreeMap::from([
                (bob.to_owned(), false),
                (user_id!("@unknown:localhost").to_owned(), true),
            ]))
            .await
            .unwrap();

        assert!(!store.get_cross_signing_info(bob).await.unwrap().unwrap().is_trusted());
        assert!(store.get_cross_signing_info(user_id!("@unknown:localhost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_master_key_change_resets_local_trust() {
        let alice = user_id!("@alice:localhost");
        let store = MemoryStore::new(alice);

        let first = PrivateCrossSigningIdentity::new(alice.to_owned()).to_public_identity().await.unwrap();
        store.set_my_cross_signing_info(Some(first.clone())).await.unwrap();
        store.mark_my_master_key_as_locally_trusted(true).await.unwrap();

        // Storing the same keys again keeps the flag.
        store.set_my_cross_signing_info(Some(first)).await.unwrap();
        assert!(store.is_my_master_key_locally_trusted().await.unwrap());

        let second = PrivateCrossSigningIdentity::new(alice.to_owned()).to_public_identity().await.unwrap();
        store.set_my_cross_signing_info(Some(second)).await.unwrap();
        assert!(!store.is_my_master_key_locally_trusted().await.unwrap());
    }

    #[tokio::test]
    async fn test_private_keys() {
        let alice = user_id!("@alice:localhost");
        let store = MemoryStore::new(alice);

        store.store_private_key(KeyUsage::Master, "seed").await.unwrap();
        assert_eq!(
            store.get_cross_signing_private_keys().await.unwrap().get(KeyUsage::Master),
            Some("seed")
        );

        store.clear_private_keys().await.unwrap();
        assert!(store.get_cross_signing_private_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_devices() {
        let alice = user_id!("@alice:localhost");
        let store = MemoryStore::new(alice);
        let account = Account::new(alice, device_id!("ALICEDEVICE"));

        store.save_devices(vec![account.own_device_data()]).await.unwrap();

        let trust = TrustLevel { locally_verified: true, cross_signing_verified: true };
        store.set_device_trust(alice, device_id!("ALICEDEVICE"), trust).await.unwrap();

        let device = store.get_user_device(alice, device_id!("ALICEDEVICE")).await.unwrap().unwrap();
        assert_eq!(device.trust_level(), trust);
        assert_eq!(store.get_user_devices(alice).await.unwrap().len(), 1);

        assert_matches!(
            store.set_device_trust(alice, device_id!("UNKNOWN"), trust).await,
            Err(CryptoStoreError::UnknownDevice(..))
        );
    }
}
