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

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, instrument, trace};

use super::{
    check_device_trust, check_other_msk_trusted, compute_room_trust, RoomEncryptionTrustLevel,
    TrustEvaluator,
};
use crate::{
    identities::TrustLevel,
    store::{DynCryptoStore, IntoCryptoStore, Result},
};

/// Notification that the devices or cross-signing keys of some users changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceListUpdate {
    /// The users whose keys changed.
    pub user_ids: BTreeSet<OwnedUserId>,
}

impl DeviceListUpdate {
    /// Create a new update for the given users.
    pub fn new(user_ids: impl IntoIterator<Item = OwnedUserId>) -> Self {
        Self { user_ids: user_ids.into_iter().collect() }
    }
}

/// The changes a propagation run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustEvent {
    /// The trust of the given users was recomputed.
    UserTrustChanged(Vec<OwnedUserId>),
    /// The trust level of a room changed.
    RoomTrustUpdated {
        /// The room.
        room_id: OwnedRoomId,
        /// The new trust level of the room.
        level: RoomEncryptionTrustLevel,
    },
}

/// What we need to know about a room to compute its trust level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomInfo {
    /// The active members of the room, including us.
    pub members: Vec<OwnedUserId>,
    /// Is the room a direct message.
    pub is_direct: bool,
    /// Is the room encrypted, only encrypted rooms get a trust level.
    pub is_encrypted: bool,
}

/// Gives access to the rooms we're in and their members.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RoomMembersProvider: Send + Sync {
    /// Get the rooms that any of the given users is a member of.
    async fn rooms_for_users(&self, user_ids: &[OwnedUserId]) -> Vec<OwnedRoomId>;

    /// Get the info of the given room, `None` if we don't know the room.
    async fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo>;
}

/// Re-evaluates trust when the keys of users change and persists the
/// outcome.
///
/// Only one propagation runs at a time.
#[derive(Clone)]
pub struct TrustPropagator {
    own_user_id: OwnedUserId,
    store: Arc<DynCryptoStore>,
    rooms: Arc<dyn RoomMembersProvider>,
    events: mpsc::UnboundedSender<TrustEvent>,
    propagation_lock: Arc<Mutex<()>>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for TrustPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPropagator")
            .field("own_user_id", &self.own_user_id)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl TrustPropagator {
    /// Create a new propagator.
    ///
    /// # Arguments
    ///
    /// * `own_user_id` - Our own user ID.
    ///
    /// * `store` - The store holding the key sets and devices.
    ///
    /// * `rooms` - Access to our rooms, used to update the room trust levels.
    ///
    /// * `events` - The channel the [`TrustEvent`]s are sent to.
    pub fn new(
        own_user_id: &UserId,
        store: impl IntoCryptoStore,
        rooms: Arc<dyn RoomMembersProvider>,
        events: mpsc::UnboundedSender<TrustEvent>,
    ) -> Self {
        Self {
            own_user_id: own_user_id.to_owned(),
            store: store.into_crypto_store(),
            rooms,
            events,
            propagation_lock: Default::default(),
        }
    }

    /// Process updates from the given channel until all its senders are
    /// dropped.
    ///
    /// Updates that queue up while a propagation is running are
    /// de-duplicated, an update is dropped if a later one covers the same
    /// users.
    pub async fn run(&self, mut updates: mpsc::UnboundedReceiver<DeviceListUpdate>) {
        while let Some(update) = updates.recv().await {
            let mut pending = vec![update];

            while let Ok(update) = updates.try_recv() {
                pending.push(update);
            }

            for update in supersede(pending) {
                if let Err(e) = self.process(update).await {
                    error!(error = ?e, "Failed to propagate a trust change");
                }
            }
        }

        debug!("The device list update channel was closed");
    }

    /// Re-evaluate the trust of every user we know.
    pub async fn refresh_all(&self) -> Result<()> {
        let mut users = self.store.get_known_users().await?;
        users.push(self.own_user_id.clone());

        self.process(DeviceListUpdate::new(users)).await
    }

    /// Re-evaluate the trust of the users of the given update, their devices
    /// and the rooms they're in.
    ///
    /// If our own trust changes, all the users we know are re-evaluated.
    #[instrument(skip_all, fields(users = ?update.user_ids))]
    pub async fn process(&self, update: DeviceListUpdate) -> Result<()> {
        let _guard = self.propagation_lock.lock().await;

        let own_user_id = self.own_user_id.as_ref();
        let mut users = update.user_ids;

        // The results are collected first and applied in one go afterwards.
        let mut trust = BTreeMap::new();

        if users.contains(own_user_id) {
            let evaluator = TrustEvaluator::new(own_user_id, &*self.store);

            let previous = self.store.get_my_cross_signing_info().await?.map(|i| i.is_trusted());
            let verified = evaluator.check_self_trust().await?.is_verified();

            if let Some(previous) = previous {
                self.store.set_user_keys_as_trusted(own_user_id, verified).await?;

                if previous != verified {
                    debug!(verified, "Our own trust changed, re-evaluating all users");
                    users.extend(self.store.get_known_users().await?);
                }
            }

            trust.insert(own_user_id.to_owned(), verified);
        }

        let my_info = self.store.get_my_cross_signing_info().await?;

        for user_id in users.iter().filter(|u| **u != self.own_user_id) {
            let other_info = self.store.get_cross_signing_info(user_id).await?;
            let result =
                check_other_msk_trusted(own_user_id, my_info.as_ref(), user_id, other_info.as_ref());

            trace!(%user_id, %result, "Re-evaluated the trust of a user");

            trust.insert(user_id.clone(), result.is_verified());
        }

        self.store.update_users_trust(trust).await?;

        self.update_devices(&users).await?;

        let users: Vec<_> = users.into_iter().collect();
        self.send(TrustEvent::UserTrustChanged(users.clone()));

        self.update_rooms(&users).await
    }

    async fn update_devices(&self, users: &BTreeSet<OwnedUserId>) -> Result<()> {
        let own_user_id = self.own_user_id.as_ref();
        let my_info = self.store.get_my_cross_signing_info().await?;

        for user_id in users {
            let other_info = self.store.get_cross_signing_info(user_id).await?;

            for device in self.store.get_user_devices(user_id).await? {
                let locally_trusted = device.is_locally_trusted();
                let result = check_device_trust(
                    own_user_id,
                    my_info.as_ref(),
                    other_info.as_ref(),
                    &device,
                    locally_trusted,
                );

                let trust_level = TrustLevel {
                    locally_verified: locally_trusted,
                    cross_signing_verified: result.is_cross_signing_verified(),
                };

                if trust_level != device.trust_level() {
                    debug!(
                        %user_id,
                        device_id = %device.device_id(),
                        cross_signing_verified = trust_level.cross_signing_verified,
                        "The trust of a device changed"
                    );

                    self.store.set_device_trust(user_id, device.device_id(), trust_level).await?;
                }
            }
        }

        Ok(())
    }

    async fn update_rooms(&self, users: &[OwnedUserId]) -> Result<()> {
        let room_ids = self.rooms.rooms_for_users(users).await;
        let infos = join_all(room_ids.iter().map(|room_id| self.rooms.room_info(room_id))).await;

        for (room_id, info) in room_ids.into_iter().zip(infos) {
            let Some(info) = info.filter(|info| info.is_encrypted) else {
                continue;
            };

            let exclude_own_user = info.is_direct || info.members.len() <= 2;
            let level =
                compute_room_trust(&*self.store, &self.own_user_id, &info.members, exclude_own_user)
                    .await?;

            if self.store.get_room_trust_level(&room_id).await? != Some(level) {
                debug!(%room_id, ?level, "The trust level of a room changed");

                self.store.set_room_trust_level(&room_id, level).await?;
                self.send(TrustEvent::RoomTrustUpdated { room_id, level });
            }
        }

        Ok(())
    }

    fn send(&self, event: TrustEvent) {
        if self.events.send(event).is_err() {
            trace!("Nobody is listening for trust events");
        }
    }
}

/// Drop updates that are followed by an update for the same users.
fn supersede(updates: Vec<DeviceListUpdate>) -> Vec<DeviceListUpdate> {
    let mut result: Vec<DeviceListUpdate> = Vec::with_capacity(updates.len());

    for update in updates {
        result.retain(|u| u != &update);
        result.push(update);
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ruma::{device_id, room_id, user_id};
    use tokio::sync::mpsc;

    use super::{supersede, DeviceListUpdate, RoomInfo, TrustEvent, TrustPropagator};
    use crate::{
        store::{CryptoStore, MemoryStore},
        testing::{KeySetTemplate, MockRooms},
        trust::RoomEncryptionTrustLevel,
    };

    #[test]
    fn test_identical_updates_are_superseded() {
        let alice = user_id!("@alice:localhost").to_owned();
        let bob = user_id!("@bob:localhost").to_owned();

        let updates = vec![
            DeviceListUpdate::new([alice.clone()]),
            DeviceListUpdate::new([bob.clone()]),
            DeviceListUpdate::new([alice.clone()]),
        ];

        assert_eq!(
            supersede(updates),
            vec![DeviceListUpdate::new([bob]), DeviceListUpdate::new([alice])]
        );
    }

    #[tokio::test]
    async fn test_propagation_updates_users_devices_and_rooms() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let room_id = room_id!("!room:localhost");

        let store = Arc::new(MemoryStore::new(alice.user_id()));
        store.set_my_cross_signing_info(Some(alice.info())).await.unwrap();
        store.mark_my_master_key_as_locally_trusted(true).await.unwrap();
        store.save_cross_signing_info(alice.sign_user(&bob.public_info())).await.unwrap();

        let (_, bob_device) = bob.new_device(device_id!("BOBDEVICE"));
        store.save_devices(vec![bob_device]).await.unwrap();

        let rooms = Arc::new(MockRooms::new());
        rooms.add_room(
            room_id,
            RoomInfo {
                members: vec![alice.user_id().to_owned(), bob.user_id().to_owned()],
                is_direct: true,
                is_encrypted: true,
            },
        );

        let (sender, mut events) = mpsc::unbounded_channel();
        let propagator = TrustPropagator::new(alice.user_id(), store.clone(), rooms, sender);

        // Our own keys become trusted, which makes Bob trusted as well.
        propagator.process(DeviceListUpdate::new([alice.user_id().to_owned()])).await.unwrap();

        assert!(store.get_my_cross_signing_info().await.unwrap().unwrap().is_trusted());
        assert!(store.get_cross_signing_info(bob.user_id()).await.unwrap().unwrap().is_trusted());

        let device =
            store.get_user_device(bob.user_id(), device_id!("BOBDEVICE")).await.unwrap().unwrap();
        assert!(device.is_cross_signing_verified());

        assert_eq!(
            events.try_recv().unwrap(),
            TrustEvent::UserTrustChanged(vec![
                alice.user_id().to_owned(),
                bob.user_id().to_owned()
            ])
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TrustEvent::RoomTrustUpdated {
                room_id: room_id.to_owned(),
                level: RoomEncryptionTrustLevel::Trusted
            }
        );

        // Bob logs in on a new device and doesn't verify it.
        let (_, new_device) = bob.unsigned_device(device_id!("NEWDEVICE"));
        store.save_devices(vec![new_device]).await.unwrap();

        propagator.process(DeviceListUpdate::new([bob.user_id().to_owned()])).await.unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            TrustEvent::UserTrustChanged(vec![bob.user_id().to_owned()])
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TrustEvent::RoomTrustUpdated {
                room_id: room_id.to_owned(),
                level: RoomEncryptionTrustLevel::Warning
            }
        );
        assert_eq!(
            store.get_room_trust_level(room_id).await.unwrap(),
            Some(RoomEncryptionTrustLevel::Warning)
        );

        // Nothing changed, the room level isn't sent again.
        propagator.process(DeviceListUpdate::new([bob.user_id().to_owned()])).await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            TrustEvent::UserTrustChanged(vec![bob.user_id().to_owned()])
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_processes_the_channel() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let store = Arc::new(MemoryStore::new(alice.user_id()));
        store.set_my_cross_signing_info(Some(alice.info())).await.unwrap();
        store.store_private_keys_info(alice.seeds()).await.unwrap();

        let (sender, mut events) = mpsc::unbounded_channel();
        let propagator =
            TrustPropagator::new(alice.user_id(), store.clone(), Arc::new(MockRooms::new()), sender);

        let (updates, receiver) = mpsc::unbounded_channel();
        updates.send(DeviceListUpdate::new([alice.user_id().to_owned()])).unwrap();
        drop(updates);

        propagator.run(receiver).await;

        assert!(store.get_my_cross_signing_info().await.unwrap().unwrap().is_trusted());
        assert_eq!(
            events.recv().await.unwrap(),
            TrustEvent::UserTrustChanged(vec![alice.user_id().to_owned()])
        );
    }
}
