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

//! Helpers for tests of the cross-signing engine and of code built on top of
//! it.
//!
//! The helpers panic instead of returning errors, they aren't meant to be used
//! outside of tests.

#![allow(clippy::missing_panics_doc)]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use ruma::{
    api::client::uiaa::{AuthData, Dummy},
    DeviceId, OwnedRoomId, OwnedUserId, RoomId, UserId,
};
use vodozemac::base64_encode;

use crate::{
    identities::{CrossSigningInfo, DeviceData, TrustLevel},
    olm::{Account, MasterSigning, SelfSigning, Signing, UserSigning},
    requests::{SignatureUploadRequest, SignatureUploadResponse, UploadSigningKeysRequest},
    store::PrivateKeysInfo,
    trust::{RoomInfo, RoomMembersProvider},
    types::{CrossSigningKey, KeyUsage, MasterPubkey, SelfSigningPubkey, UserSigningPubkey},
    uploads::{KeysUploader, UiaInterceptor, UiaaChallenge, UploadError},
};

/// A complete set of cross-signing keys of a user, created from fixed
/// secrets so tests are reproducible.
#[derive(Debug, Clone)]
pub struct KeySetTemplate {
    user_id: OwnedUserId,
    master: MasterSigning,
    self_signing: SelfSigning,
    user_signing: UserSigning,
}

impl KeySetTemplate {
    /// Create the key set of the given user.
    ///
    /// The secrets of the three keys are derived from the given byte, use a
    /// different byte for every user of a test.
    pub fn new(user_id: &UserId, secret: u8) -> Self {
        Self::from_secrets(
            user_id,
            [secret; 32],
            [secret.wrapping_add(1); 32],
            [secret.wrapping_add(2); 32],
        )
    }

    /// Create the key set of the given user from the three given secrets.
    pub fn from_secrets(
        user_id: &UserId,
        master: [u8; 32],
        self_signing: [u8; 32],
        user_signing: [u8; 32],
    ) -> Self {
        let master = MasterSigning::from_base64(user_id.to_owned(), &base64_encode(master))
            .expect("32 bytes are always a valid Ed25519 seed");

        let (seed, key) = signed_subkey(&master, KeyUsage::SelfSigning, self_signing);
        let public_key = SelfSigningPubkey::try_from(key).expect("The usage is self-signing");
        let self_signing = SelfSigning::from_base64_checked(&public_key, &seed)
            .expect("The seed derives to the public key");

        let (seed, key) = signed_subkey(&master, KeyUsage::UserSigning, user_signing);
        let public_key = UserSigningPubkey::try_from(key).expect("The usage is user-signing");
        let user_signing = UserSigning::from_base64_checked(&public_key, &seed)
            .expect("The seed derives to the public key");

        Self { user_id: user_id.to_owned(), master, self_signing, user_signing }
    }

    /// The owner of the key set.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The public master key.
    pub fn master_key(&self) -> &MasterPubkey {
        self.master.public_key()
    }

    /// The public self-signing key.
    pub fn self_signing_key(&self) -> &SelfSigningPubkey {
        self.self_signing.public_key()
    }

    /// The public user-signing key.
    pub fn user_signing_key(&self) -> &UserSigningPubkey {
        self.user_signing.public_key()
    }

    /// The complete, untrusted, public key set, as its owner sees it.
    pub fn info(&self) -> CrossSigningInfo {
        CrossSigningInfo::new(
            self.master_key().clone(),
            Some(self.self_signing_key().clone()),
            Some(self.user_signing_key().clone()),
        )
        .expect("All keys belong to the same user")
    }

    /// The untrusted public key set as other users see it, without the
    /// user-signing key.
    pub fn public_info(&self) -> CrossSigningInfo {
        CrossSigningInfo::new(self.master_key().clone(), Some(self.self_signing_key().clone()), None)
            .expect("All keys belong to the same user")
    }

    /// The seeds of all three private keys.
    pub fn seeds(&self) -> PrivateKeysInfo {
        PrivateKeysInfo {
            master_key: Some(self.master.export_seed()),
            self_signing_key: Some(self.self_signing.export_seed()),
            user_signing_key: Some(self.user_signing.export_seed()),
        }
    }

    /// Sign the master key of another user with our user-signing key.
    ///
    /// Returns the key set of the other user with the new signature added.
    pub fn sign_user(&self, other: &CrossSigningInfo) -> CrossSigningInfo {
        let signed =
            self.user_signing.sign_user(other.master_key()).expect("The master key can be signed");

        let mut master_key: CrossSigningKey = other.master_key().clone().into();
        master_key.signatures.extend(signed.signatures);

        with_master_key(other, master_key)
    }

    /// Sign the master key of another user with the user-signing key of the
    /// `forger`, but store the signature as if we made it.
    pub fn forge_user_signature(
        &self,
        other: &CrossSigningInfo,
        forger: &KeySetTemplate,
    ) -> CrossSigningInfo {
        let forger_key_id =
            forger.user_signing_key().key_id().expect("The key has an ID").to_owned();
        let signature = forger
            .user_signing
            .sign_user(other.master_key())
            .expect("The master key can be signed")
            .signatures
            .get_signature(forger.user_id(), &forger_key_id)
            .expect("The forger signed the master key");

        let mut master_key: CrossSigningKey = other.master_key().clone().into();
        master_key.signatures.add_signature(
            self.user_id.clone(),
            self.user_signing_key().key_id().expect("The key has an ID").to_owned(),
            signature,
        );

        with_master_key(other, master_key)
    }

    /// Our key set, with the master key additionally signed by the given
    /// device.
    pub fn info_signed_by_device(&self, account: &Account) -> CrossSigningInfo {
        self.info_signed_by_devices(&[account])
    }

    /// Our key set, with the master key additionally signed by all the given
    /// devices, in the given order.
    pub fn info_signed_by_devices(&self, accounts: &[&Account]) -> CrossSigningInfo {
        let mut master_key: CrossSigningKey = self.master_key().clone().into();

        for account in accounts {
            account.sign_cross_signing_key(&mut master_key).expect("The master key can be signed");
        }

        with_master_key(&self.info(), master_key)
    }

    /// Our key set, with the master key signature removed from the given
    /// sub-key.
    pub fn info_with_unsigned_subkey(&self, usage: KeyUsage) -> CrossSigningInfo {
        self.info_with_modified_subkey(usage, |key| key.signatures.clear())
    }

    /// Our key set, with the master key signature of the given sub-key
    /// replaced by a signature of an unrelated key.
    pub fn info_with_forged_subkey_signature(&self, usage: KeyUsage) -> CrossSigningInfo {
        let master_key_id = self.master_key().key_id().expect("The key has an ID").to_owned();
        let user_id = self.user_id.clone();

        self.info_with_modified_subkey(usage, move |key| {
            let signature =
                Signing::new().sign(&key.canonical_signable().expect("The key is canonical"));
            key.signatures.add_signature(user_id, master_key_id, signature);
        })
    }

    fn info_with_modified_subkey(
        &self,
        usage: KeyUsage,
        modify: impl FnOnce(&mut CrossSigningKey),
    ) -> CrossSigningInfo {
        let mut self_signing: CrossSigningKey = self.self_signing_key().clone().into();
        let mut user_signing: CrossSigningKey = self.user_signing_key().clone().into();

        match usage {
            KeyUsage::SelfSigning => modify(&mut self_signing),
            KeyUsage::UserSigning => modify(&mut user_signing),
            KeyUsage::Master => panic!("The master key isn't a sub-key"),
        }

        CrossSigningInfo::new(
            self.master_key().clone(),
            Some(SelfSigningPubkey::try_from(self_signing).expect("The usage is self-signing")),
            Some(UserSigningPubkey::try_from(user_signing).expect("The usage is user-signing")),
        )
        .expect("All keys belong to the same user")
    }

    /// Create a new device of the key set owner, signed by our self-signing
    /// key.
    pub fn new_device(&self, device_id: &DeviceId) -> (Account, DeviceData) {
        let account = Account::new(&self.user_id, device_id);
        let mut device_keys = account.device_keys();
        self.self_signing.sign_device(&mut device_keys).expect("The device keys can be signed");

        (account, DeviceData::new_unchecked(device_keys, TrustLevel::default()))
    }

    /// Create a new device of the key set owner that isn't signed by our
    /// self-signing key.
    pub fn unsigned_device(&self, device_id: &DeviceId) -> (Account, DeviceData) {
        let account = Account::new(&self.user_id, device_id);
        let device_keys = account.device_keys();

        (account, DeviceData::new_unchecked(device_keys, TrustLevel::default()))
    }
}

fn signed_subkey(
    master: &MasterSigning,
    usage: KeyUsage,
    secret: [u8; 32],
) -> (String, CrossSigningKey) {
    let seed = base64_encode(secret);
    let signing = Signing::from_base64(&seed).expect("32 bytes are always a valid Ed25519 seed");

    let mut key = signing.cross_signing_key(master.public_key().user_id().to_owned(), usage);
    master.sign_subkey(&mut key);

    (seed, key)
}

fn with_master_key(info: &CrossSigningInfo, master_key: CrossSigningKey) -> CrossSigningInfo {
    CrossSigningInfo::new(
        MasterPubkey::try_from(master_key).expect("The usage is master"),
        info.self_signing_key().cloned(),
        info.user_signing_key().cloned(),
    )
    .expect("All keys belong to the same user")
    .with_trusted(info.is_trusted())
}

/// A [`KeysUploader`] that records all the requests it gets and fails them
/// on demand.
#[derive(Debug, Default)]
pub struct MockUploader {
    signing_key_uploads: Mutex<Vec<(UploadSigningKeysRequest, Option<AuthData>)>>,
    signature_uploads: Mutex<Vec<SignatureUploadRequest>>,
    signing_key_errors: Mutex<VecDeque<UploadError>>,
    signature_errors: Mutex<VecDeque<UploadError>>,
    signature_response: Mutex<SignatureUploadResponse>,
}

impl MockUploader {
    /// Create a new uploader that accepts every upload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next signing key upload with the given error.
    ///
    /// Errors are used up in the order they were added.
    pub fn fail_signing_key_upload(&self, error: UploadError) {
        self.signing_key_errors.lock().unwrap().push_back(error);
    }

    /// Fail the next signature upload with the given error.
    pub fn fail_signature_upload(&self, error: UploadError) {
        self.signature_errors.lock().unwrap().push_back(error);
    }

    /// Answer all successful signature uploads with the given response.
    pub fn set_signature_response(&self, response: SignatureUploadResponse) {
        *self.signature_response.lock().unwrap() = response;
    }

    /// The signing key uploads that were attempted, failed ones included.
    pub fn signing_key_uploads(&self) -> Vec<(UploadSigningKeysRequest, Option<AuthData>)> {
        self.signing_key_uploads.lock().unwrap().clone()
    }

    /// The signature uploads that were attempted, failed ones included.
    pub fn signature_uploads(&self) -> Vec<SignatureUploadRequest> {
        self.signature_uploads.lock().unwrap().clone()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl KeysUploader for MockUploader {
    async fn upload_signing_keys(
        &self,
        request: &UploadSigningKeysRequest,
        auth: Option<AuthData>,
    ) -> Result<(), UploadError> {
        self.signing_key_uploads.lock().unwrap().push((request.clone(), auth));

        match self.signing_key_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn upload_signatures(
        &self,
        request: &SignatureUploadRequest,
    ) -> Result<SignatureUploadResponse, UploadError> {
        self.signature_uploads.lock().unwrap().push(request.clone());

        match self.signature_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(self.signature_response.lock().unwrap().clone()),
        }
    }
}

/// A [`UiaInterceptor`] that answers every challenge with a dummy
/// authentication, or cancels all of them.
#[derive(Debug, Default)]
pub struct MockUiaInterceptor {
    cancel: bool,
    stages: AtomicUsize,
}

impl MockUiaInterceptor {
    /// Create an interceptor that answers every challenge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interceptor that cancels every challenge.
    pub fn cancelling() -> Self {
        Self { cancel: true, stages: AtomicUsize::new(0) }
    }

    /// How many challenges were presented to the interceptor.
    pub fn stages(&self) -> usize {
        self.stages.load(Ordering::SeqCst)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl UiaInterceptor for MockUiaInterceptor {
    async fn perform_stage(&self, challenge: &UiaaChallenge) -> Option<AuthData> {
        self.stages.fetch_add(1, Ordering::SeqCst);

        if self.cancel {
            None
        } else {
            let mut dummy = Dummy::new();
            dummy.session = challenge.session.clone();
            Some(AuthData::Dummy(dummy))
        }
    }
}

/// A [`RoomMembersProvider`] over a fixed set of rooms.
#[derive(Debug, Default)]
pub struct MockRooms {
    rooms: Mutex<BTreeMap<OwnedRoomId, RoomInfo>>,
}

impl MockRooms {
    /// Create a provider without any rooms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a room.
    pub fn add_room(&self, room_id: &RoomId, info: RoomInfo) {
        self.rooms.lock().unwrap().insert(room_id.to_owned(), info);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RoomMembersProvider for MockRooms {
    async fn rooms_for_users(&self, user_ids: &[OwnedUserId]) -> Vec<OwnedRoomId> {
        self.rooms
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, info)| info.members.iter().any(|m| user_ids.contains(m)))
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }

    async fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }
}
