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

mod pk_signing;

use std::sync::Arc;

pub use pk_signing::{MasterSigning, SelfSigning, Signing, SigningError, UserSigning};
use ruma::{events::secret::request::SecretName, OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::SignatureError,
    identities::CrossSigningInfo,
    requests::UploadSigningKeysRequest,
    store::{PrivateKeysInfo, SecretImportError},
    types::{CrossSigningKey, DeviceKeys, KeyUsage, MasterPubkey, SelfSigningPubkey, UserSigningPubkey},
};

/// Private cross signing identity.
///
/// This object holds the private and public ed25519 key triplet that is used
/// for cross signing.
///
/// The object might be completely empty or have only some of the key pairs
/// available.
///
/// It can be used to sign devices or other identities.
#[derive(Clone, Debug)]
pub struct PrivateCrossSigningIdentity {
    user_id: OwnedUserId,
    pub(crate) master_key: Arc<Mutex<Option<MasterSigning>>>,
    pub(crate) user_signing_key: Arc<Mutex<Option<UserSigning>>>,
    pub(crate) self_signing_key: Arc<Mutex<Option<SelfSigning>>>,
}

/// Struct representing the state of our private cross signing keys, it shows
/// which private cross signing keys we have locally stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossSigningStatus {
    /// Do we have the master key.
    pub has_master: bool,
    /// Do we have the self signing key, this one is necessary to sign our own
    /// devices.
    pub has_self_signing: bool,
    /// Do we have the user signing key, this one is necessary to sign other
    /// users.
    pub has_user_signing: bool,
}

impl CrossSigningStatus {
    /// Do we have all the cross signing keys locally stored.
    pub fn is_complete(&self) -> bool {
        self.has_master && self.has_user_signing && self.has_self_signing
    }
}

/// Map a secret name onto the usage of the cross-signing key it contains.
pub(crate) fn usage_for_secret(secret_name: &SecretName) -> Option<KeyUsage> {
    match secret_name {
        SecretName::CrossSigningMasterKey => Some(KeyUsage::Master),
        SecretName::CrossSigningSelfSigningKey => Some(KeyUsage::SelfSigning),
        SecretName::CrossSigningUserSigningKey => Some(KeyUsage::UserSigning),
        _ => None,
    }
}

/// Map the usage of a cross-signing key onto the name of the secret that
/// carries it.
pub(crate) fn secret_name_for(usage: KeyUsage) -> SecretName {
    match usage {
        KeyUsage::Master => SecretName::CrossSigningMasterKey,
        KeyUsage::SelfSigning => SecretName::CrossSigningSelfSigningKey,
        KeyUsage::UserSigning => SecretName::CrossSigningUserSigningKey,
    }
}

impl PrivateCrossSigningIdentity {
    /// Get the user id that this identity belongs to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Create a new empty identity.
    pub fn empty(user_id: &UserId) -> Self {
        Self {
            user_id: user_id.into(),
            master_key: Arc::new(Mutex::new(None)),
            self_signing_key: Arc::new(Mutex::new(None)),
            user_signing_key: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a new identity for the given user, with a freshly generated
    /// master key and sub-keys signed by it.
    pub fn new(user_id: OwnedUserId) -> Self {
        let master = MasterSigning::new(user_id.clone());
        let (user, self_signing) = master.new_subkeys();

        Self {
            user_id,
            master_key: Arc::new(Mutex::new(Some(master))),
            self_signing_key: Arc::new(Mutex::new(Some(self_signing))),
            user_signing_key: Arc::new(Mutex::new(Some(user))),
        }
    }

    /// Is the identity empty.
    ///
    /// An empty identity doesn't contain any private keys.
    pub async fn is_empty(&self) -> bool {
        let has_master = self.master_key.lock().await.is_some();
        let has_user = self.user_signing_key.lock().await.is_some();
        let has_self = self.self_signing_key.lock().await.is_some();

        !(has_master || has_user || has_self)
    }

    /// Can we sign our own devices, i.e. do we have a self signing key.
    pub async fn can_sign_devices(&self) -> bool {
        self.self_signing_key.lock().await.is_some()
    }

    /// Can we sign other users, i.e. do we have a user signing key.
    pub async fn can_sign_users(&self) -> bool {
        self.user_signing_key.lock().await.is_some()
    }

    /// Do we have the master key.
    pub async fn has_master_key(&self) -> bool {
        self.master_key.lock().await.is_some()
    }

    /// Get the status of our private cross signing keys, i.e. if we have the
    /// master key and the subkeys.
    pub async fn status(&self) -> CrossSigningStatus {
        CrossSigningStatus {
            has_master: self.has_master_key().await,
            has_self_signing: self.can_sign_devices().await,
            has_user_signing: self.can_sign_users().await,
        }
    }

    /// Get the public part of the master key, if we have one.
    pub async fn master_public_key(&self) -> Option<MasterPubkey> {
        self.master_key.lock().await.as_ref().map(|m| m.public_key().to_owned())
    }

    /// Get the public part of the self-signing key, if we have one.
    pub async fn self_signing_public_key(&self) -> Option<SelfSigningPubkey> {
        self.self_signing_key.lock().await.as_ref().map(|k| k.public_key().to_owned())
    }

    /// Get the public part of the user-signing key, if we have one.
    pub async fn user_signing_public_key(&self) -> Option<UserSigningPubkey> {
        self.user_signing_key.lock().await.as_ref().map(|k| k.public_key().to_owned())
    }

    /// Export the seed of the private cross signing key
    ///
    /// The exported seed will be encoded as unpadded base64.
    ///
    /// # Arguments
    ///
    /// * `secret_name` - The type of the cross signing key that should be
    ///   exported.
    pub async fn export_secret(&self, secret_name: &SecretName) -> Option<String> {
        match usage_for_secret(secret_name)? {
            KeyUsage::Master => self.master_key.lock().await.as_ref().map(|m| m.export_seed()),
            KeyUsage::UserSigning => {
                self.user_signing_key.lock().await.as_ref().map(|m| m.export_seed())
            }
            KeyUsage::SelfSigning => {
                self.self_signing_key.lock().await.as_ref().map(|m| m.export_seed())
            }
        }
    }

    /// Export the seeds of all the private keys we hold.
    pub async fn seeds(&self) -> PrivateKeysInfo {
        let mut info = PrivateKeysInfo::default();

        for usage in [KeyUsage::Master, KeyUsage::SelfSigning, KeyUsage::UserSigning] {
            if let Some(seed) = self.export_secret(&secret_name_for(usage)).await {
                info.set(usage, seed);
            }
        }

        info
    }

    /// Import a single private key, after checking that it derives to the
    /// matching public key of the given key set.
    ///
    /// The previous private key, if any, is kept when the check fails.
    pub(crate) async fn import_secret(
        &self,
        public_identity: &CrossSigningInfo,
        usage: KeyUsage,
        seed: &str,
    ) -> Result<(), SecretImportError> {
        let name = secret_name_for(usage);
        let map_error = |e: SigningError| match e {
            SigningError::Key(error) => SecretImportError::Key { name: name.clone(), error },
            SigningError::PublicKeyMismatch { .. } => {
                SecretImportError::MismatchedPublicKeys { name: name.clone() }
            }
        };

        match usage {
            KeyUsage::Master => {
                let master = MasterSigning::from_base64_checked(public_identity.master_key(), seed)
                    .map_err(map_error)?;
                *self.master_key.lock().await = Some(master);
            }
            KeyUsage::SelfSigning => {
                let public_key = public_identity
                    .self_signing_key()
                    .ok_or_else(|| SecretImportError::MissingPublicKey { name: name.clone() })?;
                let subkey =
                    SelfSigning::from_base64_checked(public_key, seed).map_err(map_error)?;
                *self.self_signing_key.lock().await = Some(subkey);
            }
            KeyUsage::UserSigning => {
                let public_key = public_identity
                    .user_signing_key()
                    .ok_or_else(|| SecretImportError::MissingPublicKey { name: name.clone() })?;
                let subkey =
                    UserSigning::from_base64_checked(public_key, seed).map_err(map_error)?;
                *self.user_signing_key.lock().await = Some(subkey);
            }
        }

        info!(usage = %usage, "Imported a private cross-signing key");

        Ok(())
    }

    /// Import all the given private keys, keeping only the ones that derive
    /// to the matching public key.
    ///
    /// Returns the usages of the keys that were rejected.
    pub(crate) async fn import_matching(
        &self,
        public_identity: &CrossSigningInfo,
        seeds: &PrivateKeysInfo,
    ) -> Vec<KeyUsage> {
        let mut rejected = Vec::new();

        for usage in [KeyUsage::Master, KeyUsage::SelfSigning, KeyUsage::UserSigning] {
            if let Some(seed) = seeds.get(usage) {
                if let Err(e) = self.import_secret(public_identity, usage, seed).await {
                    warn!(usage = %usage, error = ?e, "Dropping a stored private cross-signing key");
                    rejected.push(usage);
                }
            }
        }

        rejected
    }

    /// Forget all the private keys of this identity.
    ///
    /// The dropped keys get zeroized.
    pub async fn release(&self) {
        *self.master_key.lock().await = None;
        *self.self_signing_key.lock().await = None;
        *self.user_signing_key.lock().await = None;
    }

    /// Replace all three keys with the keys of another identity.
    pub(crate) async fn adopt(&self, other: &PrivateCrossSigningIdentity) {
        let master = other.master_key.lock().await.clone();
        let self_signing = other.self_signing_key.lock().await.clone();
        let user_signing = other.user_signing_key.lock().await.clone();

        *self.master_key.lock().await = master;
        *self.self_signing_key.lock().await = self_signing;
        *self.user_signing_key.lock().await = user_signing;
    }

    /// Build the public key set of this identity.
    ///
    /// Requires all three keys to be present.
    pub async fn to_public_identity(&self) -> Result<CrossSigningInfo, SignatureError> {
        let master = self.master_public_key().await.ok_or(SignatureError::MissingSigningKey)?;
        let self_signing =
            self.self_signing_public_key().await.ok_or(SignatureError::MissingSigningKey)?;
        let user_signing =
            self.user_signing_public_key().await.ok_or(SignatureError::MissingSigningKey)?;

        CrossSigningInfo::new(master, Some(self_signing), Some(user_signing))
    }

    /// Create a request to upload the public cross signing keys.
    pub async fn as_upload_request(&self) -> UploadSigningKeysRequest {
        let master_key = self.master_public_key().await.map(CrossSigningKey::from);
        let user_signing_key = self.user_signing_public_key().await.map(CrossSigningKey::from);
        let self_signing_key = self.self_signing_public_key().await.map(CrossSigningKey::from);

        UploadSigningKeysRequest { master_key, self_signing_key, user_signing_key }
    }

    /// Sign the master key of another user with our user-signing key.
    pub async fn sign_user(
        &self,
        master_key: &MasterPubkey,
    ) -> Result<CrossSigningKey, SignatureError> {
        self.user_signing_key
            .lock()
            .await
            .as_ref()
            .ok_or(SignatureError::MissingSigningKey)?
            .sign_user(master_key)
    }

    /// Sign the given device keys with our self-signing key.
    pub async fn sign_device_keys(&self, device_keys: &mut DeviceKeys) -> Result<(), SignatureError> {
        self.self_signing_key
            .lock()
            .await
            .as_ref()
            .ok_or(SignatureError::MissingSigningKey)?
            .sign_device(device_keys)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use ruma::{events::secret::request::SecretName, user_id};

    use super::PrivateCrossSigningIdentity;
    use crate::{store::SecretImportError, types::KeyUsage};

    #[tokio::test]
    async fn test_new_identity_is_complete_and_signed() {
        let identity = PrivateCrossSigningIdentity::new(user_id!("@example:localhost").to_owned());

        assert!(identity.status().await.is_complete());

        let public = identity.to_public_identity().await.unwrap();
        let master = public.master_key();
        master.verify_subkey(public.self_signing_key().unwrap()).unwrap();
        master.verify_subkey(public.user_signing_key().unwrap()).unwrap();

        let request = identity.as_upload_request().await;
        assert!(request.master_key.is_some());
        assert!(request.self_signing_key.is_some());
        assert!(request.user_signing_key.is_some());
    }

    #[tokio::test]
    async fn test_release_empties_all_slots() {
        let identity = PrivateCrossSigningIdentity::new(user_id!("@example:localhost").to_owned());
        assert!(!identity.is_empty().await);

        identity.release().await;

        assert!(identity.is_empty().await);
        assert!(identity.export_secret(&SecretName::CrossSigningMasterKey).await.is_none());
    }

    #[tokio::test]
    async fn test_import_secret_checks_the_public_key() {
        let user_id = user_id!("@example:localhost");
        let identity = PrivateCrossSigningIdentity::new(user_id.to_owned());
        let public = identity.to_public_identity().await.unwrap();
        let seeds = identity.seeds().await;
        assert!(seeds.all_known());

        let empty = PrivateCrossSigningIdentity::empty(user_id);
        let other = PrivateCrossSigningIdentity::new(user_id.to_owned()).seeds().await;

        assert_matches!(
            empty
                .import_secret(&public, KeyUsage::SelfSigning, other.get(KeyUsage::SelfSigning).unwrap())
                .await,
            Err(SecretImportError::MismatchedPublicKeys { .. })
        );
        assert!(empty.is_empty().await);

        empty
            .import_secret(&public, KeyUsage::SelfSigning, seeds.get(KeyUsage::SelfSigning).unwrap())
            .await
            .unwrap();
        assert!(empty.can_sign_devices().await);

        let rejected = empty.import_matching(&public, &other).await;
        assert_eq!(rejected.len(), 3);
        // The previously imported key is kept.
        assert_eq!(
            empty.export_secret(&SecretName::CrossSigningSelfSigningKey).await.as_deref(),
            seeds.get(KeyUsage::SelfSigning)
        );
    }
}
