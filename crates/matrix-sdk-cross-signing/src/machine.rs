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

use std::{fmt, sync::Arc};

use ruma::{
    api::client::uiaa::AuthData, events::secret::request::SecretName, DeviceId, UserId,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::CrossSigningConfig,
    error::{CrossSigningError, CrossSigningResult},
    identities::{CrossSigningInfo, DeviceData, TrustLevel},
    olm::{usage_for_secret, Account, CrossSigningStatus, PrivateCrossSigningIdentity},
    requests::{SignatureUploadRequest, UploadSigningKeysRequest},
    store::{DynCryptoStore, IntoCryptoStore, PrivateKeysInfo},
    trust::{
        DeviceListUpdate, DeviceTrustResult, RoomMembersProvider, TrustEvaluator, TrustEvent,
        TrustPropagator, UserTrustResult,
    },
    types::{DeviceKeys, KeyUsage},
    uploads::{retry_upload, KeysUploader, UiaInterceptor, UploadError},
};

const ALL_USAGES: [KeyUsage; 3] = [KeyUsage::Master, KeyUsage::SelfSigning, KeyUsage::UserSigning];

/// The cross-signing service of a single device.
///
/// The service owns our private cross-signing keys. It creates them, imports
/// them when they get shared with us by our other devices and uses them to
/// sign our devices and other users. All operations that touch the private
/// keys are serialized.
#[derive(Clone)]
pub struct CrossSigningService {
    inner: Arc<CrossSigningServiceInner>,
}

struct CrossSigningServiceInner {
    /// The Olm account of our device, used to sign our master key.
    account: Account,
    store: Arc<DynCryptoStore>,
    uploader: Arc<dyn KeysUploader>,
    /// Our private cross-signing keys.
    identity: PrivateCrossSigningIdentity,
    config: CrossSigningConfig,
    /// Held by every operation that changes our private keys.
    crypto_lock: Mutex<()>,
    propagator: TrustPropagator,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for CrossSigningService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossSigningService")
            .field("user_id", &self.user_id())
            .field("device_id", &self.device_id())
            .field("identity", &self.inner.identity)
            .finish_non_exhaustive()
    }
}

impl CrossSigningService {
    /// Create a new cross-signing service.
    ///
    /// The private keys found in the store are loaded, as long as they still
    /// match our public cross-signing keys, and our own trust is re-evaluated.
    ///
    /// # Arguments
    ///
    /// * `account` - The Olm account of our device.
    ///
    /// * `store` - The store holding the key sets and devices.
    ///
    /// * `uploader` - Uploads our keys and signatures to the homeserver.
    ///
    /// * `rooms` - Access to our rooms, used to update their trust levels.
    ///
    /// * `events` - The channel the [`TrustEvent`]s are sent to.
    ///
    /// * `config` - The retry policy of the uploads.
    #[instrument(skip_all, fields(user_id = %account.user_id(), device_id = %account.device_id()))]
    pub async fn new(
        account: Account,
        store: impl IntoCryptoStore,
        uploader: Arc<dyn KeysUploader>,
        rooms: Arc<dyn RoomMembersProvider>,
        events: mpsc::UnboundedSender<TrustEvent>,
        config: CrossSigningConfig,
    ) -> CrossSigningResult<Self> {
        let store = store.into_crypto_store();
        let identity = PrivateCrossSigningIdentity::empty(account.user_id());
        let propagator = TrustPropagator::new(account.user_id(), store.clone(), rooms, events);

        if store.get_user_device(account.user_id(), account.device_id()).await?.is_none() {
            store.save_devices(vec![account.own_device_data()]).await?;
        }

        if let Some(info) = store.get_my_cross_signing_info().await? {
            let seeds = store.get_cross_signing_private_keys().await?;
            let rejected = identity.import_matching(&info, &seeds).await;

            if !rejected.is_empty() {
                store.store_private_keys_info(identity.seeds().await).await?;
            }
        } else {
            debug!("Cross-signing hasn't been set up yet");
        }

        let service = Self {
            inner: Arc::new(CrossSigningServiceInner {
                account,
                store,
                uploader,
                identity,
                config,
                crypto_lock: Mutex::new(()),
                propagator,
            }),
        };

        service.update_own_trust().await?;

        Ok(service)
    }

    /// Our own user ID.
    pub fn user_id(&self) -> &UserId {
        self.inner.account.user_id()
    }

    /// The ID of our device.
    pub fn device_id(&self) -> &DeviceId {
        self.inner.account.device_id()
    }

    /// The store the service uses.
    pub fn store(&self) -> &DynCryptoStore {
        &*self.inner.store
    }

    /// The retry policy of the uploads.
    pub fn config(&self) -> &CrossSigningConfig {
        &self.inner.config
    }

    /// The propagator that re-evaluates trust when keys change.
    ///
    /// Device list updates should be fed to its
    /// [`run()`](TrustPropagator::run) loop.
    pub fn trust_propagator(&self) -> &TrustPropagator {
        &self.inner.propagator
    }

    fn evaluator(&self) -> TrustEvaluator<'_> {
        TrustEvaluator::new(self.user_id(), &*self.inner.store)
    }

    /// Create a new set of cross-signing keys and publish it.
    ///
    /// This replaces any existing cross-signing keys. If the homeserver asks
    /// for user-interactive authentication, the `uia_interceptor` is asked to
    /// perform it and the upload is repeated once.
    ///
    /// The new keys are only stored and used once both the keys and our
    /// signatures were accepted. If any upload fails the error is returned and
    /// the previous cross-signing state is left as it was.
    #[instrument(skip_all)]
    pub async fn initialize_cross_signing(
        &self,
        uia_interceptor: Option<&dyn UiaInterceptor>,
    ) -> CrossSigningResult<()> {
        let guard = self.inner.crypto_lock.lock().await;

        let candidate = PrivateCrossSigningIdentity::new(self.user_id().to_owned());

        let (public_identity, device_keys) =
            match self.upload_new_identity(&candidate, uia_interceptor).await {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    error!(error = ?e, "Failed to set up cross-signing");
                    candidate.release().await;

                    return Err(e);
                }
            };

        let store = &self.inner.store;
        let trust_level = TrustLevel { locally_verified: true, cross_signing_verified: false };

        store.set_my_cross_signing_info(Some(public_identity.with_trusted(true))).await?;
        store.save_devices(vec![DeviceData::new_unchecked(device_keys, trust_level)]).await?;
        store.store_private_keys_info(candidate.seeds().await).await?;
        self.inner.identity.adopt(&candidate).await;

        drop(guard);

        info!("Cross-signing was set up");

        self.inner.propagator.refresh_all().await?;

        Ok(())
    }

    /// Upload the public keys of the given identity together with the
    /// signatures of our device and our master key.
    ///
    /// Returns the public key set and our device keys, now signed by the new
    /// self-signing key.
    async fn upload_new_identity(
        &self,
        identity: &PrivateCrossSigningIdentity,
        uia_interceptor: Option<&dyn UiaInterceptor>,
    ) -> CrossSigningResult<(CrossSigningInfo, DeviceKeys)> {
        let public_identity = identity.to_public_identity().await?;
        let request = identity.as_upload_request().await;

        match self.upload_signing_keys(&request, None).await {
            Ok(()) => {}
            Err(UploadError::AuthRequired(challenge)) => {
                debug!(session = ?challenge.session, "The signing key upload requires authentication");

                let interceptor = uia_interceptor.ok_or(CrossSigningError::UiaCancelled)?;
                let auth = interceptor
                    .perform_stage(&challenge)
                    .await
                    .ok_or(CrossSigningError::UiaCancelled)?;

                self.upload_signing_keys(&request, Some(auth)).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!("Uploaded our public cross-signing keys");

        let mut device_keys = self.inner.account.device_keys();
        identity.sign_device_keys(&mut device_keys).await?;
        let signed_master_key = self.inner.account.sign_master_key(public_identity.master_key())?;

        let mut signature_request = SignatureUploadRequest::new();
        signature_request.add_device_keys(&device_keys)?;
        signature_request.add_cross_signing_key(&signed_master_key)?;

        self.upload_signatures(&signature_request).await?;

        Ok((public_identity, device_keys))
    }

    async fn upload_signing_keys(
        &self,
        request: &UploadSigningKeysRequest,
        auth: Option<AuthData>,
    ) -> Result<(), UploadError> {
        let uploader = &*self.inner.uploader;
        let config = &self.inner.config;

        retry_upload(config, config.upload_retry_limit, || {
            uploader.upload_signing_keys(request, auth.clone())
        })
        .await
    }

    async fn upload_signatures(&self, request: &SignatureUploadRequest) -> Result<(), UploadError> {
        let uploader = &*self.inner.uploader;
        let config = &self.inner.config;

        let response = retry_upload(config, config.signature_upload_retry_limit, || {
            uploader.upload_signatures(request)
        })
        .await?;

        if response.is_success() {
            debug!(count = request.len(), "Uploaded signatures");
            Ok(())
        } else {
            error!(failures = ?response.failures, "The homeserver rejected some signatures");
            Err(UploadError::SignaturesRejected(response))
        }
    }

    /// Handle a private cross-signing key one of our other devices shared
    /// with us.
    ///
    /// The key is only imported if it matches our public key of the same
    /// usage, otherwise it's discarded and our current key is kept.
    ///
    /// Returns true if the key was imported.
    #[instrument(skip(self, seed))]
    pub async fn on_secret_gossip(
        &self,
        secret_name: &SecretName,
        seed: &str,
    ) -> CrossSigningResult<bool> {
        let Some(usage) = usage_for_secret(secret_name) else {
            debug!("The secret isn't a cross-signing key");
            return Ok(false);
        };

        let guard = self.inner.crypto_lock.lock().await;

        let Some(info) = self.inner.store.get_my_cross_signing_info().await? else {
            warn!("Received a private cross-signing key, but our public keys are unknown");
            return Ok(false);
        };

        if let Err(e) = self.inner.identity.import_secret(&info, usage, seed).await {
            warn!(error = %e, "Discarding a received private cross-signing key");
            return Ok(false);
        }

        self.inner.store.store_private_key(usage, seed).await?;
        drop(guard);

        self.update_own_trust().await?;

        Ok(true)
    }

    /// Handle our private master key, shared by one of our other devices.
    pub async fn on_secret_msk_gossip(&self, seed: &str) -> CrossSigningResult<bool> {
        self.on_secret_gossip(&SecretName::CrossSigningMasterKey, seed).await
    }

    /// Handle our private self-signing key, shared by one of our other
    /// devices.
    pub async fn on_secret_ssk_gossip(&self, seed: &str) -> CrossSigningResult<bool> {
        self.on_secret_gossip(&SecretName::CrossSigningSelfSigningKey, seed).await
    }

    /// Handle our private user-signing key, shared by one of our other
    /// devices.
    pub async fn on_secret_usk_gossip(&self, seed: &str) -> CrossSigningResult<bool> {
        self.on_secret_gossip(&SecretName::CrossSigningUserSigningKey, seed).await
    }

    /// Check the given private keys against our public keys and trust
    /// ourselves if they all match.
    ///
    /// The private keys usually come from a backup the user unlocked. All
    /// three keys are needed, missing keys are reported as mismatched.
    ///
    /// # Arguments
    ///
    /// * `master_key` - The base64 encoded seed of our master key.
    ///
    /// * `user_signing_key` - The base64 encoded seed of our user-signing key.
    ///
    /// * `self_signing_key` - The base64 encoded seed of our self-signing
    ///   key.
    #[instrument(skip_all)]
    pub async fn check_trust_from_private_keys(
        &self,
        master_key: Option<&str>,
        user_signing_key: Option<&str>,
        self_signing_key: Option<&str>,
    ) -> CrossSigningResult<UserTrustResult> {
        let guard = self.inner.crypto_lock.lock().await;
        let store = &self.inner.store;

        let Some(info) = store.get_my_cross_signing_info().await? else {
            return Ok(UserTrustResult::CrossSigningNotConfigured(self.user_id().to_owned()));
        };

        let seeds = PrivateKeysInfo {
            master_key: master_key.map(ToOwned::to_owned),
            self_signing_key: self_signing_key.map(ToOwned::to_owned),
            user_signing_key: user_signing_key.map(ToOwned::to_owned),
        };

        let candidate = PrivateCrossSigningIdentity::empty(self.user_id());
        let rejected = candidate.import_matching(&info, &seeds).await;

        let mismatched: Vec<_> = ALL_USAGES
            .into_iter()
            .filter(|usage| seeds.get(*usage).is_none() || rejected.contains(usage))
            .collect();

        if !mismatched.is_empty() {
            let result = UserTrustResult::PrivateKeyMismatch(mismatched);
            warn!(%result, "The private keys don't match our public keys");
            return Ok(result);
        }

        self.inner.identity.adopt(&candidate).await;
        store.store_private_keys_info(seeds).await?;
        store.mark_my_master_key_as_locally_trusted(true).await?;
        drop(guard);

        let result = self.evaluator().check_self_trust().await?;
        self.update_own_trust().await?;

        Ok(result)
    }

    /// Sign the master key of another user with our user-signing key and
    /// publish the signature.
    #[instrument(skip(self))]
    pub async fn trust_user(&self, user_id: &UserId) -> CrossSigningResult<()> {
        let guard = self.inner.crypto_lock.lock().await;
        let store = &self.inner.store;

        let info = store
            .get_cross_signing_info(user_id)
            .await?
            .ok_or_else(|| CrossSigningError::UnknownMasterKey(user_id.to_owned()))?;

        if !self.inner.identity.can_sign_users().await {
            return Err(CrossSigningError::MissingSigningKey(KeyUsage::UserSigning));
        }

        let signed = self.inner.identity.sign_user(info.master_key()).await?;

        let mut request = SignatureUploadRequest::new();
        request.add_cross_signing_key(&signed)?;
        self.upload_signatures(&request).await?;

        let mut master_key = info.master_key().clone();
        master_key.as_mut().signatures.extend(signed.signatures);

        let info = CrossSigningInfo::new(
            master_key,
            info.self_signing_key().cloned(),
            info.user_signing_key().cloned(),
        )?
        .with_trusted(true);

        store.save_cross_signing_info(info).await?;
        drop(guard);

        info!("Signed the master key of the user");

        self.inner.propagator.process(DeviceListUpdate::new([user_id.to_owned()])).await?;

        Ok(())
    }

    /// Sign one of our own devices with our self-signing key and publish the
    /// signature.
    #[instrument(skip(self))]
    pub async fn trust_device(&self, device_id: &DeviceId) -> CrossSigningResult<()> {
        let guard = self.inner.crypto_lock.lock().await;
        let store = &self.inner.store;

        let device = store.get_user_device(self.user_id(), device_id).await?.ok_or_else(|| {
            CrossSigningError::UnknownDevice(self.user_id().to_owned(), device_id.to_owned())
        })?;

        if !self.inner.identity.can_sign_devices().await {
            return Err(CrossSigningError::MissingSigningKey(KeyUsage::SelfSigning));
        }

        let mut device_keys = device.as_device_keys().clone();
        self.inner.identity.sign_device_keys(&mut device_keys).await?;

        let mut request = SignatureUploadRequest::new();
        request.add_device_keys(&device_keys)?;
        self.upload_signatures(&request).await?;

        store.save_devices(vec![DeviceData::new_unchecked(device_keys, device.trust_level())]).await?;
        drop(guard);

        info!("Signed our device");

        self.update_own_trust().await?;

        Ok(())
    }

    /// Mark our own master key as manually verified.
    pub async fn mark_my_master_key_as_trusted(&self) -> CrossSigningResult<()> {
        self.inner.store.mark_my_master_key_as_locally_trusted(true).await?;
        self.update_own_trust().await
    }

    /// Re-evaluate our own trust, if it changes everybody else gets
    /// re-evaluated as well.
    async fn update_own_trust(&self) -> CrossSigningResult<()> {
        Ok(self.inner.propagator.process(DeviceListUpdate::new([self.user_id().to_owned()])).await?)
    }

    /// Check that our own cross-signing keys form a trusted chain.
    pub async fn check_self_trust(&self) -> CrossSigningResult<UserTrustResult> {
        Ok(self.evaluator().check_self_trust().await?)
    }

    /// Check if we trust the given user.
    pub async fn check_user_trust(&self, user_id: &UserId) -> CrossSigningResult<UserTrustResult> {
        Ok(self.evaluator().check_user_trust(user_id).await?)
    }

    /// Check if we trust the given device.
    ///
    /// The stored local trust of the device is taken into account if
    /// `locally_trusted` is `None`.
    pub async fn check_device_trust(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        locally_trusted: Option<bool>,
    ) -> CrossSigningResult<DeviceTrustResult> {
        Ok(self.evaluator().check_device_trust_by_id(user_id, device_id, locally_trusted).await?)
    }

    /// Is the given user trusted, as of the last trust evaluation.
    pub async fn is_user_trusted(&self, user_id: &UserId) -> CrossSigningResult<bool> {
        let info = self.inner.store.get_cross_signing_info(user_id).await?;
        Ok(info.is_some_and(|i| i.is_trusted()))
    }

    /// Are our own cross-signing keys trusted, as of the last trust
    /// evaluation.
    pub async fn is_cross_signing_verified(&self) -> CrossSigningResult<bool> {
        let info = self.inner.store.get_my_cross_signing_info().await?;
        Ok(info.is_some_and(|i| i.is_trusted()))
    }

    /// Can we sign our devices and other users.
    ///
    /// This requires our keys to be trusted and the private self-signing and
    /// user-signing keys to be stored.
    pub async fn can_cross_sign(&self) -> CrossSigningResult<bool> {
        let seeds = self.inner.store.get_cross_signing_private_keys().await?;

        Ok(self.is_cross_signing_verified().await?
            && seeds.self_signing_key.is_some()
            && seeds.user_signing_key.is_some())
    }

    /// Are all three private keys stored.
    pub async fn all_private_keys_known(&self) -> CrossSigningResult<bool> {
        Ok(self.inner.store.get_cross_signing_private_keys().await?.all_known())
    }

    /// Which of our private keys we hold.
    pub async fn status(&self) -> CrossSigningStatus {
        self.inner.identity.status().await
    }

    /// Export the seed of one of our private keys, to share it with our other
    /// devices.
    pub async fn export_secret(&self, secret_name: &SecretName) -> Option<String> {
        self.inner.identity.export_secret(secret_name).await
    }
}
