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

use ruma::{DeviceId, OwnedUserId, UserId};
use tracing::{debug, instrument, trace, warn};

use super::{DeviceTrustResult, RoomEncryptionTrustLevel, UserTrustResult};
use crate::{
    error::SignatureError,
    identities::{CrossSigningInfo, DeviceData, TrustLevel},
    olm::{verify_ed25519_signature, Signing},
    store::{DynCryptoStore, Result},
    types::{CrossSigningKey, KeyUsage, MasterPubkey, ED25519_PREFIX},
};

/// Check that our own cross-signing keys form a trusted chain.
///
/// The master key is trusted if we marked it as trusted, if we hold its
/// private part, or if one of our own verified devices signed it. The
/// self-signing and user-signing keys need a valid signature of the master
/// key.
///
/// # Arguments
///
/// * `own_user_id` - Our own user ID.
///
/// * `info` - Our own cross-signing key set, if we know it.
///
/// * `devices` - Our own devices.
///
/// * `master_key_locally_trusted` - Did we manually verify our master key.
///
/// * `master_seed` - The stored seed of our private master key, if any.
pub fn check_self_trust_with(
    own_user_id: &UserId,
    info: Option<&CrossSigningInfo>,
    devices: &[DeviceData],
    master_key_locally_trusted: bool,
    master_seed: Option<&str>,
) -> UserTrustResult {
    let Some(info) = info else {
        return UserTrustResult::CrossSigningNotConfigured(own_user_id.to_owned());
    };

    let master_key = info.master_key();

    let master_key_trusted = if master_key_locally_trusted {
        true
    } else if let Some(seed) = master_seed {
        seed_matches(seed, master_key)
    } else {
        signed_by_verified_device(own_user_id, master_key, devices)
    };

    if !master_key_trusted {
        debug!("Our master key isn't trusted");
        return UserTrustResult::KeysNotTrusted(own_user_id.to_owned());
    }

    let Some(user_signing_key) = info.user_signing_key() else {
        return UserTrustResult::CrossSigningNotConfigured(own_user_id.to_owned());
    };

    if let Err(result) = check_subkey(master_key, user_signing_key.as_ref()) {
        debug!(%result, "Our user-signing key isn't signed by our master key");
        return result;
    }

    let Some(self_signing_key) = info.self_signing_key() else {
        return UserTrustResult::CrossSigningNotConfigured(own_user_id.to_owned());
    };

    if let Err(result) = check_subkey(master_key, self_signing_key.as_ref()) {
        debug!(%result, "Our self-signing key isn't signed by our master key");
        return result;
    }

    UserTrustResult::Success
}

fn seed_matches(seed: &str, master_key: &MasterPubkey) -> bool {
    match Signing::from_base64(seed) {
        Ok(signing) => master_key.get_first_key() == Some(signing.public_key()),
        Err(e) => {
            warn!(error = ?e, "The stored private master key is malformed");
            false
        }
    }
}

/// Any valid signature of a verified device of ours makes the master key
/// trusted, the order in which the signatures are looked at doesn't matter.
fn signed_by_verified_device(
    own_user_id: &UserId,
    master_key: &MasterPubkey,
    devices: &[DeviceData],
) -> bool {
    let Some(signatures) = master_key.signatures().get(own_user_id) else {
        return false;
    };

    let Ok(canonical_json) = master_key.canonical_signable() else {
        return false;
    };

    signatures.iter().any(|(key_id, signature)| {
        let Some(device_id) = key_id.strip_prefix(&format!("{ED25519_PREFIX}:")) else {
            return false;
        };

        let Some(device) =
            devices.iter().find(|d| d.device_id().as_str() == device_id && d.is_verified())
        else {
            return false;
        };

        let Some(device_key) = device.ed25519_key() else {
            return false;
        };

        match verify_ed25519_signature(
            &signature.to_base64(),
            &device_key.to_base64(),
            &canonical_json,
        ) {
            Ok(()) => {
                trace!(device_id, "Our master key is signed by a verified device");
                true
            }
            Err(e) => {
                warn!(device_id, error = ?e, "Invalid device signature on our master key");
                false
            }
        }
    })
}

/// Turn the errors that prevent a signature check from happening at all into
/// a [`UserTrustResult::Failure`].
fn evaluation_failure(error: &SignatureError) -> Option<UserTrustResult> {
    match error {
        SignatureError::MissingSigningKey
        | SignatureError::UserIdMismatch
        | SignatureError::NotAnObject
        | SignatureError::JsonError(_)
        | SignatureError::Serialization(_) => Some(UserTrustResult::Failure(error.to_string())),
        _ => None,
    }
}

/// Check the master key signature of a sub-key, returning the failed trust
/// result if the signature is missing or invalid.
fn check_subkey(
    master_key: &MasterPubkey,
    subkey: &CrossSigningKey,
) -> std::result::Result<(), UserTrustResult> {
    let usage = subkey.usage.first().copied().unwrap_or(KeyUsage::Master);

    match master_key.verify_subkey(subkey) {
        Ok(()) => Ok(()),
        Err(SignatureError::NoSignatureFound) => Err(UserTrustResult::KeyNotSigned(usage)),
        Err(e) => {
            if let Some(failure) = evaluation_failure(&e) {
                return Err(failure);
            }

            let signature = master_key
                .key_id()
                .and_then(|key_id| subkey.signatures.get_raw(master_key.user_id(), key_id))
                .map(|s| s.to_base64())
                .unwrap_or_default();

            Err(UserTrustResult::InvalidSignature { usage, signature })
        }
    }
}

/// Check that the master key of another user is signed by our trusted
/// user-signing key.
pub fn check_other_msk_trusted(
    own_user_id: &UserId,
    my_info: Option<&CrossSigningInfo>,
    other_user_id: &UserId,
    other_info: Option<&CrossSigningInfo>,
) -> UserTrustResult {
    let Some((my_info, my_user_signing_key)) =
        my_info.and_then(|info| Some((info, info.user_signing_key()?)))
    else {
        return UserTrustResult::CrossSigningNotConfigured(own_user_id.to_owned());
    };

    if !my_info.is_trusted() {
        return UserTrustResult::KeysNotTrusted(own_user_id.to_owned());
    }

    let Some(other_info) = other_info else {
        return UserTrustResult::UnknownCrossSignatureInfo(other_user_id.to_owned());
    };

    let other_master_key = other_info.master_key();

    match my_user_signing_key.verify_master_key(other_master_key) {
        Ok(()) => UserTrustResult::Success,
        Err(SignatureError::NoSignatureFound) => {
            debug!(
                user_id = %other_user_id,
                "The master key isn't signed by our user-signing key"
            );
            UserTrustResult::KeyNotSigned(KeyUsage::Master)
        }
        Err(e) => {
            debug!(user_id = %other_user_id, error = ?e, "Invalid signature on the master key");

            if let Some(failure) = evaluation_failure(&e) {
                return failure;
            }

            let signature = my_user_signing_key
                .key_id()
                .and_then(|key_id| other_master_key.signatures().get_raw(own_user_id, key_id))
                .map(|s| s.to_base64())
                .unwrap_or_default();

            UserTrustResult::InvalidSignature { usage: KeyUsage::Master, signature }
        }
    }
}

/// Turn a failed device check into a success if the device was manually
/// verified.
pub fn legacy_fallback_trust(
    locally_trusted: bool,
    failure: DeviceTrustResult,
) -> DeviceTrustResult {
    if locally_trusted {
        DeviceTrustResult::Success(TrustLevel {
            locally_verified: true,
            cross_signing_verified: false,
        })
    } else {
        failure
    }
}

/// Check that a device is signed by the self-signing key of its owner, and
/// that both our key set and the owner's key set are trusted.
///
/// Failures fall back to the local trust of the device, see
/// [`legacy_fallback_trust()`].
pub fn check_device_trust(
    own_user_id: &UserId,
    my_info: Option<&CrossSigningInfo>,
    other_info: Option<&CrossSigningInfo>,
    device: &DeviceData,
    locally_trusted: bool,
) -> DeviceTrustResult {
    let fallback = |failure| legacy_fallback_trust(locally_trusted, failure);

    let Some(my_info) = my_info else {
        return fallback(DeviceTrustResult::CrossSigningNotConfigured(own_user_id.to_owned()));
    };

    if !my_info.is_trusted() {
        return fallback(DeviceTrustResult::KeysNotTrusted(own_user_id.to_owned()));
    }

    let Some(other_info) = other_info else {
        return fallback(DeviceTrustResult::CrossSigningNotConfigured(device.user_id().to_owned()));
    };

    if !other_info.is_trusted() {
        return fallback(DeviceTrustResult::KeysNotTrusted(other_info.user_id().to_owned()));
    }

    let device_id = device.device_id().to_owned();

    let Some(self_signing_key) = other_info.self_signing_key() else {
        return fallback(DeviceTrustResult::MissingDeviceSignature { device_id, key: String::new() });
    };

    let key = self_signing_key.public_key_base64().unwrap_or_default();

    let Some(signature) = self_signing_key
        .key_id()
        .and_then(|key_id| device.as_device_keys().signatures.get_raw(other_info.user_id(), key_id))
    else {
        return fallback(DeviceTrustResult::MissingDeviceSignature { device_id, key });
    };

    match self_signing_key.verify_device_keys(device.as_device_keys()) {
        Ok(()) => DeviceTrustResult::Success(TrustLevel {
            locally_verified: locally_trusted,
            cross_signing_verified: true,
        }),
        Err(e) => fallback(DeviceTrustResult::InvalidDeviceSignature {
            device_id,
            signature: signature.to_base64(),
            reason: e.to_string(),
        }),
    }
}

/// Evaluates trust on top of the current content of a store.
#[derive(Debug, Clone, Copy)]
pub struct TrustEvaluator<'a> {
    own_user_id: &'a UserId,
    store: &'a DynCryptoStore,
}

impl<'a> TrustEvaluator<'a> {
    /// Create a new evaluator for the given local user.
    pub fn new(own_user_id: &'a UserId, store: &'a DynCryptoStore) -> Self {
        Self { own_user_id, store }
    }

    /// Check that our own cross-signing keys form a trusted chain, see
    /// [`check_self_trust_with()`].
    #[instrument(skip(self))]
    pub async fn check_self_trust(&self) -> Result<UserTrustResult> {
        let info = self.store.get_my_cross_signing_info().await?;
        let devices = self.store.get_user_devices(self.own_user_id).await?;
        let locally_trusted = self.store.is_my_master_key_locally_trusted().await?;
        let private_keys = self.store.get_cross_signing_private_keys().await?;

        let result = check_self_trust_with(
            self.own_user_id,
            info.as_ref(),
            &devices,
            locally_trusted,
            private_keys.master_key.as_deref(),
        );

        trace!(%result, "Checked our own trust");

        Ok(result)
    }

    /// Check if we trust the given user.
    ///
    /// This doesn't download any keys, only the stored key sets are checked.
    #[instrument(skip(self))]
    pub async fn check_user_trust(&self, user_id: &UserId) -> Result<UserTrustResult> {
        if user_id == self.own_user_id {
            return self.check_self_trust().await;
        }

        let my_info = self.store.get_my_cross_signing_info().await?;
        let other_info = self.store.get_cross_signing_info(user_id).await?;

        Ok(check_other_msk_trusted(self.own_user_id, my_info.as_ref(), user_id, other_info.as_ref()))
    }

    /// Check if we trust the given device.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The owner of the device.
    ///
    /// * `device_id` - The ID of the device.
    ///
    /// * `locally_trusted` - Override the local trust of the device, the
    ///   stored local trust flag is used if this is `None`.
    #[instrument(skip(self))]
    pub async fn check_device_trust_by_id(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        locally_trusted: Option<bool>,
    ) -> Result<DeviceTrustResult> {
        let Some(device) = self.store.get_user_device(user_id, device_id).await? else {
            return Ok(DeviceTrustResult::UnknownDevice(device_id.to_owned()));
        };

        let my_info = self.store.get_my_cross_signing_info().await?;
        let other_info = self.store.get_cross_signing_info(user_id).await?;
        let locally_trusted = locally_trusted.unwrap_or_else(|| device.is_locally_trusted());

        Ok(check_device_trust(
            self.own_user_id,
            my_info.as_ref(),
            other_info.as_ref(),
            &device,
            locally_trusted,
        ))
    }

    /// Compute the trust level of a room with the given members, see
    /// [`compute_room_trust()`](super::compute_room_trust).
    pub async fn compute_room_trust(
        &self,
        members: &[OwnedUserId],
        exclude_own_user: bool,
    ) -> Result<RoomEncryptionTrustLevel> {
        super::compute_room_trust(self.store, self.own_user_id, members, exclude_own_user).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use ruma::{device_id, user_id};

    use super::{
        check_device_trust, check_other_msk_trusted, check_self_trust_with, legacy_fallback_trust,
        TrustEvaluator,
    };
    use crate::{
        identities::{CrossSigningInfo, DeviceData, TrustLevel},
        store::{CryptoStore, MemoryStore},
        testing::KeySetTemplate,
        trust::{DeviceTrustResult, UserTrustResult},
        types::{CrossSigningKey, KeyUsage, MasterPubkey, UserSigningPubkey},
    };

    #[test]
    fn test_self_trust_without_keys() {
        let alice = user_id!("@alice:localhost");

        assert_eq!(
            check_self_trust_with(alice, None, &[], true, None),
            UserTrustResult::CrossSigningNotConfigured(alice.to_owned())
        );
    }

    #[test]
    fn test_master_key_trust_sources() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let info = alice.info();
        let user_id = alice.user_id();

        // Nothing vouches for the master key.
        assert_eq!(
            check_self_trust_with(user_id, Some(&info), &[], false, None),
            UserTrustResult::KeysNotTrusted(user_id.to_owned())
        );

        // A manual verification does.
        assert!(check_self_trust_with(user_id, Some(&info), &[], true, None).is_verified());

        // Knowing the private master key does, as long as it's the right one.
        let seeds = alice.seeds();
        assert!(check_self_trust_with(user_id, Some(&info), &[], false, seeds.master_key.as_deref())
            .is_verified());

        let other_seeds = KeySetTemplate::new(user_id, 2).seeds();
        assert!(!check_self_trust_with(
            user_id,
            Some(&info),
            &[],
            false,
            other_seeds.master_key.as_deref()
        )
        .is_verified());
    }

    #[test]
    fn test_master_key_signed_by_a_verified_device() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let user_id = alice.user_id();

        let (unverified_account, unverified_device) = alice.new_device(device_id!("UNVERIFIED"));
        let (verified_account, mut verified_device) = alice.new_device(device_id!("VERIFIED"));
        verified_device.set_trust_level(TrustLevel { locally_verified: true, ..Default::default() });

        // A signature by an unverified device doesn't count.
        let info = alice.info_signed_by_device(&unverified_account);
        let devices = vec![unverified_device.clone(), verified_device.clone()];
        assert_eq!(
            check_self_trust_with(user_id, Some(&info), &devices, false, None),
            UserTrustResult::KeysNotTrusted(user_id.to_owned())
        );

        // A signature by a verified one does.
        let info = alice.info_signed_by_device(&verified_account);
        assert!(check_self_trust_with(user_id, Some(&info), &devices, false, None).is_verified());

        // Signatures of both kinds, no matter in which order they're looked at.
        let info = alice.info_signed_by_devices(&[&unverified_account, &verified_account]);
        assert!(check_self_trust_with(user_id, Some(&info), &devices, false, None).is_verified());
        let info = alice.info_signed_by_devices(&[&verified_account, &unverified_account]);
        assert!(check_self_trust_with(user_id, Some(&info), &devices, false, None).is_verified());
    }

    #[test]
    fn test_subkeys_need_a_master_key_signature() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let user_id = alice.user_id();

        let info = alice.info_with_unsigned_subkey(KeyUsage::SelfSigning);
        assert_eq!(
            check_self_trust_with(user_id, Some(&info), &[], true, None),
            UserTrustResult::KeyNotSigned(KeyUsage::SelfSigning)
        );

        let info = alice.info_with_forged_subkey_signature(KeyUsage::UserSigning);
        assert_matches!(
            check_self_trust_with(user_id, Some(&info), &[], true, None),
            UserTrustResult::InvalidSignature { usage: KeyUsage::UserSigning, .. }
        );
    }

    #[test]
    fn test_unusable_signing_keys_fail_the_evaluation() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let user_id = alice.user_id();

        let mut master_key: CrossSigningKey = alice.master_key().as_ref().clone();
        master_key.keys.values_mut().for_each(|key| *key = "not a key".to_owned());

        let info = CrossSigningInfo::new(
            MasterPubkey(master_key),
            Some(alice.self_signing_key().clone()),
            Some(alice.user_signing_key().clone()),
        )
        .unwrap();

        assert_matches!(
            check_self_trust_with(user_id, Some(&info), &[], true, None),
            UserTrustResult::Failure(_)
        );

        let mut user_signing_key: CrossSigningKey = alice.user_signing_key().as_ref().clone();
        user_signing_key.keys.clear();

        let my_info = CrossSigningInfo::new(
            alice.master_key().clone(),
            Some(alice.self_signing_key().clone()),
            Some(UserSigningPubkey(user_signing_key)),
        )
        .unwrap()
        .with_trusted(true);
        let bob_info = alice.sign_user(&bob.info());

        let result = check_other_msk_trusted(user_id, Some(&my_info), bob.user_id(), Some(&bob_info));
        assert_matches!(&result, UserTrustResult::Failure(_));
        assert!(!result.is_verified());
    }

    #[test]
    fn test_chain_soundness() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let (_, bob_device) = bob.new_device(device_id!("BOBDEVICE"));

        let my_info = alice.info().with_trusted(true);
        let bob_info = alice.sign_user(&bob.public_info());

        // Every link of the chain is present.
        assert_eq!(
            check_other_msk_trusted(alice.user_id(), Some(&my_info), bob.user_id(), Some(&bob_info)),
            UserTrustResult::Success
        );
        assert!(check_device_trust(
            alice.user_id(),
            Some(&my_info),
            Some(&bob_info.clone().with_trusted(true)),
            &bob_device,
            false
        )
        .is_cross_signing_verified());

        // Bob's master key isn't signed by us.
        assert_eq!(
            check_other_msk_trusted(
                alice.user_id(),
                Some(&my_info),
                bob.user_id(),
                Some(&bob.public_info())
            ),
            UserTrustResult::KeyNotSigned(KeyUsage::Master)
        );

        // Bob's master key is signed by someone else's user-signing key.
        let carol = KeySetTemplate::new(user_id!("@carol:localhost"), 20);
        let forged = alice.forge_user_signature(&bob.public_info(), &carol);
        assert_matches!(
            check_other_msk_trusted(alice.user_id(), Some(&my_info), bob.user_id(), Some(&forged)),
            UserTrustResult::InvalidSignature { usage: KeyUsage::Master, .. }
        );

        // Bob's device isn't signed by Bob's self-signing key.
        let (_, unsigned_device) = bob.unsigned_device(device_id!("UNSIGNED"));
        assert_matches!(
            check_device_trust(
                alice.user_id(),
                Some(&my_info),
                Some(&bob_info.clone().with_trusted(true)),
                &unsigned_device,
                false
            ),
            DeviceTrustResult::MissingDeviceSignature { .. }
        );

        // Bob's device was modified after it was signed.
        let mut tampered = bob_device.as_device_keys().clone();
        tampered.algorithms.push("m.megolm.v2.aes-sha2".to_owned());
        let tampered = DeviceData::new_unchecked(tampered, TrustLevel::default());
        assert_matches!(
            check_device_trust(
                alice.user_id(),
                Some(&my_info),
                Some(&bob_info.with_trusted(true)),
                &tampered,
                false
            ),
            DeviceTrustResult::InvalidDeviceSignature { .. }
        );
    }

    #[test]
    fn test_trust_is_transitive() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let (_, bob_device) = bob.new_device(device_id!("BOBDEVICE"));

        let bob_info = alice.sign_user(&bob.public_info()).with_trusted(true);

        // If our own keys aren't trusted, nothing downstream is.
        let untrusted = alice.info();
        assert_eq!(
            check_other_msk_trusted(alice.user_id(), Some(&untrusted), bob.user_id(), Some(&bob_info)),
            UserTrustResult::KeysNotTrusted(alice.user_id().to_owned())
        );
        assert_eq!(
            check_device_trust(alice.user_id(), Some(&untrusted), Some(&bob_info), &bob_device, false),
            DeviceTrustResult::KeysNotTrusted(alice.user_id().to_owned())
        );

        // Neither are the devices of a user we don't trust.
        let trusted = alice.info().with_trusted(true);
        let untrusted_bob = bob_info.clone().with_trusted(false);
        assert_eq!(
            check_device_trust(alice.user_id(), Some(&trusted), Some(&untrusted_bob), &bob_device, false),
            DeviceTrustResult::KeysNotTrusted(bob.user_id().to_owned())
        );

        // And we can't judge other users without a user-signing key.
        let public_only = alice.public_info().with_trusted(true);
        assert_eq!(
            check_other_msk_trusted(alice.user_id(), Some(&public_only), bob.user_id(), Some(&bob_info)),
            UserTrustResult::CrossSigningNotConfigured(alice.user_id().to_owned())
        );
        assert_eq!(
            check_other_msk_trusted(alice.user_id(), Some(&trusted), bob.user_id(), None),
            UserTrustResult::UnknownCrossSignatureInfo(bob.user_id().to_owned())
        );
    }

    #[test]
    fn test_legacy_fallback() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let (_, bob_device) = bob.unsigned_device(device_id!("BOBDEVICE"));

        // Neither of us has cross-signing, a manual verification still counts.
        let result = check_device_trust(alice.user_id(), None, None, &bob_device, true);
        assert_eq!(
            result,
            DeviceTrustResult::Success(TrustLevel {
                locally_verified: true,
                cross_signing_verified: false
            })
        );

        // Without it the original failure is returned.
        assert_eq!(
            check_device_trust(alice.user_id(), None, None, &bob_device, false),
            DeviceTrustResult::CrossSigningNotConfigured(alice.user_id().to_owned())
        );

        let failure = DeviceTrustResult::UnknownDevice(device_id!("BOBDEVICE").to_owned());
        assert_eq!(legacy_fallback_trust(false, failure.clone()), failure);
    }

    #[tokio::test]
    async fn test_evaluator_reads_the_store() {
        let alice = KeySetTemplate::new(user_id!("@alice:localhost"), 1);
        let bob = KeySetTemplate::new(user_id!("@bob:localhost"), 10);
        let (_, bob_device) = bob.new_device(device_id!("BOBDEVICE"));

        let store = MemoryStore::new(alice.user_id());
        let evaluator = TrustEvaluator::new(alice.user_id(), &store);

        assert_eq!(
            evaluator.check_self_trust().await.unwrap(),
            UserTrustResult::CrossSigningNotConfigured(alice.user_id().to_owned())
        );

        store.set_my_cross_signing_info(Some(alice.info().with_trusted(true))).await.unwrap();
        store.store_private_keys_info(alice.seeds()).await.unwrap();
        store.save_cross_signing_info(alice.sign_user(&bob.public_info()).with_trusted(true)).await.unwrap();
        store.save_devices(vec![bob_device]).await.unwrap();

        assert!(evaluator.check_self_trust().await.unwrap().is_verified());
        assert!(evaluator.check_user_trust(alice.user_id()).await.unwrap().is_verified());
        assert!(evaluator.check_user_trust(bob.user_id()).await.unwrap().is_verified());

        let result = evaluator
            .check_device_trust_by_id(bob.user_id(), device_id!("BOBDEVICE"), None)
            .await
            .unwrap();
        assert!(result.is_cross_signing_verified());
        assert!(!result.is_locally_verified());

        let result = evaluator
            .check_device_trust_by_id(bob.user_id(), device_id!("MISSING"), None)
            .await
            .unwrap();
        assert_eq!(result, DeviceTrustResult::UnknownDevice(device_id!("MISSING").to_owned()));
    }
}
