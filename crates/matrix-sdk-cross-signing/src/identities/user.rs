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

use ruma::UserId;
use serde::{Deserialize, Serialize};

use crate::{
    error::SignatureError,
    types::{CrossSigningKey, KeyUsage, MasterPubkey, SelfSigningPubkey, UserSigningPubkey},
};

/// The cross-signing key set of a user.
///
/// The user-signing key is only ever published to its owner, the key sets of
/// other users usually come without it.
///
/// The `trusted` flag is the persisted outcome of the last trust evaluation
/// of this key set, only the trust engine sets it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossSigningInfo {
    master_key: MasterPubkey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    self_signing_key: Option<SelfSigningPubkey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_signing_key: Option<UserSigningPubkey>,
    #[serde(default)]
    trusted: bool,
}

impl CrossSigningInfo {
    /// Create a new, untrusted, key set.
    ///
    /// All the keys need to belong to the same user, the signatures between
    /// the keys aren't checked here.
    pub fn new(
        master_key: MasterPubkey,
        self_signing_key: Option<SelfSigningPubkey>,
        user_signing_key: Option<UserSigningPubkey>,
    ) -> Result<Self, SignatureError> {
        let user_id = master_key.user_id();

        if self_signing_key.as_ref().is_some_and(|k| k.user_id() != user_id)
            || user_signing_key.as_ref().is_some_and(|k| k.user_id() != user_id)
        {
            return Err(SignatureError::UserIdMismatch);
        }

        Ok(Self { master_key, self_signing_key, user_signing_key, trusted: false })
    }

    /// The user this key set belongs to.
    pub fn user_id(&self) -> &UserId {
        self.master_key.user_id()
    }

    /// Get the public master key of the user.
    pub fn master_key(&self) -> &MasterPubkey {
        &self.master_key
    }

    /// Get the public self-signing key of the user.
    pub fn self_signing_key(&self) -> Option<&SelfSigningPubkey> {
        self.self_signing_key.as_ref()
    }

    /// Get the public user-signing key of the user.
    pub fn user_signing_key(&self) -> Option<&UserSigningPubkey> {
        self.user_signing_key.as_ref()
    }

    /// Get the key with the given usage.
    pub fn key(&self, usage: KeyUsage) -> Option<&CrossSigningKey> {
        match usage {
            KeyUsage::Master => Some(self.master_key.as_ref()),
            KeyUsage::SelfSigning => self.self_signing_key.as_ref().map(AsRef::as_ref),
            KeyUsage::UserSigning => self.user_signing_key.as_ref().map(AsRef::as_ref),
        }
    }

    /// Was this key set found to be trusted by the last trust evaluation.
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Set the trust flag, used by store implementations when they apply the
    /// outcome of a trust evaluation.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    /// Return a copy of this key set with the given trust flag.
    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Do both key sets contain the same master key.
    ///
    /// Signatures and the trust flag are ignored.
    pub fn has_same_master_key(&self, other: &CrossSigningInfo) -> bool {
        self.master_key == other.master_key
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use ruma::user_id;

    use super::CrossSigningInfo;
    use crate::{error::SignatureError, olm::PrivateCrossSigningIdentity, types::KeyUsage};

    #[tokio::test]
    async fn test_key_set_of_mixed_users_is_rejected() {
        let alice = PrivateCrossSigningIdentity::new(user_id!("@alice:localhost").to_owned());
        let bob = PrivateCrossSigningIdentity::new(user_id!("@bob:localhost").to_owned());

        let result = CrossSigningInfo::new(
            alice.master_public_key().await.unwrap(),
            bob.self_signing_public_key().await,
            None,
        );

        assert_matches!(result, Err(SignatureError::UserIdMismatch));
    }

    #[tokio::test]
    async fn test_key_set_serialization() {
        let alice = PrivateCrossSigningIdentity::new(user_id!("@alice:localhost").to_owned());
        let info = alice.to_public_identity().await.unwrap().with_trusted(true);

        let json = serde_json::to_value(&info).unwrap();
        let deserialized: CrossSigningInfo = serde_json::from_value(json).unwrap();

        assert!(deserialized.is_trusted());
        assert_eq!(deserialized, info);
        assert!(deserialized.key(KeyUsage::UserSigning).is_some());
        assert!(deserialized.has_same_master_key(&info));
    }
}
