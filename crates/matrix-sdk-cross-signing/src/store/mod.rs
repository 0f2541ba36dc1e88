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

//! Types and traits to implement the storage layer for the cross-signing
//! trust engine.
//!
//! The storage layer keeps the public cross-signing key sets of users
//! together with the persisted outcome of their trust evaluation, the devices
//! of users, our own private cross-signing seeds and the derived room trust
//! levels.
//!
//! Implementing a custom store only requires implementing the
//! [`CryptoStore`] trait, an in-memory implementation is provided as
//! [`MemoryStore`].

use std::fmt::{self, Debug};

use ruma::{events::secret::request::SecretName, OwnedDeviceId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memorystore;
mod traits;

pub use memorystore::MemoryStore;
pub use traits::{CryptoStore, DynCryptoStore, IntoCryptoStore};

use crate::types::KeyUsage;

/// The crypto store's error type.
#[derive(Debug, Error)]
pub enum CryptoStoreError {
    /// The device that should be updated isn't stored.
    #[error("the device {1} of user {0} isn't known to the store")]
    UnknownDevice(OwnedUserId, OwnedDeviceId),

    /// The cross-signing key set of the user that should be updated isn't
    /// stored.
    #[error("the cross-signing keys of {0} aren't known to the store")]
    UnknownUser(OwnedUserId),

    /// An object failed to be serialized or deserialized.
    #[error(transparent)]
    Serialization(#[from] SerdeError),

    /// A problem with the underlying database backend
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl CryptoStoreError {
    /// Create a new [`Backend`][Self::Backend] error.
    ///
    /// Shorthand for `CryptoStoreError::Backend(Box::new(error))`.
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// A `Result` type alias for the crypto store's error type.
pub type Result<T, E = CryptoStoreError> = std::result::Result<T, E>;

/// Error describing what went wrong when importing private cross signing
/// keys.
#[derive(Debug, Error)]
pub enum SecretImportError {
    /// The key that we tried to import was invalid.
    #[error("Error while importing {name}: {error}")]
    Key {
        /// The name of the secret that was being imported.
        name: SecretName,
        /// The error that occurred.
        error: vodozemac::KeyError,
    },

    /// The public key of the imported private key doesn't match to the public
    /// key that was uploaded to the server.
    #[error(
        "Error while importing {name}: The public key of the imported private \
            key doesn't match to the public key that was uploaded to the server"
    )]
    MismatchedPublicKeys {
        /// The name of the secret that was being imported.
        name: SecretName,
    },

    /// We don't know the public key the imported private key should match.
    #[error("Error while importing {name}: The matching public key is unknown")]
    MissingPublicKey {
        /// The name of the secret that was being imported.
        name: SecretName,
    },

    /// The secret isn't one of the cross-signing keys.
    #[error("The secret {0} isn't a cross-signing key")]
    UnsupportedSecret(SecretName),

    /// The new version of the identity couldn't be stored.
    #[error(transparent)]
    Store(#[from] CryptoStoreError),
}

/// The private cross-signing seeds we have stored, each one an unpadded base64
/// encoded 32 byte Ed25519 seed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeysInfo {
    /// The seed of the master key.
    pub master_key: Option<String>,
    /// The seed of the self signing key.
    pub self_signing_key: Option<String>,
    /// The seed of the user signing key.
    pub user_signing_key: Option<String>,
}

#[cfg(not(tarpaulin_include))]
impl Debug for PrivateKeysInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeysInfo")
            .field("master_key", &self.master_key.is_some())
            .field("self_signing_key", &self.self_signing_key.is_some())
            .field("user_signing_key", &self.user_signing_key.is_some())
            .finish_non_exhaustive()
    }
}

impl PrivateKeysInfo {
    /// Do we have the seeds of all three keys.
    pub fn all_known(&self) -> bool {
        self.master_key.is_some() && self.self_signing_key.is_some() && self.user_signing_key.is_some()
    }

    /// Do we have none of the seeds.
    pub fn is_empty(&self) -> bool {
        self.master_key.is_none() && self.self_signing_key.is_none() && self.user_signing_key.is_none()
    }

    /// Get the seed of the key with the given usage.
    pub fn get(&self, usage: KeyUsage) -> Option<&str> {
        match usage {
            KeyUsage::Master => self.master_key.as_deref(),
            KeyUsage::SelfSigning => self.self_signing_key.as_deref(),
            KeyUsage::UserSigning => self.user_signing_key.as_deref(),
        }
    }

    /// Set the seed of the key with the given usage.
    ///
    /// The previous seed gets zeroized.
    pub fn set(&mut self, usage: KeyUsage, seed: String) {
        let slot = match usage {
            KeyUsage::Master => &mut self.master_key,
            KeyUsage::SelfSigning => &mut self.self_signing_key,
            KeyUsage::UserSigning => &mut self.user_signing_key,
        };

        slot.zeroize();
        *slot = Some(seed);
    }
}
