// Copyright 2022 The Matrix.org Foundation C.I.C.
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

use serde::{Deserialize, Serialize};

use super::{CrossSigningKey, MasterPubkey};
use crate::{error::SignatureError, olm::VerifyJson};

/// Wrapper for a cross signing key marking it as a user signing key.
///
/// User signing keys are used to sign the master keys of other users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CrossSigningKey")]
pub struct UserSigningPubkey(pub(crate) CrossSigningKey);

impl UserSigningPubkey {
    /// Check if the given master key is signed by this user signing key.
    ///
    /// # Arguments
    ///
    /// * `master_key` - The master key that should be checked for a valid
    ///   signature.
    ///
    /// Returns an empty result if the signature check succeeded, otherwise a
    /// SignatureError indicating why the check failed.
    pub fn verify_master_key(&self, master_key: &MasterPubkey) -> Result<(), SignatureError> {
        let (key_id, key) =
            self.0.get_first_key_and_id().ok_or(SignatureError::MissingSigningKey)?;

        // The user-signing key signs the master keys of other users, the
        // signature is stored under our own user ID.
        key.verify_json(&self.0.user_id, key_id, master_key.as_ref())
    }
}
