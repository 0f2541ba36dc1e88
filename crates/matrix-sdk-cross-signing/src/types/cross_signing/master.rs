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

use super::CrossSigningKey;
use crate::{error::SignatureError, olm::VerifyJson};

/// Wrapper for a cross signing key marking it as the master key.
///
/// Master keys are used to sign other cross signing keys, the self signing
/// and user signing keys of an user will be signed by their master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CrossSigningKey")]
pub struct MasterPubkey(pub(crate) CrossSigningKey);

impl MasterPubkey {
    /// Check if the given cross signing sub-key is signed by the master key.
    ///
    /// # Arguments
    ///
    /// * `subkey` - The subkey that should be checked for a valid signature.
    ///
    /// Returns an empty result if the signature check succeeded, otherwise a
    /// SignatureError indicating why the check failed.
    pub fn verify_subkey<'a>(
        &self,
        subkey: impl Into<&'a CrossSigningKey>,
    ) -> Result<(), SignatureError> {
        let subkey: &CrossSigningKey = subkey.into();

        if self.0.user_id != subkey.user_id {
            return Err(SignatureError::UserIdMismatch);
        }

        let (key_id, key) =
            self.0.get_first_key_and_id().ok_or(SignatureError::MissingSigningKey)?;

        key.verify_json(&self.0.user_id, key_id, subkey)
    }
}

impl<'a> From<&'a super::SelfSigningPubkey> for &'a CrossSigningKey {
    fn from(key: &'a super::SelfSigningPubkey) -> Self {
        key.as_ref()
    }
}

impl<'a> From<&'a super::UserSigningPubkey> for &'a CrossSigningKey {
    fn from(key: &'a super::UserSigningPubkey) -> Self {
        key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use ruma::user_id;
    use vodozemac::Ed25519SecretKey;

    use super::MasterPubkey;
    use crate::{
        error::SignatureError,
        olm::MasterSigning,
        types::{CrossSigningKey, KeyUsage, SelfSigningPubkey},
    };

    #[test]
    fn test_subkey_signature_verification() {
        let user_id = user_id!("@example:localhost");
        let master = MasterSigning::new(user_id.to_owned());
        let (_, self_signing) = master.new_subkeys();

        master
            .public_key()
            .verify_subkey(self_signing.public_key())
            .expect("A freshly signed subkey should verify");

        // An unsigned key fails with a missing signature.
        let unsigned = CrossSigningKey::new(
            user_id.to_owned(),
            KeyUsage::SelfSigning,
            Ed25519SecretKey::new().public_key(),
        );
        let unsigned = SelfSigningPubkey::try_from(unsigned).unwrap();
        assert!(matches!(
            master.public_key().verify_subkey(&unsigned),
            Err(SignatureError::NoSignatureFound)
        ));
    }

    #[test]
    fn test_subkey_of_another_user_is_rejected() {
        let master = MasterSigning::new(user_id!("@example:localhost").to_owned());
        let other_master = MasterSigning::new(user_id!("@other:localhost").to_owned());
        let (_, other_self_signing) = other_master.new_subkeys();

        let master_key: &MasterPubkey = master.public_key();
        assert!(matches!(
            master_key.verify_subkey(other_self_signing.public_key()),
            Err(SignatureError::UserIdMismatch)
        ));
    }
}
