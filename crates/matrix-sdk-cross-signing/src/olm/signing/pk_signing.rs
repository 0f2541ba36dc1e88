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

use std::sync::Arc;

use ruma::{OwnedUserId, UserId};
use serde_json::Value;
use thiserror::Error;
use vodozemac::{Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature, KeyError};

use crate::{
    error::SignatureError,
    olm::utility::canonical_signable,
    types::{
        ed25519_key_id, CrossSigningKey, DeviceKeys, KeyUsage, MasterPubkey, SelfSigningPubkey,
        Signatures, UserSigningPubkey,
    },
};

/// Error type reporting failures in the signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The seed of the signing key couldn't be decoded.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The public key derived from the seed doesn't match the expected public
    /// key.
    #[error("the public key derived from the seed doesn't match, expected {expected}, got {got}")]
    PublicKeyMismatch {
        /// The public key we expected.
        expected: String,
        /// The public key the seed derives to.
        got: String,
    },
}

/// An Ed25519 key pair, the private half of a cross-signing key.
#[derive(Clone)]
pub struct Signing {
    inner: Arc<Ed25519SecretKey>,
    public_key: Ed25519PublicKey,
}

#[cfg(not(tarpaulin_include))]
impl std::fmt::Debug for Signing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signing").field("public_key", &self.public_key.to_base64()).finish()
    }
}

impl PartialEq for Signing {
    fn eq(&self, other: &Signing) -> bool {
        self.public_key == other.public_key
    }
}

impl From<Ed25519SecretKey> for Signing {
    fn from(secret_key: Ed25519SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self { inner: secret_key.into(), public_key }
    }
}

impl Signing {
    /// Generate a new random key pair.
    pub fn new() -> Self {
        Ed25519SecretKey::new().into()
    }

    /// Restore a key pair from an unpadded base64 encoded 32 byte seed.
    pub fn from_base64(key: &str) -> Result<Self, KeyError> {
        let key = Ed25519SecretKey::from_base64(key)?;
        Ok(key.into())
    }

    /// Export the seed of the key pair as an unpadded base64 string.
    pub fn to_base64(&self) -> String {
        self.inner.to_base64()
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    /// Build the unsigned public cross-signing key object of this key pair.
    pub fn cross_signing_key(&self, user_id: OwnedUserId, usage: KeyUsage) -> CrossSigningKey {
        CrossSigningKey::new(user_id, usage, self.public_key)
    }

    /// The key ID of this key pair, `ed25519:<pubkey>`.
    pub fn key_id(&self) -> String {
        ed25519_key_id(&self.public_key.to_base64())
    }

    /// Sign the canonical form of the given JSON object.
    pub fn sign_json(&self, json: Value) -> Result<Ed25519Signature, SignatureError> {
        let canonical_json = canonical_signable(json)?;
        Ok(self.sign(&canonical_json))
    }

    pub fn sign(&self, message: &str) -> Ed25519Signature {
        self.inner.sign(message.as_bytes())
    }
}

/// Check that a seed derives to the expected public key before it gets used
/// as one of our cross-signing keys.
fn check_public_key(inner: &Signing, expected: Option<Ed25519PublicKey>) -> Result<(), SigningError> {
    match expected {
        Some(expected) if expected == inner.public_key() => Ok(()),
        expected => Err(SigningError::PublicKeyMismatch {
            expected: expected.map(|k| k.to_base64()).unwrap_or_default(),
            got: inner.public_key().to_base64(),
        }),
    }
}

/// The private part of our master key.
#[derive(Clone, PartialEq, Debug)]
pub struct MasterSigning {
    inner: Signing,
    public_key: MasterPubkey,
}

impl MasterSigning {
    /// Generate a brand new master key for the given user.
    pub fn new(user_id: OwnedUserId) -> Self {
        Self::from_signing(user_id, Signing::new())
    }

    fn from_signing(user_id: OwnedUserId, inner: Signing) -> Self {
        let public_key = MasterPubkey(inner.cross_signing_key(user_id, KeyUsage::Master));
        Self { inner, public_key }
    }

    /// Restore the master key from an exported seed.
    pub fn from_base64(user_id: OwnedUserId, key: &str) -> Result<Self, KeyError> {
        Ok(Self::from_signing(user_id, Signing::from_base64(key)?))
    }

    /// Restore the master key from an exported seed, checking that it derives
    /// to the given public key.
    pub fn from_base64_checked(public_key: &MasterPubkey, key: &str) -> Result<Self, SigningError> {
        let inner = Signing::from_base64(key)?;
        check_public_key(&inner, public_key.get_first_key())?;

        Ok(Self { inner, public_key: public_key.clone() })
    }

    pub fn export_seed(&self) -> String {
        self.inner.to_base64()
    }

    pub fn public_key(&self) -> &MasterPubkey {
        &self.public_key
    }

    /// Generate a new user-signing and self-signing key pair, both signed by
    /// this master key.
    pub fn new_subkeys(&self) -> (UserSigning, SelfSigning) {
        let user_id = self.public_key.user_id().to_owned();

        let user = Signing::new();
        let mut public_key = user.cross_signing_key(user_id.clone(), KeyUsage::UserSigning);
        self.sign_subkey(&mut public_key);
        let user = UserSigning { inner: user, public_key: UserSigningPubkey(public_key) };

        let self_signing = Signing::new();
        let mut public_key = self_signing.cross_signing_key(user_id, KeyUsage::SelfSigning);
        self.sign_subkey(&mut public_key);
        let self_signing =
            SelfSigning { inner: self_signing, public_key: SelfSigningPubkey(public_key) };

        (user, self_signing)
    }

    pub fn sign(&self, message: &str) -> Ed25519Signature {
        self.inner.sign(message)
    }

    /// Sign the given sub-key, adding our signature to its signatures.
    pub fn sign_subkey(&self, subkey: &mut CrossSigningKey) {
        let json_subkey = serde_json::to_value(&subkey).expect("Can't serialize cross signing subkey");
        let signature = self.inner.sign_json(json_subkey).expect("Can't sign cross signing keys");

        subkey.signatures.add_signature(
            self.public_key.user_id().to_owned(),
            self.inner.key_id(),
            signature,
        );
    }
}

/// The private part of our user-signing key.
#[derive(Clone, PartialEq, Debug)]
pub struct UserSigning {
    inner: Signing,
    public_key: UserSigningPubkey,
}

impl UserSigning {
    /// Restore the user-signing key from an exported seed, checking that it
    /// derives to the given public key.
    pub fn from_base64_checked(
        public_key: &UserSigningPubkey,
        key: &str,
    ) -> Result<Self, SigningError> {
        let inner = Signing::from_base64(key)?;
        check_public_key(&inner, public_key.get_first_key())?;

        Ok(Self { inner, public_key: public_key.clone() })
    }

    pub fn export_seed(&self) -> String {
        self.inner.to_base64()
    }

    pub fn public_key(&self) -> &UserSigningPubkey {
        &self.public_key
    }

    /// Sign the master key of another user.
    ///
    /// Returns a copy of the master key that carries only our new signature,
    /// ready to be uploaded.
    pub fn sign_user(&self, master_key: &MasterPubkey) -> Result<CrossSigningKey, SignatureError> {
        let signatures = self.sign_user_helper(master_key)?;
        let mut master_key: CrossSigningKey = master_key.to_owned().into();

        master_key.signatures.clear();
        master_key.signatures.extend(signatures);

        Ok(master_key)
    }

    fn sign_user_helper(&self, master_key: &MasterPubkey) -> Result<Signatures, SignatureError> {
        let signature = self.inner.sign(&master_key.canonical_signable()?);

        let mut signatures = Signatures::new();
        signatures.add_signature(
            self.public_key.user_id().to_owned(),
            self.inner.key_id(),
            signature,
        );

        Ok(signatures)
    }

    /// The user that owns this key.
    pub fn user_id(&self) -> &UserId {
        self.public_key.user_id()
    }
}

/// The private part of our self-signing key.
#[derive(Clone, PartialEq, Debug)]
pub struct SelfSigning {
    inner: Signing,
    public_key: SelfSigningPubkey,
}

impl SelfSigning {
    /// Restore the self-signing key from an exported seed, checking that it
    /// derives to the given public key.
    pub fn from_base64_checked(
        public_key: &SelfSigningPubkey,
        key: &str,
    ) -> Result<Self, SigningError> {
        let inner = Signing::from_base64(key)?;
        check_public_key(&inner, public_key.get_first_key())?;

        Ok(Self { inner, public_key: public_key.clone() })
    }

    pub fn export_seed(&self) -> String {
        self.inner.to_base64()
    }

    pub fn public_key(&self) -> &SelfSigningPubkey {
        &self.public_key
    }

    /// Sign the given device keys, adding our signature to them.
    pub fn sign_device(&self, device_keys: &mut DeviceKeys) -> Result<(), SignatureError> {
        let signature = self.inner.sign(&device_keys.canonical_signable()?);

        device_keys.signatures.add_signature(
            self.public_key.user_id().to_owned(),
            self.inner.key_id(),
            signature,
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use ruma::user_id;
    use vodozemac::Ed25519SecretKey;

    use super::{MasterSigning, SelfSigning, Signing, SigningError, UserSigning};
    use crate::{error::SignatureError, olm::VerifyJson};

    #[test]
    fn test_debug_output_hides_the_seed() {
        let signing = Signing::from(Ed25519SecretKey::from_slice(b"master12master12master12master12"));
        let debug = format!("{signing:?}");

        assert!(debug.contains(&signing.public_key().to_base64()));
        assert!(!debug.contains(&signing.to_base64()));
    }

    #[test]
    fn test_seed_export_round_trips() {
        let master = MasterSigning::new(user_id!("@example:localhost").to_owned());
        let restored = MasterSigning::from_base64_checked(master.public_key(), &master.export_seed())
            .expect("The exported seed should derive the same public key");

        assert_eq!(master, restored);
    }

    #[test]
    fn test_mismatched_seeds_are_rejected() {
        let master = MasterSigning::new(user_id!("@example:localhost").to_owned());
        let (user_signing, self_signing) = master.new_subkeys();

        assert_matches!(
            SelfSigning::from_base64_checked(self_signing.public_key(), &user_signing.export_seed()),
            Err(SigningError::PublicKeyMismatch { .. })
        );
        assert_matches!(
            UserSigning::from_base64_checked(user_signing.public_key(), "not a seed"),
            Err(SigningError::Key(_))
        );
    }

    #[test]
    fn test_sign_user_only_carries_our_signature() {
        let alice = MasterSigning::new(user_id!("@alice:localhost").to_owned());
        let (alice_usk, _) = alice.new_subkeys();
        let bob = MasterSigning::new(user_id!("@bob:localhost").to_owned());

        let signed = alice_usk.sign_user(bob.public_key()).unwrap();

        assert_eq!(signed.signatures.signature_count(), 1);
        let (key_id, key) = alice_usk.public_key().as_ref().get_first_key_and_id().unwrap();
        key.verify_json(user_id!("@alice:localhost"), key_id, &signed)
            .expect("The signature of the user-signing key should be valid");

        let wrong_key = bob.public_key().get_first_key().unwrap();
        assert_matches!(
            wrong_key.verify_json(user_id!("@alice:localhost"), key_id, &signed),
            Err(SignatureError::VerificationError(_))
        );
    }
}
