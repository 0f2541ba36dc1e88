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

use ruma::{CanonicalJsonError, OwnedDeviceId, OwnedUserId};
use serde_json::Error as SerdeError;
use thiserror::Error;

use crate::{
    store::{CryptoStoreError, SecretImportError},
    types::KeyUsage,
    uploads::UploadError,
};

/// A `Result` type alias for the operations of the cross-signing service.
pub type CrossSigningResult<T, E = CrossSigningError> = Result<T, E>;

/// Error type describing different errors that can happen when we create,
/// check or verify signatures.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The signature was made using an unsupported algorithm.
    #[error("the signature used an unsupported algorithm")]
    UnsupportedAlgorithm,

    /// The signing key that should create or check a signature is missing.
    #[error("the signing key is missing from the object that signed the message")]
    MissingSigningKey,

    /// The user id of signing key differs from the user id that provided the
    /// signature.
    #[error("the user id of the signing key differs user id that provided the signature")]
    UserIdMismatch,

    /// The provided JSON value that was signed and the signature should be
    /// checked isn't a valid JSON object.
    #[error("the provided JSON value isn't an object")]
    NotAnObject,

    /// The provided JSON object doesn't contain a signature made by the
    /// requested key.
    #[error("the provided JSON object doesn't contain a signatures field")]
    NoSignatureFound,

    /// The signature couldn't be verified.
    #[error(transparent)]
    VerificationError(#[from] vodozemac::SignatureError),

    /// The public key isn't a valid ed25519 key.
    #[error(transparent)]
    InvalidKey(#[from] vodozemac::KeyError),

    /// The signature could not be decoded.
    #[error("the given signature is not valid and can't be decoded")]
    InvalidSignature,

    /// The signed object couldn't be converted into its canonical JSON form.
    #[error(transparent)]
    JsonError(#[from] CanonicalJsonError),

    /// The signed object couldn't be serialized.
    #[error(transparent)]
    Serialization(#[from] SerdeError),
}

/// Error type for the operations of the cross-signing service, the
/// operations that create, import or use our private cross-signing keys.
#[derive(Error, Debug)]
pub enum CrossSigningError {
    /// Cross-signing hasn't been set up for our own user yet, or our public
    /// key set is unknown.
    #[error("cross-signing hasn't been set up for {0}")]
    NotConfigured(OwnedUserId),

    /// The private part of the needed cross-signing key isn't available
    /// locally.
    #[error("the private {} cross-signing key is missing", .0.abbreviation())]
    MissingSigningKey(KeyUsage),

    /// The device that should be signed isn't known.
    #[error("the device {1} of user {0} is unknown")]
    UnknownDevice(OwnedUserId, OwnedDeviceId),

    /// The master key of the user that should be signed isn't known.
    #[error("the master key of {0} is unknown")]
    UnknownMasterKey(OwnedUserId),

    /// The server asked for user-interactive authentication and the
    /// interceptor didn't provide any.
    #[error("the user-interactive authentication was cancelled")]
    UiaCancelled,

    /// Uploading the keys or signatures failed.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Creating or checking a signature failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The storage layer returned an error.
    #[error("failed to read or write to the crypto store {0}")]
    Store(#[from] CryptoStoreError),

    /// A private key couldn't be imported.
    #[error(transparent)]
    SecretImport(#[from] SecretImportError),
}
