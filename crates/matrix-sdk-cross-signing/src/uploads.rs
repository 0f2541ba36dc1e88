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

//! The network boundary of the cross-signing service.
//!
//! The service never talks HTTP itself, it hands requests to a
//! [`KeysUploader`] and, if the homeserver asks for user-interactive
//! authentication, to a [`UiaInterceptor`].

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use ruma::api::client::uiaa::AuthData;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    config::CrossSigningConfig,
    requests::{SignatureUploadRequest, SignatureUploadResponse, UploadSigningKeysRequest},
};

/// The user-interactive authentication challenge a homeserver answered an
/// upload with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiaaChallenge {
    /// The session ID that needs to be passed back with the authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// The flows the client can follow, each one a list of stage types.
    #[serde(default)]
    pub flows: Vec<Vec<String>>,
    /// The stages that were already completed.
    #[serde(default)]
    pub completed: Vec<String>,
}

/// Error type describing failed uploads.
#[derive(Clone, Debug, Error)]
pub enum UploadError {
    /// The homeserver requires user-interactive authentication before it
    /// accepts the upload.
    #[error("the homeserver requires user-interactive authentication")]
    AuthRequired(UiaaChallenge),

    /// The upload failed but might succeed if it's repeated, e.g. a
    /// connection error or a rate limit.
    #[error("the upload failed temporarily: {0}")]
    Transient(String),

    /// The upload failed and repeating it won't help.
    #[error("the upload failed: {0}")]
    Permanent(String),

    /// The homeserver rejected some of the uploaded signatures.
    #[error("the homeserver rejected some of the uploaded signatures")]
    SignaturesRejected(SignatureUploadResponse),
}

impl UploadError {
    /// Is it worth repeating the upload that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }

    /// Get the user-interactive authentication challenge, if this error
    /// carries one.
    pub fn as_uiaa_challenge(&self) -> Option<&UiaaChallenge> {
        as_variant::as_variant!(self, UploadError::AuthRequired)
    }
}

/// The transport that publishes our cross-signing keys and signatures.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait KeysUploader: Send + Sync {
    /// Upload the public parts of our cross-signing keys.
    ///
    /// # Arguments
    ///
    /// * `request` - The public keys that should be published.
    ///
    /// * `auth` - The authentication data answering a previous
    ///   [`UploadError::AuthRequired`] challenge, if any.
    async fn upload_signing_keys(
        &self,
        request: &UploadSigningKeysRequest,
        auth: Option<AuthData>,
    ) -> Result<(), UploadError>;

    /// Upload new signatures of device keys or cross-signing keys.
    async fn upload_signatures(
        &self,
        request: &SignatureUploadRequest,
    ) -> Result<SignatureUploadResponse, UploadError>;
}

/// Performs a stage of user-interactive authentication, usually by asking the
/// user for their password.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait UiaInterceptor: Send + Sync {
    /// Answer the given challenge.
    ///
    /// Returning `None` cancels the operation that required the
    /// authentication.
    async fn perform_stage(&self, challenge: &UiaaChallenge) -> Option<AuthData>;
}

/// Run an upload, repeating it with an exponential backoff as long as it
/// fails with a retryable error.
///
/// At most `attempt_limit` attempts are made, at least one attempt is always
/// made.
pub(crate) async fn retry_upload<T, F, Fut>(
    config: &CrossSigningConfig,
    attempt_limit: u64,
    mut upload: F,
) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    use backoff::{future::retry, Error as RetryError, ExponentialBackoff};

    let backoff = ExponentialBackoff {
        initial_interval: config.initial_retry_interval,
        current_interval: config.initial_retry_interval,
        max_elapsed_time: config.retry_timeout,
        ..Default::default()
    };
    let attempt_count = AtomicU64::new(1);

    let attempt = || {
        // Turn errors into permanent errors when the attempt limit is reached.
        let stop = attempt_count.fetch_add(1, Ordering::Relaxed) >= attempt_limit;
        let upload = upload();

        async move {
            upload.await.map_err(|error| {
                if !stop && error.is_retryable() {
                    warn!(%error, "Upload failed, retrying");
                    RetryError::transient(error)
                } else {
                    RetryError::Permanent(error)
                }
            })
        }
    };

    retry(backoff, attempt).await
}
