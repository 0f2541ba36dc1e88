// Copyright 2021 The Matrix.org Foundation C.I.C.
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

use std::time::Duration;

/// The number of attempts made to upload our public cross-signing keys.
pub const DEFAULT_UPLOAD_RETRY_LIMIT: u64 = 3;

/// The number of attempts made to upload new signatures.
pub const DEFAULT_SIGNATURE_UPLOAD_RETRY_LIMIT: u64 = 10;

const DEFAULT_INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for the uploads the cross-signing service makes.
///
/// This sets how often and for how long an upload should be repeated when
/// the [`KeysUploader`] reports a retryable error.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use matrix_sdk_cross_signing::CrossSigningConfig;
///
/// // Give up on uploads after a single attempt or after 30s of retrying.
/// let config = CrossSigningConfig::new()
///     .disable_retry()
///     .retry_timeout(Duration::from_secs(30));
/// ```
///
/// [`KeysUploader`]: crate::uploads::KeysUploader
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CrossSigningConfig {
    pub(crate) upload_retry_limit: u64,
    pub(crate) signature_upload_retry_limit: u64,
    pub(crate) retry_timeout: Option<Duration>,
    pub(crate) initial_retry_interval: Duration,
}

impl Default for CrossSigningConfig {
    fn default() -> Self {
        Self {
            upload_retry_limit: DEFAULT_UPLOAD_RETRY_LIMIT,
            signature_upload_retry_limit: DEFAULT_SIGNATURE_UPLOAD_RETRY_LIMIT,
            retry_timeout: None,
            initial_retry_interval: DEFAULT_INITIAL_RETRY_INTERVAL,
        }
    }
}

impl CrossSigningConfig {
    /// Create a new default `CrossSigningConfig`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Make every upload fail after its first attempt.
    #[must_use]
    pub fn disable_retry(mut self) -> Self {
        self.upload_retry_limit = 1;
        self.signature_upload_retry_limit = 1;
        self
    }

    /// The number of attempts made to upload the public cross-signing keys.
    ///
    /// A limit of `0` behaves like a limit of `1`, the upload is always
    /// attempted once.
    #[must_use]
    pub fn upload_retry_limit(mut self, limit: u64) -> Self {
        self.upload_retry_limit = limit;
        self
    }

    /// The number of attempts made to upload new signatures.
    #[must_use]
    pub fn signature_upload_retry_limit(mut self, limit: u64) -> Self {
        self.signature_upload_retry_limit = limit;
        self
    }

    /// Set a timeout for how long an upload should be retried. The default is
    /// no timeout, only the retry limits apply.
    #[must_use]
    pub fn retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.retry_timeout = Some(retry_timeout);
        self
    }

    /// The time to wait before the first retry, later retries back off
    /// exponentially.
    #[must_use]
    pub fn initial_retry_interval(mut self, interval: Duration) -> Self {
        self.initial_retry_interval = interval;
        self
    }

    /// Get the configured number of attempts for signing key uploads.
    pub fn get_upload_retry_limit(&self) -> u64 {
        self.upload_retry_limit
    }

    /// Get the configured number of attempts for signature uploads.
    pub fn get_signature_upload_retry_limit(&self) -> u64 {
        self.signature_upload_retry_limit
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::CrossSigningConfig;

    #[test]
    fn smoketest() {
        let cfg = CrossSigningConfig::new()
            .retry_timeout(Duration::from_secs(32))
            .upload_retry_limit(4)
            .signature_upload_retry_limit(7)
            .initial_retry_interval(Duration::from_millis(10));

        assert_eq!(cfg.upload_retry_limit, 4);
        assert_eq!(cfg.signature_upload_retry_limit, 7);
        assert_eq!(cfg.retry_timeout, Some(Duration::from_secs(32)));
        assert_eq!(cfg.initial_retry_interval, Duration::from_millis(10));
    }

    #[test]
    fn testing_retry_settings() {
        let cfg = CrossSigningConfig::new();
        assert_eq!(cfg.get_upload_retry_limit(), 3);
        assert_eq!(cfg.get_signature_upload_retry_limit(), 10);
        assert_eq!(cfg.retry_timeout, None);

        let cfg = cfg.disable_retry();
        assert_eq!(cfg.get_upload_retry_limit(), 1);
        assert_eq!(cfg.get_signature_upload_retry_limit(), 1);
    }
}
