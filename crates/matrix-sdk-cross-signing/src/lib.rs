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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

mod config;
mod error;
mod identities;
mod machine;
pub mod olm;
pub mod requests;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trust;
pub mod types;
pub mod uploads;

pub use config::CrossSigningConfig;
pub use error::{CrossSigningError, CrossSigningResult, SignatureError};
pub use identities::{CrossSigningInfo, DeviceData, TrustLevel};
pub use machine::CrossSigningService;
pub use olm::{Account, CrossSigningStatus, PrivateCrossSigningIdentity};
pub use requests::{SignatureUploadRequest, SignatureUploadResponse, UploadSigningKeysRequest};
pub use store::{CryptoStore, CryptoStoreError, MemoryStore, PrivateKeysInfo, SecretImportError};
pub use trust::{
    DeviceListUpdate, DeviceTrustResult, RoomEncryptionTrustLevel, RoomInfo, RoomMembersProvider,
    TrustEvent, TrustPropagator, UserTrustResult,
};
pub use uploads::{KeysUploader, UiaInterceptor, UiaaChallenge, UploadError};
#[doc(no_inline)]
pub use vodozemac;

/// The version of the matrix-sdk-cross-signing crate being used
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

// Enable tracing for tests in this crate
#[cfg(all(test, not(target_arch = "wasm32")))]
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .init();
}
