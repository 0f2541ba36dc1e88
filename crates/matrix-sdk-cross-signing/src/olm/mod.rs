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

//! The cryptographic building blocks of cross-signing: our device's identity
//! key, the private cross-signing keys and the signature helpers.

mod account;
mod signing;
pub(crate) mod utility;

pub use account::Account;
pub(crate) use signing::{secret_name_for, usage_for_secret};
pub use signing::{
    CrossSigningStatus, MasterSigning, PrivateCrossSigningIdentity, SelfSigning, Signing,
    SigningError, UserSigning,
};
pub use utility::{canonical_signable, verify_ed25519_signature, SignedJsonObject, VerifyJson};
