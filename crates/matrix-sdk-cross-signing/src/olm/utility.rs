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

use ruma::{CanonicalJsonValue, UserId};
use serde::Serialize;
use serde_json::Value;
use vodozemac::{Ed25519PublicKey, Ed25519Signature};

use crate::{
    error::SignatureError,
    types::{CrossSigningKey, DeviceKeys, Signature, Signatures, ED25519_PREFIX},
};

/// Convert a JSON object into the canonical form that gets signed.
///
/// The top-level `signatures` and `unsigned` fields are removed, the
/// remaining object is serialized with lexicographically sorted keys and
/// without any insignificant whitespace.
pub fn canonical_signable(mut json: Value) -> Result<String, SignatureError> {
    let json_object = json.as_object_mut().ok_or(SignatureError::NotAnObject)?;
    let _ = json_object.remove("signatures");
    let _ = json_object.remove("unsigned");

    let canonical_json: CanonicalJsonValue = json.try_into()?;
    Ok(canonical_json.to_string())
}

/// Verify an unpadded base64 encoded Ed25519 signature over the given
/// canonical JSON string.
///
/// Both the signature and the public key are decoded first, any decoding
/// failure is returned as an error as well.
pub fn verify_ed25519_signature(
    signature: &str,
    public_key: &str,
    canonical_json: &str,
) -> Result<(), SignatureError> {
    let public_key = Ed25519PublicKey::from_base64(public_key)?;
    let signature =
        Ed25519Signature::from_base64(signature).map_err(|_| SignatureError::InvalidSignature)?;

    Ok(public_key.verify(canonical_json.as_bytes(), &signature)?)
}

/// An object that carries a signatures map and can be converted into its
/// canonical JSON form.
pub trait SignedJsonObject: Serialize {
    /// The signatures of the object.
    fn signatures(&self) -> &Signatures;
}

impl SignedJsonObject for DeviceKeys {
    fn signatures(&self) -> &Signatures {
        &self.signatures
    }
}

impl SignedJsonObject for CrossSigningKey {
    fn signatures(&self) -> &Signatures {
        &self.signatures
    }
}

/// Verify the signature of a signed JSON object.
pub trait VerifyJson {
    /// Verify a signed JSON object.
    ///
    /// The object must have a signatures key associated with an object of the
    /// form `user_id: {key_id: signature}`.
    ///
    /// Returns Ok if the signature was successfully verified, otherwise an
    /// SignatureError.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user who signed the JSON object.
    ///
    /// * `key_id` - The id of the key that signed the JSON object.
    ///
    /// * `signed_object` - The signed object that should be verified.
    fn verify_json(
        &self,
        user_id: &UserId,
        key_id: &str,
        signed_object: &impl SignedJsonObject,
    ) -> Result<(), SignatureError>;

    /// Verify a signature over an already canonicalized JSON string.
    ///
    /// The `canonical_json` needs to be correctly canonicalized, i.e. the
    /// output of [`canonical_signable()`].
    fn verify_canonicalized_json(
        &self,
        user_id: &UserId,
        key_id: &str,
        signatures: &Signatures,
        canonical_json: &str,
    ) -> Result<(), SignatureError>;
}

impl VerifyJson for Ed25519PublicKey {
    fn verify_json(
        &self,
        user_id: &UserId,
        key_id: &str,
        signed_object: &impl SignedJsonObject,
    ) -> Result<(), SignatureError> {
        let canonical_json = canonical_signable(serde_json::to_value(signed_object)?)?;
        self.verify_canonicalized_json(user_id, key_id, signed_object.signatures(), &canonical_json)
    }

    fn verify_canonicalized_json(
        &self,
        user_id: &UserId,
        key_id: &str,
        signatures: &Signatures,
        canonical_json: &str,
    ) -> Result<(), SignatureError> {
        if !key_id.starts_with(&format!("{ED25519_PREFIX}:")) {
            return Err(SignatureError::UnsupportedAlgorithm);
        }

        match signatures.get_raw(user_id, key_id) {
            Some(Signature::Ed25519(s)) => Ok(self.verify(canonical_json.as_bytes(), s)?),
            Some(_) => Err(SignatureError::InvalidSignature),
            None => Err(SignatureError::NoSignatureFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use proptest::prelude::*;
    use ruma::user_id;
    use serde_json::{json, Value};
    use similar_asserts::assert_eq;
    use vodozemac::{Ed25519PublicKey, Ed25519SecretKey};

    use super::{canonical_signable, verify_ed25519_signature, VerifyJson};
    use crate::{error::SignatureError, types::DeviceKeys};

    fn device_keys_json() -> Value {
        json!({
            "device_id": "GBEWHQOYGS",
            "algorithms": [
                "m.olm.v1.curve25519-aes-sha2",
                "m.megolm.v1.aes-sha2"
            ],
            "keys": {
                "curve25519:GBEWHQOYGS": "F8QhZ0Z1rjtWrQOblMDgZtEX5x1UrG7sZ2Kk3xliNAU",
                "ed25519:GBEWHQOYGS": "n469gw7zm+KW+JsFIJKnFVvCKU14HwQyocggcCIQgZY"
            },
            "signatures": {
                "@example:localhost": {
                    "ed25519:GBEWHQOYGS": "OlF2REsqjYdAfr04ONx8VS/5cB7KjrWYRlLF4eUm2foAiQL/RAfsjsa2JXZeoOHh6vEualZHbWlod49OewVqBg"
                }
            },
            "unsigned": {
                "device_display_name": "Weechat-Matrix-rs"
            },
            "user_id": "@example:localhost"
        })
    }

    #[test]
    fn test_signature_verification() {
        let device_keys: DeviceKeys = serde_json::from_value(device_keys_json()).unwrap();
        let signing_key =
            Ed25519PublicKey::from_base64("n469gw7zm+KW+JsFIJKnFVvCKU14HwQyocggcCIQgZY").unwrap();

        signing_key
            .verify_json(user_id!("@example:localhost"), "ed25519:GBEWHQOYGS", &device_keys)
            .expect("Can't verify device keys");
    }

    #[test]
    fn test_missing_and_invalid_signatures_are_distinguished() {
        let mut device_keys: DeviceKeys = serde_json::from_value(device_keys_json()).unwrap();
        let signing_key =
            Ed25519PublicKey::from_base64("n469gw7zm+KW+JsFIJKnFVvCKU14HwQyocggcCIQgZY").unwrap();

        assert_matches!(
            signing_key.verify_json(user_id!("@other:localhost"), "ed25519:GBEWHQOYGS", &device_keys),
            Err(SignatureError::NoSignatureFound)
        );

        // Changing a signed field invalidates the signature.
        device_keys.algorithms.pop();
        assert_matches!(
            signing_key.verify_json(
                user_id!("@example:localhost"),
                "ed25519:GBEWHQOYGS",
                &device_keys
            ),
            Err(SignatureError::VerificationError(_))
        );
    }

    #[test]
    fn test_unsigned_data_is_not_signed() {
        let mut json = device_keys_json();
        json["unsigned"] = json!({ "device_display_name": "Something else" });

        let device_keys: DeviceKeys = serde_json::from_value(json).unwrap();
        let signing_key =
            Ed25519PublicKey::from_base64("n469gw7zm+KW+JsFIJKnFVvCKU14HwQyocggcCIQgZY").unwrap();

        signing_key
            .verify_json(user_id!("@example:localhost"), "ed25519:GBEWHQOYGS", &device_keys)
            .expect("The unsigned section isn't covered by the signature");
    }

    #[test]
    fn test_canonical_signable() {
        let json = json!({
            "b": 1,
            "a": { "z": [1, 2], "y": "text" },
            "signatures": { "@a:b": { "ed25519:A": "sig" } },
            "unsigned": { "age": 10 }
        });

        assert_eq!(canonical_signable(json).unwrap(), r#"{"a":{"y":"text","z":[1,2]},"b":1}"#);
        assert_matches!(canonical_signable(json!([1, 2, 3])), Err(SignatureError::NotAnObject));
        assert_matches!(
            canonical_signable(json!({ "float": 1.5 })),
            Err(SignatureError::JsonError(_))
        );
    }

    #[test]
    fn test_verify_ed25519_signature() {
        let key = Ed25519SecretKey::new();
        let message = r#"{"a":1}"#;
        let signature = key.sign(message.as_bytes()).to_base64();
        let public_key = key.public_key().to_base64();

        verify_ed25519_signature(&signature, &public_key, message).unwrap();
        assert_matches!(
            verify_ed25519_signature(&signature, &public_key, r#"{"a":2}"#),
            Err(SignatureError::VerificationError(_))
        );
        assert_matches!(
            verify_ed25519_signature("not base64!", &public_key, message),
            Err(SignatureError::InvalidSignature)
        );
        assert_matches!(
            verify_ed25519_signature(&signature, "invalid", message),
            Err(SignatureError::InvalidKey(_))
        );
    }

    proptest! {
        #[test]
        fn canonical_form_ignores_key_order(entries in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..10)) {
            let forward: serde_json::Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: serde_json::Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

            let first = canonical_signable(Value::Object(forward)).unwrap();
            let second = canonical_signable(Value::Object(backward)).unwrap();

            prop_assert_eq!(first, second);
        }

        #[test]
        fn corrupted_signatures_never_verify(index in 0usize..64, bit in 0u8..8) {
            let key = Ed25519SecretKey::from_slice(&[7u8; 32]);
            let message = r#"{"keys":{},"user_id":"@example:localhost"}"#;
            let signature = key.sign(message.as_bytes()).to_bytes();

            let mut corrupted = signature;
            corrupted[index] ^= 1 << bit;
            let corrupted = vodozemac::base64_encode(corrupted);

            prop_assert!(
                verify_ed25519_signature(&corrupted, &key.public_key().to_base64(), message).is_err()
            );
        }
    }
}
