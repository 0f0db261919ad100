//! Canonical request signing shared by the redirect builder, the callback
//! verifier and the status client.
//!
//! The wire protocol is fixed by the gateway's deployed verifier: values of
//! the canonicalized payload joined with `|`, prefixed with `secret|`, hashed
//! with SHA-1 and rendered as lowercase hex. SHA-1 is weak but must be
//! preserved bit-for-bit; changing it requires a coordinated protocol
//! version bump with the gateway operator.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Sandbox credentials the gateway expects whenever testing mode is on,
/// regardless of configured values.
pub const SANDBOX_MERCHANT_ID: &str = "1396424";
pub const SANDBOX_SECRET_KEY: &str = "test";

// Excluded by key existence, not truthiness: an empty-string value still
// counts as present.
const EXCLUDED_KEYS: [&str; 2] = ["signature", "response_signature_string"];

#[derive(Debug, Clone)]
pub struct MerchantCredentials {
    pub merchant_id: String,
    pub secret_key: String,
    pub testing_mode: bool,
}

impl MerchantCredentials {
    pub fn effective_merchant_id(&self) -> &str {
        if self.testing_mode { SANDBOX_MERCHANT_ID } else { &self.merchant_id }
    }

    pub fn effective_secret(&self) -> &str {
        if self.testing_mode { SANDBOX_SECRET_KEY } else { &self.secret_key }
    }
}

/// Named parameters of a gateway request or callback. Keys are held sorted
/// (ordinal comparison) so the signable string is deterministic regardless
/// of insertion order.
#[derive(Debug, Clone, Default)]
pub struct SignablePayload {
    fields: BTreeMap<String, String>,
}

impl SignablePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }

    // Canonical value sequence: excluded keys removed, empty-valued fields
    // dropped entirely (they contribute neither a key nor a placeholder).
    fn signable_values(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(key, value)| !EXCLUDED_KEYS.contains(&key.as_str()) && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SignablePayload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Lowercase hex SHA-1 over `secret|v1|v2|...|vn`.
pub fn sign(payload: &SignablePayload, credentials: &MerchantCredentials) -> String {
    let mut canonical = String::from(credentials.effective_secret());
    for value in payload.signable_values() {
        canonical.push('|');
        canonical.push_str(value);
    }
    hex::encode(Sha1::digest(canonical.as_bytes()))
}

/// Recompute over the same canonicalization and compare constant-time.
/// Hex case of the supplied signature is not significant; anything short of
/// an exact digest match fails.
pub fn verify(payload: &SignablePayload, supplied: &str, credentials: &MerchantCredentials) -> bool {
    let expected = sign(payload, credentials);
    let supplied = supplied.to_ascii_lowercase();
    ConstantTimeEq::ct_eq(expected.as_bytes(), supplied.as_bytes()).unwrap_u8() == 1
}
