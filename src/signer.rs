// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;

use crate::RequiredKeyBinding;

pub type JsonObject = Map<String, Value>;

/// JWS algorithms callers may name in `alg`. Availability depends on the
/// host's crypto provider; `none` is always rejected.
pub const JWS_ALG_NAMES: [&str; 9] = [
  "ES256", "ES384", "ES512", "PS256", "PS384", "PS512", "EdDSA", "RS256", "HS256",
];

/// JSON Web Signature (JWS) Signer.
#[async_trait]
pub trait JwsSigner {
  type Error: Error;
  /// Creates a JWS. The algorithm used for signing must be read from the
  /// `header.alg` property.
  async fn sign(&self, header: &JsonObject, payload: &JsonObject) -> Result<Vec<u8>, Self::Error>;
}

/// JSON Web Signature (JWS) Verifier.
///
/// The core never touches key material; implementations locate keys
/// themselves and only report whether a signature checks out.
#[async_trait]
pub trait JwsVerifier {
  type Error: Error;
  /// Checks the signature of the given compact `jws`.
  ///
  /// When `key` is provided the signature MUST be checked against the key
  /// material it references (the holder key taken from a credential's `cnf`
  /// claim). Otherwise implementations resolve the verification key from the
  /// JWS' unverified header, e.g. through `kid`, which is what enables key
  /// rotation.
  async fn verify(&self, jws: &str, key: Option<&RequiredKeyBinding>) -> Result<(), Self::Error>;
}
