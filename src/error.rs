// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

/// Alias for a `Result` with the error type [`Error`].
pub type Result<T> = ::core::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
#[non_exhaustive]
pub enum Error {
  #[error("unsupported hash algorithm: {0}")]
  UnsupportedAlgorithm(String),

  #[error("weak hash algorithm {0} is rejected without explicit opt-in")]
  WeakAlgorithmRejected(String),

  #[error("invalid disclosure: {0}")]
  InvalidDisclosure(String),

  #[error("blinding plan does not match the claim object: {0}")]
  PlanShapeMismatch(String),

  #[error("malformed presentation: {0}")]
  MalformedPresentation(String),

  #[error("signature verification failed: {0}")]
  SignatureInvalid(String),

  #[error("malformed payload: {0}")]
  PayloadMalformed(String),

  #[error("digest {0} appears multiple times")]
  DuplicateDisclosureDigest(String),

  #[error("claim {0} of disclosure already exists")]
  ConflictingDisclosure(String),

  #[error("{0} disclosures could not be matched against any digest")]
  UnusedDisclosure(usize),

  #[error("a key binding JWT is required but none is attached")]
  KeyBindingMissing,

  #[error("the credential carries no `cnf` key to bind the holder against")]
  KeyBindingUnbound,

  #[error("KB-JWT `sd_hash` does not match the presented bytes")]
  SdHashMismatch,

  #[error("KB-JWT `nonce` mismatch: expected {expected}, found {found}")]
  NonceMismatch { expected: String, found: String },

  #[error("KB-JWT `aud` mismatch: expected {expected}, found {found}")]
  AudienceMismatch { expected: String, found: String },

  #[error("KB-JWT `iat` {iat} is outside the accepted window")]
  KeyBindingExpired { iat: i64 },

  #[error("credential is not within its validity window: {0}")]
  CredentialExpired(String),

  #[error("credential has been revoked")]
  StatusRevoked,

  #[error("credential is suspended")]
  StatusSuspended,

  #[error("status list unavailable: {0}")]
  StatusUnavailable(String),
}

impl Error {
  /// Returns the stable name of this error kind, e.g. `"SdHashMismatch"`.
  pub fn kind(&self) -> &'static str {
    self.into()
  }
}
