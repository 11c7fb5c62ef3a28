// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA256;
#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA256_LEN;
#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA384;
#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA384_LEN;
#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA512;
#[cfg(feature = "sha")]
use crypto::hashes::sha::SHA512_LEN;

use crate::b64_url_encode;

/// Name of the default hash algorithm when a payload omits `_sd_alg`.
pub const SHA_ALG_NAME: &str = "sha-256";

/// Hash algorithms a payload may name in `_sd_alg` without any opt-in.
pub const REGISTERED_ALG_NAMES: [&str; 3] = ["sha-256", "sha-384", "sha-512"];

/// Hash algorithms that are only usable behind an explicit legacy opt-in.
pub const WEAK_ALG_NAMES: [&str; 2] = ["md5", "sha-1"];

/// Used to implement hash functions to be used for encoding/decoding.
///
/// ## Note
///
/// Implementations of this trait are expected only for algorithms listed in
/// the IANA "Named Information Hash Algorithm" registry.
/// See [Hash Function Claim](https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-12.html#name-hash-function-claim)
pub trait Hasher: Sync + Send {
  /// Digests input to produce unique fixed-size hash value in bytes.
  fn digest(&self, input: &[u8]) -> Vec<u8>;

  /// Returns the name of hash function used.
  ///
  /// ## Note
  ///
  /// The hash algorithm identifier MUST be a hash algorithm value from the
  /// "Hash Name String" column in the IANA "Named Information Hash Algorithm"
  /// registry.
  fn alg_name(&self) -> &'static str;

  /// Returns the base64url-encoded digest of a `disclosure`.
  fn encoded_digest(&self, disclosure: &str) -> String {
    b64_url_encode(self.digest(disclosure.as_bytes()))
  }
}

/// Returns whether `alg` is one of the algorithms gated behind the legacy
/// opt-in.
pub fn is_weak_alg(alg: &str) -> bool {
  WEAK_ALG_NAMES.contains(&alg)
}

/// An implementation of [`Hasher`] that uses the `sha-256` hash function.
#[cfg(feature = "sha")]
#[derive(Debug, Default, Clone)]
pub struct Sha256Hasher;

#[cfg(feature = "sha")]
impl Sha256Hasher {
  pub const ALG_NAME: &'static str = "sha-256";

  /// Creates a new [`Sha256Hasher`].
  pub fn new() -> Self {
    Sha256Hasher {}
  }
}

#[cfg(feature = "sha")]
impl Hasher for Sha256Hasher {
  fn digest(&self, input: &[u8]) -> Vec<u8> {
    let mut digest: [u8; SHA256_LEN] = Default::default();
    SHA256(input, &mut digest);
    digest.to_vec()
  }

  fn alg_name(&self) -> &'static str {
    Sha256Hasher::ALG_NAME
  }
}

/// An implementation of [`Hasher`] that uses the `sha-384` hash function.
#[cfg(feature = "sha")]
#[derive(Debug, Default, Clone)]
pub struct Sha384Hasher;

#[cfg(feature = "sha")]
impl Sha384Hasher {
  pub const ALG_NAME: &'static str = "sha-384";

  /// Creates a new [`Sha384Hasher`].
  pub fn new() -> Self {
    Sha384Hasher {}
  }
}

#[cfg(feature = "sha")]
impl Hasher for Sha384Hasher {
  fn digest(&self, input: &[u8]) -> Vec<u8> {
    let mut digest: [u8; SHA384_LEN] = [0u8; SHA384_LEN];
    SHA384(input, &mut digest);
    digest.to_vec()
  }

  fn alg_name(&self) -> &'static str {
    Sha384Hasher::ALG_NAME
  }
}

/// An implementation of [`Hasher`] that uses the `sha-512` hash function.
#[cfg(feature = "sha")]
#[derive(Debug, Default, Clone)]
pub struct Sha512Hasher;

#[cfg(feature = "sha")]
impl Sha512Hasher {
  pub const ALG_NAME: &'static str = "sha-512";

  /// Creates a new [`Sha512Hasher`].
  pub fn new() -> Self {
    Sha512Hasher {}
  }
}

#[cfg(feature = "sha")]
impl Hasher for Sha512Hasher {
  fn digest(&self, input: &[u8]) -> Vec<u8> {
    let mut digest: [u8; SHA512_LEN] = [0u8; SHA512_LEN];
    SHA512(input, &mut digest);
    digest.to_vec()
  }

  fn alg_name(&self) -> &'static str {
    Sha512Hasher::ALG_NAME
  }
}

// Some test values taken from https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-05.html#name-hashing-disclosures
#[cfg(test)]
mod test {
  use crate::Hasher;
  use crate::Sha256Hasher;

  #[test]
  fn object_property_digest() {
    let disclosure = "WyI2cU1RdlJMNWhhaiIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0";
    let hasher = Sha256Hasher::new();
    let hash = hasher.encoded_digest(disclosure);
    assert_eq!("uutlBuYeMDyjLLTpf6Jxi7yNkEF35jdyWMn9U7b_RYY", hash);
  }

  #[test]
  fn escaped_value_digest() {
    let disclosure =
      "WyJlSThaV205UW5LUHBOUGVOZW5IZGhRIiwgImVtYWlsIiwgIlwidW51c3VhbCBlbWFpbCBhZGRyZXNzXCJAZXhhbXBsZS5qcCJd";
    let hasher = Sha256Hasher::new();
    let hash = hasher.encoded_digest(disclosure);
    assert_eq!("Kuet1yAa0HIQvYnOVd59hcViO9Ug6J2kSfqYRBeowvE", hash);
  }

  #[test]
  fn array_element_digest() {
    let disclosure = "WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgIkZSIl0";
    let hasher = Sha256Hasher::new();
    let hash = hasher.encoded_digest(disclosure);
    assert_eq!("w0I8EKcdCtUPkGCNUrfwVp2xEgNjtoIDlOxc9-PlOhs", hash);
  }

  #[test]
  fn weak_names_are_flagged() {
    assert!(super::is_weak_alg("md5"));
    assert!(super::is_weak_alg("sha-1"));
    assert!(!super::is_weak_alg("sha-256"));
  }
}
