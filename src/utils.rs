// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::Error;
use crate::Result;

/// Encodes `bytes` as unpadded base64url.
pub(crate) fn b64_url_encode(bytes: impl AsRef<[u8]>) -> String {
  multibase::Base::Base64Url.encode(bytes)
}

/// Decodes an unpadded base64url string, tolerating trailing padding on input.
pub(crate) fn b64_url_decode(input: &str) -> Result<Vec<u8>> {
  multibase::Base::Base64Url
    .decode(input.trim_end_matches('='))
    .map_err(|_| Error::InvalidDisclosure(format!("input is not base64url-encoded: {input}")))
}

/// Compares two byte strings without short-circuiting on the first
/// mismatching byte. Used for all digest comparisons against untrusted input.
pub(crate) fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  let mut diff: u8 = 0;
  for (x, y) in a.iter().zip(b.iter()) {
    diff |= x ^ y;
  }
  diff == 0
}
