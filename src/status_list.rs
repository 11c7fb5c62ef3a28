// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use serde::Deserialize;
use serde::Serialize;

use crate::b64_url_decode;
use crate::Error;
use crate::Result;

/// Widths an entry of a status list may have, in bits.
pub const STATUS_BITS: [u8; 4] = [1, 2, 4, 8];

/// Token's status claim, a reference into a status list.
/// See [OAuth status list specification](https://datatracker.ietf.org/doc/html/draft-ietf-oauth-status-list)
/// for more information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
  pub status_list: StatusListRef,
}

/// A `(uri, index)` pair selecting one entry of the status list published at
/// `uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusListRef {
  pub uri: String,
  pub idx: usize,
}

/// The meaning of a status list entry. Values above 2 are
/// application-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusResult {
  Valid,
  Invalid,
  Suspended,
  ApplicationSpecific(u8),
  /// The credential references no status list.
  Unknown,
}

impl From<u8> for StatusResult {
  fn from(value: u8) -> Self {
    match value {
      0 => StatusResult::Valid,
      1 => StatusResult::Invalid,
      2 => StatusResult::Suspended,
      other => StatusResult::ApplicationSpecific(other),
    }
  }
}

/// A status list as carried in a status list token: a zlib-deflated bitstring
/// packing one `bits`-wide entry per referenced credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusList {
  pub bits: u8,
  pub lst: String,
}

impl StatusList {
  /// Inflates the compressed bitstring.
  ///
  /// ## Error
  /// [`Error::PayloadMalformed`] if `bits` is not one of 1, 2, 4, 8, or the
  /// bitstring cannot be decompressed.
  pub fn decode(&self) -> Result<Vec<u8>> {
    if !STATUS_BITS.contains(&self.bits) {
      return Err(Error::PayloadMalformed(format!(
        "{} is not a valid status entry size",
        self.bits
      )));
    }
    let compressed = b64_url_decode(&self.lst)
      .map_err(|_| Error::PayloadMalformed("status list is not base64url-encoded".to_string()))?;
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
      .read_to_end(&mut inflated)
      .map_err(|e| Error::PayloadMalformed(format!("status list cannot be decompressed: {e}")))?;
    Ok(inflated)
  }

  /// Extracts entry `index` from the inflated bitstring. Entries are packed
  /// LSB-first within each byte.
  ///
  /// ## Error
  /// [`Error::StatusUnavailable`] if `index` is past the end of the list.
  pub fn get(inflated: &[u8], bits: u8, index: usize) -> Result<u8> {
    let bit_position = index * usize::from(bits);
    let byte = inflated.get(bit_position / 8).copied().ok_or_else(|| {
      Error::StatusUnavailable(format!("index {index} is out of range for the referenced list"))
    })?;
    let shift = bit_position % 8;
    let mask = (1u16 << bits) - 1;
    Ok(byte >> shift & mask as u8)
  }
}

/// Claims of a status list token. The token's signature is the fetcher's
/// concern; the reader only consumes its payload.
#[derive(Debug, Clone, Deserialize)]
struct StatusListTokenClaims {
  status_list: StatusList,
  /// Seconds the list may be cached for.
  #[serde(default)]
  ttl: Option<u64>,
}

/// Obtains status list tokens by URI.
///
/// Implementations typically perform an HTTPS GET with content-type
/// negotiation and verify the list issuer's signature before handing the
/// token over. Fetches may be cancelled by dropping the future; a lookup in
/// flight then reports [`Error::StatusUnavailable`] without side effects.
#[async_trait]
pub trait StatusListFetcher: Sync + Send {
  type Error: std::error::Error;
  /// Fetches the status list token published at `uri`, returning the token
  /// and the unix time it was obtained at.
  async fn fetch(&self, uri: &str) -> std::result::Result<(String, i64), Self::Error>;
}

/// Resolves a credential's status claim against its status list.
///
/// An optional cache keeps fetched lists for the time-to-live the list token
/// declares. The cache is transparent: disabling it only costs extra fetches.
pub struct StatusListReader<F> {
  fetcher: F,
  cache: Option<RwLock<HashMap<String, CachedList>>>,
}

#[derive(Debug, Clone)]
struct CachedList {
  list: StatusList,
  fetched_at: i64,
  ttl: u64,
}

impl<F: StatusListFetcher> StatusListReader<F> {
  /// Creates a reader that fetches the referenced list on every lookup.
  pub fn new(fetcher: F) -> Self {
    Self { fetcher, cache: None }
  }

  /// Creates a reader that caches fetched lists for the time-to-live their
  /// token declares. Lists without a time-to-live are not cached.
  pub fn with_cache(fetcher: F) -> Self {
    Self {
      fetcher,
      cache: Some(RwLock::new(HashMap::new())),
    }
  }

  /// Resolves `status` to the state recorded in the referenced list.
  ///
  /// A credential without a status claim resolves to
  /// [`StatusResult::Unknown`]; callers decide whether that is acceptable.
  ///
  /// ## Error
  /// [`Error::StatusUnavailable`] if the list cannot be fetched or the index
  /// is out of range.
  pub async fn lookup(&self, status: Option<&Status>, now: i64) -> Result<StatusResult> {
    let Some(status) = status else {
      return Ok(StatusResult::Unknown);
    };
    let reference = &status.status_list;

    let list = match self.cached_list(&reference.uri, now) {
      Some(list) => list,
      None => self.fetch_list(&reference.uri).await?,
    };

    let inflated = list.decode()?;
    let value = StatusList::get(&inflated, list.bits, reference.idx)?;
    Ok(StatusResult::from(value))
  }

  /// Fail-closed variant of [`StatusListReader::lookup`] for high-assurance
  /// callers: everything but a definite `Valid` is an error.
  pub async fn check(&self, status: Option<&Status>, now: i64) -> Result<()> {
    match self.lookup(status, now).await? {
      StatusResult::Valid => Ok(()),
      StatusResult::Invalid => Err(Error::StatusRevoked),
      StatusResult::Suspended => Err(Error::StatusSuspended),
      StatusResult::ApplicationSpecific(value) => Err(Error::StatusUnavailable(format!(
        "application-specific status {value} cannot be accepted"
      ))),
      StatusResult::Unknown => Err(Error::StatusUnavailable(
        "the credential references no status list".to_string(),
      )),
    }
  }

  fn cached_list(&self, uri: &str, now: i64) -> Option<StatusList> {
    let cache = self.cache.as_ref()?;
    let entries = cache.read().ok()?;
    let entry = entries.get(uri)?;
    (now < entry.fetched_at.saturating_add(entry.ttl as i64)).then(|| entry.list.clone())
  }

  async fn fetch_list(&self, uri: &str) -> Result<StatusList> {
    let (token, fetched_at) = self
      .fetcher
      .fetch(uri)
      .await
      .map_err(|e| Error::StatusUnavailable(format!("fetching {uri} failed: {e}")))?;
    let claims = parse_list_token(&token)?;

    if let (Some(cache), Some(ttl)) = (self.cache.as_ref(), claims.ttl) {
      if let Ok(mut entries) = cache.write() {
        entries.insert(
          uri.to_string(),
          CachedList {
            list: claims.status_list.clone(),
            fetched_at,
            ttl,
          },
        );
      }
    }

    Ok(claims.status_list)
  }
}

/// Extracts the claims from a status list token without checking its
/// signature.
fn parse_list_token(token: &str) -> Result<StatusListTokenClaims> {
  let payload = token
    .split('.')
    .nth(1)
    .ok_or_else(|| Error::StatusUnavailable("the status list token is not a compact JWS".to_string()))?;
  b64_url_decode(payload)
    .ok()
    .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    .ok_or_else(|| Error::StatusUnavailable("the status list token carries no status list".to_string()))
}
