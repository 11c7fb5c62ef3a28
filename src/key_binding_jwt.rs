// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use crate::jwt::Jwt;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::JwsSigner;
use crate::Result;
use crate::SdJwt;
use crate::SHA_ALG_NAME;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

/// `typ` value of a KB-JWT header.
pub const KB_JWT_HEADER_TYP: &str = "kb+jwt";

/// A holder key requirement, carried in the credential's `cnf` claim as
/// specified in [RFC7800](https://www.rfc-editor.org/rfc/rfc7800.html#section-3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredKeyBinding {
  /// Holder's public key as a JSON Web Key.
  Jwk(JsonObject),
  /// Reference to a key the verifier can resolve.
  Kid(String),
}

/// Claims set for key binding JWT.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyBindingJwtClaims {
  pub iat: i64,
  pub aud: String,
  pub nonce: String,
  pub sd_hash: String,
  #[serde(flatten)]
  pub properties: JsonObject,
}

/// A JWS signed by the holder, proving possession of the key the credential's
/// `cnf` claim names and binding the presentation to an audience and nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindingJwt(pub(crate) Jwt<KeyBindingJwtClaims>);

impl KeyBindingJwt {
  /// Parses a compact JWS into a [`KeyBindingJwt`].
  pub fn parse(kb_jwt: &str) -> Result<Self> {
    kb_jwt.parse()
  }

  pub fn header(&self) -> &JsonObject {
    &self.0.header
  }

  pub fn claims(&self) -> &KeyBindingJwtClaims {
    &self.0.claims
  }
}

impl Display for KeyBindingJwt {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0.jws)
  }
}

impl FromStr for KeyBindingJwt {
  type Err = Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    s.parse::<Jwt<KeyBindingJwtClaims>>().map(Self)
  }
}

/// Builder structure to create a [`KeyBindingJwt`] bound to a given SD-JWT
/// presentation.
#[derive(Debug, Default, Clone)]
pub struct KeyBindingJwtBuilder {
  header: JsonObject,
  iat: Option<i64>,
  aud: Option<String>,
  nonce: Option<String>,
  properties: JsonObject,
}

impl KeyBindingJwtBuilder {
  /// Creates a new [`KeyBindingJwtBuilder`].
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets additional JWS header entries; `typ` and `alg` are always
  /// overwritten when finishing.
  pub fn header(mut self, header: JsonObject) -> Self {
    self.header = header;
    self
  }

  /// Sets the `iat` value, in seconds since the unix epoch.
  pub fn iat(mut self, iat: i64) -> Self {
    self.iat = Some(iat);
    self
  }

  /// Sets the intended receiver of this KB-JWT.
  pub fn aud(mut self, aud: impl Into<String>) -> Self {
    self.aud = Some(aud.into());
    self
  }

  /// Sets the challenge the verifier supplied for this presentation.
  pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
    self.nonce = Some(nonce.into());
    self
  }

  /// Inserts a caller-chosen claim next to the required ones.
  pub fn insert_property(mut self, name: &str, value: Value) -> Self {
    self.properties.insert(name.to_string(), value);
    self
  }

  /// Signs the assembled claims over `sd_jwt`'s presentation prefix.
  ///
  /// `hasher`'s algorithm must match the credential's `_sd_alg`; `sd_hash`
  /// commits to the exact bytes of the presentation up to and including the
  /// last tilde.
  ///
  /// ## Error
  /// * [`Error::PayloadMalformed`] if `iat`, `aud`, or `nonce` was not set.
  /// * [`Error::UnsupportedAlgorithm`] on a hasher mismatch.
  /// * [`Error::SignatureInvalid`] if `alg` is `none` or the signer fails.
  pub async fn finish<S>(self, sd_jwt: &SdJwt, hasher: &dyn Hasher, alg: &str, signer: &S) -> Result<KeyBindingJwt>
  where
    S: JwsSigner,
  {
    if alg == "none" {
      return Err(Error::SignatureInvalid(
        "algorithm `none` cannot be used for a KB-JWT".to_string(),
      ));
    }
    let required_alg = sd_jwt.claims()._sd_alg.as_deref().unwrap_or(SHA_ALG_NAME);
    if required_alg != hasher.alg_name() {
      return Err(Error::UnsupportedAlgorithm(format!(
        "the provided hasher uses algorithm {}, but the credential requires {required_alg}",
        hasher.alg_name(),
      )));
    }

    let iat = self
      .iat
      .ok_or_else(|| Error::PayloadMalformed("a KB-JWT requires `iat`".to_string()))?;
    let aud = self
      .aud
      .ok_or_else(|| Error::PayloadMalformed("a KB-JWT requires `aud`".to_string()))?;
    let nonce = self
      .nonce
      .ok_or_else(|| Error::PayloadMalformed("a KB-JWT requires `nonce`".to_string()))?;

    let claims = KeyBindingJwtClaims {
      iat,
      aud,
      nonce,
      sd_hash: sd_jwt.sd_hash(hasher),
      properties: self.properties,
    };

    let mut header = self.header;
    header.insert("typ".to_string(), json!(KB_JWT_HEADER_TYP));
    header.insert("alg".to_string(), json!(alg));

    let payload = serde_json::to_value(&claims)
      .map_err(|e| Error::PayloadMalformed(format!("invalid KB-JWT claims: {e}")))?;
    let jws = signer
      .sign(&header, payload.as_object().expect("claims serialize to an object"))
      .await
      .map_err(|e| Error::SignatureInvalid(format!("KB-JWT signing failed: {e}")))
      .and_then(|jws_bytes| {
        String::from_utf8(jws_bytes).map_err(|_| Error::SignatureInvalid("signer returned an invalid JWS".to_string()))
      })?;

    Ok(KeyBindingJwt(Jwt {
      header,
      claims,
      jws,
    }))
  }
}

#[cfg(test)]
mod test {
  use super::KeyBindingJwtBuilder;
  use crate::b64_url_encode;
  use crate::Error;
  use crate::Hasher;
  use crate::JsonObject;
  use crate::JwsSigner;
  use crate::SdJwt;
  use crate::Sha256Hasher;
  use async_trait::async_trait;
  use serde_json::json;

  /// Assembles an unsigned-looking compact JWS without any cryptography.
  struct StubSigner;

  #[async_trait]
  impl JwsSigner for StubSigner {
    type Error = std::convert::Infallible;
    async fn sign(&self, header: &JsonObject, payload: &JsonObject) -> Result<Vec<u8>, Self::Error> {
      let header = b64_url_encode(serde_json::to_vec(header).unwrap());
      let payload = b64_url_encode(serde_json::to_vec(payload).unwrap());
      Ok(format!("{header}.{payload}.c2ln").into_bytes())
    }
  }

  // `{"alg":"HS256"}` / `{"_sd_alg": "sha-256"}` with a placeholder signature.
  const PRESENTATION: &str =
    "eyJhbGciOiJIUzI1NiJ9.eyJfc2RfYWxnIjogInNoYS0yNTYifQ.c2ln~WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgIkZSIl0~";

  #[tokio::test]
  async fn sd_hash_commits_to_the_presented_bytes() {
    let sd_jwt = SdJwt::parse(PRESENTATION).unwrap();
    let kb_jwt = KeyBindingJwtBuilder::new()
      .iat(1_683_000_000)
      .aud("did:test:verifier")
      .nonce("nonce-test")
      .finish(&sd_jwt, &Sha256Hasher::new(), "HS256", &StubSigner)
      .await
      .unwrap();

    let expected = Sha256Hasher::new().encoded_digest(PRESENTATION);
    assert_eq!(kb_jwt.claims().sd_hash, expected);
    assert_eq!(kb_jwt.header().get("typ").unwrap(), "kb+jwt");
    assert_eq!(kb_jwt.header().get("alg").unwrap(), "HS256");
  }

  #[tokio::test]
  async fn missing_required_claims_are_rejected() {
    let sd_jwt = SdJwt::parse(PRESENTATION).unwrap();
    let result = KeyBindingJwtBuilder::new()
      .aud("did:test:verifier")
      .nonce("nonce")
      .finish(&sd_jwt, &Sha256Hasher::new(), "HS256", &StubSigner)
      .await;
    assert!(matches!(result.unwrap_err(), Error::PayloadMalformed(_)));
  }

  #[tokio::test]
  async fn alg_none_is_rejected() {
    let sd_jwt = SdJwt::parse(PRESENTATION).unwrap();
    let result = KeyBindingJwtBuilder::new()
      .iat(0)
      .aud("aud")
      .nonce("nonce")
      .finish(&sd_jwt, &Sha256Hasher::new(), "none", &StubSigner)
      .await;
    assert!(matches!(result.unwrap_err(), Error::SignatureInvalid(_)));
  }

  #[tokio::test]
  async fn hasher_must_match_sd_alg() {
    let sd_jwt = SdJwt::parse(PRESENTATION).unwrap();
    let result = KeyBindingJwtBuilder::new()
      .iat(0)
      .aud("aud")
      .nonce("nonce")
      .finish(&sd_jwt, &crate::Sha384Hasher::new(), "HS256", &StubSigner)
      .await;
    assert!(matches!(result.unwrap_err(), Error::UnsupportedAlgorithm(_)));
  }

  #[tokio::test]
  async fn extra_properties_are_flattened() {
    let sd_jwt = SdJwt::parse(PRESENTATION).unwrap();
    let kb_jwt = KeyBindingJwtBuilder::new()
      .iat(0)
      .aud("aud")
      .nonce("nonce")
      .insert_property("transaction_id", json!("tx-1"))
      .finish(&sd_jwt, &Sha256Hasher::new(), "HS256", &StubSigner)
      .await
      .unwrap();
    assert_eq!(kb_jwt.claims().properties.get("transaction_id").unwrap(), "tx-1");

    // The compact form parses back into the same claims.
    let parsed = super::KeyBindingJwt::parse(&kb_jwt.to_string()).unwrap();
    assert_eq!(parsed.claims(), kb_jwt.claims());
  }
}
