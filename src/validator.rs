// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::fixed_time_eq;
use crate::Error;
use crate::JsonObject;
use crate::JwsVerifier;
use crate::KeyBindingJwt;
use crate::Result;
use crate::SdJwt;
use crate::SdObjectRehydrator;
use crate::HEADER_TYP;
use crate::KB_JWT_HEADER_TYP;
use crate::LEGACY_HEADER_TYP;
use serde_json::Value;

/// Criteria for validating a Key Binding JWT (KB-JWT).
///
/// Each check is opt-in: once an expectation is supplied the validation fails
/// closed on any difference.
#[derive(Debug, Clone)]
pub struct KeyBindingOptions {
  /// Expected value of the KB-JWT `nonce` claim.
  pub nonce: Option<String>,
  /// Expected value of the KB-JWT `aud` claim.
  pub aud: Option<String>,
  /// Maximum accepted distance between `iat` and the verification time, in
  /// seconds, applied in both directions.
  pub max_age_secs: Option<u64>,
  /// Accepted `typ` header values.
  pub allowed_typ_values: Vec<String>,
}

impl Default for KeyBindingOptions {
  fn default() -> Self {
    Self {
      nonce: None,
      aud: None,
      max_age_secs: None,
      allowed_typ_values: vec![KB_JWT_HEADER_TYP.to_string()],
    }
  }
}

impl KeyBindingOptions {
  /// Constructor that sets all options to their defaults.
  pub fn new() -> Self {
    Self::default()
  }

  /// Requires the KB-JWT `nonce` claim to equal `nonce`.
  pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
    self.nonce = Some(nonce.into());
    self
  }

  /// Requires the KB-JWT `aud` claim to equal `aud`.
  pub fn aud(mut self, aud: impl Into<String>) -> Self {
    self.aud = Some(aud.into());
    self
  }

  /// Requires `iat` to be within `max_age` seconds of the verification time,
  /// in either direction.
  pub fn max_age_secs(mut self, max_age: u64) -> Self {
    self.max_age_secs = Some(max_age);
    self
  }

  /// Accepts an additional historical `typ` header value.
  pub fn allow_typ_value(mut self, typ: impl Into<String>) -> Self {
    self.allowed_typ_values.push(typ.into());
    self
  }
}

/// Verifier-side orchestration over a parsed [`SdJwt`]: issuer signature,
/// claim rehydration, and holder key binding.
pub struct SdJwtValidator<V> {
  verifier: V,
  rehydrator: SdObjectRehydrator,
}

impl<V: JwsVerifier> SdJwtValidator<V> {
  /// Creates a new [`SdJwtValidator`] that delegates cryptographic signature
  /// verification to `verifier` and disclosure processing to `rehydrator`.
  pub fn new(verifier: V, rehydrator: SdObjectRehydrator) -> Self {
    Self { verifier, rehydrator }
  }

  pub fn rehydrator(&self) -> &SdObjectRehydrator {
    &self.rehydrator
  }

  /// Checks the issuer's signature over the credential JWT.
  ///
  /// The unverified header is inspected first: `typ`, when present, must be
  /// `dc+sd-jwt` or the historical `vc+sd-jwt`, and `alg` must name an actual
  /// algorithm.
  pub async fn verify_signature(&self, sd_jwt: &SdJwt) -> Result<()> {
    if let Some(typ) = sd_jwt.header().get("typ").and_then(Value::as_str) {
      if typ != HEADER_TYP && typ != LEGACY_HEADER_TYP {
        return Err(Error::PayloadMalformed(format!(
          "credential header `typ` is {typ}, expected {HEADER_TYP} or {LEGACY_HEADER_TYP}"
        )));
      }
    }
    check_alg(sd_jwt.header())?;

    self
      .verifier
      .verify(&sd_jwt.jwt.to_string(), None)
      .await
      .map_err(|e| Error::SignatureInvalid(e.to_string()))
  }

  /// Validates the credential's Key Binding JWT.
  ///
  /// The validation process includes:
  /// - signature validation against the holder key in the credential's `cnf` claim,
  /// - the `typ` header against the configured allow-list,
  /// - the `sd_hash` claim against the digest of the received presentation bytes,
  /// - optional `nonce`, `aud` and `iat` age checks per `options`.
  ///
  /// `now` is the caller's clock, in seconds since the unix epoch.
  pub async fn verify_key_binding(&self, sd_jwt: &SdJwt, options: &KeyBindingOptions, now: i64) -> Result<()> {
    let Some(required_kb) = sd_jwt.required_key_bind() else {
      return Err(Error::KeyBindingUnbound);
    };
    let Some(kb_jwt) = sd_jwt.key_binding_jwt() else {
      return Err(Error::KeyBindingMissing);
    };

    let typ = kb_jwt
      .header()
      .get("typ")
      .and_then(Value::as_str)
      .ok_or_else(|| Error::PayloadMalformed("KB-JWT header lacks `typ`".to_string()))?;
    if !options.allowed_typ_values.iter().any(|allowed| allowed == typ) {
      return Err(Error::PayloadMalformed(format!(
        "KB-JWT header `typ` is {typ}, expected {KB_JWT_HEADER_TYP}"
      )));
    }
    check_alg(kb_jwt.header())?;

    self
      .verifier
      .verify(&kb_jwt.to_string(), Some(required_kb))
      .await
      .map_err(|e| Error::SignatureInvalid(e.to_string()))?;

    self.check_sd_hash(sd_jwt, kb_jwt)?;

    let claims = kb_jwt.claims();
    if let Some(expected) = options.nonce.as_deref() {
      if expected != claims.nonce {
        return Err(Error::NonceMismatch {
          expected: expected.to_owned(),
          found: claims.nonce.clone(),
        });
      }
    }
    if let Some(expected) = options.aud.as_deref() {
      if expected != claims.aud {
        return Err(Error::AudienceMismatch {
          expected: expected.to_owned(),
          found: claims.aud.clone(),
        });
      }
    }
    if let Some(max_age) = options.max_age_secs {
      if now.abs_diff(claims.iat) > max_age {
        return Err(Error::KeyBindingExpired { iat: claims.iat });
      }
    }

    Ok(())
  }

  /// Verifies the whole presentation: issuer signature, validity window,
  /// key binding (when the credential requires one or a KB-JWT is attached),
  /// and finally rehydration of the disclosed claims.
  pub async fn verify_presentation(
    &self,
    sd_jwt: &SdJwt,
    options: &KeyBindingOptions,
    now: i64,
  ) -> Result<JsonObject> {
    self.verify_signature(sd_jwt).await?;
    sd_jwt.check_validity_window(now)?;
    if sd_jwt.required_key_bind().is_some() || sd_jwt.key_binding_jwt().is_some() {
      self.verify_key_binding(sd_jwt, options, now).await?;
    }
    sd_jwt.clone().into_disclosed_object(&self.rehydrator)
  }

  /// Recomputes `sd_hash` from the exact bytes received and compares it in
  /// fixed time against the claimed value.
  fn check_sd_hash(&self, sd_jwt: &SdJwt, kb_jwt: &KeyBindingJwt) -> Result<()> {
    let hasher = self.rehydrator.hasher_for_alg(sd_jwt.claims()._sd_alg.as_deref())?;
    let expected = sd_jwt.sd_hash(hasher);
    if !fixed_time_eq(expected.as_bytes(), kb_jwt.claims().sd_hash.as_bytes()) {
      return Err(Error::SdHashMismatch);
    }
    Ok(())
  }
}

fn check_alg(header: &JsonObject) -> Result<()> {
  match header.get("alg").and_then(Value::as_str) {
    None => Err(Error::SignatureInvalid("header lacks `alg`".to_string())),
    Some("none") => Err(Error::SignatureInvalid("algorithm `none` is not acceptable".to_string())),
    Some(_) => Ok(()),
  }
}

#[cfg(test)]
mod test {
  use super::KeyBindingOptions;
  use super::SdJwtValidator;
  use crate::b64_url_encode;
  use crate::Disclosure;
  use crate::Error;
  use crate::JsonObject;
  use crate::JwsSigner;
  use crate::JwsVerifier;
  use crate::KeyBindingJwtBuilder;
  use crate::RequiredKeyBinding;
  use crate::SdJwt;
  use crate::SdObjectRehydrator;
  use crate::Sha256Hasher;
  use async_trait::async_trait;
  use serde_json::json;

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

  /// Accepts every signature; records nothing.
  struct AcceptAll;

  #[async_trait]
  impl JwsVerifier for AcceptAll {
    type Error = std::convert::Infallible;
    async fn verify(&self, _jws: &str, _key: Option<&RequiredKeyBinding>) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  fn validator() -> SdJwtValidator<AcceptAll> {
    SdJwtValidator::new(AcceptAll, SdObjectRehydrator::new_with_sha256())
  }

  async fn signed_sd_jwt(claims: serde_json::Value) -> SdJwt {
    let header = json!({"typ": "dc+sd-jwt", "alg": "HS256"});
    let jws = StubSigner
      .sign(header.as_object().unwrap(), claims.as_object().unwrap())
      .await
      .unwrap();
    let compact = String::from_utf8(jws).unwrap();
    SdJwt::parse(&format!("{compact}~")).unwrap()
  }

  fn cnf_claims() -> serde_json::Value {
    json!({
      "cnf": { "jwk": { "kty": "oct" } },
      "_sd_alg": "sha-256",
    })
  }

  async fn bound_sd_jwt(iat: i64, aud: &str, nonce: &str) -> SdJwt {
    let mut sd_jwt = signed_sd_jwt(cnf_claims()).await;
    let kb_jwt = KeyBindingJwtBuilder::new()
      .iat(iat)
      .aud(aud)
      .nonce(nonce)
      .finish(&sd_jwt, &Sha256Hasher::new(), "HS256", &StubSigner)
      .await
      .unwrap();
    sd_jwt.attach_key_binding_jwt(kb_jwt);
    sd_jwt
  }

  #[tokio::test]
  async fn key_binding_happy_path() {
    let sd_jwt = bound_sd_jwt(1_683_000_000, "did:test:verifier", "nonce-test").await;
    let options = KeyBindingOptions::new()
      .nonce("nonce-test")
      .aud("did:test:verifier")
      .max_age_secs(600);
    validator()
      .verify_key_binding(&sd_jwt, &options, 1_683_000_100)
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn missing_cnf_is_unbound() {
    let sd_jwt = signed_sd_jwt(json!({"_sd_alg": "sha-256"})).await;
    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new(), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::KeyBindingUnbound));
  }

  #[tokio::test]
  async fn missing_kb_jwt_is_reported() {
    let sd_jwt = signed_sd_jwt(cnf_claims()).await;
    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new(), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::KeyBindingMissing));
  }

  #[tokio::test]
  async fn tampered_disclosures_change_sd_hash() {
    let mut sd_jwt = bound_sd_jwt(0, "aud", "nonce").await;
    // Sneak a disclosure in after the KB-JWT was bound.
    sd_jwt
      .disclosures
      .push(Disclosure::array_element("salt".to_string(), "FR".into()));
    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new(), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::SdHashMismatch));
  }

  #[tokio::test]
  async fn nonce_and_aud_mismatches() {
    let sd_jwt = bound_sd_jwt(0, "aud", "nonce").await;
    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new().nonce("other"), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::NonceMismatch { .. }));

    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new().aud("other"), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::AudienceMismatch { .. }));
  }

  #[tokio::test]
  async fn stale_and_future_iat_are_rejected() {
    let sd_jwt = bound_sd_jwt(1_000, "aud", "nonce").await;
    let options = KeyBindingOptions::new().max_age_secs(60);
    // Too old.
    let result = validator().verify_key_binding(&sd_jwt, &options, 2_000).await;
    assert!(matches!(result.unwrap_err(), Error::KeyBindingExpired { iat: 1_000 }));
    // Too far in the future.
    let result = validator().verify_key_binding(&sd_jwt, &options, 0).await;
    assert!(matches!(result.unwrap_err(), Error::KeyBindingExpired { iat: 1_000 }));
  }

  #[tokio::test]
  async fn empty_aud_can_be_required() {
    let sd_jwt = bound_sd_jwt(0, "", "nonce").await;
    validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new().aud(""), 0)
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn credential_alg_none_is_rejected() {
    let header = json!({"typ": "dc+sd-jwt", "alg": "none"});
    let claims = json!({"sub": "user"});
    let jws = StubSigner
      .sign(header.as_object().unwrap(), claims.as_object().unwrap())
      .await
      .unwrap();
    let sd_jwt = SdJwt::parse(&format!("{}~", String::from_utf8(jws).unwrap())).unwrap();
    let result = validator().verify_signature(&sd_jwt).await;
    assert!(matches!(result.unwrap_err(), Error::SignatureInvalid(_)));
  }

  #[tokio::test]
  async fn unexpected_credential_typ_is_rejected() {
    let header = json!({"typ": "jwt", "alg": "HS256"});
    let claims = json!({"sub": "user"});
    let jws = StubSigner
      .sign(header.as_object().unwrap(), claims.as_object().unwrap())
      .await
      .unwrap();
    let sd_jwt = SdJwt::parse(&format!("{}~", String::from_utf8(jws).unwrap())).unwrap();
    let result = validator().verify_signature(&sd_jwt).await;
    assert!(matches!(result.unwrap_err(), Error::PayloadMalformed(_)));
  }

  #[tokio::test]
  async fn legacy_credential_typ_is_accepted() {
    let header = json!({"typ": "vc+sd-jwt", "alg": "HS256"});
    let claims = json!({"sub": "user"});
    let jws = StubSigner
      .sign(header.as_object().unwrap(), claims.as_object().unwrap())
      .await
      .unwrap();
    let sd_jwt = SdJwt::parse(&format!("{}~", String::from_utf8(jws).unwrap())).unwrap();
    validator().verify_signature(&sd_jwt).await.unwrap();
  }

  #[tokio::test]
  async fn kb_typ_allow_list() {
    let mut sd_jwt = signed_sd_jwt(cnf_claims()).await;
    // Sign a KB-JWT whose `typ` is a historical variant.
    let kb_jwt = KeyBindingJwtBuilder::new()
      .iat(0)
      .aud("aud")
      .nonce("nonce")
      .finish(&sd_jwt, &Sha256Hasher::new(), "HS256", &StubSigner)
      .await
      .unwrap();
    let mut altered_header = kb_jwt.header().clone();
    altered_header.insert("typ".to_string(), json!(" kb+jwt"));
    let altered_payload = serde_json::to_value(kb_jwt.claims()).unwrap();
    let jws = StubSigner
      .sign(&altered_header, altered_payload.as_object().unwrap())
      .await
      .unwrap();
    let altered_kb = crate::KeyBindingJwt::parse(&String::from_utf8(jws).unwrap()).unwrap();
    sd_jwt.attach_key_binding_jwt(altered_kb);

    let result = validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new(), 0)
      .await;
    assert!(matches!(result.unwrap_err(), Error::PayloadMalformed(_)));

    validator()
      .verify_key_binding(&sd_jwt, &KeyBindingOptions::new().allow_typ_value(" kb+jwt"), 0)
      .await
      .unwrap();
  }
}
