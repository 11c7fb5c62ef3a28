// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::jwt::Jwt;
use crate::BlindingPlan;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::JwsSigner;
use crate::RequiredKeyBinding;
use crate::Result;
use crate::SdJwt;
use crate::SdJwtClaims;
use crate::SdObjectBlinder;
#[cfg(feature = "sha")]
use crate::Sha256Hasher;
use crate::HEADER_TYP;
use rand::rngs::StdRng;
use rand::RngCore;

/// Builder structure to create an issuable SD-JWT.
#[derive(Debug)]
pub struct SdJwtBuilder<H: Hasher, R: RngCore = StdRng> {
  object: Value,
  plan: BlindingPlan,
  blinder: SdObjectBlinder<H, R>,
  key_bind: Option<RequiredKeyBinding>,
  header: JsonObject,
}

#[cfg(feature = "sha")]
impl SdJwtBuilder<Sha256Hasher> {
  /// Creates a new [`SdJwtBuilder`] with the `sha-256` hash function.
  ///
  /// ## Error
  /// Returns [`Error::PayloadMalformed`] if `object` is not a JSON object.
  pub fn new<T: Serialize>(object: T) -> Result<Self> {
    Self::new_with_blinder(object, SdObjectBlinder::new())
  }
}

impl<H: Hasher, R: RngCore> SdJwtBuilder<H, R> {
  /// Creates a new [`SdJwtBuilder`] around a preconfigured blinder, for a
  /// custom hash function, RNG, salt size, or decoy count.
  pub fn new_with_blinder<T: Serialize>(object: T, blinder: SdObjectBlinder<H, R>) -> Result<Self> {
    let object = serde_json::to_value(object).map_err(|e| Error::PayloadMalformed(e.to_string()))?;
    if !object.is_object() {
      return Err(Error::PayloadMalformed("expected a JSON object".to_string()));
    }
    Ok(Self {
      object,
      plan: BlindingPlan::Keep,
      blinder,
      key_bind: None,
      header: JsonObject::new(),
    })
  }

  /// Selects the values to conceal.
  pub fn plan(mut self, plan: BlindingPlan) -> Self {
    self.plan = plan;
    self
  }

  /// Conceals every property and array element of the object, at every depth.
  pub fn blind_all(mut self) -> Self {
    self.plan = BlindingPlan::blind_all(&self.object);
    self
  }

  /// Sets additional JWS header entries; `typ` and `alg` are always
  /// overwritten when finishing.
  pub fn header(mut self, header: JsonObject) -> Self {
    self.header = header;
    self
  }

  /// Require a proof of possession of a given key from the holder.
  ///
  /// This operation adds a JWT confirmation (`cnf`) claim as specified in
  /// [RFC7800](https://www.rfc-editor.org/rfc/rfc7800.html#section-3).
  pub fn require_key_binding(mut self, key_bind: RequiredKeyBinding) -> Self {
    self.key_bind = Some(key_bind);
    self
  }

  /// Creates an SD-JWT with the provided data.
  ///
  /// ## Error
  /// * [`Error::PlanShapeMismatch`] if the plan does not fit the object.
  /// * [`Error::SignatureInvalid`] if `alg` is `none` or the signer fails.
  pub async fn finish<S>(self, signer: &S, alg: &str) -> Result<SdJwt>
  where
    S: JwsSigner,
  {
    if alg == "none" {
      return Err(Error::SignatureInvalid(
        "algorithm `none` cannot be used for a credential".to_string(),
      ));
    }
    let SdJwtBuilder {
      object,
      plan,
      mut blinder,
      key_bind,
      header: extra_header,
    } = self;

    let blinded = blinder.blind(&object, &plan)?;
    let mut object = blinded.object;
    // Add key binding requirement as `cnf`.
    if let Some(key_bind) = key_bind {
      let key_bind = serde_json::to_value(key_bind).map_err(|e| Error::PayloadMalformed(e.to_string()))?;
      object.insert("cnf".to_string(), key_bind);
    }

    let mut header = extra_header;
    header.insert("typ".to_string(), json!(HEADER_TYP));
    header.insert("alg".to_string(), json!(alg));

    let jws = signer
      .sign(&header, &object)
      .await
      .map_err(|e| Error::SignatureInvalid(format!("signing failed: {e}")))
      .and_then(|jws_bytes| {
        String::from_utf8(jws_bytes).map_err(|_| Error::SignatureInvalid("signer returned an invalid JWS".to_string()))
      })?;

    let claims = serde_json::from_value::<SdJwtClaims>(Value::Object(object))
      .map_err(|e| Error::PayloadMalformed(format!("invalid SD-JWT claims: {e}")))?;
    let jwt = Jwt { header, claims, jws };

    Ok(SdJwt::new(jwt, blinded.disclosures, None))
  }
}
