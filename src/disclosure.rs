// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::b64_url_decode;
use crate::b64_url_encode;
use crate::Error;
use crate::Result;
use rand::RngCore;
use serde_json::Value;
use std::fmt::Display;

/// Byte length of salts produced by [`Disclosure::generate`].
pub(crate) const GENERATED_SALT_SIZE: usize = 16;

/// Distinguishes the two disclosure shapes.
///
/// An object property is encoded as the three-element array
/// `[salt, claim name, claim value]`, an array element as the two-element
/// array `[salt, claim value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisclosureKind {
  /// A disclosure for an object property, carrying the property name.
  ObjectProperty(String),
  /// A disclosure for an array element.
  ArrayElement,
}

/// A disclosable value.
/// Both object properties and array elements disclosures are supported.
///
/// See: https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-12.html#name-disclosures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
  /// The salt value.
  salt: String,
  /// Object property or array element.
  kind: DisclosureKind,
  /// The claim Value which can be of any type.
  claim_value: Value,
  /// Base64url-encoded disclosure. This is the only form that is ever
  /// digested; it is preserved byte-for-byte across parsing.
  encoded: String,
}

impl Disclosure {
  /// Creates a new [`Disclosure`] for an object property.
  pub fn object(salt: String, claim_name: String, claim_value: Value) -> Self {
    let encoded = encode_disclosure(&salt, Some(&claim_name), &claim_value);
    Self {
      salt,
      kind: DisclosureKind::ObjectProperty(claim_name),
      claim_value,
      encoded,
    }
  }

  /// Creates a new [`Disclosure`] for an array element.
  pub fn array_element(salt: String, claim_value: Value) -> Self {
    let encoded = encode_disclosure(&salt, None, &claim_value);
    Self {
      salt,
      kind: DisclosureKind::ArrayElement,
      claim_value,
      encoded,
    }
  }

  /// Creates a new [`Disclosure`] with a random salt drawn from `rng`.
  ///
  /// A `claim_name` of `None` produces an array element disclosure.
  pub fn generate<R: RngCore + ?Sized>(rng: &mut R, claim_name: Option<String>, claim_value: Value) -> Self {
    let mut salt_bytes = [0u8; GENERATED_SALT_SIZE];
    rng.fill_bytes(&mut salt_bytes);
    let salt = b64_url_encode(salt_bytes);
    match claim_name {
      Some(name) => Self::object(salt, name, claim_value),
      None => Self::array_element(salt, claim_value),
    }
  }

  /// Parses a base64url-encoded disclosure into a [`Disclosure`].
  ///
  /// The input string is retained as the canonical encoding, so
  /// [`Disclosure::as_str`] round-trips byte-identically.
  ///
  /// ## Error
  ///
  /// Returns an [`Error::InvalidDisclosure`] if input is not a valid disclosure.
  pub fn parse(disclosure: &str) -> Result<Self> {
    let decoded: Vec<Value> = b64_url_decode(disclosure)
      .map_err(|_| {
        Error::InvalidDisclosure(format!(
          "base64 decoding of the disclosure was not possible: {disclosure}"
        ))
      })
      .and_then(|data| {
        serde_json::from_slice(&data).map_err(|_| {
          Error::InvalidDisclosure(format!(
            "decoded disclosure could not be deserialized as an array: {disclosure}"
          ))
        })
      })?;

    let salt = decoded
      .first()
      .and_then(Value::as_str)
      .ok_or_else(|| Error::InvalidDisclosure("salt is missing or not a string".to_string()))?
      .to_owned();

    let (kind, claim_value) = match decoded.len() {
      2 => (DisclosureKind::ArrayElement, decoded[1].clone()),
      3 => {
        let claim_name = decoded[1]
          .as_str()
          .ok_or_else(|| Error::InvalidDisclosure("claim name is not a string".to_string()))?
          .to_owned();
        (DisclosureKind::ObjectProperty(claim_name), decoded[2].clone())
      }
      len => {
        return Err(Error::InvalidDisclosure(format!(
          "deserialized array has an invalid length of {len}"
        )))
      }
    };

    Ok(Self {
      salt,
      kind,
      claim_value,
      encoded: disclosure.to_owned(),
    })
  }

  /// Returns the salt value.
  pub fn salt(&self) -> &str {
    &self.salt
  }

  /// Returns the disclosure's shape.
  pub fn kind(&self) -> &DisclosureKind {
    &self.kind
  }

  /// Returns the claim name, `None` for array elements.
  pub fn claim_name(&self) -> Option<&str> {
    match &self.kind {
      DisclosureKind::ObjectProperty(name) => Some(name),
      DisclosureKind::ArrayElement => None,
    }
  }

  /// Returns the claim value.
  pub fn claim_value(&self) -> &Value {
    &self.claim_value
  }

  /// Returns the base64url-encoded form, the only form that is digested.
  pub fn as_str(&self) -> &str {
    &self.encoded
  }
}

impl Display for Disclosure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.encoded)
  }
}

/// Serializes a disclosure array with the historical "comma-space" separator
/// convention and encodes it as unpadded base64url. Non-ASCII characters are
/// emitted as UTF-8, numbers keep their textual form from input.
fn encode_disclosure(salt: &str, claim_name: Option<&str>, claim_value: &Value) -> String {
  let salt = Value::from(salt);
  let input = if let Some(name) = claim_name {
    format!("[{salt}, {}, {claim_value}]", Value::from(name))
  } else {
    format!("[{salt}, {claim_value}]")
  };

  b64_url_encode(input)
}
