// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use crate::jwt::Jwt;
use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::KeyBindingJwt;
use crate::RequiredKeyBinding;
use crate::Result;
use crate::SdObjectRehydrator;
use crate::Status;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// `typ` value of the credential JWS header.
pub const HEADER_TYP: &str = "dc+sd-jwt";
/// Historical `typ` value still accepted on incoming credentials.
pub const LEGACY_HEADER_TYP: &str = "vc+sd-jwt";

/// The claims of the issuer-signed JWT of an SD-JWT.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SdJwtClaims {
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub _sd: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub _sd_alg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cnf: Option<RequiredKeyBinding>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub vct: Option<String>,
  #[serde(flatten)]
  pub(crate) properties: JsonObject,
}

impl Deref for SdJwtClaims {
  type Target = JsonObject;
  fn deref(&self) -> &Self::Target {
    &self.properties
  }
}

/// Representation of an SD-JWT of the format
/// `<Issuer-signed JWT>~<Disclosure 1>~<Disclosure 2>~...~<Disclosure N>~<optional KB-JWT>`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SdJwt {
  /// The JWT part.
  pub(crate) jwt: Jwt<SdJwtClaims>,
  /// The disclosures part.
  pub(crate) disclosures: Vec<Disclosure>,
  /// The optional key binding JWT.
  pub(crate) key_binding_jwt: Option<KeyBindingJwt>,
}

impl SdJwt {
  /// Creates a new [`SdJwt`] from its components.
  pub(crate) fn new(jwt: Jwt<SdJwtClaims>, disclosures: Vec<Disclosure>, key_binding_jwt: Option<KeyBindingJwt>) -> Self {
    Self {
      jwt,
      disclosures,
      key_binding_jwt,
    }
  }

  pub fn header(&self) -> &JsonObject {
    &self.jwt.header
  }

  pub fn claims(&self) -> &SdJwtClaims {
    &self.jwt.claims
  }

  pub fn disclosures(&self) -> &[Disclosure] {
    &self.disclosures
  }

  /// The holder key the issuer requires presentations to be bound to, if any.
  pub fn required_key_bind(&self) -> Option<&RequiredKeyBinding> {
    self.claims().cnf.as_ref()
  }

  /// The credential's status list reference, if any.
  pub fn status(&self) -> Option<&Status> {
    self.claims().status.as_ref()
  }

  pub fn key_binding_jwt(&self) -> Option<&KeyBindingJwt> {
    self.key_binding_jwt.as_ref()
  }

  /// Attaches a KB-JWT, replacing any previous one.
  pub fn attach_key_binding_jwt(&mut self, kb_jwt: KeyBindingJwt) {
    self.key_binding_jwt = Some(kb_jwt);
  }

  /// Serializes the components into the final SD-JWT presentation.
  ///
  /// The output is byte-identical to the string this token was parsed from,
  /// as long as its components were not modified.
  pub fn presentation(&self) -> String {
    SdJwtParts::from(self).to_compact()
  }

  /// Parses an SD-JWT presentation into its components as [`SdJwt`].
  ///
  /// ## Error
  /// [`Error::MalformedPresentation`] if `sd_jwt` violates the tilde-separated
  /// format, [`Error::InvalidDisclosure`]/[`Error::PayloadMalformed`] if a
  /// segment fails to decode.
  pub fn parse(sd_jwt: &str) -> Result<Self> {
    SdJwtParts::parse_compact(sd_jwt)?.try_into()
  }

  /// Checks `exp` and `nbf` against the provided unix timestamp, when the
  /// credential carries them.
  pub fn check_validity_window(&self, now: i64) -> Result<()> {
    if let Some(exp) = self.claims().get("exp").and_then(Value::as_i64) {
      if now >= exp {
        return Err(Error::CredentialExpired(format!("`exp` ({exp}) is in the past")));
      }
    }
    if let Some(nbf) = self.claims().get("nbf").and_then(Value::as_i64) {
      if now < nbf {
        return Err(Error::CredentialExpired(format!("`nbf` ({nbf}) is in the future")));
      }
    }
    Ok(())
  }

  /// Returns the JSON object obtained by replacing all digests with their
  /// corresponding disclosed claims.
  pub fn into_disclosed_object(self, rehydrator: &SdObjectRehydrator) -> Result<JsonObject> {
    let object = serde_json::to_value(self.claims())
      .map_err(|e| Error::PayloadMalformed(format!("invalid SD-JWT claims: {e}")))?;
    rehydrator.decode(object.as_object().expect("claims serialize to an object"), &self.disclosures)
  }

  /// The bytes the KB-JWT's `sd_hash` commits to: everything up to and
  /// including the last tilde.
  pub(crate) fn kb_digest_input(&self) -> String {
    let mut input = self.jwt.to_string();
    input.push('~');
    for disclosure in &self.disclosures {
      input.push_str(disclosure.as_str());
      input.push('~');
    }
    input
  }

  /// Computes the `sd_hash` over this token's presentation prefix.
  pub(crate) fn sd_hash(&self, hasher: &dyn Hasher) -> String {
    hasher.encoded_digest(&self.kb_digest_input())
  }
}

impl Display for SdJwt {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&(self.presentation()))
  }
}

impl FromStr for SdJwt {
  type Err = Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<SdJwtParts> for SdJwt {
  type Error = Error;
  fn try_from(parts: SdJwtParts) -> Result<Self> {
    let jwt = parts.credential_jwt.parse()?;
    let disclosures = parts
      .disclosures
      .iter()
      .map(|disclosure| Disclosure::parse(disclosure))
      .try_collect()?;
    let key_binding_jwt = parts.kb_jwt.as_deref().map(KeyBindingJwt::parse).transpose()?;

    Ok(Self {
      jwt,
      disclosures,
      key_binding_jwt,
    })
  }
}

/// The structured equivalent of the compact tilde-separated presentation.
///
/// The two forms carry the same information and convert into one another
/// without loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdJwtParts {
  pub credential_jwt: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub disclosures: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kb_jwt: Option<String>,
}

impl SdJwtParts {
  /// Splits a compact presentation into its segments, checking each segment's
  /// shape without decoding it.
  ///
  /// ## Error
  /// [`Error::MalformedPresentation`] on a missing trailing tilde, an empty
  /// interior segment, or a segment that is neither a compact JWS nor a
  /// base64url disclosure.
  pub fn parse_compact(input: &str) -> Result<Self> {
    let segments: Vec<&str> = input.split('~').collect();
    if segments.len() < 2 {
      return Err(Error::MalformedPresentation(
        "expected at least `<credential JWT>~`".to_string(),
      ));
    }

    let credential_jwt = *segments.first().expect("split yields at least one segment");
    if !is_jws_shape(credential_jwt) {
      return Err(Error::MalformedPresentation(
        "the first segment is not a compact JWS".to_string(),
      ));
    }

    let last = *segments.last().expect("split yields at least one segment");
    let kb_jwt = if last.is_empty() {
      None
    } else if is_jws_shape(last) {
      Some(last.to_owned())
    } else {
      return Err(Error::MalformedPresentation(
        "the segment after the last tilde is not a compact JWS".to_string(),
      ));
    };

    let mut disclosures = Vec::with_capacity(segments.len() - 2);
    for (index, segment) in segments[1..segments.len() - 1].iter().enumerate() {
      if segment.is_empty() {
        return Err(Error::MalformedPresentation(format!(
          "disclosure segment {index} is empty"
        )));
      }
      if !is_b64url_segment(segment) {
        return Err(Error::MalformedPresentation(format!(
          "disclosure segment {index} is not base64url"
        )));
      }
      disclosures.push((*segment).to_owned());
    }

    Ok(Self {
      credential_jwt: credential_jwt.to_owned(),
      disclosures,
      kb_jwt,
    })
  }

  /// Serializes into the compact form. Without a KB-JWT the output ends with
  /// a tilde.
  pub fn to_compact(&self) -> String {
    let mut output = self.credential_jwt.clone();
    output.push('~');
    for disclosure in &self.disclosures {
      output.push_str(disclosure);
      output.push('~');
    }
    if let Some(kb_jwt) = &self.kb_jwt {
      output.push_str(kb_jwt);
    }
    output
  }
}

impl From<&SdJwt> for SdJwtParts {
  fn from(sd_jwt: &SdJwt) -> Self {
    Self {
      credential_jwt: sd_jwt.jwt.to_string(),
      disclosures: sd_jwt.disclosures.iter().map(ToString::to_string).collect(),
      kb_jwt: sd_jwt.key_binding_jwt.as_ref().map(ToString::to_string),
    }
  }
}

impl Display for SdJwtParts {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_compact())
  }
}

impl FromStr for SdJwtParts {
  type Err = Error;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    Self::parse_compact(s)
  }
}

fn is_b64url_segment(segment: &str) -> bool {
  !segment.is_empty()
    && segment
      .bytes()
      .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

fn is_jws_shape(token: &str) -> bool {
  let mut segments = 0usize;
  for segment in token.split('.') {
    if !is_b64url_segment(segment) {
      return false;
    }
    segments += 1;
  }
  segments == 3
}

#[cfg(test)]
mod test {
  use super::SdJwt;
  use super::SdJwtParts;
  use crate::Error;

  const SD_JWT: &str = "eyJhbGciOiAiRVMyNTYiLCAidHlwIjogImV4YW1wbGUrc2Qtand0In0.eyJfc2QiOiBbIkM5aW5wNllvUmFFWFI0Mjd6WUpQN1FyazFXSF84YmR3T0FfWVVyVW5HUVUiLCAiS3VldDF5QWEwSElRdlluT1ZkNTloY1ZpTzlVZzZKMmtTZnFZUkJlb3d2RSIsICJNTWxkT0ZGekIyZDB1bWxtcFRJYUdlcmhXZFVfUHBZZkx2S2hoX2ZfOWFZIiwgIlg2WkFZT0lJMnZQTjQwVjd4RXhad1Z3ejd5Um1MTmNWd3Q1REw4Ukx2NGciLCAiWTM0em1JbzBRTExPdGRNcFhHd2pCZ0x2cjE3eUVoaFlUMEZHb2ZSLWFJRSIsICJmeUdwMFdUd3dQdjJKRFFsbjFsU2lhZW9iWnNNV0ExMGJRNTk4OS05RFRzIiwgIm9tbUZBaWNWVDhMR0hDQjB1eXd4N2ZZdW8zTUhZS08xNWN6LVJaRVlNNVEiLCAiczBCS1lzTFd4UVFlVTh0VmxsdE03TUtzSVJUckVJYTFQa0ptcXhCQmY1VSJdLCAiaXNzIjogImh0dHBzOi8vaXNzdWVyLmV4YW1wbGUuY29tIiwgImlhdCI6IDE2ODMwMDAwMDAsICJleHAiOiAxODgzMDAwMDAwLCAiYWRkcmVzcyI6IHsiX3NkIjogWyI2YVVoelloWjdTSjFrVm1hZ1FBTzN1MkVUTjJDQzFhSGhlWnBLbmFGMF9FIiwgIkF6TGxGb2JrSjJ4aWF1cFJFUHlvSnotOS1OU2xkQjZDZ2pyN2ZVeW9IemciLCAiUHp6Y1Z1MHFiTXVCR1NqdWxmZXd6a2VzRDl6dXRPRXhuNUVXTndrclEtayIsICJiMkRrdzBqY0lGOXJHZzhfUEY4WmN2bmNXN3p3Wmo1cnlCV3ZYZnJwemVrIiwgImNQWUpISVo4VnUtZjlDQ3lWdWIyVWZnRWs4anZ2WGV6d0sxcF9KbmVlWFEiLCAiZ2xUM2hyU1U3ZlNXZ3dGNVVEWm1Xd0JUdzMyZ25VbGRJaGk4aEdWQ2FWNCIsICJydkpkNmlxNlQ1ZWptc0JNb0d3dU5YaDlxQUFGQVRBY2k0MG9pZEVlVnNBIiwgInVOSG9XWWhYc1poVkpDTkUyRHF5LXpxdDd0NjlnSkt5NVFhRnY3R3JNWDQiXX0sICJfc2RfYWxnIjogInNoYS0yNTYifQ.gR6rSL7urX79CNEvTQnP1MH5xthG11ucIV44SqKFZ4Pvlu_u16RfvXQd4k4CAIBZNKn2aTI18TfvFwV97gJFoA~WyJHMDJOU3JRZmpGWFE3SW8wOXN5YWpBIiwgInJlZ2lvbiIsICJcdTZlMmZcdTUzM2EiXQ~WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ~";

  #[test]
  fn parse() {
    let sd_jwt = SdJwt::parse(SD_JWT).unwrap();
    assert_eq!(sd_jwt.disclosures.len(), 2);
    assert!(sd_jwt.key_binding_jwt.is_none());
    assert_eq!(sd_jwt.claims()._sd.len(), 8);
    assert_eq!(sd_jwt.claims()._sd_alg.as_deref(), Some("sha-256"));
  }

  #[test]
  fn round_trip_ser_des() {
    let sd_jwt = SdJwt::parse(SD_JWT).unwrap();
    assert_eq!(&sd_jwt.to_string(), SD_JWT);
  }

  #[test]
  fn empty_presentation() {
    let parts = SdJwtParts::parse_compact("a.b.c~").unwrap();
    assert_eq!(parts.credential_jwt, "a.b.c");
    assert!(parts.disclosures.is_empty());
    assert!(parts.kb_jwt.is_none());
    assert_eq!(parts.to_compact(), "a.b.c~");
  }

  #[test]
  fn presentation_with_key_binding() {
    let parts = SdJwtParts::parse_compact("a.b.c~d.e.f").unwrap();
    assert_eq!(parts.credential_jwt, "a.b.c");
    assert!(parts.disclosures.is_empty());
    assert_eq!(parts.kb_jwt.as_deref(), Some("d.e.f"));
    assert_eq!(parts.to_compact(), "a.b.c~d.e.f");
  }

  #[test]
  fn empty_interior_segment_is_rejected() {
    assert!(matches!(
      SdJwtParts::parse_compact("a.b.c~~d.e.f").unwrap_err(),
      Error::MalformedPresentation(_)
    ));
  }

  #[test]
  fn missing_trailing_tilde_is_rejected() {
    assert!(matches!(
      SdJwtParts::parse_compact("a.b.c").unwrap_err(),
      Error::MalformedPresentation(_)
    ));
  }

  #[test]
  fn non_jws_segments_are_rejected() {
    // Two dot-separated segments only.
    assert!(SdJwtParts::parse_compact("a.b~").is_err());
    // Four segments.
    assert!(SdJwtParts::parse_compact("a.b.c.d~").is_err());
    // The trailing segment has no dot, so it is neither a KB-JWT nor a
    // terminated disclosure list.
    assert!(SdJwtParts::parse_compact("a.b.c~WyJhIiwgImIiXQ").is_err());
    // Disclosure segments must not contain dots.
    assert!(SdJwtParts::parse_compact("a.b.c~x.y~").is_err());
  }

  #[test]
  fn structured_and_compact_forms_are_bijective() {
    let parts = SdJwtParts::parse_compact(SD_JWT).unwrap();
    assert_eq!(parts.disclosures.len(), 2);
    assert_eq!(parts.to_compact(), SD_JWT);

    let json = serde_json::to_value(&parts).unwrap();
    let restored: SdJwtParts = serde_json::from_value(json).unwrap();
    assert_eq!(restored, parts);
  }

  #[test]
  fn validity_window() {
    let sd_jwt = SdJwt::parse(SD_JWT).unwrap();
    // iat 1683000000, exp 1883000000.
    assert!(sd_jwt.check_validity_window(1_700_000_000).is_ok());
    assert!(matches!(
      sd_jwt.check_validity_window(1_900_000_000).unwrap_err(),
      Error::CredentialExpired(_)
    ));
  }
}
