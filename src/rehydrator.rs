// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::is_weak_alg;
use crate::ARRAY_DIGEST_KEY;
use crate::DIGESTS_KEY;
use crate::SD_ALG;
use crate::SHA_ALG_NAME;

use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::Result;
#[cfg(feature = "sha")]
use crate::Sha256Hasher;
use serde_json::Value;
use std::collections::BTreeMap;

/// Substitutes digests in an SD-JWT payload by their corresponding plain text
/// values provided by disclosures, rebuilding the object that was blinded at
/// issuance.
pub struct SdObjectRehydrator {
  hashers: BTreeMap<String, Box<dyn Hasher>>,
  allow_weak: bool,
}

impl SdObjectRehydrator {
  /// Creates a new [`SdObjectRehydrator`] with `sha-256` hasher.
  #[cfg(feature = "sha")]
  pub fn new_with_sha256() -> Self {
    let mut rehydrator = Self::new();
    rehydrator.add_hasher(Box::new(Sha256Hasher::new()));
    rehydrator
  }

  /// Creates a new [`SdObjectRehydrator`] without any hashers.
  pub fn new() -> Self {
    Self {
      hashers: BTreeMap::new(),
      allow_weak: false,
    }
  }

  /// Adds a hasher.
  ///
  /// If a hasher for the same algorithm [`Hasher::alg_name`] already exists, it will be replaced and
  /// the existing hasher will be returned, otherwise `None`.
  pub fn add_hasher(&mut self, hasher: Box<dyn Hasher>) -> Option<Box<dyn Hasher>> {
    let alg_name = hasher.as_ref().alg_name().to_string();
    self.hashers.insert(alg_name, hasher)
  }

  /// Removes a hasher.
  ///
  /// If the hasher for that algorithm exists, it will be removed and returned, otherwise `None`.
  pub fn remove_hasher(&mut self, hash_alg: String) -> Option<Box<dyn Hasher>> {
    self.hashers.remove(&hash_alg)
  }

  /// Opts into hash algorithms from the legacy set. Payloads naming such an
  /// algorithm in `_sd_alg` are rejected otherwise, no matter which hashers
  /// are registered.
  pub fn set_allow_weak_algorithms(&mut self, allow: bool) {
    self.allow_weak = allow;
  }

  /// Rebuilds the claim object underlying the SD-JWT payload `object` by
  /// substituting every digest that one of `disclosures` hashes to with that
  /// disclosure's claim.
  ///
  /// ## Notes
  /// * The hasher is determined by the `_sd_alg` property. If none is set, the sha-256 hasher will
  ///   be used, if present.
  /// * Digests with no matching disclosure are ignored; they may be decoys.
  /// * Claims like `exp` or `iat` are not validated in the process of decoding.
  /// * `_sd` and `_sd_alg` properties are absent from the output.
  ///
  /// ## Error
  /// * [`Error::DuplicateDisclosureDigest`] if two disclosures hash to the same digest or a digest
  ///   is referenced more than once by the payload.
  /// * [`Error::ConflictingDisclosure`] if a disclosure names a claim the payload already has.
  /// * [`Error::UnusedDisclosure`] if a disclosure matches no digest in the payload.
  pub fn decode(&self, object: &JsonObject, disclosures: &[Disclosure]) -> Result<JsonObject> {
    let hasher = self.determine_hasher(object)?;

    // Create a map of (disclosure digest) → (disclosure).
    let mut disclosures_map: BTreeMap<String, &Disclosure> = BTreeMap::new();
    for disclosure in disclosures {
      let digest = hasher.encoded_digest(disclosure.as_str());
      if disclosures_map.insert(digest.clone(), disclosure).is_some() {
        return Err(Error::DuplicateDisclosureDigest(digest));
      }
    }

    // `processed_digests` are kept track of in case one digest appears more than once which
    // renders the SD-JWT invalid.
    let mut processed_digests: Vec<String> = vec![];

    let mut decoded = self.decode_object(object, &disclosures_map, &mut processed_digests)?;

    if processed_digests.len() != disclosures.len() {
      return Err(Error::UnusedDisclosure(
        disclosures.len().saturating_sub(processed_digests.len()),
      ));
    }

    decoded.remove(SD_ALG);
    Ok(decoded)
  }

  /// Resolves the hasher named by the payload's `_sd_alg` property.
  ///
  /// ## Error
  /// * [`Error::WeakAlgorithmRejected`] for a legacy algorithm without opt-in.
  /// * [`Error::UnsupportedAlgorithm`] when no hasher is registered for the algorithm.
  pub fn determine_hasher(&self, object: &JsonObject) -> Result<&dyn Hasher> {
    let alg = object
      .get(SD_ALG)
      .map(|alg| {
        alg
          .as_str()
          .ok_or_else(|| Error::PayloadMalformed("the value of `_sd_alg` is not a string".to_string()))
      })
      .transpose()?;
    self.hasher_for_alg(alg)
  }

  /// Resolves a hasher by algorithm name, applying the weak-algorithm policy.
  /// If the _sd_alg claim is not present at the top level, a default value of sha-256 MUST be used.
  pub fn hasher_for_alg(&self, alg: Option<&str>) -> Result<&dyn Hasher> {
    let alg = alg.unwrap_or(SHA_ALG_NAME);
    if is_weak_alg(alg) && !self.allow_weak {
      return Err(Error::WeakAlgorithmRejected(alg.to_string()));
    }
    self
      .hashers
      .get(alg)
      .map(AsRef::as_ref)
      .ok_or_else(|| Error::UnsupportedAlgorithm(alg.to_string()))
  }

  fn decode_object(
    &self,
    object: &JsonObject,
    disclosures: &BTreeMap<String, &Disclosure>,
    processed_digests: &mut Vec<String>,
  ) -> Result<JsonObject> {
    if object.contains_key(ARRAY_DIGEST_KEY) {
      return Err(Error::PayloadMalformed(format!(
        "`{ARRAY_DIGEST_KEY}` placeholders may only appear inside arrays"
      )));
    }

    let mut output: JsonObject = object.clone();
    for (key, value) in object.iter() {
      if key == DIGESTS_KEY {
        for digest in Self::digests_in_sd_value(value)? {
          // Reject if any digests were found more than once.
          if processed_digests.contains(&digest) {
            return Err(Error::DuplicateDisclosureDigest(digest));
          }

          // Check if a disclosure of this digest is available
          // and insert its claim name and value in the object.
          if let Some(disclosure) = disclosures.get(&digest) {
            let claim_name = disclosure.claim_name().ok_or_else(|| {
              Error::InvalidDisclosure(format!(
                "array element disclosure {} is referenced from an `{DIGESTS_KEY}` array",
                disclosure.as_str(),
              ))
            })?;
            if claim_name == DIGESTS_KEY || claim_name == ARRAY_DIGEST_KEY {
              return Err(Error::InvalidDisclosure(format!(
                "disclosed claim name cannot be `{claim_name}`"
              )));
            }

            if output.contains_key(claim_name) {
              return Err(Error::ConflictingDisclosure(claim_name.to_owned()));
            }
            processed_digests.push(digest.clone());

            // The recursion proceeds into the just-inserted value, so nested
            // disclosures rehydrate in turn.
            let recursively_decoded = self.decode_value(disclosure.claim_value(), disclosures, processed_digests)?;
            output.insert(claim_name.to_owned(), recursively_decoded);
          }
        }
        output.remove(DIGESTS_KEY);
        continue;
      }

      match value {
        Value::Object(object) => {
          let decoded_object = self.decode_object(object, disclosures, processed_digests)?;
          output.insert(key.to_string(), Value::Object(decoded_object));
        }
        Value::Array(array) => {
          let decoded_array = self.decode_array(array, disclosures, processed_digests)?;
          output.insert(key.to_string(), Value::Array(decoded_array));
        }
        // Only objects and arrays require decoding.
        _ => {}
      }
    }
    Ok(output)
  }

  fn decode_array(
    &self,
    array: &[Value],
    disclosures: &BTreeMap<String, &Disclosure>,
    processed_digests: &mut Vec<String>,
  ) -> Result<Vec<Value>> {
    let mut output: Vec<Value> = vec![];
    for value in array.iter() {
      let placeholder_digest = value
        .as_object()
        .filter(|object| object.contains_key(ARRAY_DIGEST_KEY))
        .map(|object| {
          if object.len() != 1 {
            return Err(Error::PayloadMalformed(format!(
              "array placeholder object contains keys other than `{ARRAY_DIGEST_KEY}`"
            )));
          }
          object
            .get(ARRAY_DIGEST_KEY)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::PayloadMalformed(format!("`{ARRAY_DIGEST_KEY}` digest is not a string")))
        })
        .transpose()?;

      if let Some(digest) = placeholder_digest {
        // Reject if any digests were found more than once.
        if processed_digests.contains(&digest) {
          return Err(Error::DuplicateDisclosureDigest(digest));
        }
        if let Some(disclosure) = disclosures.get(&digest) {
          if disclosure.claim_name().is_some() {
            return Err(Error::InvalidDisclosure(format!(
              "object property disclosure {} is referenced from an array placeholder",
              disclosure.as_str(),
            )));
          }
          processed_digests.push(digest.clone());
          let recursively_decoded = self.decode_value(disclosure.claim_value(), disclosures, processed_digests)?;
          output.push(recursively_decoded);
        }
        // An unmatched placeholder may reference a value the holder chose not
        // to disclose: the element is dropped.
        continue;
      }

      match value {
        Value::Object(object) => {
          let decoded_object = self.decode_object(object, disclosures, processed_digests)?;
          output.push(Value::Object(decoded_object));
        }
        Value::Array(array) => {
          // Nested arrays need to be decoded too.
          let decoded = self.decode_array(array, disclosures, processed_digests)?;
          output.push(Value::Array(decoded));
        }
        // Append the rest of the values.
        _ => output.push(value.clone()),
      }
    }

    Ok(output)
  }

  fn decode_value(
    &self,
    value: &Value,
    disclosures: &BTreeMap<String, &Disclosure>,
    processed_digests: &mut Vec<String>,
  ) -> Result<Value> {
    match value {
      Value::Array(array) => Ok(Value::Array(self.decode_array(array, disclosures, processed_digests)?)),
      Value::Object(object) => Ok(Value::Object(self.decode_object(object, disclosures, processed_digests)?)),
      _ => Ok(value.clone()),
    }
  }

  /// An `_sd` value is an array of digest strings; a bare digest string is
  /// tolerated on input, an array is always emitted on output.
  fn digests_in_sd_value(value: &Value) -> Result<Vec<String>> {
    let to_digest = |digest: &Value| {
      digest
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::PayloadMalformed(format!("{digest} in `{DIGESTS_KEY}` is not a string")))
    };
    match value {
      Value::Array(digests) => digests.iter().map(to_digest).collect(),
      Value::String(_) => Ok(vec![to_digest(value)?]),
      _ => Err(Error::PayloadMalformed(format!(
        "`{DIGESTS_KEY}` is neither an array nor a string"
      ))),
    }
  }
}

#[cfg(feature = "sha")]
impl Default for SdObjectRehydrator {
  fn default() -> Self {
    Self::new_with_sha256()
  }
}
