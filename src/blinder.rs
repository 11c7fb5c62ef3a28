// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::is_weak_alg;
use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::Result;
#[cfg(feature = "sha")]
use crate::Sha256Hasher;
use crate::b64_url_encode;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::RngCore;
use rand::SeedableRng;
use serde_json::json;
use serde_json::Value;

pub(crate) const DIGESTS_KEY: &str = "_sd";
pub(crate) const ARRAY_DIGEST_KEY: &str = "...";
pub(crate) const DEFAULT_SALT_SIZE: usize = 30;
pub(crate) const MIN_SALT_SIZE: usize = 16;
pub(crate) const SD_ALG: &str = "_sd_alg";

/// Describes which parts of a claim object are substituted by digests.
///
/// A plan mirrors the structure of the object it is applied to: object nodes
/// carry a plan per (subset of) property, array nodes a plan per element,
/// aligned by index. Plan nodes addressing properties or indexes the object
/// does not have are rejected with [`Error::PlanShapeMismatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlindingPlan {
  /// Substitute this value wholesale.
  Conceal,
  /// Leave this value in the clear.
  Keep,
  /// Substitute this value after applying the nested plan inside it, so the
  /// emitted disclosure embeds the digests of its own concealed children.
  ConcealWith(Box<BlindingPlan>),
  /// Leave an object in the clear while applying a plan to a subset of its
  /// properties.
  Fields(IndexMap<String, BlindingPlan>),
  /// Leave an array in the clear while applying a plan to its elements,
  /// aligned by index. Elements past the end of the plan are kept.
  Elements(Vec<BlindingPlan>),
}

impl BlindingPlan {
  /// Builds the plan that conceals everything in `value`: every property and
  /// array element at every depth gets its own disclosure, with container
  /// disclosures embedding the digests of their children.
  pub fn blind_all(value: &Value) -> Self {
    match value {
      Value::Object(object) if !object.is_empty() => BlindingPlan::Fields(
        object
          .iter()
          .map(|(key, value)| (key.clone(), Self::blind_all_entry(value)))
          .collect(),
      ),
      Value::Array(array) if !array.is_empty() => {
        BlindingPlan::Elements(array.iter().map(Self::blind_all_entry).collect())
      }
      _ => BlindingPlan::Keep,
    }
  }

  fn blind_all_entry(value: &Value) -> Self {
    match value {
      Value::Object(object) if !object.is_empty() => Self::blind_all(value).expect_nested(),
      Value::Array(array) if !array.is_empty() => Self::blind_all(value).expect_nested(),
      _ => BlindingPlan::Conceal,
    }
  }

  fn expect_nested(self) -> Self {
    BlindingPlan::ConcealWith(Box::new(self))
  }
}

/// The output of a blinding pass: the payload to be signed next to the
/// disclosures whose digests it embeds.
#[derive(Debug, Clone)]
pub struct BlindedPayload {
  /// The object with selected values replaced by digests.
  pub object: JsonObject,
  /// One disclosure per concealed value, in depth-first emission order.
  pub disclosures: Vec<Disclosure>,
}

/// Transforms a JSON object into an SD-JWT payload by substituting the values
/// selected by a [`BlindingPlan`] with their corresponding disclosure digests.
#[cfg(not(feature = "sha"))]
#[derive(Debug)]
pub struct SdObjectBlinder<H: Hasher, R: RngCore = StdRng> {
  hasher: H,
  rng: R,
  salt_size: usize,
  decoys_per_level: usize,
  allow_weak: bool,
}

/// Transforms a JSON object into an SD-JWT payload by substituting the values
/// selected by a [`BlindingPlan`] with their corresponding disclosure digests.
#[cfg(feature = "sha")]
#[derive(Debug)]
pub struct SdObjectBlinder<H: Hasher = Sha256Hasher, R: RngCore = StdRng> {
  hasher: H,
  rng: R,
  /// Size of random data used to generate the salts for disclosures in bytes.
  salt_size: usize,
  decoys_per_level: usize,
  allow_weak: bool,
}

#[cfg(feature = "sha")]
impl SdObjectBlinder {
  /// Creates a new [`SdObjectBlinder`] with the `sha-256` hash function and
  /// an entropy-seeded RNG.
  pub fn new() -> SdObjectBlinder<Sha256Hasher, StdRng> {
    SdObjectBlinder {
      hasher: Sha256Hasher::new(),
      rng: StdRng::from_entropy(),
      salt_size: DEFAULT_SALT_SIZE,
      decoys_per_level: 0,
      allow_weak: false,
    }
  }
}

#[cfg(feature = "sha")]
impl Default for SdObjectBlinder {
  fn default() -> Self {
    Self::new()
  }
}

impl<H: Hasher, R: RngCore> SdObjectBlinder<H, R> {
  /// Creates a new [`SdObjectBlinder`] with a custom hash function and RNG.
  /// Tests substitute a seeded RNG for reproducible salts and decoys.
  pub fn with_hasher_and_rng(hasher: H, rng: R) -> Self {
    Self {
      hasher,
      rng,
      salt_size: DEFAULT_SALT_SIZE,
      decoys_per_level: 0,
      allow_weak: false,
    }
  }

  /// Sets the number of decoy digests mixed into each emitted `_sd` array.
  pub fn decoys_per_level(mut self, decoys: usize) -> Self {
    self.decoys_per_level = decoys;
    self
  }

  /// Sets the size of random data used to generate the salts in bytes.
  ///
  /// ## Error
  /// [`Error::InvalidDisclosure`] for sizes under 16 bytes.
  pub fn salt_size(mut self, salt_size: usize) -> Result<Self> {
    if salt_size < MIN_SALT_SIZE {
      return Err(Error::InvalidDisclosure(format!(
        "salt size must be greater or equal {MIN_SALT_SIZE}"
      )));
    }
    self.salt_size = salt_size;
    Ok(self)
  }

  /// Opts into hash algorithms from the legacy set. Without this call,
  /// blinding with such a hasher fails [`Error::WeakAlgorithmRejected`].
  pub fn allow_weak_algorithms(mut self) -> Self {
    self.allow_weak = true;
    self
  }

  /// Applies `plan` to `object`, producing the payload to be signed and the
  /// disclosures backing its digests.
  ///
  /// Every emitted `_sd` array is sorted ascending and free of duplicates;
  /// `_sd_alg` is set at the root iff at least one value was concealed.
  ///
  /// ## Error
  /// [`Error::PlanShapeMismatch`] if the plan addresses properties or indexes
  /// that `object` does not have, or nests where the value is not a
  /// container.
  pub fn blind(&mut self, object: &Value, plan: &BlindingPlan) -> Result<BlindedPayload> {
    if is_weak_alg(self.hasher.alg_name()) && !self.allow_weak {
      return Err(Error::WeakAlgorithmRejected(self.hasher.alg_name().to_string()));
    }
    let object = object
      .as_object()
      .ok_or_else(|| Error::PayloadMalformed("expected a JSON object at the payload root".to_string()))?;
    let fields = match plan {
      BlindingPlan::Fields(fields) => fields,
      BlindingPlan::Keep => {
        return Ok(BlindedPayload {
          object: object.clone(),
          disclosures: Vec::new(),
        })
      }
      _ => {
        return Err(Error::PlanShapeMismatch(
          "the payload root cannot be concealed itself".to_string(),
        ))
      }
    };

    let mut disclosures: Vec<Disclosure> = Vec::new();
    let mut output = self.blind_object(object, fields, &mut disclosures)?;
    if !disclosures.is_empty() {
      output.insert(SD_ALG.to_string(), Value::String(self.hasher.alg_name().to_string()));
    }

    Ok(BlindedPayload {
      object: output,
      disclosures,
    })
  }

  fn blind_object(
    &mut self,
    object: &JsonObject,
    plan: &IndexMap<String, BlindingPlan>,
    disclosures: &mut Vec<Disclosure>,
  ) -> Result<JsonObject> {
    for key in plan.keys() {
      if !object.contains_key(key) {
        return Err(Error::PlanShapeMismatch(format!("property {key} does not exist")));
      }
    }

    let mut output = JsonObject::new();
    let mut sd: Vec<String> = Vec::new();
    for (key, value) in object {
      match plan.get(key) {
        None | Some(BlindingPlan::Keep) => {
          output.insert(key.clone(), value.clone());
        }
        Some(BlindingPlan::Conceal) => {
          sd.push(self.conceal_property(key, value.clone(), disclosures));
        }
        Some(BlindingPlan::ConcealWith(nested)) => {
          let transformed = self.blind_nested(key, value, nested, disclosures)?;
          sd.push(self.conceal_property(key, transformed, disclosures));
        }
        Some(BlindingPlan::Fields(fields)) => {
          let object = value
            .as_object()
            .ok_or_else(|| Error::PlanShapeMismatch(format!("{key} is not an object")))?;
          let blinded = self.blind_object(object, fields, disclosures)?;
          output.insert(key.clone(), Value::Object(blinded));
        }
        Some(BlindingPlan::Elements(elements)) => {
          let array = value
            .as_array()
            .ok_or_else(|| Error::PlanShapeMismatch(format!("{key} is not an array")))?;
          let blinded = self.blind_array(key, array, elements, disclosures)?;
          output.insert(key.clone(), Value::Array(blinded));
        }
      }
    }

    if !sd.is_empty() {
      for _ in 0..self.decoys_per_level {
        sd.push(self.random_digest());
      }
      sd.sort_unstable();
      sd.dedup();
      output.insert(
        DIGESTS_KEY.to_string(),
        Value::Array(sd.into_iter().map(Value::String).collect()),
      );
    }

    Ok(output)
  }

  fn blind_array(
    &mut self,
    key: &str,
    array: &[Value],
    plan: &[BlindingPlan],
    disclosures: &mut Vec<Disclosure>,
  ) -> Result<Vec<Value>> {
    if plan.len() > array.len() {
      return Err(Error::PlanShapeMismatch(format!(
        "index {} is out of bounds for {key}",
        plan.len() - 1
      )));
    }

    let mut output: Vec<Value> = Vec::with_capacity(array.len());
    for (index, value) in array.iter().enumerate() {
      match plan.get(index) {
        None | Some(BlindingPlan::Keep) => output.push(value.clone()),
        Some(BlindingPlan::Conceal) => {
          let digest = self.conceal_element(value.clone(), disclosures);
          output.push(json!({ ARRAY_DIGEST_KEY: digest }));
        }
        Some(BlindingPlan::ConcealWith(nested)) => {
          let transformed = self.blind_nested(&format!("{key}[{index}]"), value, nested, disclosures)?;
          let digest = self.conceal_element(transformed, disclosures);
          output.push(json!({ ARRAY_DIGEST_KEY: digest }));
        }
        Some(BlindingPlan::Fields(fields)) => {
          let object = value
            .as_object()
            .ok_or_else(|| Error::PlanShapeMismatch(format!("{key}[{index}] is not an object")))?;
          let blinded = self.blind_object(object, fields, disclosures)?;
          output.push(Value::Object(blinded));
        }
        Some(BlindingPlan::Elements(elements)) => {
          let array = value
            .as_array()
            .ok_or_else(|| Error::PlanShapeMismatch(format!("{key}[{index}] is not an array")))?;
          let blinded = self.blind_array(&format!("{key}[{index}]"), array, elements, disclosures)?;
          output.push(Value::Array(blinded));
        }
      }
    }

    Ok(output)
  }

  /// Applies the plan nested inside a concealed value, producing the value
  /// the disclosure will carry.
  fn blind_nested(
    &mut self,
    location: &str,
    value: &Value,
    nested: &BlindingPlan,
    disclosures: &mut Vec<Disclosure>,
  ) -> Result<Value> {
    match nested {
      BlindingPlan::Fields(fields) => {
        let object = value
          .as_object()
          .ok_or_else(|| Error::PlanShapeMismatch(format!("{location} is not an object")))?;
        Ok(Value::Object(self.blind_object(object, fields, disclosures)?))
      }
      BlindingPlan::Elements(elements) => {
        let array = value
          .as_array()
          .ok_or_else(|| Error::PlanShapeMismatch(format!("{location} is not an array")))?;
        Ok(Value::Array(self.blind_array(location, array, elements, disclosures)?))
      }
      _ => Err(Error::PlanShapeMismatch(format!(
        "the plan nested under {location} must address properties or elements"
      ))),
    }
  }

  fn conceal_property(&mut self, key: &str, value: Value, disclosures: &mut Vec<Disclosure>) -> String {
    let disclosure = Disclosure::object(self.gen_salt(), key.to_owned(), value);
    let digest = self.hasher.encoded_digest(disclosure.as_str());
    disclosures.push(disclosure);
    digest
  }

  fn conceal_element(&mut self, value: Value, disclosures: &mut Vec<Disclosure>) -> String {
    let disclosure = Disclosure::array_element(self.gen_salt(), value);
    let digest = self.hasher.encoded_digest(disclosure.as_str());
    disclosures.push(disclosure);
    digest
  }

  fn gen_salt(&mut self) -> String {
    let mut bytes = vec![0u8; self.salt_size];
    self.rng.fill_bytes(&mut bytes);
    b64_url_encode(bytes)
  }

  /// A decoy: random bytes of the digest's length, indistinguishable from a
  /// real digest.
  fn random_digest(&mut self) -> String {
    let digest_len = self.hasher.digest(&[]).len();
    let mut bytes = vec![0u8; digest_len];
    self.rng.fill_bytes(&mut bytes);
    b64_url_encode(bytes)
  }
}
