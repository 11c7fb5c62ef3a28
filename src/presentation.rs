// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::collections::HashSet;
use std::iter::Peekable;

use crate::jwt::Jwt;
use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::Result;
use crate::SdJwt;
use crate::SdJwtClaims;
use crate::ARRAY_DIGEST_KEY;
use crate::DIGESTS_KEY;
use crate::SHA_ALG_NAME;
use itertools::Itertools;
use serde_json::Value;

impl SdJwt {
  /// Turns this token into a presentation builder through which claims can be
  /// concealed before handing the token to a verifier.
  ///
  /// Any previously attached KB-JWT is dropped, as concealing changes the
  /// bytes a KB-JWT would have committed to.
  ///
  /// ## Error
  /// [`Error::UnsupportedAlgorithm`] if `hasher` does not match the token's
  /// `_sd_alg`.
  pub fn into_presentation(self, hasher: &dyn Hasher) -> Result<SdJwtPresentationBuilder> {
    let required_alg = self.claims()._sd_alg.as_deref().unwrap_or(SHA_ALG_NAME);
    if required_alg != hasher.alg_name() {
      return Err(Error::UnsupportedAlgorithm(format!(
        "the provided hasher uses algorithm {}, but the token requires {required_alg}",
        hasher.alg_name(),
      )));
    }

    let SdJwt { jwt, disclosures, .. } = self;
    let object = serde_json::to_value(&jwt.claims)
      .map_err(|e| Error::PayloadMalformed(format!("invalid SD-JWT claims: {e}")))?;
    let order = disclosures
      .iter()
      .map(|disclosure| hasher.encoded_digest(disclosure.as_str()))
      .collect_vec();
    let disclosures = order.iter().cloned().zip(disclosures).collect();

    Ok(SdJwtPresentationBuilder {
      jwt,
      object,
      order,
      disclosures,
      removed: HashSet::new(),
    })
  }
}

/// Builder structure to create an SD-JWT presentation by dropping disclosures
/// the holder does not want to reveal. The signed payload is never touched;
/// its digests simply remain unmatched on the verifier's side.
#[derive(Debug, Clone)]
pub struct SdJwtPresentationBuilder {
  jwt: Jwt<SdJwtClaims>,
  object: Value,
  /// Digests in the order their disclosures were received.
  order: Vec<String>,
  disclosures: HashMap<String, Disclosure>,
  removed: HashSet<String>,
}

impl SdJwtPresentationBuilder {
  /// Removes the disclosure for the value at `path`, concealing it.
  ///
  /// ## Notes
  /// - When concealing a claim more than one disclosure may be removed: the disclosure for the claim itself and the
  ///   disclosures for any concealable sub-claim.
  /// - `path` uses `/` separated segments; array elements are addressed by index, e.g. `/nationalities/0`.
  ///
  /// ## Error
  /// [`Error::PlanShapeMismatch`] if `path` does not reference a concealable value.
  pub fn conceal(mut self, path: &str) -> Result<Self> {
    let path_segments = path.trim_start_matches('/').split('/').peekable();
    let digests_to_remove = conceal(&self.object, path_segments, &self.disclosures)?
      .into_iter()
      .map(ToOwned::to_owned)
      .collect_vec();
    self.removed.extend(digests_to_remove);

    Ok(self)
  }

  /// Removes all disclosures, resulting in a token that, when presented, has
  /// *all* selectively-disclosable values omitted.
  pub fn conceal_all(mut self) -> Self {
    self.removed.extend(self.order.iter().cloned());
    self
  }

  /// Returns the resulting [`SdJwt`] together with all removed disclosures.
  pub fn finish(mut self) -> (SdJwt, Vec<Disclosure>) {
    let mut kept = Vec::with_capacity(self.order.len());
    let mut removed = Vec::new();
    for digest in &self.order {
      let disclosure = self
        .disclosures
        .remove(digest)
        .expect("every ordered digest has a disclosure");
      if self.removed.contains(digest) {
        removed.push(disclosure);
      } else {
        kept.push(disclosure);
      }
    }

    (SdJwt::new(self.jwt, kept, None), removed)
  }
}

fn conceal<'p, 'o, 'd, I>(
  object: &'o Value,
  mut path: Peekable<I>,
  disclosures: &'d HashMap<String, Disclosure>,
) -> Result<Vec<&'o str>>
where
  I: Iterator<Item = &'p str>,
  'd: 'o,
{
  let element_key = path
    .next()
    .ok_or_else(|| Error::PlanShapeMismatch("element at path doesn't exist or is not disclosable".to_string()))?;
  let has_next = path.peek().is_some();
  match object {
    // We are just traversing to a deeper part of the object.
    Value::Object(object) if has_next => {
      let next_object = object
        .get(element_key)
        .or_else(|| {
          find_disclosure(object, element_key, disclosures)
            .and_then(|digest| disclosures.get(digest))
            .map(|disclosure| disclosure.claim_value())
        })
        .ok_or_else(|| {
          Error::PlanShapeMismatch("the referenced element doesn't exist or is not concealable".to_string())
        })?;

      conceal(next_object, path, disclosures)
    }
    // We reached the parent of the value we want to conceal.
    // Make sure it's concealable by finding its disclosure.
    Value::Object(object) => {
      let digest = find_disclosure(object, element_key, disclosures).ok_or_else(|| {
        Error::PlanShapeMismatch("the referenced element doesn't exist or is not concealable".to_string())
      })?;
      let disclosure = disclosures.get(digest).expect("`find_disclosure` only returns mapped digests");
      let mut sub_disclosures: Vec<&str> = get_all_sub_disclosures(disclosure.claim_value(), disclosures).collect();
      sub_disclosures.push(digest);
      Ok(sub_disclosures)
    }
    // Traversing an array.
    Value::Array(arr) if has_next => {
      let next_object = element_key
        .parse::<usize>()
        .ok()
        .and_then(|index| arr.get(index))
        .ok_or_else(|| {
          Error::PlanShapeMismatch(format!("the array has no element with index {element_key}"))
        })?;

      conceal(next_object, path, disclosures)
    }
    // Concealing an array's entry.
    Value::Array(arr) => {
      let digest = element_key
        .parse::<usize>()
        .ok()
        .and_then(|index| arr.get(index))
        .and_then(Value::as_object)
        .and_then(|entry| find_disclosure(entry, "", disclosures))
        .ok_or_else(|| {
          Error::PlanShapeMismatch("the referenced element doesn't exist or is not concealable".to_string())
        })?;
      let disclosure = disclosures.get(digest).expect("`find_disclosure` only returns mapped digests");
      let mut sub_disclosures: Vec<&str> = get_all_sub_disclosures(disclosure.claim_value(), disclosures).collect();
      sub_disclosures.push(digest);
      Ok(sub_disclosures)
    }
    _ => Err(Error::PlanShapeMismatch(format!(
      "the value at {element_key} can neither be traversed nor concealed"
    ))),
  }
}

fn find_disclosure<'o>(
  object: &'o JsonObject,
  key: &str,
  disclosures: &HashMap<String, Disclosure>,
) -> Option<&'o str> {
  let maybe_disclosable_array_entry = || {
    object
      .get(ARRAY_DIGEST_KEY)
      .and_then(|value| value.as_str())
      .filter(|_| object.len() == 1)
  };
  // Try to find the digest for disclosable property `key` in
  // the `_sd` field of `object`.
  object
    .get(DIGESTS_KEY)
    .and_then(|value| value.as_array())
    .iter()
    .flat_map(|values| values.iter())
    .flat_map(|value| value.as_str())
    .find(|digest| {
      disclosures
        .get(*digest)
        .and_then(|disclosure| disclosure.claim_name())
        .is_some_and(|name| name == key)
    })
    // If no result is found try checking `object` as a disclosable array entry.
    .or_else(maybe_disclosable_array_entry)
}

fn get_all_sub_disclosures<'v, 'd>(
  start: &'v Value,
  disclosures: &'d HashMap<String, Disclosure>,
) -> Box<dyn Iterator<Item = &'v str> + 'v>
where
  'd: 'v,
{
  match start {
    // `start` is a JSON object, check if it has a "_sd" array + recursively
    // check all its properties.
    Value::Object(object) => {
      let direct_sds = object
        .get(DIGESTS_KEY)
        .and_then(|sd| sd.as_array())
        .map(|sd| sd.iter())
        .unwrap_or_default()
        .flat_map(|value| value.as_str())
        .filter(|digest| disclosures.contains_key(*digest));
      let sub_sds = object
        .values()
        .flat_map(|value| get_all_sub_disclosures(value, disclosures));
      Box::new(itertools::chain!(direct_sds, sub_sds))
    }
    // `start` is a JSON array, check for disclosable values `{"...": <digest>}` +
    // recursively check all its values.
    Value::Array(arr) => {
      let mut digests = vec![];
      for value in arr {
        if let Some(Value::String(digest)) = value.get(ARRAY_DIGEST_KEY) {
          if disclosures.contains_key(digest) {
            digests.push(digest.as_str());
          }
        } else {
          get_all_sub_disclosures(value, disclosures).for_each(|digest| digests.push(digest));
        }
      }
      Box::new(digests.into_iter())
    }
    _ => Box::new(std::iter::empty()),
  }
}

#[cfg(test)]
mod test {
  use crate::b64_url_encode;
  use crate::BlindingPlan;
  use crate::Error;
  use crate::SdJwt;
  use crate::SdObjectBlinder;
  use crate::Sha256Hasher;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use serde_json::json;
  use serde_json::Value;

  /// Builds a parsed SD-JWT around a blinded payload without real signatures.
  fn sd_jwt(object: Value, plan: &BlindingPlan) -> SdJwt {
    let mut blinder = SdObjectBlinder::with_hasher_and_rng(Sha256Hasher::new(), StdRng::seed_from_u64(11));
    let blinded = blinder.blind(&object, plan).unwrap();
    let header = b64_url_encode(serde_json::to_vec(&json!({"alg": "HS256"})).unwrap());
    let payload = b64_url_encode(serde_json::to_vec(&blinded.object).unwrap());
    let mut presentation = format!("{header}.{payload}.c2ln~");
    for disclosure in &blinded.disclosures {
      presentation.push_str(disclosure.as_str());
      presentation.push('~');
    }
    SdJwt::parse(&presentation).unwrap()
  }

  fn address_credential() -> SdJwt {
    let object = json!({
      "sub": "user_42",
      "address": {
        "street_address": "123 Main St",
        "country": "US"
      },
      "nationalities": ["US", "DE"]
    });
    let plan = BlindingPlan::blind_all(&object);
    sd_jwt(object, &plan)
  }

  #[test]
  fn conceal_removes_the_disclosure() {
    let token = address_credential();
    let total = token.disclosures().len();
    let (token, removed) = token
      .into_presentation(&Sha256Hasher::new())
      .unwrap()
      .conceal("/nationalities/0")
      .unwrap()
      .finish();
    assert_eq!(removed.len(), 1);
    assert_eq!(token.disclosures().len(), total - 1);
    assert_eq!(removed[0].claim_value(), "US");
  }

  #[test]
  fn concealing_a_parent_removes_nested_disclosures() {
    let token = address_credential();
    let (_, removed) = token
      .into_presentation(&Sha256Hasher::new())
      .unwrap()
      .conceal("/address")
      .unwrap()
      .finish();
    // street_address, country, and address itself.
    assert_eq!(removed.len(), 3);
  }

  #[test]
  fn conceal_all_drops_everything() {
    let token = address_credential();
    let total = token.disclosures().len();
    let (token, removed) = token
      .into_presentation(&Sha256Hasher::new())
      .unwrap()
      .conceal_all()
      .finish();
    assert!(token.disclosures().is_empty());
    assert_eq!(removed.len(), total);
  }

  #[test]
  fn unknown_paths_are_rejected() {
    let token = address_credential();
    let builder = token.into_presentation(&Sha256Hasher::new()).unwrap();
    let result = builder.conceal("/no-such-claim");
    assert!(matches!(result.unwrap_err(), Error::PlanShapeMismatch(_)));
  }

  #[test]
  fn hasher_mismatch_is_rejected() {
    let token = address_credential();
    let result = token.into_presentation(&crate::Sha384Hasher::new());
    assert!(matches!(result.unwrap_err(), Error::UnsupportedAlgorithm(_)));
  }

  #[test]
  fn disclosure_order_is_preserved() {
    let token = address_credential();
    let expected: Vec<String> = token
      .disclosures()
      .iter()
      .filter(|disclosure| disclosure.claim_name() != Some("sub"))
      .map(ToString::to_string)
      .collect();
    let (token, _) = token
      .into_presentation(&Sha256Hasher::new())
      .unwrap()
      .conceal("/sub")
      .unwrap()
      .finish();
    let presented: Vec<String> = token.disclosures().iter().map(ToString::to_string).collect();
    assert_eq!(presented, expected);
  }
}
