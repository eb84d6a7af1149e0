#![forbid(unsafe_code)]

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Changeset specs attributed to a workspace's latest execution.
///
/// Persisted as a JSON object used as a set (`{"12":{},"13":{}}`); the object
/// form only exists in the serde impls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangesetSpecIds(BTreeSet<i64>);

impl ChangesetSpecIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i64) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.iter().collect()
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl FromIterator<i64> for ChangesetSpecIds {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ChangesetSpecIds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for id in &self.0 {
            map.serialize_entry(&id.to_string(), &serde_json::Map::new())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChangesetSpecIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdSetVisitor)
    }
}

struct IdSetVisitor;

impl<'de> Visitor<'de> for IdSetVisitor {
    type Value = ChangesetSpecIds;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object keyed by changeset spec id, or an array of ids")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut ids = BTreeSet::new();
        while let Some((key, _)) = map.next_entry::<String, serde::de::IgnoredAny>()? {
            let id = key
                .trim()
                .parse::<i64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid changeset spec id {key:?}")))?;
            ids.insert(id);
        }
        Ok(ChangesetSpecIds(ids))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut ids = BTreeSet::new();
        while let Some(id) = seq.next_element::<i64>()? {
            ids.insert(id);
        }
        Ok(ChangesetSpecIds(ids))
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(ChangesetSpecIds::default())
    }
}
