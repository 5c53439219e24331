//! Serde helpers for 128-bit ledger identifiers
//!
//! JSON numbers lose precision beyond 2^53 in most consumers, so ledger ids
//! and amounts are written as decimal strings at every JSON boundary.
//! Deserialization accepts either a string or a plain integer.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

/// `#[serde(with = "serde_ids::u128_string")]`
pub mod u128_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(U128Visitor)
    }
}

/// `#[serde(with = "serde_ids::u128_string_vec")]`
pub mod u128_string_vec {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::Deserialize;

    pub fn serialize<S: Serializer>(values: &[u128], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u128>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| s.parse::<u128>().map_err(de::Error::custom))
            .collect()
    }
}

/// `#[serde(with = "serde_ids::i128_string")]` for signed balances
pub mod i128_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        deserializer.deserialize_any(I128Visitor)
    }
}

struct U128Visitor;

impl<'de> Visitor<'de> for U128Visitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned 128-bit integer as a string or number")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        v.parse::<u128>().map_err(E::custom)
    }
}

struct I128Visitor;

impl<'de> Visitor<'de> for I128Visitor {
    type Value = i128;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a signed 128-bit integer as a string or number")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
        Ok(i128::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
        Ok(i128::from(v))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<i128, E> {
        Ok(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i128, E> {
        v.parse::<i128>().map_err(E::custom)
    }
}
