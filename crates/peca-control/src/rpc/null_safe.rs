//! Null-tolerant field decoding.
//!
//! The engine sends `null` for scalars it has no value for. Fields tagged with
//! `#[serde(default, deserialize_with = "null_as_default")]` decode `null` and
//! absent values alike to the type's zero value (`false`, `0`, `0.0`, `""`).

use serde::{Deserialize, Deserializer};

pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
