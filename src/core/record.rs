//! Purpose: Domain record decoded from each entry of the input object.
//! Exports: `Record`, `Location`, `Keyed`.
//! Role: The value the decoder produces and the stores accept.
//! Invariants: Missing or `null` payload fields decode to their defaults; unknown fields are ignored.
//! Invariants: `coordinates` is written as a two-element array; short arrays read as zero-filled.
use std::fmt;

use serde::de::{self, DeserializeOwned, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// A value whose identity comes from the key it was stored under.
pub trait Keyed: DeserializeOwned + Send + 'static {
    fn id(&self) -> &str;

    /// Replaces whatever id the payload carried.
    fn assign_id(&mut self, id: String);
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(deserialize_with = "null_as_default")]
    pub country: String,
    #[serde(deserialize_with = "null_as_default")]
    pub alias: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub regions: Vec<String>,
    pub coordinates: Location,
    #[serde(deserialize_with = "null_as_default")]
    pub province: String,
    #[serde(deserialize_with = "null_as_default")]
    pub timezone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub unlocs: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub code: String,
}

impl Keyed for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

// Absent and `null` are the same thing to the loader.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(into = "[f64; 2]")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Reads `null` or a numeric array of any length; missing slots are zero, extra ones ignored.
impl<'de> Deserialize<'de> for Location {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LocationVisitor)
    }
}

struct LocationVisitor;

impl<'de> Visitor<'de> for LocationVisitor {
    type Value = Location;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a [latitude, longitude] array or null")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Location, E> {
        Ok(Location::default())
    }

    fn visit_none<E: de::Error>(self) -> Result<Location, E> {
        Ok(Location::default())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Location, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Location, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut pair = [0.0; 2];
        for slot in &mut pair {
            match seq.next_element::<Option<f64>>()? {
                Some(value) => *slot = value.unwrap_or_default(),
                None => return Ok(pair.into()),
            }
        }
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(pair.into())
    }
}

impl From<[f64; 2]> for Location {
    fn from([latitude, longitude]: [f64; 2]) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl From<Location> for [f64; 2] {
    fn from(location: Location) -> Self {
        [location.latitude, location.longitude]
    }
}
