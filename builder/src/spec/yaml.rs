//! YAML helpers shared by job files and sweep files.
//!
//! Job files spell ordered collections (arguments, directives, DAG variables)
//! as plain YAML mappings. serde's map types either sort or reject duplicate
//! keys, so [`pairs`] reads the mapping entry by entry in document order and
//! leaves duplicate detection to validation.
//!
//! Unquoted numbers are read by the YAML parser before they get here, so
//! they reach the descriptor in their canonical form: `0.30` becomes `0.3`,
//! `0x1F` becomes `31`. Quote values whose exact spelling matters.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A YAML scalar flattened to its textual form, `None` for `null`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scalar(pub Option<String>);

impl Scalar {
    pub fn text(value: impl Into<String>) -> Self {
        Self(Some(value.into()))
    }
}

/// floats keep a fractional part so `1.0` does not turn into an integer
fn float_text(value: f64) -> String {
    let text = value.to_string();

    if value.is_finite() && !text.contains('.') {
        format!("{text}.0")
    } else {
        text
    }
}

struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = Scalar;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a scalar value")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(Scalar(None))
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(Scalar(None))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_bool<E: serde::de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(Scalar::text(if value { "True" } else { "False" }))
    }

    fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(Scalar::text(value.to_string()))
    }

    fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(Scalar::text(value.to_string()))
    }

    fn visit_i128<E: serde::de::Error>(self, value: i128) -> Result<Self::Value, E> {
        Ok(Scalar::text(value.to_string()))
    }

    fn visit_u128<E: serde::de::Error>(self, value: u128) -> Result<Self::Value, E> {
        Ok(Scalar::text(value.to_string()))
    }

    fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Ok(Scalar::text(float_text(value)))
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(Scalar::text(value))
    }

    fn visit_string<E: serde::de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(Scalar::text(value))
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScalarVisitor)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// An entry of an ordered YAML mapping
pub trait Pair: Sized {
    type Value: Serialize + for<'de> Deserialize<'de>;

    fn from_pair(key: String, value: Self::Value) -> Result<Self, String>;

    fn to_pair(&self) -> (&str, Self::Value);
}

/// `#[serde(with = "pairs")]` for `Vec<impl Pair>` fields
pub mod pairs {
    use super::Pair;
    use serde::{
        de::{Error as _, MapAccess, Visitor},
        ser::SerializeMap,
        Deserializer, Serializer,
    };
    use std::{fmt, marker::PhantomData};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer, P: Pair>(
        entries: &Vec<P>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for entry in entries {
            let (key, value) = entry.to_pair();
            map.serialize_entry(key, &value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>, P: Pair>(
        deserializer: D,
    ) -> Result<Vec<P>, D::Error> {
        deserializer.deserialize_map(PairVisitor(PhantomData))
    }

    struct PairVisitor<P>(PhantomData<P>);

    impl<'de, P: Pair> Visitor<'de> for PairVisitor<P> {
        type Value = Vec<P>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a mapping of names to values")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));

            while let Some((key, value)) = access.next_entry::<String, P::Value>()? {
                entries.push(P::from_pair(key, value).map_err(A::Error::custom)?);
            }

            Ok(entries)
        }
    }
}
