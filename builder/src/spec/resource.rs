use once_cell::sync::Lazy;
use regex::Regex;
use serde::{
    de::{Error as _, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{collections::BTreeMap, convert::Infallible, fmt, str::FromStr};
use thiserror::Error;

use super::yaml::Scalar;

static QUANTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?\d+)\s*([A-Za-z]+)?\s*$").expect("quantity pattern is valid"));

/// A resource the job requests through a `request_<name>` line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Resource {
    Memory,
    Cpus,
    Disk,
    Gpus,
    Other(String),
}

impl Resource {
    /// key of the submit line requesting this resource
    pub fn request_key(&self) -> String {
        format!("request_{self}")
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Cpus => f.write_str("cpus"),
            Self::Disk => f.write_str("disk"),
            Self::Gpus => f.write_str("gpus"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for Resource {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name.to_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            "cpus" | "cpu" | "cpu-count" | "cpu_count" => Self::Cpus,
            "disk" => Self::Disk,
            "gpus" | "gpu" => Self::Gpus,
            _ => Self::Other(name.to_string()),
        })
    }
}

impl From<String> for Resource {
    fn from(name: String) -> Self {
        match name.parse() {
            Ok(resource) => resource,
            Err(never) => match never {},
        }
    }
}

impl From<Resource> for String {
    fn from(resource: Resource) -> Self {
        resource.to_string()
    }
}

/// Size suffix accepted by the scheduler for memory and disk requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeUnit {
    Kilo,
    Mega,
    Giga,
    Tera,
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kilo => "KB",
            Self::Mega => "MB",
            Self::Giga => "GB",
            Self::Tera => "TB",
        })
    }
}

impl FromStr for SizeUnit {
    type Err = QuantityError;

    fn from_str(unit: &str) -> Result<Self, Self::Err> {
        match unit.to_uppercase().as_str() {
            "K" | "KB" => Ok(Self::Kilo),
            "M" | "MB" => Ok(Self::Mega),
            "G" | "GB" => Ok(Self::Giga),
            "T" | "TB" => Ok(Self::Tera),
            _ => Err(QuantityError::UnknownUnit(unit.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("expected an integer with an optional KB/MB/GB/TB suffix, found {0:?}")]
    Malformed(String),
    #[error("unknown size unit {0:?}")]
    UnknownUnit(String),
}

/// Requested amount of a resource, e.g. `12` cpus or `8GB` of memory.
///
/// Negative and zero amounts are representable so validation can reject them
/// with a message naming the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quantity {
    pub amount: i64,
    pub unit: Option<SizeUnit>,
}

impl Quantity {
    pub fn count(amount: i64) -> Self {
        Self { amount, unit: None }
    }

    pub fn sized(amount: i64, unit: SizeUnit) -> Self {
        Self {
            amount,
            unit: Some(unit),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{}{unit}", self.amount),
            None => write!(f, "{}", self.amount),
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let captures = QUANTITY
            .captures(text)
            .ok_or_else(|| QuantityError::Malformed(text.to_string()))?;
        let amount = captures[1]
            .parse::<i64>()
            .map_err(|_| QuantityError::Malformed(text.to_string()))?;
        let unit = captures
            .get(2)
            .map(|unit| unit.as_str().parse::<SizeUnit>())
            .transpose()?;

        Ok(Self { amount, unit })
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.unit {
            None => serializer.serialize_i64(self.amount),
            Some(_) => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Scalar::deserialize(deserializer)?.0 {
            Some(text) => text.parse().map_err(D::Error::custom),
            None => Err(D::Error::custom("resource quantity must not be null")),
        }
    }
}

/// `#[serde(deserialize_with = "unique_requests")]` for resource maps.
///
/// Aliases resolve to the same [`Resource`], so `memory` and `mem` in one
/// mapping would silently overwrite each other in a plain map.
pub fn unique_requests<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<Resource, Quantity>, D::Error> {
    deserializer.deserialize_map(RequestVisitor)
}

struct RequestVisitor;

impl<'de> Visitor<'de> for RequestVisitor {
    type Value = BTreeMap<Resource, Quantity>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a mapping of resource names to quantities")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(BTreeMap::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut requests = BTreeMap::new();

        while let Some((name, quantity)) = access.next_entry::<String, Quantity>()? {
            let resource = Resource::from(name.clone());
            if requests.insert(resource.clone(), quantity).is_some() {
                return Err(A::Error::custom(format!(
                    "resources.{name} requests {resource} more than once"
                )));
            }
        }

        Ok(requests)
    }
}
