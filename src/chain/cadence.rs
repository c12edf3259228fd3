//! JSON-Cadence value model and the field bag view over event payloads.
//!
//! Flow encodes event payloads as JSON-Cadence: every value is an object with a
//! `type` tag and a `value`. [`CadenceValue::from_json`] turns that into a typed
//! tree; [`FieldBag`] is the name-keyed view the event decoder reads from.
//!
//! ```
//! use trixy_flow_indexer::chain::cadence::{CadenceValue, FieldBag};
//! use serde_json::json;
//!
//! let payload = json!({
//!     "type": "Event",
//!     "value": {
//!         "id": "A.0000000000000001.TrixyEvents.WinningsClaimed",
//!         "fields": [
//!             { "name": "marketId", "value": { "type": "UInt64", "value": "3" } },
//!             { "name": "payout", "value": { "type": "UFix64", "value": "1.50000000" } }
//!         ]
//!     }
//! });
//!
//! let event = CadenceValue::from_json(&payload).unwrap();
//! let fields = event.event_fields().unwrap();
//! assert_eq!(fields.lookup("marketId").and_then(CadenceValue::as_unsigned), Some(3));
//! ```

use std::collections::{BTreeMap, HashMap};

use eyre::{bail, eyre, WrapErr};
use serde_json::Value;

/// A decoded JSON-Cadence value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CadenceValue {
    /// `Void`
    Void,
    /// `Optional`, `None` when the JSON value is `null`
    Optional(Option<Box<CadenceValue>>),
    /// `Bool`
    Bool(bool),
    /// `String` and `Character`
    String(String),
    /// `Address`, kept as the hex string the node sent
    Address(String),
    /// Any integer type (`Int*`, `UInt*`, `Word*`); value is the decimal text
    Integer {
        /// Cadence type name, e.g. `UInt64`
        type_name: String,
        /// Decimal representation as sent by the node
        value: String,
    },
    /// `Fix64` / `UFix64`; value is the decimal text
    FixedPoint {
        /// Cadence type name
        type_name: String,
        /// Decimal representation as sent by the node
        value: String,
    },
    /// `Array` (variable or constant sized)
    Array(Vec<CadenceValue>),
    /// `Dictionary`, entries in payload order
    Dictionary(Vec<(CadenceValue, CadenceValue)>),
    /// `Event`, `Struct`, `Resource`, `Contract` or `Enum`
    Composite {
        /// Composite kind (`Event`, `Struct`, ...)
        kind: String,
        /// Fully qualified type id
        id: String,
        /// Fields in declaration order
        fields: EventFields,
    },
    /// Types the indexer never reads (`Path`, `Type`, `Capability`, ...)
    Other {
        /// Cadence type name
        type_name: String,
    },
}

const INTEGER_TYPES: &[&str] = &[
    "Int", "Int8", "Int16", "Int32", "Int64", "Int128", "Int256", "UInt", "UInt8", "UInt16",
    "UInt32", "UInt64", "UInt128", "UInt256", "Word8", "Word16", "Word32", "Word64", "Word128",
    "Word256",
];

const COMPOSITE_TYPES: &[&str] = &["Event", "Struct", "Resource", "Contract", "Enum"];

impl CadenceValue {
    /// Parse a JSON-Cadence document.
    ///
    /// # Errors
    ///
    /// Fails when the document does not follow the JSON-Cadence shape for its
    /// declared type.
    pub fn from_json(json: &Value) -> eyre::Result<Self> {
        let type_name = json
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre!("JSON-Cadence value without a type tag"))?;
        let value = json.get("value").unwrap_or(&Value::Null);

        let parsed = match type_name {
            "Void" => Self::Void,
            "Optional" => {
                if value.is_null() {
                    Self::Optional(None)
                } else {
                    Self::Optional(Some(Box::new(Self::from_json(value)?)))
                }
            }
            "Bool" => Self::Bool(
                value
                    .as_bool()
                    .ok_or_else(|| eyre!("Bool value is not a boolean"))?,
            ),
            "String" | "Character" => Self::String(expect_str(value, type_name)?.to_string()),
            "Address" => Self::Address(expect_str(value, type_name)?.to_string()),
            "Fix64" | "UFix64" => Self::FixedPoint {
                type_name: type_name.to_string(),
                value: expect_str(value, type_name)?.to_string(),
            },
            t if INTEGER_TYPES.contains(&t) => Self::Integer {
                type_name: t.to_string(),
                value: expect_str(value, t)?.to_string(),
            },
            "Array" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| eyre!("Array value is not a JSON array"))?;
                Self::Array(
                    items
                        .iter()
                        .map(Self::from_json)
                        .collect::<eyre::Result<Vec<_>>>()?,
                )
            }
            "Dictionary" => {
                let entries = value
                    .as_array()
                    .ok_or_else(|| eyre!("Dictionary value is not a JSON array"))?;
                let mut pairs = Vec::with_capacity(entries.len());
                for entry in entries {
                    let key = entry
                        .get("key")
                        .ok_or_else(|| eyre!("Dictionary entry without key"))?;
                    let val = entry
                        .get("value")
                        .ok_or_else(|| eyre!("Dictionary entry without value"))?;
                    pairs.push((Self::from_json(key)?, Self::from_json(val)?));
                }
                Self::Dictionary(pairs)
            }
            t if COMPOSITE_TYPES.contains(&t) => {
                let id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| eyre!("{t} value without an id"))?
                    .to_string();
                let raw_fields = value
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| eyre!("{t} value without fields"))?;

                let mut fields = Vec::with_capacity(raw_fields.len());
                for field in raw_fields {
                    let name = field
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| eyre!("{t} field without a name"))?;
                    let val = field
                        .get("value")
                        .ok_or_else(|| eyre!("{t} field '{name}' without a value"))?;
                    let parsed = Self::from_json(val)
                        .wrap_err_with(|| format!("in field '{name}' of {id}"))?;
                    fields.push((name.to_string(), parsed));
                }

                Self::Composite {
                    kind: t.to_string(),
                    id,
                    fields: EventFields(fields),
                }
            }
            other => Self::Other {
                type_name: other.to_string(),
            },
        };

        Ok(parsed)
    }

    /// Cadence type name, used in decode error messages.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Void => "Void",
            Self::Optional(_) => "Optional",
            Self::Bool(_) => "Bool",
            Self::String(_) => "String",
            Self::Address(_) => "Address",
            Self::Integer { type_name, .. }
            | Self::FixedPoint { type_name, .. }
            | Self::Other { type_name } => type_name,
            Self::Array(_) => "Array",
            Self::Dictionary(_) => "Dictionary",
            Self::Composite { kind, .. } => kind,
        }
    }

    /// Strip any number of `Optional` layers; `None` for a nil optional.
    #[must_use]
    pub fn unwrap_optional(&self) -> Option<&Self> {
        match self {
            Self::Optional(None) => None,
            Self::Optional(Some(inner)) => inner.unwrap_optional(),
            other => Some(other),
        }
    }

    /// String contents of a `String`/`Character` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Non-negative integer value that fits in a `u64`.
    #[must_use]
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Self::Integer { value, .. } => value.parse().ok(),
            _ => None,
        }
    }

    /// Hex text of an `Address` value.
    #[must_use]
    pub fn as_address(&self) -> Option<&str> {
        match self {
            Self::Address(a) => Some(a),
            _ => None,
        }
    }

    /// Decimal text of a `Fix64`/`UFix64` value, untouched.
    #[must_use]
    pub fn as_fixed_point(&self) -> Option<&str> {
        match self {
            Self::FixedPoint { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Elements of an `Array` value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a `Dictionary` value.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(Self, Self)]> {
        match self {
            Self::Dictionary(entries) => Some(entries),
            _ => None,
        }
    }

    /// Fields of an `Event` composite.
    #[must_use]
    pub const fn event_fields(&self) -> Option<&EventFields> {
        match self {
            Self::Composite { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

fn expect_str<'a>(value: &'a Value, type_name: &str) -> eyre::Result<&'a str> {
    match value.as_str() {
        Some(s) => Ok(s),
        None => bail!("{type_name} value is not a JSON string"),
    }
}

/// Name-keyed view over a single event payload.
///
/// Implementors only provide [`FieldBag::get`]; optional unwrapping and alias
/// chains are shared.
pub trait FieldBag {
    /// Raw field by name, exactly as it appeared in the payload.
    fn get(&self, name: &str) -> Option<&CadenceValue>;

    /// Field by name with `Optional` layers stripped; nil counts as absent.
    fn lookup(&self, name: &str) -> Option<&CadenceValue> {
        self.get(name).and_then(CadenceValue::unwrap_optional)
    }

    /// First candidate name that is present (and non-nil).
    fn first_present<'n>(&self, names: &[&'n str]) -> Option<(&'n str, &CadenceValue)> {
        names
            .iter()
            .find_map(|name| self.lookup(name).map(|value| (*name, value)))
    }
}

/// Ordered fields of a composite value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFields(pub Vec<(String, CadenceValue)>);

impl FieldBag for EventFields {
    fn get(&self, name: &str) -> Option<&CadenceValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl FieldBag for HashMap<String, CadenceValue> {
    fn get(&self, name: &str) -> Option<&CadenceValue> {
        HashMap::get(self, name)
    }
}

impl FieldBag for BTreeMap<String, CadenceValue> {
    fn get(&self, name: &str) -> Option<&CadenceValue> {
        BTreeMap::get(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_scalars() {
        let v = CadenceValue::from_json(&json!({"type": "UInt64", "value": "42"})).unwrap();
        assert_eq!(v.as_unsigned(), Some(42));
        assert_eq!(v.type_name(), "UInt64");

        let v = CadenceValue::from_json(&json!({"type": "UFix64", "value": "0.00000001"}))
            .unwrap();
        assert_eq!(v.as_fixed_point(), Some("0.00000001"));

        let v = CadenceValue::from_json(&json!({"type": "Address", "value": "0x01cf0e2f2f715450"}))
            .unwrap();
        assert_eq!(v.as_address(), Some("0x01cf0e2f2f715450"));
    }

    #[test]
    fn test_negative_integer_is_not_unsigned() {
        let v = CadenceValue::from_json(&json!({"type": "Int64", "value": "-5"})).unwrap();
        assert_eq!(v.as_unsigned(), None);
    }

    #[test]
    fn test_integer_value_must_be_string() {
        assert!(CadenceValue::from_json(&json!({"type": "UInt64", "value": 5})).is_err());
    }

    #[test]
    fn test_optional_unwrapping() {
        let some = CadenceValue::from_json(&json!({
            "type": "Optional",
            "value": {"type": "String", "value": "aave"}
        }))
        .unwrap();
        assert_eq!(some.unwrap_optional().and_then(CadenceValue::as_str), Some("aave"));

        let none = CadenceValue::from_json(&json!({"type": "Optional", "value": null})).unwrap();
        assert!(none.unwrap_optional().is_none());
    }

    #[test]
    fn test_dictionary_and_array() {
        let dict = CadenceValue::from_json(&json!({
            "type": "Dictionary",
            "value": [
                {"key": {"type": "String", "value": "aave"}, "value": {"type": "UFix64", "value": "4.20000000"}}
            ]
        }))
        .unwrap();
        let entries = dict.as_map().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_str(), Some("aave"));

        let list = CadenceValue::from_json(&json!({
            "type": "Array",
            "value": [{"type": "String", "value": "yes"}, {"type": "String", "value": "no"}]
        }))
        .unwrap();
        assert_eq!(list.as_list().map(<[CadenceValue]>::len), Some(2));
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let v = CadenceValue::from_json(&json!({"type": "Path", "value": {"domain": "storage", "identifier": "x"}}))
            .unwrap();
        assert_eq!(v.type_name(), "Path");
    }

    #[test]
    fn test_first_present_skips_nil() {
        let mut bag = HashMap::new();
        bag.insert("user".to_string(), CadenceValue::Optional(None));
        bag.insert(
            "userAddress".to_string(),
            CadenceValue::Address("0x02".to_string()),
        );

        let (name, value) = bag.first_present(&["user", "userAddress"]).unwrap();
        assert_eq!(name, "userAddress");
        assert_eq!(value.as_address(), Some("0x02"));
        assert!(bag.first_present(&["missing"]).is_none());
    }

    #[test]
    fn test_event_field_error_names_field() {
        let err = CadenceValue::from_json(&json!({
            "type": "Event",
            "value": {
                "id": "A.01.TrixyEvents.BetPlaced",
                "fields": [{"name": "amount", "value": {"type": "UFix64", "value": 12.5}}]
            }
        }))
        .unwrap_err();
        assert!(format!("{err:#}").contains("amount"));
    }
}
