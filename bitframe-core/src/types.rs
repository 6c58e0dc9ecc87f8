//! Core types for bitframe

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map attached to a row or a column. Keys serialize sorted.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Scalar attribute value
///
/// Serializes without a type tag so `{"x":100}` and `{"x":-0.44}` come out
/// exactly as written; deserializing keeps integers and floats apart.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// String
    String(String),
}

impl AttrValue {
    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        match self {
            AttrValue::Integer(_) | AttrValue::Float(_) => 8,
            AttrValue::Boolean(_) => 1,
            AttrValue::String(s) => s.len(),
        }
    }

    /// Get as f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Integer(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{:?}", v),
            AttrValue::Boolean(v) => write!(f, "{}", v),
            AttrValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AttrValue::Integer(v) => serializer.serialize_i64(*v),
            AttrValue::Float(v) => serializer.serialize_f64(*v),
            AttrValue::Boolean(v) => serializer.serialize_bool(*v),
            AttrValue::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AttrValueVisitor;

        impl<'de> Visitor<'de> for AttrValueVisitor {
            type Value = AttrValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer, float, boolean or string")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<AttrValue, E> {
                Ok(AttrValue::Boolean(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<AttrValue, E> {
                Ok(AttrValue::Integer(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<AttrValue, E> {
                i64::try_from(v)
                    .map(AttrValue::Integer)
                    .map_err(|_| E::custom(format!("integer out of range: {}", v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<AttrValue, E> {
                Ok(AttrValue::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<AttrValue, E> {
                Ok(AttrValue::String(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<AttrValue, E> {
                Ok(AttrValue::String(v))
            }
        }

        deserializer.deserialize_any(AttrValueVisitor)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Integer(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Boolean(v)
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

/// Column attributes returned alongside bitmap results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub attrs: AttrMap,
}

/// Slice that a column belongs to
#[inline]
pub fn slice_of(column: u64) -> u64 {
    column / crate::config::SLICE_WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_json_keeps_numeric_kind() {
        let mut attrs = AttrMap::new();
        attrs.insert("x".into(), AttrValue::Integer(-200));
        attrs.insert("y".into(), AttrValue::Float(-0.44));
        attrs.insert("z".into(), AttrValue::Float(3.0));
        attrs.insert("a".into(), AttrValue::from("bar"));
        attrs.insert("b".into(), AttrValue::Boolean(true));

        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"a":"bar","b":true,"x":-200,"y":-0.44,"z":3.0}"#);

        let back: AttrMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_empty_attrs_serialize_as_object() {
        assert_eq!(serde_json::to_string(&AttrMap::new()).unwrap(), "{}");
    }

    #[test]
    fn test_profile_field_order() {
        let mut attrs = AttrMap::new();
        attrs.insert("foo".into(), "bar".into());
        let p = Profile { id: 100, attrs };
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"id":100,"attrs":{"foo":"bar"}}"#
        );
    }

    #[test]
    fn test_slice_of() {
        let w = crate::config::SLICE_WIDTH;
        assert_eq!(slice_of(0), 0);
        assert_eq!(slice_of(w - 1), 0);
        assert_eq!(slice_of(w), 1);
        assert_eq!(slice_of(3 * w + 5), 3);
    }
}
