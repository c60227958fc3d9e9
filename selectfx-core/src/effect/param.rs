//! Effect Parameters
//!
//! Parameters identify which instance of an effect a selector asks for. The
//! same logical parameters are usually rebuilt on every render, so identity is
//! structural: two parameter lists are the same iff they are deep-equal.
//!
//! # Value Domain
//!
//! Only a closed set of plain values is supported:
//!
//! - null, booleans, integers, finite floats, strings
//! - ordered lists of parameters
//! - records with string keys (stored sorted, so field order never matters)
//!
//! Anything else (closures, handles, cyclic data) has no structural identity
//! and cannot be turned into a [`Param`]. Non-finite floats are representable
//! in the enum but rejected by [`Param::validate`], which every descriptor
//! runs on construction.

use std::collections::BTreeMap;

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{EffectError, Result};

/// Parameter list of one descriptor. Most effects take a handful of
/// arguments, so they stay inline.
pub type Params = SmallVec<[Param; 4]>;

/// A single structurally comparable parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer too large for `Int`.
    UInt(u64),
    /// A finite float.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list.
    List(Vec<Param>),
    /// A record with string keys.
    Record(BTreeMap<String, Param>),
}

impl Param {
    /// Check the value against the supported domain and bring it into
    /// canonical form.
    ///
    /// Canonical form guarantees that deep-equal values serialize to the same
    /// key: `-0.0` becomes `0.0`, and `UInt` values that fit in an `i64` become
    /// `Int`.
    pub fn validate(self) -> Result<Self> {
        match self {
            Param::Float(f) if !f.is_finite() => Err(EffectError::UnsupportedParam {
                reason: format!("non-finite float {f}"),
            }),
            Param::Float(f) if f == 0.0 => Ok(Param::Float(0.0)),
            Param::UInt(u) => Ok(match i64::try_from(u) {
                Ok(i) => Param::Int(i),
                Err(_) => Param::UInt(u),
            }),
            Param::List(items) => items
                .into_iter()
                .map(Param::validate)
                .collect::<Result<Vec<_>>>()
                .map(Param::List),
            Param::Record(fields) => fields
                .into_iter()
                .map(|(k, v)| v.validate().map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Param::Record),
            other => Ok(other),
        }
    }

    /// Build a record from key-value pairs.
    pub fn record<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Param>,
        I: IntoIterator<Item = (K, V)>,
    {
        Param::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

macro_rules! param_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Int(i64::from(value))
                }
            }
        )*
    };
}

param_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Param {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => Param::Int(i),
            Err(_) => Param::UInt(value),
        }
    }
}

impl From<usize> for Param {
    fn from(value: usize) -> Self {
        Param::from(value as u64)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<f32> for Param {
    fn from(value: f32) -> Self {
        Param::Float(f64::from(value))
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Str(value.to_owned())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Str(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(value: Vec<T>) -> Self {
        Param::List(value.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Param>> From<BTreeMap<String, V>> for Param {
    fn from(value: BTreeMap<String, V>) -> Self {
        Param::Record(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl TryFrom<serde_json::Value> for Param {
    type Error = EffectError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => Param::Null,
            Value::Bool(b) => Param::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Param::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Param::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    Param::Float(f)
                } else {
                    return Err(EffectError::UnsupportedParam {
                        reason: format!("unrepresentable number {n}"),
                    });
                }
            }
            Value::String(s) => Param::Str(s),
            Value::Array(items) => Param::List(
                items
                    .into_iter()
                    .map(Param::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(fields) => Param::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| Param::try_from(v).map(|v| (k, v)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        })
    }
}

/// Conversion of an effect's argument value into its parameter list.
///
/// Tuples map element-wise, so `(user_id,)` yields a one-element list and
/// `()` yields an empty one.
pub trait IntoParams {
    /// Produce the parameter list for this argument value.
    fn to_params(&self) -> Params;
}

impl IntoParams for () {
    fn to_params(&self) -> Params {
        Params::new()
    }
}

impl IntoParams for Params {
    fn to_params(&self) -> Params {
        self.clone()
    }
}

impl IntoParams for Vec<Param> {
    fn to_params(&self) -> Params {
        self.iter().cloned().collect()
    }
}

macro_rules! tuple_into_params {
    ($($name:ident),+) => {
        impl<$($name),+> IntoParams for ($($name,)+)
        where
            $($name: Clone + Into<Param>),+
        {
            #[allow(non_snake_case)]
            fn to_params(&self) -> Params {
                let ($($name,)+) = self.clone();
                smallvec::smallvec![$($name.into()),+]
            }
        }
    };
}

tuple_into_params!(A);
tuple_into_params!(A, B);
tuple_into_params!(A, B, C);
tuple_into_params!(A, B, C, D);
tuple_into_params!(A, B, C, D, E);
tuple_into_params!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_floats_are_rejected() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = Param::Float(f).validate().unwrap_err();
            assert!(matches!(err, EffectError::UnsupportedParam { .. }));
        }

        let nested = Param::List(vec![Param::Int(1), Param::Float(f64::NAN)]);
        assert!(nested.validate().is_err());
    }

    #[test]
    fn validate_canonicalizes() {
        assert_eq!(Param::Float(-0.0).validate().unwrap(), Param::Float(0.0));
        assert_eq!(Param::UInt(7).validate().unwrap(), Param::Int(7));
        assert_eq!(
            Param::UInt(u64::MAX).validate().unwrap(),
            Param::UInt(u64::MAX)
        );
    }

    #[test]
    fn records_ignore_field_order() {
        let a = Param::record([("id", Param::from(1)), ("page", Param::from(2))]);
        let b = Param::record([("page", Param::from(2)), ("id", Param::from(1))]);

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn strings_and_numbers_stay_distinct() {
        let s = serde_json::to_string(&Param::from("7")).unwrap();
        let n = serde_json::to_string(&Param::from(7)).unwrap();
        assert_ne!(s, n);
    }

    #[test]
    fn tuples_convert_element_wise() {
        assert!(().to_params().is_empty());
        assert_eq!((7u32,).to_params().as_slice(), &[Param::Int(7)]);
        assert_eq!(
            ("users", 3i64, true).to_params().as_slice(),
            &[Param::from("users"), Param::Int(3), Param::Bool(true)]
        );
    }

    #[test]
    fn json_values_convert() {
        let value = serde_json::json!({"ids": [1, 2], "name": "x", "ok": null});
        let param = Param::try_from(value).unwrap();

        assert_eq!(
            param,
            Param::record([
                ("ids", Param::List(vec![Param::Int(1), Param::Int(2)])),
                ("name", Param::from("x")),
                ("ok", Param::Null),
            ])
        );
    }
}
