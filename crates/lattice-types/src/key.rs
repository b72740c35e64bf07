//! Order-preserving index key form of [`Value`](crate::Value).
//!
//! Index structures need total ordering, equality, and hashing, none of which
//! the SQL value model provides (NULL is incomparable, floats are partial).
//! [`KeyPart`] is the normalized total-order form: NULL sorts first, floats
//! compare by IEEE total order, collated text is folded before encoding.

use crate::value::{CollationStrength, Value};

/// One column's worth of an index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum KeyPart {
    /// NULL sorts before every non-null part.
    Null,
    Boolean(bool),
    Integer(i64),
    /// IEEE-754 bits remapped so unsigned comparison matches total order.
    Float(u64),
    Numeric { unscaled: i128, scale: u8 },
    Text(String),
    Temporal(i64),
    Binary(Vec<u8>),
}

impl KeyPart {
    /// Remap float bits so that `u64` ordering equals `f64::total_cmp`.
    fn float_bits(f: f64) -> u64 {
        let bits = f.to_bits();
        if bits >> 63 == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        }
    }

    /// Build the key form of one value.
    ///
    /// Collated text folds case for Primary/Secondary strength so the index
    /// groups keys the way the comparison rules equate them.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Boolean(b) => Self::Boolean(*b),
            Value::Integer(i) => Self::Integer(*i),
            Value::Float(f) => Self::Float(Self::float_bits(*f)),
            Value::Numeric(n) => {
                let (unscaled, scale) = n.normalized();
                Self::Numeric { unscaled, scale }
            }
            Value::Text { value, collation } => {
                let folded = match collation.as_ref().map(|c| c.strength) {
                    Some(CollationStrength::Primary | CollationStrength::Secondary) => {
                        value.to_ascii_lowercase()
                    }
                    _ => value.clone(),
                };
                Self::Text(folded)
            }
            Value::Date(v) | Value::Time(v) | Value::Timestamp(v) => Self::Temporal(*v),
            Value::Interval(iv) => Self::Temporal(i64::from(iv.months) << 32 ^ iv.nanos),
            Value::Binary(b) => Self::Binary(b.clone()),
            Value::Lob(l) => Self::Binary(l.area.to_be_bytes().to_vec()),
            Value::Plan(p) => Self::Text(p.text.clone()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A composite index key: one [`KeyPart`] per indexed column, in index
/// column order.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct IndexKey(pub Vec<KeyPart>);

impl IndexKey {
    #[must_use]
    pub fn from_values(values: &[&Value]) -> Self {
        Self(values.iter().map(|v| KeyPart::from_value(v)).collect())
    }

    /// SQL UNIQUE semantics: a key containing NULL never collides.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.0.iter().any(KeyPart::is_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Collation, Numeric};

    #[test]
    fn test_float_bits_preserve_order() {
        let vals = [-f64::INFINITY, -1.5, -0.0, 0.0, 0.25, 7.0, f64::INFINITY];
        for w in vals.windows(2) {
            assert!(
                KeyPart::float_bits(w[0]) <= KeyPart::float_bits(w[1]),
                "{} !<= {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn test_null_sorts_first() {
        assert!(KeyPart::Null < KeyPart::Integer(i64::MIN));
        assert!(KeyPart::Null < KeyPart::Boolean(false));
    }

    #[test]
    fn test_numeric_normalization_equates_scales() {
        let a = KeyPart::from_value(&Value::Numeric(Numeric::new(1200, 2)));
        let b = KeyPart::from_value(&Value::Numeric(Numeric::new(12, 0)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_collated_text_folds_into_same_key() {
        let ci = Collation::new("en").with_strength(CollationStrength::Primary);
        let a = KeyPart::from_value(&Value::collated_text("ABC", ci.clone()));
        let b = KeyPart::from_value(&Value::collated_text("abc", ci));
        assert_eq!(a, b);
        let exact = KeyPart::from_value(&Value::text("ABC"));
        assert_ne!(exact, KeyPart::from_value(&Value::text("abc")));
    }

    #[test]
    fn test_composite_key_null_detection() {
        let key = IndexKey::from_values(&[&Value::Integer(1), &Value::Null]);
        assert!(key.has_null());
        let key = IndexKey::from_values(&[&Value::Integer(1), &Value::text("x")]);
        assert!(!key.has_null());
    }
}
