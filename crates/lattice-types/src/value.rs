//! The dynamically-typed SQL value model.
//!
//! [`Value`] is a tagged union over the SQL types the planner emits. The
//! comparison and arithmetic rules follow SQL three-valued logic: operations
//! on mismatched types produce `Null` rather than failing, with the single
//! exception of division by zero, which is surfaced as a hard error.

use std::cmp::Ordering;
use std::fmt;

/// Comparison strength for collated text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum CollationStrength {
    /// Base letters only; case and accents are ignored.
    Primary,
    /// Accents distinguish, case does not.
    Secondary,
    /// Case and accents distinguish.
    #[default]
    Tertiary,
    /// Code-point identity.
    Identical,
}

/// Normalization mode applied before collated comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum CollationDecomposition {
    #[default]
    None,
    Canonical,
    Full,
}

/// A text collation: locale plus comparison strength and decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Collation {
    pub locale: String,
    pub strength: CollationStrength,
    pub decomposition: CollationDecomposition,
}

impl Collation {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            strength: CollationStrength::default(),
            decomposition: CollationDecomposition::default(),
        }
    }

    #[must_use]
    pub fn with_strength(mut self, strength: CollationStrength) -> Self {
        self.strength = strength;
        self
    }

    /// Compare two strings under this collation.
    ///
    /// Primary and Secondary strength fold ASCII case; full ICU-style locale
    /// tables are the session layer's concern, not the storage core's.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self.strength {
            CollationStrength::Primary | CollationStrength::Secondary => {
                let folded = a
                    .chars()
                    .map(|c| c.to_ascii_lowercase())
                    .cmp(b.chars().map(|c| c.to_ascii_lowercase()));
                if folded == Ordering::Equal && self.strength == CollationStrength::Secondary {
                    a.cmp(b)
                } else {
                    folded
                }
            }
            CollationStrength::Tertiary | CollationStrength::Identical => a.cmp(b),
        }
    }
}

/// An exact decimal: `unscaled * 10^(-scale)`.
///
/// Equality and hashing use the canonical form (trailing decimal zeros
/// stripped), so `1.20` and `1.2` are the same value.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Numeric {
    pub unscaled: i128,
    pub scale: u8,
}

impl Numeric {
    #[inline]
    pub const fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    /// Canonical `(unscaled, scale)` with trailing decimal zeros stripped.
    #[must_use]
    pub const fn normalized(self) -> (i128, u8) {
        let mut unscaled = self.unscaled;
        let mut scale = self.scale;
        while scale > 0 && unscaled % 10 == 0 {
            unscaled /= 10;
            scale -= 1;
        }
        (unscaled, scale)
    }

    /// Both operands rescaled to the larger scale for exact comparison.
    fn align(self, other: Self) -> Option<(i128, i128)> {
        let scale = self.scale.max(other.scale);
        let a = self
            .unscaled
            .checked_mul(10_i128.checked_pow(u32::from(scale - self.scale))?)?;
        let b = other
            .unscaled
            .checked_mul(10_i128.checked_pow(u32::from(scale - other.scale))?)?;
        Some((a, b))
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(self) -> f64 {
        self.unscaled as f64 / 10_f64.powi(i32::from(self.scale))
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Numeric {}

impl std::hash::Hash for Numeric {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.align(*other) {
            Some((a, b)) => Some(a.cmp(&b)),
            None => self.to_f64().partial_cmp(&other.to_f64()),
        }
    }
}

/// A year-month / day-time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Interval {
    pub months: i32,
    pub nanos: i64,
}

impl Interval {
    #[inline]
    pub const fn new(months: i32, nanos: i64) -> Self {
        Self { months, nanos }
    }
}

/// Reference to a large object stored out-of-line in the paged store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LobRef {
    /// Store area holding the object bytes.
    pub area: u64,
    /// Object length in bytes.
    pub len: u64,
}

/// An uncompiled query plan payload (view definitions, computed defaults).
///
/// The core stores plan definitions opaquely; compilation and evaluation are
/// the planner's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PlanSource {
    pub text: String,
}

impl PlanSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Declarable SQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    Float,
    Numeric,
    Text,
    Date,
    Time,
    Timestamp,
    Interval,
    Binary,
    Lob,
    Plan,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Numeric => "NUMERIC",
            Self::Text => "VARCHAR",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Interval => "INTERVAL",
            Self::Binary => "BINARY",
            Self::Lob => "BLOB",
            Self::Plan => "QUERY",
        };
        f.write_str(s)
    }
}

impl SqlType {
    /// Whether a value of type `other` may be stored in a column of `self`
    /// without loss of tag (numeric widening is permitted).
    #[must_use]
    pub fn accepts(self, other: SqlType) -> bool {
        if self == other {
            return true;
        }
        matches!(
            (self, other),
            (Self::Float, Self::Integer)
                | (Self::Numeric, Self::Integer)
                | (Self::Numeric, Self::Float)
                | (Self::Lob, Self::Binary)
        )
    }
}

/// A dynamically-typed SQL value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    Boolean(bool),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// An exact decimal.
    Numeric(Numeric),
    /// A string with an optional collation.
    Text {
        value: String,
        collation: Option<Collation>,
    },
    /// Days since the epoch.
    Date(i64),
    /// Nanoseconds since midnight.
    Time(i64),
    /// Microseconds since the epoch.
    Timestamp(i64),
    Interval(Interval),
    Binary(Vec<u8>),
    /// Out-of-line large object reference.
    Lob(LobRef),
    /// Opaque query plan payload.
    Plan(PlanSource),
}

/// Hard arithmetic failure. Everything else degrades to `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivisionByZero;

impl fmt::Display for DivisionByZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("division by zero")
    }
}

impl std::error::Error for DivisionByZero {}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
            collation: None,
        }
    }

    pub fn collated_text(value: impl Into<String>, collation: Collation) -> Self {
        Self::Text {
            value: value.into(),
            collation: Some(collation),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The SQL type tag of this value, `None` for NULL (typeless).
    #[must_use]
    pub const fn type_of(&self) -> Option<SqlType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(SqlType::Boolean),
            Self::Integer(_) => Some(SqlType::Integer),
            Self::Float(_) => Some(SqlType::Float),
            Self::Numeric(_) => Some(SqlType::Numeric),
            Self::Text { .. } => Some(SqlType::Text),
            Self::Date(_) => Some(SqlType::Date),
            Self::Time(_) => Some(SqlType::Time),
            Self::Timestamp(_) => Some(SqlType::Timestamp),
            Self::Interval(_) => Some(SqlType::Interval),
            Self::Binary(_) => Some(SqlType::Binary),
            Self::Lob(_) => Some(SqlType::Lob),
            Self::Plan(_) => Some(SqlType::Plan),
        }
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of this value, if it has one.
    fn as_f64(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Numeric(n) => Some(n.to_f64()),
            _ => None,
        }
    }

    const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_) | Self::Numeric(_))
    }

    /// SQL comparison. `None` means unknown: either side NULL, or the types
    /// are not comparable.
    #[must_use]
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Numeric(a), Self::Numeric(b)) => a.partial_cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (
                Self::Text {
                    value: a,
                    collation: ca,
                },
                Self::Text {
                    value: b,
                    collation: cb,
                },
            ) => match ca.as_ref().or(cb.as_ref()) {
                Some(c) => Some(c.compare(a, b)),
                None => Some(a.cmp(b)),
            },
            (Self::Date(a), Self::Date(b))
            | (Self::Time(a), Self::Time(b))
            | (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Interval(a), Self::Interval(b)) => {
                Some((a.months, a.nanos).cmp(&(b.months, b.nanos)))
            }
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL equality: `None` when unknown.
    #[must_use]
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        self.sql_cmp(other).map(|o| o == Ordering::Equal)
    }

    /// Addition; `Null` on type mismatch.
    #[must_use]
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_add(*b)
                .map_or(Self::Null, Self::Integer),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Self::Float(x + y),
                _ => Self::Null,
            },
            _ => Self::Null,
        }
    }

    /// Subtraction; `Null` on type mismatch.
    #[must_use]
    pub fn sub(&self, other: &Value) -> Value {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_sub(*b)
                .map_or(Self::Null, Self::Integer),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Self::Float(x - y),
                _ => Self::Null,
            },
            _ => Self::Null,
        }
    }

    /// Multiplication; `Null` on type mismatch.
    #[must_use]
    pub fn mul(&self, other: &Value) -> Value {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_mul(*b)
                .map_or(Self::Null, Self::Integer),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Self::Float(x * y),
                _ => Self::Null,
            },
            _ => Self::Null,
        }
    }

    /// Division. Type mismatch degrades to `Null`; a zero divisor is a hard
    /// error.
    pub fn div(&self, other: &Value) -> Result<Value, DivisionByZero> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => Ok(Self::Null),
            (Self::Integer(a), Self::Integer(b)) => {
                if *b == 0 {
                    Err(DivisionByZero)
                } else {
                    Ok(a.checked_div(*b).map_or(Self::Null, Self::Integer))
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => (x, y),
                    _ => return Ok(Self::Null),
                };
                if y == 0.0 {
                    Err(DivisionByZero)
                } else {
                    Ok(Self::Float(x / y))
                }
            }
            _ => Ok(Self::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Numeric(n) => write!(f, "{}e-{}", n.unscaled, n.scale),
            Self::Text { value, .. } => write!(f, "'{value}'"),
            Self::Date(d) => write!(f, "DATE({d})"),
            Self::Time(t) => write!(f, "TIME({t})"),
            Self::Timestamp(t) => write!(f, "TIMESTAMP({t})"),
            Self::Interval(iv) => write!(f, "INTERVAL({},{})", iv.months, iv.nanos),
            Self::Binary(b) => write!(f, "X'{}b'", b.len()),
            Self::Lob(l) => write!(f, "LOB(area={},len={})", l.area, l.len),
            Self::Plan(p) => write!(f, "PLAN({})", p.text),
        }
    }
}
