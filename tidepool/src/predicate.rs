//! Comparison predicates used by match rules.
//!
//! A predicate is a binary relation between an observed attribute value and
//! the value a rule expects. The six ordinary comparisons are provided by
//! [`Comparison`]; anything else implements [`Predicate`] and is registered
//! by name in a [`PredicateSet`] so registry documents can refer to it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PredicateError, Result};

/// A scalar attribute value, observed on a resource or expected by a rule.
///
/// Serialized untagged, so documents read `"scaphandre"`, `3`, `0.5`, `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    Str(String),
}

impl AttrValue {
    /// Returns a short name for the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// Parses a command-line style value: int, then float, then bool, else string.
    ///
    /// ```rust
    /// use tidepool::AttrValue;
    ///
    /// assert_eq!(AttrValue::parse("3"), AttrValue::Int(3));
    /// assert_eq!(AttrValue::parse("0.5"), AttrValue::Float(0.5));
    /// assert_eq!(AttrValue::parse("true"), AttrValue::Bool(true));
    /// assert_eq!(AttrValue::parse("scaphandre"), AttrValue::from("scaphandre"));
    /// ```
    pub fn parse(raw: &str) -> Self {
        if let Ok(value) = raw.parse::<i64>() {
            Self::Int(value)
        } else if let Ok(value) = raw.parse::<f64>() {
            Self::Float(value)
        } else if let Ok(value) = raw.parse::<bool>() {
            Self::Bool(value)
        } else {
            Self::Str(raw.to_string())
        }
    }

    /// Orders two values of compatible kinds.
    ///
    /// The outer `None` means the kinds cannot be compared at all; the inner
    /// `None` means they can, but these particular values are unordered (NaN).
    /// Ints and floats are compared exactly, without rounding the int.
    fn compare(&self, other: &Self) -> Option<Option<Ordering>> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(Some(a.cmp(b))),
            (Self::Int(a), Self::Int(b)) => Some(Some(a.cmp(b))),
            (Self::Float(a), Self::Float(b)) => Some(a.partial_cmp(b)),
            (Self::Int(a), Self::Float(b)) => Some(cmp_int_float(*a, *b)),
            (Self::Float(a), Self::Int(b)) => {
                Some(cmp_int_float(*b, *a).map(Ordering::reverse))
            }
            (Self::Str(a), Self::Str(b)) => Some(Some(a.cmp(b))),
            _ => None,
        }
    }
}

/// Orders `int` against `float` exactly; `None` if `float` is NaN.
fn cmp_int_float(int: i64, float: f64) -> Option<Ordering> {
    // 2^63, exactly representable; finite floats in [-2^63, 2^63) truncate into i64.
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= I64_BOUND {
        return Some(Ordering::Less);
    }
    if float < -I64_BOUND {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();
    #[allow(clippy::cast_possible_truncation)] // in range and integral
    let ordering = int.cmp(&(whole as i64));
    if ordering != Ordering::Equal {
        return Some(ordering);
    }

    let fraction = float - whole;
    Some(if fraction > 0.0 {
        Ordering::Less
    } else if fraction < 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// A binary relation between an observed and an expected value.
///
/// Implement this for relations beyond [`Comparison`], then register the
/// implementation in a [`PredicateSet`] to use it from registry documents.
///
/// # Examples
///
/// ```rust
/// use tidepool::{AttrValue, Predicate, PredicateError};
///
/// #[derive(Debug)]
/// struct StartsWith;
///
/// impl Predicate for StartsWith {
///     fn name(&self) -> &str {
///         "starts_with"
///     }
///
///     fn test(&self, observed: &AttrValue, expected: &AttrValue) -> Result<bool, PredicateError> {
///         match (observed, expected) {
///             (AttrValue::Str(o), AttrValue::Str(e)) => Ok(o.starts_with(e.as_str())),
///             _ => Err(PredicateError::Incomparable {
///                 predicate: self.name().to_string(),
///                 observed: observed.kind(),
///                 expected: expected.kind(),
///             }),
///         }
///     }
/// }
///
/// assert_eq!(StartsWith.test(&"scaph-1".into(), &"scaph".into()), Ok(true));
/// ```
pub trait Predicate: Send + Sync + fmt::Debug {
    /// The name the predicate is registered and serialized under.
    fn name(&self) -> &str;

    /// Tests `observed` against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::Incomparable`] if the values cannot be related.
    fn test(&self, observed: &AttrValue, expected: &AttrValue)
    -> std::result::Result<bool, PredicateError>;
}

/// The built-in comparison relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// `observed == expected`
    Eq,
    /// `observed != expected`
    Ne,
    /// `observed < expected`
    Lt,
    /// `observed <= expected`
    Le,
    /// `observed > expected`
    Gt,
    /// `observed >= expected`
    Ge,
}

impl Comparison {
    /// Every built-in comparison.
    pub const ALL: [Comparison; 6] = [
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
    ];

    /// Returns the stable name of this comparison.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Predicate for Comparison {
    fn name(&self) -> &str {
        self.as_str()
    }

    /// Equality never fails on NaN (it is simply unequal); ordering does.
    fn test(
        &self,
        observed: &AttrValue,
        expected: &AttrValue,
    ) -> std::result::Result<bool, PredicateError> {
        let incomparable = || PredicateError::Incomparable {
            predicate: self.as_str().to_string(),
            observed: observed.kind(),
            expected: expected.kind(),
        };

        let ordering = observed.compare(expected).ok_or_else(incomparable)?;

        match self {
            Self::Eq => Ok(ordering == Some(Ordering::Equal)),
            Self::Ne => Ok(ordering != Some(Ordering::Equal)),
            Self::Lt => ordering.map(Ordering::is_lt).ok_or_else(incomparable),
            Self::Le => ordering.map(Ordering::is_le).ok_or_else(incomparable),
            Self::Gt => ordering.map(Ordering::is_gt).ok_or_else(incomparable),
            Self::Ge => ordering.map(Ordering::is_ge).ok_or_else(incomparable),
        }
    }
}

/// Name-to-predicate lookup used when building rules from documents.
///
/// A new set already holds the six [`Comparison`]s.
#[derive(Debug, Clone)]
pub struct PredicateSet {
    predicates: BTreeMap<String, Arc<dyn Predicate>>,
}

impl PredicateSet {
    /// Creates a set holding the built-in comparisons.
    pub fn new() -> Self {
        let predicates = Comparison::ALL
            .into_iter()
            .map(|cmp| (cmp.as_str().to_string(), Arc::new(cmp) as Arc<dyn Predicate>))
            .collect();
        Self { predicates }
    }

    /// Registers a custom predicate under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::DuplicatePredicate`] if the name is taken.
    pub fn register(&mut self, predicate: Arc<dyn Predicate>) -> Result<()> {
        let name = predicate.name().to_string();
        if self.predicates.contains_key(&name) {
            return Err(PredicateError::DuplicatePredicate { name }.into());
        }
        self.predicates.insert(name, predicate);
        Ok(())
    }

    /// Looks up a predicate by name.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::UnknownPredicate`] if nothing is registered
    /// under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Predicate>> {
        self.predicates.get(name).cloned().ok_or_else(|| {
            PredicateError::UnknownPredicate {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Iterates over the registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.predicates.keys().map(String::as_str)
    }
}

impl Default for PredicateSet {
    fn default() -> Self {
        Self::new()
    }
}
