// TValue: Rc-wrapped value type for tolerant template evaluation
// Aggregates are shared for O(1) cloning during the validation walk

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// A template-language value with O(1) clone semantics via Rc-wrapping.
///
/// Concrete types (String, List, Dict) are wrapped in Rc for cheap cloning.
/// `Undefined` is the absorbing sentinel standing in for any name, attribute,
/// or index that could not be resolved: every operation applied to it either
/// returns another sentinel or a fixed value, so evaluation over missing data
/// never fails.
#[derive(Clone, Debug)]
pub enum TValue {
    /// The `none` literal
    None,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Rc<Vec<TValue>>),
    Dict(Rc<IndexMap<String, TValue>>),

    /// Absorbing sentinel for unresolved data
    Undefined(Rc<Undefined>),
}

/// Why a sentinel exists. Only affects how it renders as text; every
/// sentinel behaves identically otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Undefined {
    /// A top-level name lookup failed
    Name(String),
    /// An attribute or index on an otherwise-resolved value failed;
    /// `base` records the type name of that value
    Access {
        base: &'static str,
        accessor: String,
    },
}

impl fmt::Display for Undefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Undefined::Name(name) => write!(f, "{{{{ {} }}}}", name),
            Undefined::Access { base, accessor } => {
                write!(f, "{{{{ no such element: {}['{}'] }}}}", base, accessor)
            }
        }
    }
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl TValue {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, TValue::None)
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, TValue::Undefined(_))
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, TValue::Bool(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, TValue::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, TValue::String(_))
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        matches!(self, TValue::List(_))
    }

    #[inline]
    pub fn is_dict(&self) -> bool {
        matches!(self, TValue::Dict(_))
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl TValue {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TValue::Number(n) => {
                let f = *n;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&Vec<TValue>> {
        match self {
            TValue::List(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn as_dict(&self) -> Option<&IndexMap<String, TValue>> {
        match self {
            TValue::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Index into a dict by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&TValue> {
        match self {
            TValue::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Index into a list by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&TValue> {
        match self {
            TValue::List(items) => items.get(index),
            _ => None,
        }
    }

    /// The language-level type name, used when tagging access sentinels.
    pub fn type_name(&self) -> &'static str {
        match self {
            TValue::None => "none",
            TValue::Bool(_) => "bool",
            TValue::Number(_) => "number",
            TValue::String(_) => "string",
            TValue::List(_) => "list",
            TValue::Dict(_) => "dict",
            TValue::Undefined(_) => "undefined",
        }
    }

    /// Truth value under template semantics: the sentinel and `none` are
    /// false, empty strings and containers are false, zero is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            TValue::None | TValue::Undefined(_) => false,
            TValue::Bool(b) => *b,
            TValue::Number(n) => *n != 0.0,
            TValue::String(s) => !s.is_empty(),
            TValue::List(items) => !items.is_empty(),
            TValue::Dict(map) => !map.is_empty(),
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl TValue {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        TValue::String(s.into())
    }

    #[inline]
    pub fn list(items: Vec<TValue>) -> Self {
        TValue::List(Rc::new(items))
    }

    #[inline]
    pub fn dict(map: IndexMap<String, TValue>) -> Self {
        TValue::Dict(Rc::new(map))
    }

    /// Fresh sentinel for a failed top-level name lookup.
    #[inline]
    pub fn undefined_name(name: impl Into<String>) -> Self {
        TValue::Undefined(Rc::new(Undefined::Name(name.into())))
    }

    /// Fresh sentinel for a failed attribute/index access on a resolved value.
    #[inline]
    pub fn undefined_access(base: &'static str, accessor: impl Into<String>) -> Self {
        TValue::Undefined(Rc::new(Undefined::Access {
            base,
            accessor: accessor.into(),
        }))
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for TValue {
    #[inline]
    fn from(b: bool) -> Self {
        TValue::Bool(b)
    }
}

impl From<i64> for TValue {
    #[inline]
    fn from(n: i64) -> Self {
        TValue::Number(n as f64)
    }
}

impl From<i32> for TValue {
    #[inline]
    fn from(n: i32) -> Self {
        TValue::Number(n as f64)
    }
}

impl From<f64> for TValue {
    #[inline]
    fn from(n: f64) -> Self {
        TValue::Number(n)
    }
}

impl From<&str> for TValue {
    #[inline]
    fn from(s: &str) -> Self {
        TValue::String(s.into())
    }
}

impl From<String> for TValue {
    #[inline]
    fn from(s: String) -> Self {
        TValue::String(s.into())
    }
}

impl From<Vec<TValue>> for TValue {
    #[inline]
    fn from(items: Vec<TValue>) -> Self {
        TValue::List(Rc::new(items))
    }
}

impl From<IndexMap<String, TValue>> for TValue {
    #[inline]
    fn from(map: IndexMap<String, TValue>) -> Self {
        TValue::Dict(Rc::new(map))
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

impl PartialEq for TValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TValue::None, TValue::None) => true,
            // Two sentinels compare equal regardless of origin
            (TValue::Undefined(_), TValue::Undefined(_)) => true,
            (TValue::Bool(a), TValue::Bool(b)) => a == b,
            (TValue::Number(a), TValue::Number(b)) => {
                // NaN != NaN
                if a.is_nan() && b.is_nan() {
                    return false;
                }
                a == b
            }
            (TValue::String(a), TValue::String(b)) => a == b,
            (TValue::List(a), TValue::List(b)) => a == b,
            (TValue::Dict(a), TValue::Dict(b)) => a == b,
            _ => false,
        }
    }
}

// ── Text rendering ───────────────────────────────────────────────────────────

impl fmt::Display for TValue {
    /// Renders the value the way the substitution engine would print it.
    /// Sentinels render as their debug placeholder so a missing name stays
    /// visible in rendered output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TValue::None => write!(f, "None"),
            TValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            TValue::Number(n) => format_number(*n, f),
            TValue::String(s) => write!(f, "{}", s),
            TValue::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            TValue::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, v)?;
                }
                write!(f, "}}")
            }
            TValue::Undefined(origin) => write!(f, "{}", origin),
        }
    }
}

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !n.is_finite() {
        write!(f, "{}", n)
    } else if n.fract() == 0.0 && n.abs() < 1e20 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
