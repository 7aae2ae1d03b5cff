//! Values, primary keys and key patterns
//!
//! `Value` is the plain form everything takes when it crosses the call
//! boundary: impulse arguments, primary-key components and snapshots.
//! Values are totally ordered so keys can index a sorted map; floats
//! compare by their total order, which agrees with bit equality.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Plain value carried on the wire
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Proxy of an entity reference: the referenced entity's primary key
    Key(Key),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Unit => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Bytes(_) => 5,
            Value::List(_) => 6,
            Value::Key(_) => 7,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Unit, Value::Unit) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Key(a), Value::Key(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Unit => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::List(v) => v.hash(state),
            Value::Key(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}

/// Primary key of an entity
///
/// The first component is the entity kind, the rest are the declared key
/// fields in declaration order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(parts: Vec<Value>) -> Self {
        Key(parts)
    }

    /// Key consisting of the kind component only
    pub fn of_kind(kind: &str) -> Self {
        Key(vec![Value::Text(kind.to_string())])
    }

    pub fn push(&mut self, part: impl Into<Value>) {
        self.0.push(part.into());
    }

    pub fn with(mut self, part: impl Into<Value>) -> Self {
        self.push(part);
        self
    }

    /// Kind component, if the key has one
    pub fn kind(&self) -> Option<&str> {
        self.0.first().and_then(Value::as_text)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.0.iter();
        match parts.next() {
            Some(Value::Text(kind)) => write!(f, "{}", kind)?,
            Some(other) => write!(f, "{}", other)?,
            None => return write!(f, "<empty>"),
        }
        write!(f, "[")?;
        for (i, part) in parts.enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<Value>> for Key {
    fn from(parts: Vec<Value>) -> Self {
        Key(parts)
    }
}

/// One position of a key pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pat {
    /// Matches any value at this position
    Any,
    /// Matches an equal value
    Is(Value),
}

impl Pat {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Pat::Any => true,
            Pat::Is(v) => v == value,
        }
    }
}

/// Position-wise, exact-arity key pattern
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern(Vec<Pat>);

impl Pattern {
    pub fn new(parts: Vec<Pat>) -> Self {
        Pattern(parts)
    }

    pub fn any(mut self) -> Self {
        self.0.push(Pat::Any);
        self
    }

    pub fn is(mut self, value: impl Into<Value>) -> Self {
        self.0.push(Pat::Is(value.into()));
        self
    }

    /// Same pattern with a fixed kind component in front
    pub fn prefixed(&self, kind: &str) -> Pattern {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.push(Pat::Is(Value::Text(kind.to_string())));
        parts.extend(self.0.iter().cloned());
        Pattern(parts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, key: &Key) -> bool {
        self.0.len() == key.len() && self.0.iter().zip(key.iter()).all(|(p, v)| p.matches(v))
    }
}

impl From<Vec<Pat>> for Pattern {
    fn from(parts: Vec<Pat>) -> Self {
        Pattern(parts)
    }
}
