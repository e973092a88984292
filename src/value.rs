//! Dynamic values flowing through parameter resolution.
//!
//! Registry variables, type-derived fallbacks and resolved arguments are all carried as [Value].
//! Constructed instances are type-erased into an [Object], a shared handle that can be downcast
//! back to its concrete type when a typed function body receives it.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ResolveError, Result};

/// Shared, type-erased instance tagged with its type identifier
#[derive(Clone)]
pub struct Object {
    class: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Object {
    /// Wrap a value, using its Rust type name as identifier
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            class: Arc::from(type_name::<T>()),
            inner: value,
        }
    }

    /// Wrap a value under an explicit identifier.
    ///
    /// Useful when an implementation is registered in place of an abstract identifier.
    pub fn with_class<T: Any + Send + Sync>(class: impl Into<Arc<str>>, value: T) -> Self {
        Self {
            class: class.into(),
            inner: Arc::new(value),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// True if both handles share the same instance
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.class)
    }
}

/// Scalar kinds a parameter can declare
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Array,
    Int,
    Float,
    Bool,
    String,
    /// Any object, without naming its type
    Object,
    Mixed,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Array => "array",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::String => "string",
            Builtin::Object => "object",
            Builtin::Mixed => "mixed",
        }
    }

    /// Value used when a parameter of this kind has neither a variable nor a default.
    ///
    /// Returns `None` for [Builtin::Object]: an untyped object cannot be made up.
    pub fn fallback(self) -> Option<Value> {
        match self {
            Builtin::Array => Some(Value::List(Vec::new())),
            Builtin::Int => Some(Value::Int(-1)),
            Builtin::Float => Some(Value::Float(-1.0)),
            Builtin::Bool => Some(Value::Bool(false)),
            Builtin::Object => None,
            Builtin::String | Builtin::Mixed => Some(Value::Null),
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed value
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Object),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Loosely convert the value to the given scalar kind.
    ///
    /// Only array, int, float and bool convert; other kinds return the value unchanged.
    pub fn cast(self, kind: Builtin) -> Value {
        match kind {
            Builtin::Array => match self {
                Value::List(_) | Value::Map(_) => self,
                Value::Null => Value::List(Vec::new()),
                other => Value::List(vec![other]),
            },
            Builtin::Int => Value::Int(self.to_int()),
            Builtin::Float => Value::Float(self.to_float()),
            Builtin::Bool => Value::Bool(self.is_truthy()),
            _ => self,
        }
    }

    pub fn to_int(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => i64::from(*b),
            Value::Int(i) => *i,
            Value::Float(f) => *f as i64,
            Value::Str(s) => match leading_number(s) {
                Number::Int(i) => i,
                Number::Float(f) => f as i64,
            },
            Value::List(l) => i64::from(!l.is_empty()),
            Value::Map(m) => i64::from(!m.is_empty()),
            Value::Object(_) => 1,
        }
    }

    pub fn to_float(&self) -> f64 {
        match self {
            Value::Float(f) => *f,
            Value::Str(s) => match leading_number(s) {
                Number::Int(i) => i as f64,
                Number::Float(f) => f,
            },
            other => other.to_int() as f64,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !(s.is_empty() || s == "0"),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(_) => true,
        }
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

/// Parse the numeric prefix of a string ("12abc" is 12, "abc" is 0)
fn leading_number(s: &str) -> Number {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let whole = digits(end);
    end += whole;
    let mut integral = true;

    if bytes.get(end) == Some(&b'.') {
        let fraction = digits(end + 1);
        if whole > 0 || fraction > 0 {
            integral = false;
            end += 1 + fraction;
        }
    } else if whole == 0 {
        return Number::Int(0);
    }
    if integral && whole == 0 {
        return Number::Int(0);
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = digits(exp);
        if exp_digits > 0 {
            integral = false;
            end = exp + exp_digits;
        }
    }

    let text = &s[..end];
    if integral {
        if let Ok(i) = text.parse::<i64>() {
            return Number::Int(i);
        }
    }
    Number::Float(text.parse::<f64>().unwrap_or(0.0))
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(members) => Value::Map(
                members
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Extract a typed argument from a resolved value
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: &'static str, found: &Value) -> Result<T> {
    Err(ResolveError::TypeMismatch {
        expected,
        found: found.kind().to_owned(),
    })
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(i),
            other => mismatch("int", &other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => i32::try_from(i).or_else(|_| mismatch("i32", &Value::Int(i))),
            other => mismatch("int", &other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => mismatch("float", &other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FromValue for Object {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(o) => Ok(o),
            other => mismatch("object", &other),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("array", &other),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(members) => members
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            other => mismatch("map", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: Any + Send + Sync> FromValue for Arc<T> {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Object(o) => o.downcast::<T>().ok_or_else(|| ResolveError::TypeMismatch {
                expected: type_name::<T>(),
                found: o.class().to_owned(),
            }),
            other => mismatch(type_name::<T>(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_to_int() {
        assert_eq!(Value::from("42").cast(Builtin::Int), Value::Int(42));
        assert_eq!(Value::from(" 12abc").cast(Builtin::Int), Value::Int(12));
        assert_eq!(Value::from("abc").cast(Builtin::Int), Value::Int(0));
        assert_eq!(Value::from("4.7").cast(Builtin::Int), Value::Int(4));
        assert_eq!(Value::from("1e3").cast(Builtin::Int), Value::Int(1000));
        assert_eq!(Value::Float(-3.9).cast(Builtin::Int), Value::Int(-3));
        assert_eq!(Value::Bool(true).cast(Builtin::Int), Value::Int(1));
        assert_eq!(Value::Null.cast(Builtin::Int), Value::Int(0));
    }

    #[test]
    fn cast_to_float() {
        assert_eq!(Value::from("2.5kg").cast(Builtin::Float), Value::Float(2.5));
        assert_eq!(Value::from(".5").cast(Builtin::Float), Value::Float(0.5));
        assert_eq!(Value::Int(3).cast(Builtin::Float), Value::Float(3.0));
    }

    #[test]
    fn cast_to_bool() {
        assert_eq!(Value::Int(0).cast(Builtin::Bool), Value::Bool(false));
        assert_eq!(Value::from("0").cast(Builtin::Bool), Value::Bool(false));
        assert_eq!(Value::from("").cast(Builtin::Bool), Value::Bool(false));
        assert_eq!(Value::from("false").cast(Builtin::Bool), Value::Bool(true));
        assert_eq!(Value::List(vec![]).cast(Builtin::Bool), Value::Bool(false));
        assert_eq!(Value::Float(0.1).cast(Builtin::Bool), Value::Bool(true));
    }

    #[test]
    fn cast_to_array() {
        assert_eq!(Value::Null.cast(Builtin::Array), Value::List(vec![]));
        assert_eq!(
            Value::from("x").cast(Builtin::Array),
            Value::List(vec![Value::from("x")])
        );
        let list = Value::from(vec![1, 2]);
        assert_eq!(list.clone().cast(Builtin::Array), list);
    }

    #[test]
    fn other_kinds_pass_through() {
        assert_eq!(Value::Int(7).cast(Builtin::String), Value::Int(7));
        assert_eq!(Value::from("7").cast(Builtin::Mixed), Value::from("7"));
    }

    #[test]
    fn fallbacks() {
        assert_eq!(Builtin::Array.fallback(), Some(Value::List(vec![])));
        assert_eq!(Builtin::Int.fallback(), Some(Value::Int(-1)));
        assert_eq!(Builtin::Float.fallback(), Some(Value::Float(-1.0)));
        assert_eq!(Builtin::Bool.fallback(), Some(Value::Bool(false)));
        assert_eq!(Builtin::String.fallback(), Some(Value::Null));
        assert_eq!(Builtin::Object.fallback(), None);
    }

    #[test]
    fn object_downcast() {
        let o = Object::new(5u8);
        assert_eq!(o.class(), "u8");
        assert_eq!(o.downcast_ref::<u8>(), Some(&5));
        assert!(o.downcast::<String>().is_none());

        let same = o.clone();
        assert!(o.ptr_eq(&same));
        assert!(!o.ptr_eq(&Object::new(5u8)));
    }

    #[test]
    fn from_value_mismatch() {
        let err = String::from_value(Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected string, found int");

        let arc: Arc<u8> = FromValue::from_value(Value::Object(Object::new(9u8))).unwrap();
        assert_eq!(*arc, 9);
        assert!(<Arc<u16>>::from_value(Value::Object(Object::new(9u8))).is_err());
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
    }

    #[test]
    fn from_json() {
        let json = serde_json::json!({"n": 3, "f": 1.5, "tags": ["a", null]});
        let Value::Map(members) = Value::from(json) else {
            panic!("expected a map");
        };
        assert_eq!(members["n"], Value::Int(3));
        assert_eq!(members["f"], Value::Float(1.5));
        assert_eq!(
            members["tags"],
            Value::List(vec![Value::from("a"), Value::Null])
        );
    }
}
