//! Dynamically indexable view over a parsed API response.
//!
//! # Design
//! `Response` owns the extracted JSON sub-tree (usually the `response`
//! member of the envelope) together with the untouched body text. Indexing
//! goes through `Node`, a borrowed view that is either a JSON value or
//! `Absent`. A missing key or an out-of-range index is never an error by
//! itself; only a conversion to a concrete type can fail, and that failure
//! is a `ConversionError` value, not a panic.
//!
//! Conversions are lenient the way the provider's payloads are: numbers
//! often arrive as strings and booleans as `0`/`1`.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConversionError;

static NULL: Value = Value::Null;

/// A parsed response sub-tree plus the raw body it came from.
#[derive(Debug, Clone)]
pub struct Response {
    raw: Arc<str>,
    root: Value,
}

impl Response {
    /// Parse a whole body as the root node.
    pub fn parse(raw: &str) -> Result<Self, ConversionError> {
        let root = serde_json::from_str(raw).map_err(|e| ConversionError::Json(e.to_string()))?;
        Ok(Self {
            raw: Arc::from(raw),
            root,
        })
    }

    /// A response rooted at `root`, extracted from the body `raw`.
    pub fn from_parts(raw: Arc<str>, root: Value) -> Self {
        Self { raw, root }
    }

    pub fn node(&self) -> Node<'_> {
        Node {
            value: Some(&self.root),
            raw: &self.raw,
        }
    }

    pub fn get(&self, key: &str) -> Node<'_> {
        self.node().get(key)
    }

    pub fn at(&self, index: usize) -> Node<'_> {
        self.node().at(index)
    }

    pub fn path(&self, path: &str) -> Node<'_> {
        self.node().path(path)
    }

    /// The full body text this response was extracted from.
    pub fn raw_json(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }
}

/// Shape of a node, `Absent` for a path that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Absent,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Absent => "absent",
            NodeKind::Null => "null",
            NodeKind::Bool => "bool",
            NodeKind::Number => "number",
            NodeKind::String => "string",
            NodeKind::Array => "array",
            NodeKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A borrowed position inside a `Response`.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    value: Option<&'a Value>,
    raw: &'a str,
}

impl<'a> Node<'a> {
    fn absent(&self) -> Node<'a> {
        Node { value: None, raw: self.raw }
    }

    fn child(&self, value: Option<&'a Value>) -> Node<'a> {
        Node { value, raw: self.raw }
    }

    pub fn kind(&self) -> NodeKind {
        match self.value {
            None => NodeKind::Absent,
            Some(Value::Null) => NodeKind::Null,
            Some(Value::Bool(_)) => NodeKind::Bool,
            Some(Value::Number(_)) => NodeKind::Number,
            Some(Value::String(_)) => NodeKind::String,
            Some(Value::Array(_)) => NodeKind::Array,
            Some(Value::Object(_)) => NodeKind::Object,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, Some(Value::Null))
    }

    /// Absent or null.
    pub fn is_missing(&self) -> bool {
        matches!(self.value, None | Some(Value::Null))
    }

    pub fn value(&self) -> Option<&'a Value> {
        self.value
    }

    /// Member `key` of an object; `Absent` for anything else.
    pub fn get(&self, key: &str) -> Node<'a> {
        match self.value {
            Some(Value::Object(map)) => self.child(map.get(key)),
            _ => self.absent(),
        }
    }

    /// Element `index` of an array; `Absent` when out of range.
    pub fn at(&self, index: usize) -> Node<'a> {
        match self.value {
            Some(Value::Array(items)) => self.child(items.get(index)),
            _ => self.absent(),
        }
    }

    /// Walk a dot-separated path. Numeric segments index arrays.
    pub fn path(&self, path: &str) -> Node<'a> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .fold(*self, |node, segment| match (node.value, segment.parse::<usize>()) {
                (Some(Value::Array(_)), Ok(index)) => node.at(index),
                _ => node.get(segment),
            })
    }

    /// Number of elements or members; zero for scalars and absent nodes.
    pub fn len(&self) -> usize {
        match self.value {
            Some(Value::Array(items)) => items.len(),
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array elements; empty for anything else.
    pub fn iter(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let raw = self.raw;
        let items: &'a [Value] = match self.value {
            Some(Value::Array(items)) => items,
            _ => &[],
        };
        items.iter().map(move |value| Node { value: Some(value), raw })
    }

    fn mismatch(&self, expected: &'static str) -> ConversionError {
        let found = match self.value {
            Some(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
                format!("{} {value}", self.kind())
            }
            _ => self.kind().to_string(),
        };
        ConversionError::Mismatch { expected, found }
    }

    pub fn as_i64(&self) -> Result<i64, ConversionError> {
        match self.value {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| self.mismatch("integer")),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| self.mismatch("integer")),
            _ => Err(self.mismatch("integer")),
        }
    }

    pub fn as_u64(&self) -> Result<u64, ConversionError> {
        match self.value {
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| self.mismatch("unsigned integer")),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| self.mismatch("unsigned integer")),
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ConversionError> {
        match self.value {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| self.mismatch("float")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| self.mismatch("float")),
            _ => Err(self.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ConversionError> {
        match self.value {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(self.mismatch("bool")),
            },
            Some(Value::String(s)) => match s.trim() {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(self.mismatch("bool")),
            },
            _ => Err(self.mismatch("bool")),
        }
    }

    /// String content, or the textual form of a number or bool.
    pub fn as_string(&self) -> Result<String, ConversionError> {
        match self.value {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            _ => Err(self.mismatch("string")),
        }
    }

    /// Borrowed string content; only JSON strings qualify.
    pub fn as_str(&self) -> Result<&'a str, ConversionError> {
        match self.value {
            Some(Value::String(s)) => Ok(s.as_str()),
            _ => Err(self.mismatch("string")),
        }
    }

    /// `None` for absent or null nodes, otherwise `convert(self)`.
    pub fn opt<T, F>(&self, convert: F) -> Result<Option<T>, ConversionError>
    where
        F: FnOnce(Node<'a>) -> Result<T, ConversionError>,
    {
        if self.is_missing() {
            return Ok(None);
        }
        convert(*self).map(Some)
    }

    /// Convert every element of an array, failing at the first bad one.
    pub fn to_vec<T, F>(&self, mut convert: F) -> Result<Vec<T>, ConversionError>
    where
        F: FnMut(Node<'a>) -> Result<T, ConversionError>,
    {
        if !matches!(self.value, Some(Value::Array(_))) {
            return Err(self.mismatch("array"));
        }
        self.iter()
            .enumerate()
            .map(|(index, node)| {
                convert(node).map_err(|source| ConversionError::Element {
                    index,
                    source: Box::new(source),
                })
            })
            .collect()
    }

    /// Build a serde type from this node. Absent nodes deserialize as null.
    pub fn deserialize<T: Deserialize<'a>>(&self) -> Result<T, ConversionError> {
        T::deserialize(self.value.unwrap_or(&NULL)).map_err(|e| ConversionError::Json(e.to_string()))
    }

    /// The full body text the node was extracted from.
    pub fn raw_json(&self) -> &'a str {
        self.raw
    }

    /// This sub-tree re-serialized; empty for an absent node.
    pub fn to_json(&self) -> String {
        self.value.map(Value::to_string).unwrap_or_default()
    }
}

macro_rules! node_try_from {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl TryFrom<Node<'_>> for $ty {
                type Error = ConversionError;

                fn try_from(node: Node<'_>) -> Result<Self, Self::Error> {
                    node.$method()
                }
            }
        )*
    };
}

node_try_from!(
    i64 => as_i64,
    u64 => as_u64,
    f64 => as_f64,
    bool => as_bool,
    String => as_string,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> Response {
        Response::parse(raw).unwrap()
    }

    #[test]
    fn get_existing_and_missing_keys() {
        let r = response(r#"{"count":2,"title":"doc","flag":null}"#);
        assert_eq!(r.get("count").as_i64().unwrap(), 2);
        assert_eq!(r.get("title").as_str().unwrap(), "doc");
        assert!(r.get("nope").is_absent());
        assert!(r.get("flag").is_null());
        assert!(!r.get("flag").is_absent());
    }

    #[test]
    fn indexing_through_scalars_and_out_of_range_is_absent() {
        let r = response(r#"{"items":[1,2],"n":5}"#);
        assert!(r.get("items").at(9).is_absent());
        assert!(r.get("n").get("x").is_absent());
        assert!(r.get("n").at(0).is_absent());
        assert!(r.get("missing").get("deeper").at(3).is_absent());
    }

    #[test]
    fn path_walks_objects_and_arrays() {
        let r = response(r#"{"items":[{"id":7},{"id":8,"tags":["a","b"]}]}"#);
        assert_eq!(r.path("items.1.id").as_i64().unwrap(), 8);
        assert_eq!(r.path("items.1.tags.0").as_str().unwrap(), "a");
        assert!(r.path("items.5.id").is_absent());
    }

    #[test]
    fn lenient_scalar_conversions() {
        let r = response(r#"{"n":"42","f":"1.5","b":1,"s":"0","t":true,"big":18446744073709551615}"#);
        assert_eq!(r.get("n").as_i64().unwrap(), 42);
        assert_eq!(r.get("f").as_f64().unwrap(), 1.5);
        assert!(r.get("b").as_bool().unwrap());
        assert!(!r.get("s").as_bool().unwrap());
        assert!(r.get("t").as_bool().unwrap());
        assert_eq!(r.get("big").as_u64().unwrap(), u64::MAX);
        assert_eq!(r.get("n").as_string().unwrap(), "42");
        assert_eq!(r.get("b").as_string().unwrap(), "1");
    }

    #[test]
    fn incompatible_conversion_fails() {
        let r = response(r#"{"s":"abc","o":{},"b":2}"#);
        assert_eq!(
            r.get("s").as_i64().unwrap_err(),
            ConversionError::Mismatch {
                expected: "integer",
                found: "string \"abc\"".to_string()
            }
        );
        assert!(r.get("o").as_string().is_err());
        assert!(r.get("b").as_bool().is_err());
        assert_eq!(
            r.get("missing").as_i64().unwrap_err(),
            ConversionError::Mismatch {
                expected: "integer",
                found: "absent".to_string()
            }
        );
    }

    #[test]
    fn float_strings_must_be_finite_numbers() {
        let r = response(r#"{"nan":"NaN","inf":"inf","long":"-Infinity","ok":" -2.5e3 "}"#);
        assert!(r.get("nan").as_f64().is_err());
        assert!(r.get("inf").as_f64().is_err());
        assert!(r.get("long").as_f64().is_err());
        assert_eq!(r.get("ok").as_f64().unwrap(), -2500.0);
        assert!(f64::try_from(r.get("nan")).is_err());
    }

    #[test]
    fn opt_treats_absent_and_null_as_none() {
        let r = response(r#"{"a":null,"b":"3"}"#);
        assert_eq!(r.get("a").opt(|n| n.as_i64()).unwrap(), None);
        assert_eq!(r.get("zzz").opt(|n| n.as_i64()).unwrap(), None);
        assert_eq!(r.get("b").opt(|n| n.as_i64()).unwrap(), Some(3));
    }

    #[test]
    fn to_vec_reports_failing_index() {
        let r = response(r#"[1,"2",3.5,4]"#);
        let err = r.node().to_vec(|n| i64::try_from(n)).unwrap_err();
        match err {
            ConversionError::Element { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other}"),
        }

        let r = response(r#"[1,"2",3]"#);
        assert_eq!(r.node().to_vec(|n| i64::try_from(n)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn to_vec_on_non_array_fails() {
        let r = response(r#"{"a":1}"#);
        assert!(r.node().to_vec(|n| i64::try_from(n)).is_err());
        assert!(r.get("missing").to_vec(|n| i64::try_from(n)).is_err());
    }

    #[test]
    fn raw_json_is_the_original_body() {
        let body = r#"{"response":{"id":1}}"#;
        let full: Value = serde_json::from_str(body).unwrap();
        let r = Response::from_parts(Arc::from(body), full["response"].clone());
        assert_eq!(r.raw_json(), body);
        assert_eq!(r.get("id").raw_json(), body);
        assert_eq!(r.node().to_json(), r#"{"id":1}"#);
    }

    #[test]
    fn deserialize_builds_dto() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: i64,
            title: String,
        }

        let r = response(r#"{"items":[{"id":1,"title":"a"}]}"#);
        let items: Vec<Item> = r.get("items").to_vec(|n| n.deserialize()).unwrap();
        assert_eq!(
            items,
            vec![Item {
                id: 1,
                title: "a".to_string()
            }]
        );
        let missing: Option<Item> = r.get("nothing").deserialize().unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn malformed_body_is_a_json_error() {
        assert!(matches!(Response::parse("not json"), Err(ConversionError::Json(_))));
    }

    #[test]
    fn iter_and_len() {
        let r = response(r#"{"a":[1,2,3],"o":{"x":1}}"#);
        assert_eq!(r.get("a").len(), 3);
        assert_eq!(r.get("o").len(), 1);
        assert_eq!(r.get("a").iter().count(), 3);
        assert_eq!(r.get("o").iter().count(), 0);
        assert!(r.get("zzz").is_empty());
    }
}
