//! Request parameters for API calls and the authorize URL.
//!
//! # Design
//! `ParameterSet` keeps insertion order so the encoded body is stable. A key
//! written twice keeps its first position and its last value. Constraints
//! (`required`, `non-negative`) are recorded next to the values and checked
//! by `serialize`, which is the only way the dispatcher gets a body, so an
//! invalid set never reaches the transport.

use url::form_urlencoded;

use crate::error::ValidationError;

/// Enumerations that travel as a fixed wire token rather than their
/// display name.
pub trait WireToken {
    fn wire_token(&self) -> &'static str;
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Absent,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Encoded as `1` / `0`.
    Bool(bool),
    Text(String),
    Token(&'static str),
    /// Encoded comma-joined. An empty list is treated as absent.
    List(Vec<String>),
}

impl ParamValue {
    pub fn token<T: WireToken>(value: &T) -> Self {
        ParamValue::Token(value.wire_token())
    }

    pub fn tokens<T: WireToken>(values: &[T]) -> Self {
        ParamValue::List(values.iter().map(|v| v.wire_token().to_string()).collect())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        ParamValue::List(items.into_iter().map(|item| item.to_string()).collect())
    }

    /// Absent, empty text, or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Absent => true,
            ParamValue::Text(text) => text.is_empty(),
            ParamValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Wire form of the value, `None` when it must be omitted.
    pub fn encode(&self) -> Option<String> {
        match self {
            ParamValue::Absent => None,
            ParamValue::Int(n) => Some(n.to_string()),
            ParamValue::UInt(n) => Some(n.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            ParamValue::Text(text) => Some(text.clone()),
            ParamValue::Token(token) => Some((*token).to_string()),
            ParamValue::List(items) if items.is_empty() => None,
            ParamValue::List(items) => Some(items.join(",")),
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            ParamValue::Int(n) => *n < 0,
            ParamValue::Float(f) => *f < 0.0,
            _ => false,
        }
    }
}

macro_rules! param_from_number {
    ($($ty:ty => $variant:ident as $as:ty),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::$variant(value as $as)
                }
            }
        )*
    };
}

param_from_number!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Text(value.clone())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParamValue::Absent, Into::into)
    }
}

impl<T: ToString> From<Vec<T>> for ParamValue {
    fn from(value: Vec<T>) -> Self {
        ParamValue::list(value)
    }
}

impl<T: ToString> From<&[T]> for ParamValue {
    fn from(value: &[T]) -> Self {
        ParamValue::List(value.iter().map(ToString::to_string).collect())
    }
}

static ABSENT: ParamValue = ParamValue::Absent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Constraint {
    Required,
    NonNegative,
    /// Every `<owner_id>_<id>` item of a list has a non-negative `id`.
    NonNegativeItemIds,
}

fn item_id_is_negative(item: &str) -> bool {
    item.rsplit_once('_')
        .and_then(|(_, id)| id.parse::<i64>().ok())
        .is_some_and(|id| id < 0)
}

/// Ordered, validated request parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParamValue)>,
    constraints: Vec<(String, Constraint)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, overwriting an earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Store `value` and require it to be present and non-empty at send time.
    pub fn set_required(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        self.constrain(&key, Constraint::Required);
        self.set(key, value)
    }

    /// Store a numeric `value` that must not be negative at send time.
    pub fn set_non_negative(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        self.constrain(&key, Constraint::NonNegative);
        self.set(key, value)
    }

    /// Store `(owner_id, id)` pairs as a required `<owner_id>_<id>` list, the
    /// form `*.getById` methods take. Owner ids may be negative (communities);
    /// item ids may not.
    pub fn set_owned_ids(&mut self, key: impl Into<String>, ids: &[(i64, i64)]) -> &mut Self {
        let key = key.into();
        self.constrain(&key, Constraint::NonNegativeItemIds);
        self.set_required(
            key,
            ParamValue::list(ids.iter().map(|(owner_id, id)| format!("{owner_id}_{id}"))),
        )
    }

    /// Mark an already-set (or yet-to-be-set) key as required.
    pub fn require(&mut self, key: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.constrain(&key, Constraint::Required);
        self
    }

    fn constrain(&mut self, key: &str, constraint: Constraint) {
        if !self.constraints.iter().any(|(k, c)| k == key && *c == constraint) {
            self.constraints.push((key.to_string(), constraint));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Number of entries that would be serialized.
    pub fn len(&self) -> usize {
        self.pairs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded `(key, value)` pairs in insertion order, absent values skipped.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.encode().map(|encoded| (key.as_str(), encoded)))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (key, constraint) in &self.constraints {
            let value = self.get(key).unwrap_or(&ABSENT);
            match constraint {
                Constraint::Required if value.is_empty() => {
                    return Err(ValidationError::MissingRequired { key: key.clone() });
                }
                Constraint::NonNegative if value.is_negative() => {
                    return Err(ValidationError::Negative {
                        key: key.clone(),
                        value: value.encode().unwrap_or_default(),
                    });
                }
                Constraint::NonNegativeItemIds => {
                    if let ParamValue::List(items) = value {
                        if let Some(item) = items.iter().find(|item| item_id_is_negative(item)) {
                            return Err(ValidationError::Negative {
                                key: key.clone(),
                                value: item.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate, then url-encode as `key=value&...`.
    pub fn serialize(&self) -> Result<String, ValidationError> {
        self.validate()?;
        Ok(self.encode())
    }

    /// Url-encode without checking constraints.
    pub(crate) fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs())
            .finish()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterSet
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = ParameterSet::new();
        for (key, value) in iter {
            params.set(key, value);
        }
        params
    }
}
