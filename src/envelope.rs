//! The three-variant response every handler call produces.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::results::{QueryResult, ResultSet};

/// Outcome of one logical operation.
///
/// Serializes as `{"res": {"type": "data", "data": ...}}`,
/// `{"res": {"type": "message", "message": "..."}}` or
/// `{"res": {"type": "error", "error": {"message": "..."}}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope<T> {
    Data { payload: T },
    Message { text: String },
    Error { message: String },
}

impl<T> ResponseEnvelope<T> {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEnvelope::Error { .. })
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            ResponseEnvelope::Data { payload } => Some(payload),
            _ => None,
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Message { text } => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Error { message } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn from_outcome(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Data(payload) => ResponseEnvelope::Data { payload },
            Outcome::Message(text) => ResponseEnvelope::Message { text },
        }
    }
}

/// What a successful handler produced, before enveloping.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Data(T),
    Message(String),
}

impl<T> Outcome<T> {
    pub fn data(payload: T) -> Self {
        Outcome::Data(payload)
    }

    pub fn message(text: impl Into<String>) -> Self {
        Outcome::Message(text.into())
    }
}

/// Shapes a handler's return value: text becomes a message, anything else data.
pub trait IntoOutcome {
    type Payload;

    fn into_outcome(self) -> Outcome<Self::Payload>;
}

impl<T> IntoOutcome for Outcome<T> {
    type Payload = T;

    fn into_outcome(self) -> Outcome<T> {
        self
    }
}

impl IntoOutcome for String {
    type Payload = JsonValue;

    fn into_outcome(self) -> Outcome<JsonValue> {
        Outcome::Message(self)
    }
}

impl IntoOutcome for &str {
    type Payload = JsonValue;

    fn into_outcome(self) -> Outcome<JsonValue> {
        Outcome::Message(self.to_owned())
    }
}

impl IntoOutcome for JsonValue {
    type Payload = JsonValue;

    fn into_outcome(self) -> Outcome<JsonValue> {
        match self {
            JsonValue::String(text) => Outcome::Message(text),
            other => Outcome::Data(other),
        }
    }
}

impl IntoOutcome for QueryResult {
    type Payload = QueryResult;

    fn into_outcome(self) -> Outcome<QueryResult> {
        Outcome::Data(self)
    }
}

impl IntoOutcome for ResultSet {
    type Payload = ResultSet;

    fn into_outcome(self) -> Outcome<ResultSet> {
        Outcome::Data(self)
    }
}

impl<T> IntoOutcome for Vec<T> {
    type Payload = Vec<T>;

    fn into_outcome(self) -> Outcome<Vec<T>> {
        Outcome::Data(self)
    }
}

impl IntoOutcome for () {
    type Payload = ();

    fn into_outcome(self) -> Outcome<()> {
        Outcome::Data(())
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRef<'a, T> {
    Data { data: &'a T },
    Message { message: &'a str },
    Error { error: ErrorBody },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireOwned<T> {
    Data { data: T },
    Message { message: String },
    Error { error: ErrorBody },
}

#[derive(Serialize)]
struct WrapRef<'a, T> {
    res: WireRef<'a, T>,
}

#[derive(Deserialize)]
struct WrapOwned<T> {
    res: WireOwned<T>,
}

impl<T: Serialize> Serialize for ResponseEnvelope<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let res = match self {
            ResponseEnvelope::Data { payload } => WireRef::Data { data: payload },
            ResponseEnvelope::Message { text } => WireRef::Message { message: text },
            ResponseEnvelope::Error { message } => WireRef::Error {
                error: ErrorBody {
                    message: message.clone(),
                },
            },
        };
        WrapRef { res }.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ResponseEnvelope<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wrap = WrapOwned::<T>::deserialize(deserializer)?;
        Ok(match wrap.res {
            WireOwned::Data { data } => ResponseEnvelope::Data { payload: data },
            WireOwned::Message { message } => ResponseEnvelope::Message { text: message },
            WireOwned::Error { error } => ResponseEnvelope::Error {
                message: error.message,
            },
        })
    }
}
