use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DeserializeError;

/// Turns a record's wire payload into the handler's type.
///
/// A missing or empty payload is not an error: it yields `T::default()`.
pub trait PayloadDeserializer<T>: Send + Sync {
    fn deserialize(&self, payload: Option<&[u8]>) -> Result<T, DeserializeError>;
}

fn non_empty(payload: Option<&[u8]>) -> Option<&[u8]> {
    payload.filter(|p| !p.is_empty())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl<T> PayloadDeserializer<T> for JsonDeserializer
where
    T: DeserializeOwned + Default,
{
    fn deserialize(&self, payload: Option<&[u8]>) -> Result<T, DeserializeError> {
        match non_empty(payload) {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(T::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeDeserializer;

impl<T> PayloadDeserializer<T> for BincodeDeserializer
where
    T: DeserializeOwned + Default,
{
    fn deserialize(&self, payload: Option<&[u8]>) -> Result<T, DeserializeError> {
        match non_empty(payload) {
            Some(bytes) => Ok(bincode::deserialize(bytes)?),
            None => Ok(T::default()),
        }
    }
}

/// Wire formats a subscription can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    Bincode,
}

impl PayloadFormat {
    pub fn deserializer<T>(self) -> Arc<dyn PayloadDeserializer<T>>
    where
        T: DeserializeOwned + Default + 'static,
    {
        match self {
            PayloadFormat::Json => Arc::new(JsonDeserializer),
            PayloadFormat::Bincode => Arc::new(BincodeDeserializer),
        }
    }

    /// Encode a value the way `deserializer` expects to read it back.
    pub fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>, SerializeError> {
        match self {
            PayloadFormat::Json => Ok(serde_json::to_vec(value)?),
            PayloadFormat::Bincode => Ok(bincode::serialize(value)?),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownPayloadFormat(pub String);

impl fmt::Display for UnknownPayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown payload format: {}", self.0)
    }
}

impl FromStr for PayloadFormat {
    type Err = UnknownPayloadFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "bincode" | "binary" => Ok(PayloadFormat::Bincode),
            other => Err(UnknownPayloadFormat(other.to_owned())),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Json => write!(f, "json"),
            PayloadFormat::Bincode => write!(f, "bincode"),
        }
    }
}
