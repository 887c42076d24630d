//! Shared JSON codec.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ResourceResult;

/// JSON encoding shared by plugins, so they all agree on output style.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Creates a codec; `pretty` selects indented output.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Serializes `value` to a string.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> ResourceResult<String> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(encoded)
    }

    /// Deserializes a value from a string.
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> ResourceResult<T> {
        Ok(serde_json::from_str(text)?)
    }

    /// Converts `value` into a dynamic JSON value.
    pub fn to_value<T: Serialize>(&self, value: &T) -> ResourceResult<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Converts a dynamic JSON value into `T`.
    pub fn from_value<T: DeserializeOwned>(&self, value: serde_json::Value) -> ResourceResult<T> {
        Ok(serde_json::from_value(value)?)
    }
}
