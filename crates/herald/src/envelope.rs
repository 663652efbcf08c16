// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publisher control protocol.
//!
//! A publisher opens a TCP connection, writes one JSON envelope and closes:
//!
//! ```json
//! {"message": <any>, "to": <value | [values] | null>}
//! ```
//!
//! `to` values are compared against the subscriber's identity key. Numbers
//! match by their decimal text since path values are always strings.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

/// Which subscribers a publish addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Target {
    /// Every registered subscriber.
    #[default]
    All,
    /// Subscribers whose identity value is in the list. Never empty, no
    /// duplicates.
    Only(Vec<String>),
}

impl Target {
    /// Address the given identity values, dropping duplicates. An empty list
    /// means everyone; an empty string is an ordinary value.
    pub fn only<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for value in values {
            let value = value.into();
            if !out.contains(&value) {
                out.push(value);
            }
        }
        if out.is_empty() {
            Self::All
        } else {
            Self::Only(out)
        }
    }

    /// Interpret a decoded `to` field.
    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        match value {
            Value::Null => Ok(Self::All),
            Value::Array(items) => {
                let values = items.iter().map(scalar_text).collect::<anyhow::Result<Vec<_>>>()?;
                Ok(Self::only(values))
            }
            Value::String(s) if s.is_empty() => Ok(Self::All),
            other => Ok(Self::only([scalar_text(other)?])),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::All => Value::Null,
            // A lone "" must stay a list; as a scalar it would decode as broadcast.
            Self::Only(values) if values.len() == 1 && !values[0].is_empty() => {
                Value::String(values[0].clone())
            }
            Self::Only(values) => values.iter().cloned().map(Value::String).collect(),
        }
    }
}

fn scalar_text(value: &Value) -> anyhow::Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => anyhow::bail!("unsupported identity value in \"to\": {other}"),
    }
}

/// One publish request.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Value,
    pub to: Target,
}

impl Envelope {
    pub fn new(message: Value, to: Target) -> Self {
        Self { message, to }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The text subscribers receive: the JSON encoding of `message`.
    pub fn payload(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.message)?)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Envelope", 2)?;
        s.serialize_field("message", &self.message)?;
        s.serialize_field("to", &self.to.to_value())?;
        s.end()
    }
}

/// Decode a publisher payload.
///
/// The payload must be a JSON object with a `message` key. A `to` key that
/// is absent or null addresses everyone.
pub fn decode_envelope(raw: &[u8]) -> anyhow::Result<Envelope> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(mut fields) = value else {
        anyhow::bail!("envelope must be a JSON object");
    };
    let message = fields.remove("message").ok_or_else(|| anyhow::anyhow!("missing \"message\""))?;
    let to = match fields.get("to") {
        Some(to) => Target::from_value(to)?,
        None => Target::All,
    };
    Ok(Envelope { message, to })
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
