//! One peer's advertised grammar plus routing metadata.
//!
//! Peers announce themselves by publishing an IDL envelope on
//! `/unicorn/idl/<topic>`: a JSON object whose `completion` field holds the
//! grammar tree and whose remaining fields carry routing metadata (response
//! topics, flat-merge flag, ad-hoc channel flag). Parsing is strict: a
//! payload that does not match the envelope shape is rejected as
//! [`IdlError`] and the announcement is dropped by the caller.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::grammar::{Grammar, GrammarError};

/// Topic prefix under which IDL announcements are published; the remainder
/// of the topic names the announcing peer.
pub const IDL_TOPIC_PREFIX: &str = "/unicorn/idl/";

#[derive(Debug, Error)]
pub enum IdlError {
    #[error("malformed idl envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    completion: Value,
    #[serde(default)]
    flat: bool,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    ad_hoc_channels: bool,
    #[serde(default)]
    logging: Option<String>,
}

/// An advertised grammar and how to reach its handler.
///
/// `topic` is the "/"-separated path commands are published on. When
/// `flat` is set (legal only for a `Keyword` completion root) the grammar's
/// top-level keywords merge directly into the composite root instead of
/// being nested under the topic path.
#[derive(Debug, Clone)]
pub struct Idl {
    pub topic: String,
    pub completion: Grammar,
    pub flat: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub result: Option<String>,
    pub ad_hoc_channels: bool,
    pub logging: Option<String>,
}

impl Idl {
    /// Parse an announcement payload for `topic`. The completion tree has
    /// its references resolved before the IDL is returned; unresolved
    /// targets are logged and degrade to no-ops.
    pub fn from_value(topic: impl Into<String>, value: &Value) -> Result<Self, IdlError> {
        let envelope: Envelope = Envelope::deserialize(value)?;
        let mut completion = Grammar::from_value(&envelope.completion)?;
        completion.resolve_references();
        Ok(Self {
            topic: topic.into(),
            completion,
            flat: envelope.flat,
            stdout: envelope.stdout,
            stderr: envelope.stderr,
            result: envelope.result,
            ad_hoc_channels: envelope.ad_hoc_channels,
            logging: envelope.logging,
        })
    }

    pub fn from_json(topic: impl Into<String>, payload: &str) -> Result<Self, IdlError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(topic, &value)
    }

    /// Re-emit the announcement envelope, including all routing fields so
    /// a cached IDL round-trips its dispatch metadata.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("completion".into(), self.completion.to_value());
        map.insert("flat".into(), self.flat.into());
        map.insert("adHocChannels".into(), self.ad_hoc_channels.into());
        for (key, field) in [
            ("stdout", &self.stdout),
            ("stderr", &self.stderr),
            ("result", &self.result),
            ("logging", &self.logging),
        ] {
            if let Some(value) = field {
                map.insert(key.into(), value.clone().into());
            }
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
