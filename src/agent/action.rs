//! Decoding of the model's reply into an [`Action`].
//!
//! The whole reply must be one JSON object. Nothing is extracted from
//! surrounding prose and no field is coerced.

use serde_json::Value;
use thiserror::Error;

/// Summary used when a `finish` action carries none.
pub const DEFAULT_SUMMARY: &str = "Finished.";

/// What the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command {
        command: String,
        comment: Option<String>,
    },
    Finish {
        summary: Option<String>,
    },
}

impl Action {
    /// Summary text of a `Finish`, with the fallback applied.
    pub fn summary_or_default(summary: Option<&str>) -> &str {
        summary.unwrap_or(DEFAULT_SUMMARY)
    }
}

/// Why a reply could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("reply is not valid JSON ({reason}): {raw}")]
    InvalidJson { reason: String, raw: String },

    #[error("command action has no command: {raw}")]
    MissingCommand { raw: String },

    #[error("unrecognized action {action:?}: {raw}")]
    UnknownAction { action: Option<String>, raw: String },
}

/// Decode a raw reply.
pub fn parse_action(raw: &str) -> Result<Action, ActionError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ActionError::InvalidJson {
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;

    let unknown = |action: Option<String>| ActionError::UnknownAction {
        action,
        raw: raw.to_string(),
    };

    let Value::Object(fields) = &value else {
        return Err(unknown(None));
    };

    match fields.get("action") {
        Some(Value::String(tag)) if tag == "finish" => Ok(Action::Finish {
            summary: string_field(&value, "summary"),
        }),
        Some(Value::String(tag)) if tag == "command" => {
            match fields.get("command").and_then(Value::as_str) {
                Some(command) if !command.is_empty() => Ok(Action::Command {
                    command: command.to_string(),
                    comment: string_field(&value, "comment"),
                }),
                _ => Err(ActionError::MissingCommand {
                    raw: raw.to_string(),
                }),
            }
        }
        Some(Value::String(tag)) => Err(unknown(Some(tag.clone()))),
        Some(other) => Err(unknown(Some(other.to_string()))),
        None => Err(unknown(None)),
    }
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}
