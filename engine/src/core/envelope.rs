//! Response envelope: the fixed `{ok, data|error}` shape and the synchronous
//! provider-text parser.
//!
//! Detection is two-tier and total: an explicit boolean `ok` field is
//! authoritative; without one, an object carrying `error.code: string` is a
//! legacy failure and anything else is a legacy success payload. Every
//! well-formed JSON object maps to exactly one of the two.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::EngineError;

/// Default confidence when the provider omits or mangles the field.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
/// Cap applied to the free-text `explain` field on normalization.
pub const EXPLAIN_MAX_CHARS: usize = 280;
/// Cap on the `overflow` list of extra, schema-unvalidated insights.
pub const OVERFLOW_MAX_ITEMS: usize = 10;
/// Diagnostic snippet length for unparseable provider output.
const SNIPPET_LIMIT: usize = 500;

/// Coarse risk tag carried in success data. Unknown tags survive as
/// `Other` rather than failing the parse.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    None,
    Low,
    Medium,
    High,
    #[serde(untagged)]
    Other(String),
}

/// Error payload of a failure envelope or an error chunk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
}

/// Success half of an envelope. `confidence` and `rationale` are lifted out
/// of the data mapping and normalized; the remaining keys stay as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct SuccessEnvelope {
    pub data: Map<String, Value>,
    /// Always within [0, 1].
    pub confidence: f64,
    pub rationale: String,
    pub behavior_equivalence: Option<bool>,
    /// Extra insights outside the output contract. Bounded at
    /// [`OVERFLOW_MAX_ITEMS`] and kept out of [`SuccessEnvelope::data_value`],
    /// so strict output schemas never see it.
    pub overflow: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FailureEnvelope {
    pub error: EnvelopeError,
    pub partial_data: Option<Value>,
}

/// Uniform terminal outcome of an invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

impl Envelope {
    pub fn ok(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    /// Build the failure envelope for a typed engine error.
    pub fn from_error(err: &EngineError) -> Self {
        Envelope::Failure(FailureEnvelope {
            error: EnvelopeError {
                code: err.code().to_string(),
                message: err.to_string(),
                recoverable: None,
            },
            partial_data: None,
        })
    }

    /// Wire-format value: `{ok: true, data: {..}}` or
    /// `{ok: false, error: {..}, partial_data?}`.
    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Success(success) => json!({
                "ok": true,
                "data": Value::Object(success.wire_data()),
            }),
            Envelope::Failure(failure) => {
                let mut obj = Map::new();
                obj.insert("ok".to_string(), Value::Bool(false));
                obj.insert(
                    "error".to_string(),
                    serde_json::to_value(&failure.error).unwrap_or(Value::Null),
                );
                if let Some(partial) = &failure.partial_data {
                    obj.insert("partial_data".to_string(), partial.clone());
                }
                Value::Object(obj)
            }
        }
    }
}

impl SuccessEnvelope {
    /// Full data mapping with `confidence`/`rationale`/`behavior_equivalence`
    /// folded back in. This is the value validated against output schemas.
    pub fn data_value(&self) -> Map<String, Value> {
        let mut data = self.data.clone();
        data.insert("confidence".to_string(), json!(self.confidence));
        data.insert("rationale".to_string(), json!(self.rationale));
        if let Some(be) = self.behavior_equivalence {
            data.insert("behavior_equivalence".to_string(), Value::Bool(be));
        }
        data
    }

    /// Wire form of the data mapping: [`SuccessEnvelope::data_value`] plus
    /// the `overflow` list, so overflow survives serialization round trips.
    pub fn wire_data(&self) -> Map<String, Value> {
        let mut data = self.data_value();
        if !self.overflow.is_empty() {
            data.insert("overflow".to_string(), Value::Array(self.overflow.clone()));
        }
        data
    }

    /// Typed view of the `risk` tag if the data carries one.
    pub fn risk(&self) -> Option<Risk> {
        self.data
            .get("risk")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Clamp a raw confidence value into [0, 1], defaulting when absent or
/// non-numeric.
pub fn normalize_confidence(raw: Option<&Value>) -> f64 {
    match raw.and_then(Value::as_f64) {
        Some(n) if n.is_finite() => n.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Interpret raw provider text as a response envelope.
pub fn parse_response(raw: &str) -> Result<Envelope, EngineError> {
    let stripped = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(stripped)
        .map_err(|err| parse_error(format!("invalid json: {err}"), stripped))?;
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(parse_error(
                format!("expected a json object, got {}", type_name(&other)),
                stripped,
            ));
        }
    };
    Ok(interpret_object(object))
}

/// Map a parsed object onto exactly one of success/failure.
fn interpret_object(mut object: Map<String, Value>) -> Envelope {
    match object.get("ok").and_then(Value::as_bool) {
        Some(true) => {
            let data = match object.remove("data") {
                Some(Value::Object(data)) => data,
                _ => Map::new(),
            };
            Envelope::Success(success_from_data(data))
        }
        Some(false) => Envelope::Failure(FailureEnvelope {
            error: error_from_value(object.remove("error")),
            partial_data: object.remove("partial_data"),
        }),
        // Legacy shapes carry no `ok` field: an `error.code` string means
        // failure, anything else is the success payload itself.
        None => match legacy_error(&object) {
            Some(error) => Envelope::Failure(FailureEnvelope {
                error,
                partial_data: object.remove("partial_data"),
            }),
            None => Envelope::Success(success_from_data(object)),
        },
    }
}

/// Normalize a success data mapping: lift and default confidence/rationale,
/// pass `behavior_equivalence` through, cap `explain`.
pub(crate) fn success_from_data(mut data: Map<String, Value>) -> SuccessEnvelope {
    let confidence = normalize_confidence(data.remove("confidence").as_ref());
    let rationale = match data.remove("rationale") {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };
    let behavior_equivalence = data.remove("behavior_equivalence").and_then(|v| v.as_bool());
    let overflow = bound_overflow(data.remove("overflow"));
    if let Some(Value::String(explain)) = data.get_mut("explain") {
        truncate_chars(explain, EXPLAIN_MAX_CHARS);
    }
    SuccessEnvelope {
        data,
        confidence,
        rationale,
        behavior_equivalence,
        overflow,
    }
}

/// Normalize a raw `overflow` value into a bounded list.
fn bound_overflow(raw: Option<Value>) -> Vec<Value> {
    match raw {
        Some(Value::Array(mut items)) => {
            items.truncate(OVERFLOW_MAX_ITEMS);
            items
        }
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

fn legacy_error(object: &Map<String, Value>) -> Option<EnvelopeError> {
    let error = object.get("error")?.as_object()?;
    let code = error.get("code")?.as_str()?;
    Some(EnvelopeError {
        code: code.to_string(),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        recoverable: error.get("recoverable").and_then(Value::as_bool),
    })
}

fn error_from_value(value: Option<Value>) -> EnvelopeError {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(EnvelopeError {
            code: "E2001".to_string(),
            message: "failure envelope without an error object".to_string(),
            recoverable: None,
        })
}

/// Strip a single fenced code block wrapper (```json ... ```), if present.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json", "jsonc", ...) on the opening fence line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => return text,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn parse_error(reason: String, content: &str) -> EngineError {
    let mut snippet = content.to_string();
    truncate_chars(&mut snippet, SNIPPET_LIMIT);
    EngineError::ResponseParse { reason, snippet }
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
