//! Deterministic prompt assembly from a module template and typed input.
//!
//! This is a pure function of (template, input): no I/O, no randomness, so
//! rendered prompts are reproducible test fixtures. Placeholder grammar:
//! `${key}` for structured fields, `$ARGUMENTS` for the derived args value,
//! `$0`, `$1`, ... for whitespace-split argument tokens.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::directive::{self, Directive};
use crate::module::ModuleDescriptor;

/// Leading keywords that classify a raw argument string as code.
const CODE_KEYWORDS: &[&str] = &[
    "def", "function", "class", "const", "let", "var", "import", "export", "public", "private",
];

/// Source-file suffixes that classify a raw argument string as code.
const SOURCE_EXTENSIONS: &[&str] = &[
    ".rs", ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".go", ".c", ".h", ".cpp", ".cs", ".rb",
    ".swift", ".kt", ".php",
];

static FIELD_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{[A-Za-z0-9_]+\}").expect("field placeholder regex"));
static POSITIONAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("positional regex"));

/// Structured invocation input plus an optional raw legacy argument string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvocationInput {
    /// Free-form structured mapping; keys are unique by construction.
    pub fields: Map<String, Value>,
    pub raw_args: Option<String>,
}

impl InvocationInput {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            raw_args: None,
        }
    }

    /// Input carrying only a raw legacy argument string.
    pub fn from_raw(raw_args: impl Into<String>) -> Self {
        Self {
            fields: Map::new(),
            raw_args: Some(raw_args.into()),
        }
    }

    /// Structured fields as a JSON object value (for schema validation).
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// How a raw legacy argument string was classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgsKind {
    Code,
    Query,
}

/// Classify a raw argument string as code or a natural-language query.
pub fn classify_args(raw: &str) -> ArgsKind {
    let trimmed = raw.trim();
    let leading_keyword = trimmed
        .split_whitespace()
        .next()
        .is_some_and(|word| CODE_KEYWORDS.contains(&word));
    let has_syntax = trimmed.contains(['{', '}', '(', ')', ';']);
    let has_arrow = trimmed.contains("=>") || trimmed.contains("->");
    let has_extension = SOURCE_EXTENSIONS
        .iter()
        .any(|ext| trimmed.ends_with(ext));
    if leading_keyword || has_syntax || has_arrow || has_extension {
        ArgsKind::Code
    } else {
        ArgsKind::Query
    }
}

/// Render the prompt for a descriptor and input.
pub fn build(descriptor: &ModuleDescriptor, input: &InvocationInput) -> String {
    let (text, directives) = build_masked(descriptor, input);
    directive::unmask(&text, &descriptor.prompt_template, &directives)
}

/// Render with call directives masked behind opaque markers, so placeholder
/// substitution cannot rewrite directive text. The caller replaces
/// `directive::marker(i)` with the i-th child's result (or unmasks).
pub fn build_masked(
    descriptor: &ModuleDescriptor,
    input: &InvocationInput,
) -> (String, Vec<Directive>) {
    let template = &descriptor.prompt_template;
    let directives = directive::scan(template);
    // The placeholder census runs over the unmasked template: arguments
    // routed through a directive still count as consumed.
    let had_placeholders = FIELD_PLACEHOLDER_RE.is_match(template)
        || template.contains("$ARGUMENTS")
        || POSITIONAL_RE.is_match(template);

    // 1. ${key} substitution for every structured field.
    let mut out = directive::mask(template, &directives);
    for (key, value) in &input.fields {
        let placeholder = format!("${{{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value_to_string(value));
        }
    }

    // 2. Derive the args value, classifying raw legacy args when the
    // structured input does not already carry code/query.
    let (args_value, is_code) = derive_args_value(input);

    // 3. $ARGUMENTS replacement.
    out = out.replace("$ARGUMENTS", &args_value);

    // 4. Positional $0, $1, ... over whitespace-split tokens. Tokens beyond
    // the split are substituted with the empty string.
    let tokens: Vec<&str> = args_value.split_whitespace().collect();
    out = POSITIONAL_RE
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            let index: usize = caps[1].parse().unwrap_or(usize::MAX);
            tokens.get(index).copied().unwrap_or_default().to_string()
        })
        .into_owned();

    // 5. Fallback: template mentioned no placeholder at all, but we do have
    // arguments. Append a generated input section so they are not dropped.
    if !had_placeholders && !args_value.is_empty() {
        out.push_str("\n\n## Input\n\n");
        if is_code {
            out.push_str("```\n");
            out.push_str(&args_value);
            out.push_str("\n```\n");
        } else {
            out.push_str(&args_value);
            out.push('\n');
        }
        if let Some(language) = input.fields.get("language").and_then(Value::as_str) {
            out.push_str(&format!("\nLanguage: {language}\n"));
        }
    }

    (out, directives)
}

/// Derived args value for an input, exactly as substituted for `$ARGUMENTS`.
pub fn args_value(input: &InvocationInput) -> String {
    derive_args_value(input).0
}

/// Compute the args value for an input: a `code` or `query` field is used
/// verbatim; otherwise the raw legacy argument string is classified.
fn derive_args_value(input: &InvocationInput) -> (String, bool) {
    if let Some(code) = input.fields.get("code") {
        return (value_to_string(code), true);
    }
    if let Some(query) = input.fields.get("query") {
        return (value_to_string(query), false);
    }
    let raw = input.raw_args.as_deref().unwrap_or_default();
    if raw.is_empty() {
        return (String::new(), false);
    }
    let is_code = classify_args(raw) == ArgsKind::Code;
    (raw.to_string(), is_code)
}

/// String form of a field value: strings verbatim, everything else as
/// compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
