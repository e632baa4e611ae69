//! Call directives embedded in prompt text.
//!
//! Three literal forms, scanned left-to-right:
//!
//! - `{{invoke:name}}` — child inherits the parent's structured input.
//! - `{{invoke:name $ARGUMENTS}}` — child inherits the parent's computed
//!   args value as its raw argument string.
//! - `{{invoke:name "literal args"}}` — child receives the quoted literal
//!   as its raw argument string (`\"` and `\\` escapes supported).

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{invoke:([A-Za-z0-9][A-Za-z0-9_-]*)(?:[ \t]+(\$ARGUMENTS|"(?:[^"\\]|\\.)*"))?\}\}"#)
        .expect("directive regex")
});

/// Argument-passing form of a directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectiveArgs {
    /// Bare reference: inherit the parent's structured input.
    InheritInput,
    /// Inherit the parent's computed args value.
    InheritArgsValue,
    /// Literal custom argument string.
    Literal(String),
}

/// One call directive found in prompt text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub module: String,
    pub args: DirectiveArgs,
    /// Byte range of the directive in the scanned text; the child result is
    /// injected here.
    pub span: Range<usize>,
}

/// Scan prompt text for call directives in textual appearance order.
pub fn scan(text: &str) -> Vec<Directive> {
    DIRECTIVE_RE
        .captures_iter(text)
        .map(|caps| {
            let whole = caps.get(0).expect("whole match");
            let args = match caps.get(2).map(|m| m.as_str()) {
                None => DirectiveArgs::InheritInput,
                Some("$ARGUMENTS") => DirectiveArgs::InheritArgsValue,
                Some(quoted) => DirectiveArgs::Literal(unescape(&quoted[1..quoted.len() - 1])),
            };
            Directive {
                module: caps[1].to_string(),
                args,
                span: whole.range(),
            }
        })
        .collect()
}

/// Opaque stand-in for the directive at `index` while a template renders.
/// Private-use codepoints cannot collide with placeholder syntax or
/// realistic prompt text.
pub fn marker(index: usize) -> String {
    format!("\u{e000}{index}\u{e001}")
}

/// Replace each directive span with its marker, shielding directive text
/// (including `$ARGUMENTS` or `${key}` inside quoted literals) from
/// placeholder substitution.
pub fn mask(text: &str, directives: &[Directive]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (index, directive) in directives.iter().enumerate() {
        out.push_str(&text[cursor..directive.span.start]);
        out.push_str(&marker(index));
        cursor = directive.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Restore the original directive text behind each marker.
pub fn unmask(text: &str, original: &str, directives: &[Directive]) -> String {
    let mut out = text.to_string();
    for (index, directive) in directives.iter().enumerate() {
        out = out.replace(&marker(index), &original[directive.span.clone()]);
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_directive_inherits_structured_input() {
        let directives = scan("Before {{invoke:summarize}} after");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].module, "summarize");
        assert_eq!(directives[0].args, DirectiveArgs::InheritInput);
        assert_eq!(&"Before {{invoke:summarize}} after"[directives[0].span.clone()],
            "{{invoke:summarize}}");
    }

    #[test]
    fn arguments_form_inherits_args_value() {
        let directives = scan("{{invoke:classify $ARGUMENTS}}");
        assert_eq!(directives[0].args, DirectiveArgs::InheritArgsValue);
    }

    #[test]
    fn literal_form_carries_custom_args_with_escapes() {
        let directives = scan(r#"{{invoke:review "she said \"go\""}}"#);
        assert_eq!(
            directives[0].args,
            DirectiveArgs::Literal(r#"she said "go""#.to_string())
        );
    }

    #[test]
    fn directives_are_returned_in_textual_order() {
        let text = "{{invoke:b}} middle {{invoke:a \"x\"}} end {{invoke:c $ARGUMENTS}}";
        let modules: Vec<_> = scan(text).into_iter().map(|d| d.module).collect();
        assert_eq!(modules, vec!["b", "a", "c"]);
    }

    #[test]
    fn malformed_directives_are_ignored() {
        assert!(scan("{{invoke:}} {{invoke: name}} {invoke:x}").is_empty());
    }

    #[test]
    fn mask_hides_directives_and_unmask_restores_them() {
        let text = r#"a {{invoke:x "q"}} b {{invoke:y $ARGUMENTS}} c"#;
        let directives = scan(text);
        let masked = mask(text, &directives);
        assert!(scan(&masked).is_empty());
        assert!(!masked.contains("invoke"));
        assert!(!masked.contains("$ARGUMENTS"));
        assert_eq!(unmask(&masked, text, &directives), text);
    }
}
