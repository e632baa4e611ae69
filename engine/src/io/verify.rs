//! Structural verification of an on-disk module.
//!
//! Complements the resolver: where `resolve` only needs a loadable manifest,
//! this walks the whole module layout and reports everything a module author
//! should fix before publishing.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::io::manifest::{detect_format, load_descriptor};
use crate::module::FormatVersion;
use crate::validator;

/// Outcome of verifying a module directory. Errors block use; warnings are
/// advisory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ModuleReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Verify a module directory's structure, manifest, and examples.
pub fn verify_module(dir: &Path) -> ModuleReport {
    let mut report = ModuleReport::default();

    let Some(format) = detect_format(dir) else {
        report
            .errors
            .push(format!("no recognizable manifest in {}", dir.display()));
        return report;
    };
    debug!(dir = %dir.display(), ?format, "verifying module");

    if format == FormatVersion::V2Split {
        for file in ["module.md", "prompt.txt", "constraints.yaml"] {
            check_file(dir, file, &mut report);
        }
    }

    let descriptor = match load_descriptor(dir) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            report.errors.push(err.to_string());
            return report;
        }
    };

    if descriptor.responsibility.is_empty() {
        report.warnings.push("missing responsibility".to_string());
    }
    if descriptor.excludes.is_empty() {
        report.warnings.push("excludes list is empty".to_string());
    }
    if descriptor.prompt_template.trim().len() < 100 {
        report
            .warnings
            .push("prompt template seems too short (< 100 chars)".to_string());
    }
    for (flag, enforced) in [
        ("no_network", descriptor.constraints.no_network),
        ("no_side_effects", descriptor.constraints.no_side_effects),
        ("no_inventing_data", descriptor.constraints.no_inventing_data),
    ] {
        if !enforced {
            report
                .warnings
                .push(format!("operational constraint '{flag}' is not enforced"));
        }
    }
    if descriptor.input_schema.is_none() {
        report.warnings.push("no input schema".to_string());
    }
    if descriptor.output_schema.is_none() {
        report.warnings.push("no output schema".to_string());
    }

    verify_example(
        dir,
        "examples/input.json",
        descriptor.input_schema.as_ref(),
        &mut report,
    );
    verify_example(
        dir,
        "examples/output.json",
        descriptor.output_schema.as_ref(),
        &mut report,
    );

    report
}

fn check_file(dir: &Path, file: &str, report: &mut ModuleReport) {
    let path = dir.join(file);
    match fs::metadata(&path) {
        Ok(meta) if meta.len() == 0 => report.errors.push(format!("file is empty: {file}")),
        Ok(_) => {}
        Err(_) => report.errors.push(format!("missing required file: {file}")),
    }
}

fn verify_example(dir: &Path, file: &str, schema: Option<&Value>, report: &mut ModuleReport) {
    let path = dir.join(file);
    if !path.exists() {
        report.warnings.push(format!("missing {file}"));
        return;
    }
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            report.errors.push(format!("unreadable {file}: {err}"));
            return;
        }
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            report.errors.push(format!("invalid json in {file}: {err}"));
            return;
        }
    };
    if let Some(schema) = schema {
        match validator::validate(&value, schema) {
            Ok(validation) if !validation.valid => {
                for error in validation.errors {
                    report
                        .errors
                        .push(format!("{file} fails schema validation: {error}"));
                }
            }
            Ok(_) => {}
            Err(err) => report.errors.push(format!("schema for {file} is broken: {err}")),
        }
    }
    // Confidence bounds hold even when the schema does not pin them.
    if let Some(confidence) = value.get("confidence").and_then(Value::as_f64)
        && !(0.0..=1.0).contains(&confidence)
    {
        report.errors.push(format!(
            "{file}: confidence must be within [0, 1], got {confidence}"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_module_v1;

    #[test]
    fn unknown_dir_reports_missing_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify_module(temp.path());
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("no recognizable manifest"));
    }

    #[test]
    fn minimal_module_is_valid_with_warnings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = write_module_v1(temp.path(), "tiny", "Short prompt: $ARGUMENTS");
        let report = verify_module(&dir);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("too short")));
        assert!(report.warnings.iter().any(|w| w.contains("no output schema")));
    }

    #[test]
    fn v2_module_with_empty_prompt_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("broken");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("module.md"), "---\nname: broken\n---\ndocs\n").expect("write");
        fs::write(dir.join("prompt.txt"), "").expect("write");
        fs::write(dir.join("constraints.yaml"), "operational: {}\n").expect("write");
        let report = verify_module(&dir);
        assert!(report.errors.iter().any(|e| e.contains("file is empty: prompt.txt")));
    }

    #[test]
    fn out_of_range_example_confidence_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = write_module_v1(temp.path(), "conf", "Prompt: $ARGUMENTS");
        fs::create_dir_all(dir.join("examples")).expect("mkdir");
        fs::write(
            dir.join("examples/output.json"),
            r#"{"confidence": 1.5, "rationale": "too sure"}"#,
        )
        .expect("write");
        let report = verify_module(&dir);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("confidence must be within [0, 1]")));
    }
}
