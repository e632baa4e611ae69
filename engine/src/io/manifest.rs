//! Manifest parsing across historical module formats.
//!
//! Three shapes are recognized and normalized into one [`ModuleDescriptor`]
//! at load time; the `format_version` discriminant is resolved here exactly
//! once and nothing downstream sniffs shapes again.
//!
//! - **V1 legacy**: single `module.md`, YAML frontmatter between `---`
//!   delimiters, markdown body is the prompt template.
//! - **V2 split**: `module.md` frontmatter plus `prompt.txt`,
//!   `constraints.yaml` (with an `operational` section) and optional
//!   `*.schema.json` files.
//! - **V3 manifest**: single `module.json` carrying every field inline.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::module::{Constraints, ContextMode, FormatVersion, ModuleDescriptor, OutputContract};

/// Identify which manifest shape a module directory carries, if any.
pub fn detect_format(dir: &Path) -> Option<FormatVersion> {
    if dir.join("module.json").is_file() {
        Some(FormatVersion::V3Manifest)
    } else if dir.join("module.md").is_file() {
        if dir.join("prompt.txt").is_file() {
            Some(FormatVersion::V2Split)
        } else {
            Some(FormatVersion::V1Legacy)
        }
    } else {
        None
    }
}

/// Load and normalize the module definition in `dir`.
pub fn load_descriptor(dir: &Path) -> Result<ModuleDescriptor, EngineError> {
    let format = detect_format(dir).ok_or_else(|| EngineError::NotFound {
        name: dir_name(dir),
    })?;
    debug!(dir = %dir.display(), ?format, "loading module manifest");
    match format {
        FormatVersion::V1Legacy => load_v1(dir),
        FormatVersion::V2Split => load_v2(dir),
        FormatVersion::V3Manifest => load_v3(dir),
    }
}

/// Frontmatter fields shared by the V1 and V2 shapes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frontmatter {
    name: Option<String>,
    version: Option<String>,
    responsibility: Option<String>,
    excludes: Vec<String>,
    #[serde(alias = "context")]
    context_mode: Option<ContextMode>,
    continue_on_failure: bool,
    constraints: Option<Constraints>,
    #[serde(alias = "output")]
    output_contract: Option<OutputContract>,
}

fn load_v1(dir: &Path) -> Result<ModuleDescriptor, EngineError> {
    let manifest_path = dir.join("module.md");
    let contents = read_file(&manifest_path)?;
    let (frontmatter, body) = split_frontmatter(&manifest_path, &contents)?;
    Ok(assemble(
        dir,
        frontmatter,
        body.trim_start().to_string(),
        None,
        [None, None, None],
        FormatVersion::V1Legacy,
    ))
}

fn load_v2(dir: &Path) -> Result<ModuleDescriptor, EngineError> {
    let manifest_path = dir.join("module.md");
    let contents = read_file(&manifest_path)?;
    let (frontmatter, _body) = split_frontmatter(&manifest_path, &contents)?;
    let prompt = read_file(&dir.join("prompt.txt"))?;

    let constraints = match read_optional(&dir.join("constraints.yaml"))? {
        Some(raw) => {
            #[derive(Debug, Default, Deserialize)]
            #[serde(default)]
            struct ConstraintsFile {
                operational: Constraints,
            }
            let parsed: ConstraintsFile = serde_yaml::from_str(&raw).map_err(|err| {
                manifest_err(&dir.join("constraints.yaml"), err.to_string())
            })?;
            Some(parsed.operational)
        }
        None => None,
    };

    let schemas = [
        read_optional_schema(&dir.join("input.schema.json"))?,
        read_optional_schema(&dir.join("output.schema.json"))?,
        read_optional_schema(&dir.join("error.schema.json"))?,
    ];
    Ok(assemble(
        dir,
        frontmatter,
        prompt,
        constraints,
        schemas,
        FormatVersion::V2Split,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestV3 {
    name: Option<String>,
    version: Option<String>,
    responsibility: Option<String>,
    excludes: Vec<String>,
    #[serde(alias = "context")]
    context_mode: Option<ContextMode>,
    continue_on_failure: bool,
    constraints: Constraints,
    #[serde(alias = "output")]
    output_contract: OutputContract,
    prompt: Option<String>,
    prompt_file: Option<String>,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    error_schema: Option<Value>,
}

fn load_v3(dir: &Path) -> Result<ModuleDescriptor, EngineError> {
    let manifest_path = dir.join("module.json");
    let contents = read_file(&manifest_path)?;
    let manifest: ManifestV3 = serde_json::from_str(&contents)
        .map_err(|err| manifest_err(&manifest_path, err.to_string()))?;

    let prompt_template = match (&manifest.prompt, &manifest.prompt_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(file)) => read_file(&dir.join(file))?,
        (None, None) => {
            return Err(manifest_err(
                &manifest_path,
                "manifest carries neither 'prompt' nor 'prompt_file'".to_string(),
            ));
        }
    };

    Ok(ModuleDescriptor {
        name: manifest.name.unwrap_or_else(|| dir_name(dir)),
        version: manifest.version.unwrap_or_else(|| "0.0.0".to_string()),
        responsibility: manifest.responsibility.unwrap_or_default(),
        excludes: manifest.excludes,
        constraints: manifest.constraints,
        output_contract: manifest.output_contract,
        context_mode: manifest.context_mode.unwrap_or_default(),
        continue_on_failure: manifest.continue_on_failure,
        prompt_template,
        input_schema: manifest.input_schema,
        output_schema: manifest.output_schema,
        error_schema: manifest.error_schema,
        format_version: FormatVersion::V3Manifest,
    })
}

fn assemble(
    dir: &Path,
    frontmatter: Frontmatter,
    prompt_template: String,
    constraints_file: Option<Constraints>,
    schemas: [Option<Value>; 3],
    format_version: FormatVersion,
) -> ModuleDescriptor {
    let [input_schema, output_schema, error_schema] = schemas;
    ModuleDescriptor {
        name: frontmatter.name.unwrap_or_else(|| dir_name(dir)),
        version: frontmatter.version.unwrap_or_else(|| "0.0.0".to_string()),
        responsibility: frontmatter.responsibility.unwrap_or_default(),
        excludes: frontmatter.excludes,
        // A dedicated constraints.yaml wins over frontmatter constraints.
        constraints: constraints_file
            .or(frontmatter.constraints)
            .unwrap_or_default(),
        output_contract: frontmatter.output_contract.unwrap_or_default(),
        context_mode: frontmatter.context_mode.unwrap_or_default(),
        continue_on_failure: frontmatter.continue_on_failure,
        prompt_template,
        input_schema,
        output_schema,
        error_schema,
        format_version,
    }
}

/// Split a frontmatter-style file into parsed YAML frontmatter and body.
fn split_frontmatter(path: &Path, contents: &str) -> Result<(Frontmatter, String), EngineError> {
    let Some(rest) = contents.strip_prefix("---") else {
        return Err(manifest_err(
            path,
            "file must start with '---' frontmatter".to_string(),
        ));
    };
    let Some(end) = rest.find("\n---") else {
        return Err(manifest_err(
            path,
            "missing closing '---' frontmatter delimiter".to_string(),
        ));
    };
    let frontmatter: Frontmatter = serde_yaml::from_str(&rest[..end])
        .map_err(|err| manifest_err(path, err.to_string()))?;
    let body = match rest[end + 4..].split_once('\n') {
        Some((_delimiter_line_rest, body)) => body.to_string(),
        None => String::new(),
    };
    Ok((frontmatter, body))
}

fn read_file(path: &Path) -> Result<String, EngineError> {
    fs::read_to_string(path).map_err(|err| manifest_err(path, err.to_string()))
}

fn read_optional(path: &Path) -> Result<Option<String>, EngineError> {
    if !path.exists() {
        return Ok(None);
    }
    read_file(path).map(Some)
}

/// Schemas are optional but recommended; a missing file is not an error.
fn read_optional_schema(path: &Path) -> Result<Option<Value>, EngineError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| manifest_err(path, err.to_string()))
}

fn manifest_err(path: &Path, reason: String) -> EngineError {
    EngineError::ManifestParse {
        path: path.display().to_string(),
        reason,
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
