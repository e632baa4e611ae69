use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Manifest shape the descriptor was loaded from.
///
/// Resolved once at load time; nothing downstream of the resolver may branch
/// on it. Historical shapes are normalized into the same descriptor fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    /// Single `module.md` file: YAML frontmatter, markdown body is the prompt.
    V1Legacy,
    /// `module.md` frontmatter plus separate `prompt.txt`, `constraints.yaml`
    /// and optional schema files.
    V2Split,
    /// Single `module.json` manifest carrying every field inline.
    V3Manifest,
}

/// Whether a child invocation shares or isolates its accumulation scope.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Fork,
    #[default]
    Main,
}

/// Declared strictness class governing schema strictness and response mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Exec,
    Decision,
    Exploration,
}

/// Operational constraints declared by a module.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Constraints {
    /// Legacy manifests spell this `no_external_network`.
    #[serde(alias = "no_external_network")]
    pub no_network: bool,
    pub no_side_effects: bool,
    pub no_inventing_data: bool,
    pub require_confidence: bool,
    pub require_rationale: bool,
    /// When the provider reports `behavior_equivalence: false`, cap the
    /// envelope confidence at this value.
    pub behavior_equivalence_false_max_confidence: Option<f64>,
}

/// Declared output contract for a module.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputContract {
    /// Whether the module promises the `{ok, data|error}` envelope shape.
    pub envelope: bool,
    pub tier: Tier,
    pub require_behavior_equivalence: bool,
}

impl Default for OutputContract {
    fn default() -> Self {
        Self {
            envelope: true,
            tier: Tier::default(),
            require_behavior_equivalence: false,
        }
    }
}

/// Normalized module definition, immutable once loaded.
///
/// Each invocation owns the descriptor it resolved; descriptors are never
/// shared across concurrent invocations.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub responsibility: String,
    pub excludes: Vec<String>,
    pub constraints: Constraints,
    pub output_contract: OutputContract,
    pub context_mode: ContextMode,
    /// Inject child failures into the prompt instead of aborting the chain.
    pub continue_on_failure: bool,
    /// Raw template text with `${key}` / `$ARGUMENTS` / `$N` placeholders.
    pub prompt_template: String,
    /// Schemas are optional but recommended; `None` means "do not validate".
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub error_schema: Option<Value>,
    pub format_version: FormatVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_mode_defaults_to_main() {
        assert_eq!(ContextMode::default(), ContextMode::Main);
    }

    #[test]
    fn constraints_accept_legacy_network_flag() {
        let parsed: Constraints =
            serde_yaml::from_str("no_external_network: true\nno_side_effects: true\n")
                .expect("parse");
        assert!(parsed.no_network);
        assert!(parsed.no_side_effects);
        assert!(!parsed.no_inventing_data);
    }

    #[test]
    fn output_contract_defaults_to_envelope() {
        let contract = OutputContract::default();
        assert!(contract.envelope);
        assert_eq!(contract.tier, Tier::Exec);
    }
}
