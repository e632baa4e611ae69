//! Shared fixtures: canned descriptors, on-disk module writers, and scripted
//! provider gateways. Compiled for unit tests and, behind the `test-support`
//! feature, for integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::stream::Chunk;
use crate::error::EngineError;
use crate::module::{
    Constraints, ContextMode, FormatVersion, ModuleDescriptor, OutputContract,
};
use crate::provider::{
    ChunkStream, InvokeOptions, Message, ProviderGateway, ProviderResponse, Role,
};

/// Minimal in-memory descriptor around a prompt template.
pub fn descriptor_with_template(name: &str, template: &str) -> ModuleDescriptor {
    ModuleDescriptor {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        responsibility: format!("Test module {name}."),
        excludes: Vec::new(),
        constraints: Constraints::default(),
        output_contract: OutputContract::default(),
        context_mode: ContextMode::default(),
        continue_on_failure: false,
        prompt_template: template.to_string(),
        input_schema: None,
        output_schema: None,
        error_schema: None,
        format_version: FormatVersion::V1Legacy,
    }
}

/// Write a minimal single-file module under `base/<name>` and return its
/// directory.
pub fn write_module_v1(base: &Path, name: &str, prompt: &str) -> PathBuf {
    write_module_v1_with(base, name, "", prompt)
}

/// Like [`write_module_v1`], with extra frontmatter lines
/// (`context: fork`, `continue_on_failure: true`, ...).
pub fn write_module_v1_with(
    base: &Path,
    name: &str,
    extra_frontmatter: &str,
    prompt: &str,
) -> PathBuf {
    let dir = base.join(name);
    fs::create_dir_all(&dir).expect("create module dir");
    let mut manifest = format!(
        "---\nname: {name}\nversion: 1.0.0\nresponsibility: Test module {name}\n"
    );
    if !extra_frontmatter.is_empty() {
        manifest.push_str(extra_frontmatter.trim_end());
        manifest.push('\n');
    }
    manifest.push_str("---\n");
    manifest.push_str(prompt);
    manifest.push('\n');
    fs::write(dir.join("module.md"), manifest).expect("write module.md");
    dir
}

/// Write a `module.json` manifest verbatim under `base/<name>`.
pub fn write_module_v3(base: &Path, name: &str, manifest: &str) -> PathBuf {
    let dir = base.join(name);
    fs::create_dir_all(&dir).expect("create module dir");
    fs::write(dir.join("module.json"), manifest).expect("write module.json");
    dir
}

/// One-shot gateway returning scripted responses in order and recording
/// every call it receives.
pub struct ScriptedGateway {
    responses: RefCell<VecDeque<String>>,
    calls: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedGateway {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// User-message content of the nth recorded call.
    pub fn prompt(&self, index: usize) -> String {
        self.calls.borrow()[index]
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }

    /// System-message content of the nth recorded call.
    pub fn system_prompt(&self, index: usize) -> String {
        self.calls.borrow()[index]
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }
}

impl ProviderGateway for ScriptedGateway {
    fn invoke(
        &self,
        messages: &[Message],
        _options: &InvokeOptions,
    ) -> Result<ProviderResponse, EngineError> {
        self.calls.borrow_mut().push(messages.to_vec());
        match self.responses.borrow_mut().pop_front() {
            Some(content) => Ok(ProviderResponse {
                content,
                usage: None,
            }),
            None => Err(EngineError::ProviderInvocation(
                "scripted gateway exhausted".to_string(),
            )),
        }
    }
}

/// Streaming gateway replaying one scripted chunk sequence per call.
pub struct ScriptedStreamGateway {
    scripts: RefCell<VecDeque<Vec<Chunk>>>,
}

impl ScriptedStreamGateway {
    pub fn new(scripts: impl IntoIterator<Item = Vec<Chunk>>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into_iter().collect()),
        }
    }
}

impl ProviderGateway for ScriptedStreamGateway {
    fn invoke(
        &self,
        _messages: &[Message],
        _options: &InvokeOptions,
    ) -> Result<ProviderResponse, EngineError> {
        Err(EngineError::ProviderInvocation(
            "streaming-only gateway".to_string(),
        ))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn invoke_stream(
        &self,
        _messages: &[Message],
        _options: &InvokeOptions,
    ) -> Result<ChunkStream, EngineError> {
        match self.scripts.borrow_mut().pop_front() {
            Some(chunks) => Ok(Box::new(chunks.into_iter().map(Ok))),
            None => Err(EngineError::ProviderInvocation(
                "scripted gateway exhausted".to_string(),
            )),
        }
    }
}
