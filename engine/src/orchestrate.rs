//! Depth-first subagent orchestration.
//!
//! A module's rendered prompt may carry `{{invoke:...}}` directives; each one
//! resolves, runs, and injects the child result at the directive site before
//! the parent's own provider call. Resolution is strictly sequential in
//! textual order, so a later directive sees every earlier child's scope
//! writes in `main` mode. Cycle and depth guards run before any child work;
//! a guard violation costs no provider invocation.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::context::{CallContext, MAX_CALL_DEPTH};
use crate::core::directive::{self, Directive, DirectiveArgs};
use crate::core::envelope::{Envelope, parse_response};
use crate::core::prompt::{self, InvocationInput};
use crate::core::stream::{StreamEvent, StreamSession};
use crate::error::EngineError;
use crate::io::resolver::Resolver;
use crate::module::ModuleDescriptor;
use crate::provider::{InvokeOptions, Message, ProviderGateway};
use crate::validator;

/// Drives a full invocation tree against one resolver and one gateway.
pub struct Orchestrator<'a> {
    resolver: &'a Resolver,
    gateway: &'a dyn ProviderGateway,
    options: InvokeOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(resolver: &'a Resolver, gateway: &'a dyn ProviderGateway) -> Self {
        Self {
            resolver,
            gateway,
            options: InvokeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve a module by name and run it as a top-level invocation.
    pub fn run_named(&self, name: &str, input: &InvocationInput, ctx: &CallContext) -> Envelope {
        match self.resolver.resolve(name) {
            Ok(descriptor) => self.run(&descriptor, input, ctx),
            Err(err) => {
                warn!(module = name, code = err.code(), "resolution failed");
                Envelope::from_error(&err)
            }
        }
    }

    /// Run a resolved module as a top-level invocation.
    ///
    /// Every outcome is an envelope: engine errors anywhere on the chain
    /// surface as a failure envelope carrying the error's wire code.
    pub fn run(
        &self,
        descriptor: &ModuleDescriptor,
        input: &InvocationInput,
        ctx: &CallContext,
    ) -> Envelope {
        match self.run_node(descriptor, input, ctx, true) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    module = %descriptor.name,
                    code = err.code(),
                    error = %err,
                    "invocation failed"
                );
                Envelope::from_error(&err)
            }
        }
    }

    /// One node of the invocation tree. Input validation applies only at the
    /// top level; child inputs are produced by the engine itself.
    fn run_node(
        &self,
        descriptor: &ModuleDescriptor,
        input: &InvocationInput,
        ctx: &CallContext,
        validate_input: bool,
    ) -> Result<Envelope, EngineError> {
        let ctx = ctx.enter(&descriptor.name);
        debug!(module = %descriptor.name, depth = ctx.depth(), chain = %ctx.chain(), "running module");

        if validate_input && let Some(schema) = &descriptor.input_schema {
            check_schema(&input.to_value(), schema, &descriptor.name, "input")?;
        }

        let (prompt, directives) = prompt::build_masked(descriptor, input);
        let prompt = self.expand_directives(descriptor, input, &ctx, prompt, directives)?;

        ctx.check_deadline()?;
        let mut envelope = self.call_provider(descriptor, &prompt, &ctx)?;

        if let Envelope::Success(success) = &mut envelope {
            if descriptor.output_contract.require_behavior_equivalence
                && success.behavior_equivalence.is_none()
            {
                warn!(module = %descriptor.name, "response omits required behavior_equivalence");
            }
            if success.behavior_equivalence == Some(false)
                && let Some(cap) = descriptor.constraints.behavior_equivalence_false_max_confidence
            {
                success.confidence = success.confidence.min(cap.clamp(0.0, 1.0));
            }
            if let Some(schema) = &descriptor.output_schema {
                check_schema(
                    &Value::Object(success.data_value()),
                    schema,
                    &descriptor.name,
                    "output",
                )?;
            }
            // Record the result in the accumulation scope. Under `main` the
            // parent chain observes it; a fork's scope dies with the fork.
            ctx.scope()
                .borrow_mut()
                .insert(descriptor.name.clone(), Value::Object(success.wire_data()));
        }
        Ok(envelope)
    }

    /// Replace every directive marker in the rendered prompt with its child
    /// result, left to right. Directives come from the template scan, never
    /// from rendered or injected text, so substituted input cannot smuggle
    /// in new invocations and injected results are plain data.
    fn expand_directives(
        &self,
        parent: &ModuleDescriptor,
        parent_input: &InvocationInput,
        ctx: &CallContext,
        mut prompt: String,
        directives: Vec<Directive>,
    ) -> Result<String, EngineError> {
        for (index, call) in directives.iter().enumerate() {
            ctx.check_deadline()?;
            let injected = self.invoke_child(parent, parent_input, ctx, call)?;
            prompt = prompt.replace(&directive::marker(index), &injected);
        }
        Ok(prompt)
    }

    /// Run one child directive and return the text to inject at its site.
    fn invoke_child(
        &self,
        parent: &ModuleDescriptor,
        parent_input: &InvocationInput,
        ctx: &CallContext,
        call: &Directive,
    ) -> Result<String, EngineError> {
        // Guards come first: a rejected call must not resolve into an
        // invocation.
        if ctx.contains(&call.module) {
            return Err(EngineError::CycleDetected {
                name: call.module.clone(),
                chain: ctx.chain(),
            });
        }
        if ctx.depth() + 1 > MAX_CALL_DEPTH {
            return Err(EngineError::MaxDepthExceeded {
                name: call.module.clone(),
                max: MAX_CALL_DEPTH,
            });
        }

        let child = self.resolver.resolve(&call.module)?;
        // The manifest may declare a name differing from the directory the
        // directive referenced; the chain check must hold for both.
        if child.name != call.module && ctx.contains(&child.name) {
            return Err(EngineError::CycleDetected {
                name: child.name.clone(),
                chain: ctx.chain(),
            });
        }

        let child_input = match &call.args {
            DirectiveArgs::InheritInput => parent_input.clone(),
            DirectiveArgs::InheritArgsValue => {
                InvocationInput::from_raw(prompt::args_value(parent_input))
            }
            DirectiveArgs::Literal(text) => InvocationInput::from_raw(text.clone()),
        };

        let child_ctx = ctx.descend(child.context_mode);
        info!(
            parent = %parent.name,
            child = %child.name,
            depth = child_ctx.depth(),
            mode = ?child.context_mode,
            "invoking child module"
        );

        match self.run_node(&child, &child_input, &child_ctx, false)? {
            Envelope::Success(success) => Ok(Value::Object(success.wire_data()).to_string()),
            Envelope::Failure(failure) => {
                if parent.continue_on_failure {
                    warn!(
                        child = %child.name,
                        code = %failure.error.code,
                        "child failed, injecting failure envelope"
                    );
                    Ok(Envelope::Failure(failure).to_value().to_string())
                } else {
                    Err(EngineError::ChildInvocationFailed {
                        child: child.name.clone(),
                        call_site: call.span.start,
                        message: format!("{}: {}", failure.error.code, failure.error.message),
                    })
                }
            }
        }
    }

    /// Send the fully expanded prompt to the gateway and interpret the reply.
    fn call_provider(
        &self,
        descriptor: &ModuleDescriptor,
        prompt: &str,
        ctx: &CallContext,
    ) -> Result<Envelope, EngineError> {
        let messages = [
            Message::system(system_preamble(descriptor)),
            Message::user(prompt),
        ];

        if !self.gateway.supports_streaming() {
            let response = self.gateway.invoke(&messages, &self.options)?;
            return parse_response(&response.content);
        }

        let chunks = self.gateway.invoke_stream(&messages, &self.options)?;
        let mut session = StreamSession::new();
        for chunk in chunks {
            ctx.check_deadline()?;
            match session.apply(chunk?)? {
                StreamEvent::Opened { session_id } => {
                    debug!(module = %descriptor.name, session_id = %session_id, "stream opened");
                }
                StreamEvent::Accumulated => {}
                StreamEvent::Progress {
                    percent,
                    stage,
                    message,
                } => {
                    debug!(
                        module = %descriptor.name,
                        percent,
                        stage = stage.as_deref().unwrap_or(""),
                        message = message.as_deref().unwrap_or(""),
                        "stream progress"
                    );
                }
                StreamEvent::Completed(envelope) => return Ok(envelope),
            }
        }
        Err(EngineError::StreamProtocolViolation(
            "stream ended without a terminal chunk".to_string(),
        ))
    }
}

/// System message derived from a module's declared responsibility,
/// exclusions and constraints.
fn system_preamble(descriptor: &ModuleDescriptor) -> String {
    let mut out = format!(
        "You are the '{}' module. {}",
        descriptor.name,
        descriptor.responsibility.trim()
    );
    if !descriptor.excludes.is_empty() {
        out.push_str("\nOut of scope: ");
        out.push_str(&descriptor.excludes.join(", "));
        out.push('.');
    }
    let constraints = &descriptor.constraints;
    let mut rules = Vec::new();
    if constraints.no_network {
        rules.push("do not access the network");
    }
    if constraints.no_side_effects {
        rules.push("do not perform side effects");
    }
    if constraints.no_inventing_data {
        rules.push("do not invent data");
    }
    if constraints.require_confidence {
        rules.push("include a numeric confidence");
    }
    if constraints.require_rationale {
        rules.push("include a rationale");
    }
    if !rules.is_empty() {
        out.push_str("\nConstraints: ");
        out.push_str(&rules.join("; "));
        out.push('.');
    }
    if descriptor.output_contract.envelope {
        out.push_str(
            "\nRespond with a single JSON object: \
             {\"ok\": true, \"data\": {...}} on success, or \
             {\"ok\": false, \"error\": {\"code\": ..., \"message\": ...}} on failure.",
        );
    }
    out
}

fn check_schema(
    value: &Value,
    schema: &Value,
    module: &str,
    label: &str,
) -> Result<(), EngineError> {
    let validation =
        validator::validate(value, schema).map_err(|err| EngineError::SchemaValidationFailed {
            module: module.to_string(),
            label: label.to_string(),
            errors: vec![format!("schema did not compile: {err:#}")],
        })?;
    if validation.valid {
        Ok(())
    } else {
        Err(EngineError::SchemaValidationFailed {
            module: module.to_string(),
            label: label.to_string(),
            errors: validation.errors,
        })
    }
}
