//! Per-invocation call context: ancestor chain, depth, accumulation scope.
//!
//! The context makes the directive call graph explicit: cycle and depth
//! enforcement read this structure instead of relying on unmanaged
//! recursion. Created per top-level invocation, passed down, never stored
//! beyond the invocation's lifetime.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::module::ContextMode;

/// Fixed ceiling on call-graph depth (root = 0).
pub const MAX_CALL_DEPTH: usize = 5;

/// Mutable accumulation scope. Shared by reference in `main` mode,
/// deep-copied in `fork` mode.
pub type Scope = Rc<RefCell<Map<String, Value>>>;

#[derive(Clone, Debug)]
pub struct CallContext {
    /// Module names from the root down to (and including) the current module.
    ancestors: Vec<String>,
    depth: usize,
    scope: Scope,
    /// Cancellation point: checked before provider calls and between stream
    /// chunks.
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::root()
    }
}

impl CallContext {
    /// Fresh context for a top-level invocation.
    pub fn root() -> Self {
        Self {
            ancestors: Vec::new(),
            depth: 0,
            scope: Rc::new(RefCell::new(Map::new())),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether a module name already appears in the ancestor chain.
    pub fn contains(&self, name: &str) -> bool {
        self.ancestors.iter().any(|ancestor| ancestor == name)
    }

    /// Render the chain for diagnostics, root first.
    pub fn chain(&self) -> String {
        self.ancestors.join(" > ")
    }

    /// Context for the current module itself: same depth and scope, name
    /// appended to the chain.
    pub fn enter(&self, name: &str) -> Self {
        let mut entered = self.clone();
        entered.ancestors.push(name.to_string());
        entered
    }

    /// Context handed to a child invocation: depth + 1, scope shared or
    /// forked per the child's context mode. The child appends its own name
    /// via [`CallContext::enter`].
    pub fn descend(&self, mode: ContextMode) -> Self {
        let scope = match mode {
            ContextMode::Main => Rc::clone(&self.scope),
            ContextMode::Fork => Rc::new(RefCell::new(self.scope.borrow().clone())),
        };
        Self {
            ancestors: self.ancestors.clone(),
            depth: self.depth + 1,
            scope,
            deadline: self.deadline,
        }
    }

    /// Fail once the top-level deadline has passed.
    pub fn check_deadline(&self) -> Result<(), EngineError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn enter_tracks_the_ancestor_chain() {
        let ctx = CallContext::root().enter("a").descend(ContextMode::Main).enter("b");
        assert!(ctx.contains("a"));
        assert!(ctx.contains("b"));
        assert!(!ctx.contains("c"));
        assert_eq!(ctx.chain(), "a > b");
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn main_mode_shares_the_scope() {
        let parent = CallContext::root().enter("parent");
        let child = parent.descend(ContextMode::Main);
        child.scope().borrow_mut().insert("seen".to_string(), json!(1));
        assert_eq!(parent.scope().borrow().get("seen"), Some(&json!(1)));
    }

    #[test]
    fn fork_mode_isolates_the_scope() {
        let parent = CallContext::root().enter("parent");
        parent
            .scope()
            .borrow_mut()
            .insert("inherited".to_string(), json!("yes"));
        let child = parent.descend(ContextMode::Fork);
        // The fork sees a copy of existing state...
        assert_eq!(child.scope().borrow().get("inherited"), Some(&json!("yes")));
        // ...but its mutations never reach the parent.
        child.scope().borrow_mut().insert("local".to_string(), json!(1));
        assert!(parent.scope().borrow().get("local").is_none());
    }

    #[test]
    fn deadline_in_the_past_fails_the_check() {
        let ctx = CallContext::root();
        assert!(ctx.check_deadline().is_ok());

        let expired = CallContext::root()
            .with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(matches!(
            expired.check_deadline(),
            Err(EngineError::DeadlineExceeded)
        ));
    }
}
