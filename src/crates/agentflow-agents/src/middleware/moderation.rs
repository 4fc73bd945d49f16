//! Content moderation middleware

use crate::error::{AgentError, Result};
use crate::middleware::{AgentMiddleware, PlanContext};
use crate::step::AgentAction;
use async_trait::async_trait;
use std::sync::Arc;

/// Violation callback: receives the offending term
pub type ViolationHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Scans inputs and final answers for banned terms
///
/// Matching is case-insensitive substring search. A violation fails the call
/// with [`AgentError::Moderation`] and fires the optional callback.
pub struct ModerationMiddleware {
    banned: Vec<String>,
    check_input: bool,
    check_output: bool,
    on_violation: Option<ViolationHandler>,
}

impl ModerationMiddleware {
    pub fn new(banned: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            banned: banned.into_iter().map(|t| t.into().to_lowercase()).collect(),
            check_input: true,
            check_output: true,
            on_violation: None,
        }
    }

    pub fn check_input(mut self, enabled: bool) -> Self {
        self.check_input = enabled;
        self
    }

    pub fn check_output(mut self, enabled: bool) -> Self {
        self.check_output = enabled;
        self
    }

    pub fn on_violation<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_violation = Some(Arc::new(handler));
        self
    }

    fn scan(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.banned
            .iter()
            .find(|term| lower.contains(term.as_str()))
            .map(String::as_str)
    }

    fn violation(&self, term: &str) -> AgentError {
        if let Some(handler) = &self.on_violation {
            handler(term);
        }
        AgentError::Moderation(format!("banned term '{}'", term))
    }
}

#[async_trait]
impl AgentMiddleware for ModerationMiddleware {
    fn name(&self) -> &str {
        "moderation"
    }

    async fn before_model(&self, ctx: &mut PlanContext) -> Result<()> {
        if self.check_input {
            if let Some(term) = self.scan(&ctx.input) {
                return Err(self.violation(term));
            }
        }
        Ok(())
    }

    async fn after_model(&self, _ctx: &PlanContext, action: &mut AgentAction) -> Result<()> {
        if self.check_output {
            if let AgentAction::Finish { output, .. } = action {
                if let Some(term) = self.scan(output) {
                    return Err(self.violation(term));
                }
            }
        }
        Ok(())
    }
}
