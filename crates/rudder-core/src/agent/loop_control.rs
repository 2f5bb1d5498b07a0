//! Handler decisions and tool-choice policy.

use crate::events::TranscriptItem;
use crate::model::ToolChoice;

/// What a handler wants the loop to do before the next model call.
///
/// Returned from `Handler::on_before_sample`. Handlers are polled in
/// registration order and the first non-`NoAction` decision wins; later
/// handlers are not consulted that tick.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopDecision {
    /// Let the loop proceed normally.
    NoAction,
    /// Stop the run; terminal state is `Aborted`.
    Abort,
    /// Summarize the transcript prefix, keeping the most recent items.
    Compact { keep_recent_turns: usize },
    /// Append items to the transcript before sampling.
    InjectItems { items: Vec<TranscriptItem> },
    /// Force the next request to require a tool invocation.
    RequireAnyTool,
}

impl LoopDecision {
    pub fn is_no_action(&self) -> bool {
        matches!(self, Self::NoAction)
    }
}

/// Standing tool-choice constraint for every request in a run.
///
/// A handler's `RequireAnyTool` decision overrides this for one request
/// only; the policy itself never changes mid-run.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPolicy {
    /// Model decides whether to call tools.
    Auto,
    /// Every response must invoke some tool.
    RequireAnyTool,
    /// Tool calls are disallowed.
    ForbidAllTools,
    /// Every response must invoke this tool.
    RequireSpecific(String),
}

impl ToolPolicy {
    pub fn to_tool_choice(&self) -> ToolChoice {
        match self {
            Self::Auto => ToolChoice::Auto,
            Self::RequireAnyTool => ToolChoice::Required,
            Self::ForbidAllTools => ToolChoice::None,
            Self::RequireSpecific(name) => ToolChoice::Function { name: name.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_policy_maps_to_request_tool_choice() {
        assert_eq!(ToolPolicy::Auto.to_tool_choice(), ToolChoice::Auto);
        assert_eq!(
            ToolPolicy::RequireAnyTool.to_tool_choice(),
            ToolChoice::Required
        );
        assert_eq!(ToolPolicy::ForbidAllTools.to_tool_choice(), ToolChoice::None);
        assert_eq!(
            ToolPolicy::RequireSpecific("echo".to_string()).to_tool_choice(),
            ToolChoice::Function {
                name: "echo".to_string()
            }
        );
    }
}
