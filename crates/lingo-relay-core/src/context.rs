//! Execution context identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the isolated runtimes taking part in message passing.
///
/// Contexts share no memory; the only way to reach one is through a
/// [`ChannelTransport`](crate::ChannelTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextId {
    /// Page-embedded agent.
    Agent,
    /// Privileged background coordinator.
    Coordinator,
    /// User-facing panel.
    Panel,
}

impl ContextId {
    /// All contexts, in a stable order.
    pub const ALL: [Self; 3] = [Self::Agent, Self::Coordinator, Self::Panel];

    /// Wire name of the context.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Coordinator => "coordinator",
            Self::Panel => "panel",
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
