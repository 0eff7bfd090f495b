use serde::{Deserialize, Serialize};

/// `inactive -> provisioning -> active -> failing_over -> active -> ...`,
/// with `error` reachable from any state on an unrecoverable fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarmPoolState {
    Inactive,
    Provisioning,
    Active,
    FailingOver,
    Error,
}

impl WarmPoolState {
    pub fn can_provision(self) -> bool {
        matches!(self, WarmPoolState::Inactive)
    }

    pub fn can_fail_over(self) -> bool {
        matches!(self, WarmPoolState::Active)
    }
}
