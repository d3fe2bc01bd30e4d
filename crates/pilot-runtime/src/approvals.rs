use async_trait::async_trait;

use crate::desktop::DesktopAction;
use crate::policy::ActionKind;

/// Implemented by hosts that want to confirm desktop actions with the user
/// before they run.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, kind: ActionKind, action: &DesktopAction)
        -> anyhow::Result<bool>;
}
