use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::desktop::DesktopAction;

/// Kinds of side effect the runtime can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenApp,
    TypeText,
    PressKey,
    ClickMouse,
    SetVolume,
    Wait,
    SearchWeb,
    ToggleWifi,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        Self::OpenApp,
        Self::TypeText,
        Self::PressKey,
        Self::ClickMouse,
        Self::SetVolume,
        Self::Wait,
        Self::SearchWeb,
        Self::ToggleWifi,
    ];

    /// Capability name the model uses for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenApp => "open_app",
            Self::TypeText => "type_text",
            Self::PressKey => "press_key",
            Self::ClickMouse => "click_mouse",
            Self::SetVolume => "set_volume",
            Self::Wait => "wait",
            Self::SearchWeb => "search_web",
            Self::ToggleWifi => "toggle_wifi",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn of(action: &DesktopAction) -> Self {
        match action {
            DesktopAction::OpenApp { .. } => Self::OpenApp,
            DesktopAction::TypeText { .. } => Self::TypeText,
            DesktopAction::PressKey { .. } => Self::PressKey,
            DesktopAction::Click { .. } => Self::ClickMouse,
            DesktopAction::SetVolume { .. } => Self::SetVolume,
            DesktopAction::Wait { .. } => Self::Wait,
            DesktopAction::SearchWeb { .. } => Self::SearchWeb,
            DesktopAction::ToggleWifi { .. } => Self::ToggleWifi,
        }
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or(())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Constraint for an action grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionLimit {
    /// Maximum number of invocations allowed per run.
    pub max_calls_per_run: Option<u32>,
}

impl ActionLimit {
    pub fn unlimited() -> Self {
        Self {
            max_calls_per_run: None,
        }
    }

    pub fn limited(max_calls: u32) -> Self {
        Self {
            max_calls_per_run: Some(max_calls),
        }
    }
}

impl Default for ActionLimit {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionGrant {
    limit: ActionLimit,
    consumed: u32,
    revoked: bool,
}

impl ActionGrant {
    fn new(limit: ActionLimit) -> Self {
        Self {
            limit,
            consumed: 0,
            revoked: false,
        }
    }

    fn consume(&mut self, kind: ActionKind) -> Result<Option<u32>, PolicyError> {
        if self.revoked {
            return Err(PolicyError::Revoked { action: kind });
        }
        if let Some(max) = self.limit.max_calls_per_run {
            if self.consumed >= max {
                return Err(PolicyError::Exhausted { action: kind });
            }
        }
        self.consumed = self.consumed.saturating_add(1);
        Ok(self.remaining())
    }

    fn remaining(&self) -> Option<u32> {
        self.limit
            .max_calls_per_run
            .map(|max| max.saturating_sub(self.consumed))
    }
}

/// Per-run allowance for each kind of desktop action.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ActionPolicy {
    grants: HashMap<ActionKind, ActionGrant>,
}

impl ActionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything allowed; launching programs and opening the browser are
    /// capped at five per run.
    pub fn with_desktop_defaults() -> Self {
        let mut policy = Self::new();
        for kind in ActionKind::ALL {
            let limit = match kind {
                ActionKind::OpenApp | ActionKind::SearchWeb => ActionLimit::limited(5),
                _ => ActionLimit::unlimited(),
            };
            policy.grant(kind, limit);
        }
        policy
    }

    pub fn grant(&mut self, kind: ActionKind, limit: ActionLimit) {
        self.grants.insert(kind, ActionGrant::new(limit));
    }

    pub fn revoke(&mut self, kind: ActionKind) {
        if let Some(grant) = self.grants.get_mut(&kind) {
            grant.revoked = true;
        }
    }

    /// Spends one use of `kind`, returning what is left (`None` when unlimited).
    pub fn consume(&mut self, kind: ActionKind) -> Result<Option<u32>, PolicyError> {
        let Some(grant) = self.grants.get_mut(&kind) else {
            return Err(PolicyError::NotGranted { action: kind });
        };
        grant.consume(kind)
    }

    pub fn remaining(&self, kind: ActionKind) -> Option<u32> {
        self.grants.get(&kind).and_then(ActionGrant::remaining)
    }

    /// Starts a fresh run: every quota is refilled, revocations stay.
    pub fn reset_run(&mut self) {
        for grant in self.grants.values_mut() {
            grant.consumed = 0;
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{action} is not permitted")]
    NotGranted { action: ActionKind },
    #[error("{action} has been revoked")]
    Revoked { action: ActionKind },
    #[error("{action} quota exhausted")]
    Exhausted { action: ActionKind },
}
