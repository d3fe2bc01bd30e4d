use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEARCH_URL: &str = "https://www.google.com/search?q=";

/// Local automation actions the runtime can ask the host backend to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DesktopAction {
    OpenApp { app_name: String, executable: String },
    TypeText { text: String },
    PressKey { keys: Vec<String> },
    Click { position: Option<(i64, i64)> },
    SetVolume { level: u8 },
    Wait { seconds: u64 },
    SearchWeb { query: String, url: String },
    ToggleWifi { on: bool },
}

impl DesktopAction {
    pub fn open_app(app_name: &str) -> Self {
        let app_name = app_name.trim();
        Self::OpenApp {
            app_name: app_name.to_string(),
            executable: resolve_executable(app_name),
        }
    }

    /// `ctrl+s` becomes a two-key combination.
    pub fn press_key(key: &str) -> Self {
        let keys = key
            .split('+')
            .map(|part| part.trim().to_ascii_lowercase())
            .filter(|part| !part.is_empty())
            .collect();
        Self::PressKey { keys }
    }

    pub fn search_web(query: &str) -> Self {
        Self::SearchWeb {
            query: query.to_string(),
            url: format!("{SEARCH_URL}{}", urlencoding::encode(query)),
        }
    }

    /// Message reported back to the model once the action has run.
    pub fn summary(&self) -> String {
        match self {
            Self::OpenApp { app_name, .. } => format!("Opened {app_name}"),
            Self::TypeText { text } => format!("Typed: {text}"),
            Self::PressKey { keys } => format!("Pressed: {}", keys.join("+")),
            Self::Click {
                position: Some((x, y)),
            } => format!("Clicked at ({x}, {y})"),
            Self::Click { position: None } => "Clicked at current position".to_string(),
            Self::SetVolume { level } => format!("Volume set to {level}%"),
            Self::Wait { seconds } => format!("Waited {seconds} seconds"),
            Self::SearchWeb { query, .. } => format!("Searching for: {query}"),
            Self::ToggleWifi { on } => format!("WiFi turned {}", if *on { "on" } else { "off" }),
        }
    }
}

/// Maps well-known application names to their executables. Unknown names
/// are launched as given.
pub fn resolve_executable(app_name: &str) -> String {
    let executable = match app_name.trim().to_lowercase().as_str() {
        "notepad" => "notepad.exe",
        "calculator" | "calc" => "calc.exe",
        "paint" | "mspaint" => "mspaint.exe",
        "cmd" | "command prompt" => "cmd.exe",
        "chrome" => "chrome.exe",
        "edge" => "msedge.exe",
        "explorer" | "file explorer" => "explorer.exe",
        _ => return app_name.trim().to_string(),
    };
    executable.to_string()
}

/// Event emitted when an action is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopEvent {
    pub sequence: u64,
    pub action: DesktopAction,
    pub timestamp_ms: u64,
}

/// Observation returned after an action ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopObservation {
    pub event: DesktopEvent,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{action} is not supported by this backend")]
    Unsupported { action: String },
    #[error("{0}")]
    Failed(String),
}

/// OS-level executor supplied by the host (process launch, keyboard and
/// mouse injection, browser control).
#[async_trait]
pub trait DesktopBackend: Send + Sync {
    async fn perform(&self, action: &DesktopAction) -> Result<(), BackendError>;
}

/// Backend that performs nothing and only remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    performed: tokio::sync::Mutex<Vec<DesktopAction>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn performed(&self) -> Vec<DesktopAction> {
        self.performed.lock().await.clone()
    }
}

#[async_trait]
impl DesktopBackend for RecordingBackend {
    async fn perform(&self, action: &DesktopAction) -> Result<(), BackendError> {
        self.performed.lock().await.push(action.clone());
        Ok(())
    }
}

/// Sequences executed actions for the runtime.
#[derive(Debug, Default)]
pub struct DesktopInstrumentation {
    events: Vec<DesktopEvent>,
    next_sequence: u64,
}

impl DesktopInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: DesktopAction) -> DesktopObservation {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        let message = action.summary();
        let event = DesktopEvent {
            sequence,
            action,
            timestamp_ms: current_timestamp_ms(),
        };
        self.events.push(event.clone());
        DesktopObservation { event, message }
    }

    pub fn events(&self) -> &[DesktopEvent] {
        &self.events
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
