//! Tamper-evident record of one task run. Every dispatched call is stored
//! with the outcome it produced, and each entry's hash covers the previous
//! one, so the head hash commits to the whole run in order.

use pilot_agent::{AgentEvent, FunctionCall, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

const GENESIS_TAG: &[u8] = b"desk-pilot-run-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub turn: usize,
    pub call: FunctionCall,
    pub outcome: Outcome,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    task: String,
    genesis: String,
    entries: Vec<LedgerEntry>,
}

impl RunLedger {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            genesis: genesis_hash(task),
            entries: Vec::new(),
        }
    }

    /// Pairs each `ToolCall` event with the `ToolResult` that follows it.
    pub fn from_events(task: &str, events: &[AgentEvent]) -> Self {
        let mut ledger = Self::new(task);
        let mut pending: Option<(usize, &FunctionCall)> = None;
        for event in events {
            match event {
                AgentEvent::ToolCall { turn, call } => pending = Some((*turn, call)),
                AgentEvent::ToolResult { outcome, .. } => {
                    if let Some((turn, call)) = pending.take() {
                        ledger.record(turn, call.clone(), outcome.clone());
                    }
                }
                AgentEvent::ModelResponse { .. } => {}
            }
        }
        ledger
    }

    pub fn record(&mut self, turn: usize, call: FunctionCall, outcome: Outcome) {
        let hash = link_hash(self.root_hash(), turn, &call, &outcome);
        self.entries.push(LedgerEntry {
            turn,
            call,
            outcome,
            hash,
        });
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Hash of the newest entry, or of the task alone before anything ran.
    pub fn root_hash(&self) -> &str {
        self.entries
            .last()
            .map_or(self.genesis.as_str(), |entry| entry.hash.as_str())
    }

    /// Recomputes the chain from the task and reports whether every stored
    /// hash still matches its entry.
    pub fn verify(&self) -> bool {
        if self.genesis != genesis_hash(&self.task) {
            return false;
        }
        let mut previous = self.genesis.as_str();
        for entry in &self.entries {
            if entry.hash != link_hash(previous, entry.turn, &entry.call, &entry.outcome) {
                return false;
            }
            previous = entry.hash.as_str();
        }
        true
    }
}

fn genesis_hash(task: &str) -> String {
    let mut digest = Sha256::new();
    digest.update(GENESIS_TAG);
    digest.update(task.as_bytes());
    hex::encode(digest.finalize())
}

fn link_hash(previous: &str, turn: usize, call: &FunctionCall, outcome: &Outcome) -> String {
    let payload = json!({
        "previous": previous,
        "turn": turn,
        "call": call,
        "outcome": outcome,
    });
    // Display of a json Value is infallible, unlike to_vec.
    let mut digest = Sha256::new();
    digest.update(payload.to_string().as_bytes());
    hex::encode(digest.finalize())
}
