use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::capability::{Capability, CapabilityDescriptor, Outcome};
use crate::grammar::FunctionCall;

/// Name-keyed set of capabilities offered to the model, built once before a
/// task starts and only read while it runs.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: IndexMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `capability`, replacing any earlier one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.descriptor().name.clone();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            debug!(capability = %name, "replaced existing capability registration");
        }
    }

    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities
            .values()
            .map(|capability| capability.descriptor().clone())
            .collect()
    }

    /// Resolves and invokes `call`. Every failure, including a panicking
    /// handler, comes back as an error outcome.
    pub async fn dispatch(&self, call: &FunctionCall) -> Outcome {
        let Some(capability) = self.capabilities.get(&call.name) else {
            warn!(function = %call.name, "model requested unknown function");
            return Outcome::error(format!("unknown function '{}'", call.name));
        };

        let descriptor = capability.descriptor();
        for key in call.arguments.keys() {
            if !descriptor.accepts(key) {
                warn!(function = %call.name, argument = key, "unexpected argument passed through");
            }
        }

        debug!(function = %call.name, arguments = ?call.arguments, "dispatching call");
        let invocation = AssertUnwindSafe(capability.invoke(&call.arguments)).catch_unwind();
        match invocation.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(function = %call.name, error = %err, "capability failed");
                Outcome::error(format!("{} failed: {}", call.name, err))
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|msg| msg.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                warn!(function = %call.name, panic = %detail, "capability panicked");
                Outcome::error(format!("{} failed: {}", call.name, detail))
            }
        }
    }
}
