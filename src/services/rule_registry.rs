//! Registry of submit rules and requirements contributed from outside project config.
//!
//! The registry is an ordinary value owned by the server; registering returns a
//! [`RegistrationHandle`] and the entry disappears when the handle is dropped.

use std::sync::{Arc, Mutex, Weak};

use crate::models::{ChangeNotes, SubmitRequirement, SubmitRequirementResult};

/// A submit rule implemented in code rather than as an expression.
pub trait ExternalSubmitRule: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate the rule for a change. `None` means the rule has no opinion.
    fn evaluate(&self, notes: &ChangeNotes) -> Option<SubmitRequirementResult>;
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    rules: Vec<(u64, Arc<dyn ExternalSubmitRule>)>,
    global_requirements: Vec<(u64, SubmitRequirement)>,
}

impl RegistryState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.rules.retain(|(rule_id, _)| *rule_id != id);
        self.global_requirements.retain(|(req_id, _)| *req_id != id);
    }
}

/// Rules and global requirements active for one server.
#[derive(Clone, Default)]
pub struct SubmitRuleRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SubmitRuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule evaluated for every change.
    #[must_use = "the rule is unregistered when the handle is dropped"]
    pub fn register_rule(&self, rule: Arc<dyn ExternalSubmitRule>) -> RegistrationHandle {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.allocate();
        log::debug!("Registered submit rule {}", rule.name());
        state.rules.push((id, rule));
        self.handle(id)
    }

    /// Register a requirement applying to every project.
    #[must_use = "the requirement is unregistered when the handle is dropped"]
    pub fn register_global_requirement(&self, requirement: SubmitRequirement) -> RegistrationHandle {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.allocate();
        log::debug!("Registered global submit requirement {}", requirement.name);
        state.global_requirements.push((id, requirement));
        self.handle(id)
    }

    pub fn rules(&self) -> Vec<Arc<dyn ExternalSubmitRule>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rules.iter().map(|(_, rule)| Arc::clone(rule)).collect()
    }

    /// Global requirements in registration order.
    pub fn global_requirements(&self) -> Vec<SubmitRequirement> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .global_requirements
            .iter()
            .map(|(_, req)| req.clone())
            .collect()
    }

    fn handle(&self, id: u64) -> RegistrationHandle {
        RegistrationHandle {
            id,
            state: Arc::downgrade(&self.state),
        }
    }
}

/// Keeps a registration alive. Dropping it unregisters the entry.
pub struct RegistrationHandle {
    id: u64,
    state: Weak<Mutex<RegistryState>>,
}

impl RegistrationHandle {
    /// Unregister now.
    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.remove(self.id);
        }
    }
}
