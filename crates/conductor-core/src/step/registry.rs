//! Step registry for runtime step lookup.
//!
//! A simple name-indexed registry of boxed steps, keyed by
//! `StepType::type_name`.

use std::collections::HashMap;

use super::box_step::BoxStep;
use super::structural::{FORK, ForkStep, SECTION, SECTION_CHAIN, SectionChainStep, SectionStep};

pub struct StepRegistry {
    steps: HashMap<String, BoxStep>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Registry pre-populated with the structural steps.
    pub fn with_structural_steps() -> Self {
        let mut registry = Self::new();
        registry.register(SECTION, BoxStep::new(SectionStep));
        registry.register(SECTION_CHAIN, BoxStep::new(SectionChainStep));
        registry.register(FORK, BoxStep::new(ForkStep));
        registry
    }

    /// Register a step under the given type name.
    ///
    /// If a step with this name already exists, it is replaced.
    pub fn register(&mut self, type_name: impl Into<String>, step: BoxStep) {
        self.steps.insert(type_name.into(), step);
    }

    pub fn get(&self, type_name: &str) -> Option<&BoxStep> {
        self.steps.get(type_name)
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
