//! Stage command registry
//!
//! Maps command names to factories. Populated at program init by whoever
//! links the concrete stages in; the core only consumes it.

use std::collections::HashMap;

use clap::Command;

use crate::config::common_stage_flags;
use crate::stage::{Stage, StageOptions};

/// Stage instance factory
pub type StageCtor = Box<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Everything needed to build a fresh instance of one stage command
pub struct StageSpec {
    /// Static stage properties, shared by all instances
    pub options: StageOptions,

    /// Builds the stage's private flag set (the common per-stage flags are
    /// added by the registry)
    pub command: fn() -> Command,

    /// Builds a fresh stage instance
    pub ctor: StageCtor,
}

/// Name -> factory mapping
#[derive(Default)]
pub struct Registry {
    specs: HashMap<String, StageSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage command; the last registration for a name wins
    pub fn register(&mut self, name: &str, spec: StageSpec) {
        self.specs.insert(name.to_string(), spec);
    }

    /// Look up a command
    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.specs.get(name)
    }

    /// Whether a command exists
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// The stage's full flag set: its private flags plus the common ones
    pub fn stage_command(&self, name: &str) -> Option<Command> {
        self.get(name)
            .map(|spec| common_stage_flags((spec.command)().name(name.to_string())))
    }

    /// Registered command names, sorted for the usage screen
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("names", &self.names()).finish()
    }
}
