// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task building: translate an abstract Harbinger job into the ordered
//! command sequence a payload family understands.
//!
//! Families are looked up by name in a registry, so supporting a new agent
//! is a registration rather than a change to the dispatch path.

pub mod apollo;

use std::collections::HashMap;

use crate::error::{BridgeError, Result};
use crate::jobs::{RunJob, StagedFile};

pub use apollo::ApolloBuilder;

/// One command to issue to a callback. Multi-element sequences are issued
/// strictly in order; each element must complete before the next is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTask {
    pub command: String,
    pub arguments: String,
}

/// Translation from a job to a payload family's command sequence.
pub trait TaskBuilder: Send + Sync {
    fn build(&self, job: &RunJob, files: &[StagedFile]) -> Result<Vec<BuiltTask>>;
}

/// Registry of payload families.
pub struct BuilderRegistry {
    builders: HashMap<String, Box<dyn TaskBuilder>>,
}

impl BuilderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The registry with every built-in family.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("apollo", Box::new(ApolloBuilder));
        registry
    }

    /// Register a family under its payload-type name.
    pub fn register(&mut self, payload_type: impl Into<String>, builder: Box<dyn TaskBuilder>) {
        self.builders.insert(payload_type.into(), builder);
    }

    /// Build the command sequence for a job, dispatching on the implant's
    /// payload type.
    pub fn build(&self, job: &RunJob, files: &[StagedFile]) -> Result<Vec<BuiltTask>> {
        match self.builders.get(&job.c2_implant.payload_type) {
            Some(builder) => builder.build(job, files),
            None => Err(BridgeError::UnknownPayload(
                job.c2_implant.payload_type.clone(),
            )),
        }
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
