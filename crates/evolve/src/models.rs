//! Model registry: capability-based selection with fallback
//!
//! Registration order is priority order. `select` returns the first
//! registered model whose capability set covers the request; when the
//! caller prefers fast inference, models tagged `FastInference` are
//! tried before the rest of the matches. Health-aware selection walks
//! the same chain with a caller-supplied probe and yields `None` only
//! when every candidate fails it.

use std::collections::HashSet;

/// What a model is good at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CodeGeneration,
    ErrorAnalysis,
    InstructionFollowing,
    Reasoning,
    LongContext,
    FastInference,
}

/// A registered model and its capability set.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: String,
    pub capabilities: HashSet<Capability>,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, capabilities: &[Capability]) -> Self {
        ModelSpec {
            id: id.into(),
            capabilities: capabilities.iter().copied().collect(),
        }
    }

    pub fn covers(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    pub fn is_fast(&self) -> bool {
        self.capabilities.contains(&Capability::FastInference)
    }
}

/// Ordered model table. Not shared process-wide: each evolution
/// instance owns its registry so tests stay independent.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Register a model. Re-registering an id replaces its capability
    /// set but keeps its position in the chain.
    pub fn register(&mut self, spec: ModelSpec) {
        if let Some(existing) = self.models.iter_mut().find(|m| m.id == spec.id) {
            *existing = spec;
        } else {
            self.models.push(spec);
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Matching model ids in fallback order: registration order, with
    /// `FastInference` models first when `prefer_fast` is set (stable
    /// within each group).
    pub fn candidates(&self, required: &[Capability], prefer_fast: bool) -> Vec<&str> {
        let matches = self.models.iter().filter(|m| m.covers(required));
        if prefer_fast {
            let (fast, slow): (Vec<&ModelSpec>, Vec<&ModelSpec>) =
                matches.partition(|m| m.is_fast());
            fast.into_iter()
                .chain(slow)
                .map(|m| m.id.as_str())
                .collect()
        } else {
            matches.map(|m| m.id.as_str()).collect()
        }
    }

    /// First model covering the request, or `None`.
    pub fn select(&self, required: &[Capability], prefer_fast: bool) -> Option<&str> {
        self.candidates(required, prefer_fast).first().copied()
    }

    /// Walk the fallback chain with a health probe; `None` iff no
    /// candidate passes.
    pub fn select_healthy(
        &self,
        required: &[Capability],
        prefer_fast: bool,
        mut probe: impl FnMut(&str) -> bool,
    ) -> Option<&str> {
        self.candidates(required, prefer_fast)
            .into_iter()
            .find(|id| probe(id))
    }
}

/// Registry seeded with well-known Ollama code models.
pub fn default_registry() -> ModelRegistry {
    use Capability::*;
    let mut registry = ModelRegistry::new();
    registry.register(ModelSpec::new(
        "qwen2.5-coder",
        &[CodeGeneration, InstructionFollowing, FastInference],
    ));
    registry.register(ModelSpec::new(
        "deepseek-coder-v2",
        &[CodeGeneration, ErrorAnalysis, Reasoning, LongContext],
    ));
    registry.register(ModelSpec::new(
        "codellama",
        &[CodeGeneration, ErrorAnalysis, InstructionFollowing],
    ));
    registry.register(ModelSpec::new(
        "llama3.1",
        &[ErrorAnalysis, InstructionFollowing, Reasoning, LongContext],
    ));
    registry
}
