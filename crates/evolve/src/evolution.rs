//! Evolution engine: generation, repair, and sandboxed validation
//!
//! `generate_code` turns a prompt into assembly; `evolve` takes a
//! failing program plus its error text and produces a validated
//! replacement. Every candidate is parsed and then run inside a
//! sandbox VM under tight caps; the score is a weighted sum of
//! parsing, clean termination, not reproducing the original failure
//! category, and staying within resource bounds. Only candidates
//! scoring above the acceptance threshold are returned, and every
//! outcome feeds the pattern store's statistics.
//!
//! The engine's methods are async; [`EvolutionAdapter`] is the
//! synchronous face the VM sees, delegating through the
//! [`SyncBridge`](crate::bridge::SyncBridge).

use crate::bridge::{BridgeError, SyncBridge};
use crate::client::{
    ChatRequest, ClientConfig, ClientError, DEFAULT_TEMPERATURE, OllamaClient,
};
use crate::models::{Capability, ModelRegistry, default_registry};
use crate::patterns::{
    ErrorCategory, ErrorPatternStore, EvolutionAttempt, categorize,
};
use sovereign_core::ConfigError;
use sovereign_vm::{AdapterError, AdapterErrorKind, LlmAdapter, Vm, VmConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Score weights: parses cleanly / terminates without error / does not
/// reproduce the original category / stays within resource bounds.
const WEIGHT_PARSED: f64 = 0.3;
const WEIGHT_CLEAN: f64 = 0.4;
const WEIGHT_NOVEL: f64 = 0.2;
const WEIGHT_BOUNDED: f64 = 0.1;

/// A candidate is accepted iff its score exceeds this.
pub const ACCEPT_THRESHOLD: f64 = 0.7;

const CODEGEN_SYSTEM: &str = "You write programs for a small stack virtual machine. \
Available instructions: PUSH POP DUP SWAP ROT OVER DROP CLEAR ADD SUB MUL DIV AND OR \
XOR NOT JMP JZ JNZ CALL RET HALT LOAD STORE. Operands: #N immediate, rN register, \
@hex address, \"...\" string, bare lowercase label. Labels are defined as `name:` on \
their own line. One statement per line. Answer with the program text only, no prose \
and no code fences.";

/// Capability sets requested from the model registry.
const GENERATE_CAPS: &[Capability] = &[Capability::CodeGeneration, Capability::InstructionFollowing];
const EVOLVE_CAPS: &[Capability] = &[Capability::CodeGeneration, Capability::ErrorAnalysis];

/// Engine failure.
#[derive(Debug)]
pub enum EvoError {
    Client(ClientError),
    Bridge(BridgeError),
    /// No generated candidate passed validation
    NoCandidate(String),
}

impl std::fmt::Display for EvoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvoError::Client(e) => write!(f, "llm client error: {}", e),
            EvoError::Bridge(e) => write!(f, "{}", e),
            EvoError::NoCandidate(msg) => write!(f, "evolution failed: {}", msg),
        }
    }
}

impl std::error::Error for EvoError {}

impl From<ClientError> for EvoError {
    fn from(e: ClientError) -> Self {
        EvoError::Client(e)
    }
}

impl From<BridgeError> for EvoError {
    fn from(e: BridgeError) -> Self {
        EvoError::Bridge(e)
    }
}

/// How one candidate fared in the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateEvaluation {
    pub parsed: bool,
    pub clean: bool,
    pub reproduces_original: bool,
    pub within_bounds: bool,
}

impl CandidateEvaluation {
    pub fn score(&self) -> f64 {
        if !self.parsed {
            return 0.0;
        }
        let mut score = WEIGHT_PARSED;
        if self.clean {
            score += WEIGHT_CLEAN;
        }
        if !self.reproduces_original {
            score += WEIGHT_NOVEL;
        }
        if self.within_bounds {
            score += WEIGHT_BOUNDED;
        }
        score
    }

    pub fn accepted(&self) -> bool {
        self.score() > ACCEPT_THRESHOLD
    }
}

/// Strip markdown code fences a chat model may wrap its answer in.
pub fn scrub_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0); // opening fence, possibly with a language tag
    if lines.last().is_some_and(|l| l.trim().starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn build_evolve_prompt(code: &str, error_text: &str, templates: &[String]) -> String {
    let mut prompt = format!(
        "This stack-machine program failed.\n\nProgram:\n{}\n\nError: {}\n\n",
        code, error_text
    );
    if !templates.is_empty() {
        prompt.push_str("Fixes that worked for similar failures:\n");
        for template in templates.iter().rev().take(3) {
            prompt.push_str(template);
            prompt.push_str("\n---\n");
        }
    }
    prompt.push_str("Rewrite the program so it no longer fails. Answer with the corrected program only.");
    prompt
}

/// The evolution subsystem: client, model registry, pattern store, and
/// sandbox settings. Each instance is independent; nothing here is
/// process-global.
pub struct Evolution {
    client: OllamaClient,
    models: ModelRegistry,
    store: Mutex<ErrorPatternStore>,
    sandbox: VmConfig,
    max_candidates: u32,
}

impl Evolution {
    pub fn new(client_config: ClientConfig) -> Result<Self, EvoError> {
        let client = OllamaClient::new(client_config)?;
        Ok(Evolution {
            client,
            models: default_registry(),
            store: Mutex::new(ErrorPatternStore::with_history_cap(1024)),
            sandbox: VmConfig::sandbox(),
            max_candidates: 3,
        })
    }

    /// Engine configured from `OLLAMA_HOST` / `OLLAMA_MODEL`.
    pub fn from_env() -> Result<Self, EvoError> {
        Evolution::new(ClientConfig::from_env())
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    /// Replace the sandbox configuration used for candidate runs.
    pub fn with_sandbox(mut self, sandbox: VmConfig) -> Result<Self, ConfigError> {
        sandbox.validate()?;
        self.sandbox = sandbox;
        Ok(self)
    }

    pub fn with_max_candidates(mut self, max_candidates: u32) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Pattern store handle (for export/import and statistics).
    pub fn store(&self) -> MutexGuard<'_, ErrorPatternStore> {
        self.store.lock().expect("pattern store lock poisoned")
    }

    /// Generate assembly for a natural-language prompt.
    pub async fn generate_code(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, EvoError> {
        let model = self.pick_model(GENERATE_CAPS, true).await;
        debug!(%model, "generating code");
        let request = ChatRequest::new(model, prompt).with_system(CODEGEN_SYSTEM);
        let response = tokio::time::timeout(timeout, self.client.chat(&request))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(scrub_code_fences(&response.content))
    }

    /// Produce a validated replacement for `code` that failed with
    /// `error_text`. Fails with `NoCandidate` when nothing generated
    /// within the budget passes the sandbox.
    pub async fn evolve(
        &self,
        code: &str,
        error_text: &str,
        timeout: Duration,
    ) -> Result<String, EvoError> {
        let deadline = Instant::now() + timeout;
        let original_category = categorize(error_text);
        let (pattern_index, templates) = {
            let mut store = self.store();
            let index = store.observe(error_text);
            let templates = store
                .pattern(index)
                .map(|p| p.fix_templates.clone())
                .unwrap_or_default();
            (index, templates)
        };
        info!(%original_category, templates = templates.len(), "evolving failed program");

        let model = self.pick_model(EVOLVE_CAPS, false).await;
        for attempt in 0..self.max_candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout.into());
            }
            let request = ChatRequest::new(
                model.clone(),
                build_evolve_prompt(code, error_text, &templates),
            )
            .with_system(CODEGEN_SYSTEM)
            .with_temperature(DEFAULT_TEMPERATURE + 0.1 * attempt as f32);

            let response = tokio::time::timeout(remaining, self.client.chat(&request))
                .await
                .map_err(|_| ClientError::Timeout)??;
            let candidate = scrub_code_fences(&response.content);
            let evaluation = self.validate_candidate(&candidate, original_category);
            let accepted = evaluation.accepted();
            debug!(
                attempt,
                score = evaluation.score(),
                accepted,
                "candidate evaluated"
            );

            {
                let mut store = self.store();
                store.record_outcome(
                    pattern_index,
                    accepted,
                    accepted.then_some(candidate.as_str()),
                );
                store.push_attempt(EvolutionAttempt {
                    timestamp: SystemTime::now(),
                    code: code.to_string(),
                    error_text: error_text.to_string(),
                    candidate: candidate.clone(),
                    validated: accepted,
                    score: evaluation.score(),
                    model: response.model,
                });
            }

            if accepted {
                return Ok(candidate);
            }
        }
        warn!(attempts = self.max_candidates, "no candidate passed validation");
        Err(EvoError::NoCandidate(format!(
            "no candidate passed validation after {} attempts",
            self.max_candidates
        )))
    }

    /// Parse and run a candidate in the sandbox, scoring it against
    /// the failure it is meant to fix. Sandbox budgets are independent
    /// of any outer VM.
    pub fn validate_candidate(
        &self,
        candidate: &str,
        original_category: ErrorCategory,
    ) -> CandidateEvaluation {
        let program = match sovereign_asm::parse(candidate) {
            Ok(program) => program,
            Err(_) => {
                return CandidateEvaluation {
                    parsed: false,
                    clean: false,
                    reproduces_original: false,
                    within_bounds: false,
                };
            }
        };
        let mut vm =
            Vm::new(self.sandbox.clone()).expect("sandbox config validated at construction");
        vm.load(program)
            .expect("parser-resolved labels cannot be undefined");
        match vm.run() {
            Ok(()) => CandidateEvaluation {
                parsed: true,
                clean: true,
                reproduces_original: false,
                within_bounds: true,
            },
            Err(err) => CandidateEvaluation {
                parsed: true,
                clean: false,
                reproduces_original: categorize(err.message()) == original_category,
                within_bounds: !err.kind().is_resource_limit(),
            },
        }
    }

    /// Choose a model by walking the registry's fallback chain with a
    /// health probe: a candidate is healthy iff the endpoint's tag
    /// list carries it (with or without an Ollama `:tag` suffix). When
    /// the listing itself is unreachable the probe cannot run, so
    /// selection falls back to plain registry priority; a chain with
    /// no healthy candidate falls back to the client's default model.
    async fn pick_model(&self, required: &[Capability], prefer_fast: bool) -> String {
        let selected = match self.client.list_models().await {
            Ok(available) => self.models.select_healthy(required, prefer_fast, |id| {
                available
                    .iter()
                    .any(|a| a == id || a.starts_with(&format!("{}:", id)))
            }),
            Err(err) => {
                debug!(%err, "model listing unreachable, selecting by registry priority");
                self.models.select(required, prefer_fast)
            }
        };
        match selected {
            Some(id) => id.to_string(),
            None => self.client.config().default_model.clone(),
        }
    }
}

/// Synchronous [`LlmAdapter`] over a shared engine and bridge. This is
/// what gets installed into a [`Vm`].
pub struct EvolutionAdapter {
    evolution: Arc<Evolution>,
    bridge: Arc<SyncBridge>,
}

impl EvolutionAdapter {
    pub fn new(evolution: Arc<Evolution>, bridge: Arc<SyncBridge>) -> Self {
        EvolutionAdapter { evolution, bridge }
    }
}

impl LlmAdapter for EvolutionAdapter {
    fn generate(&self, prompt: &str, deadline: Duration) -> Result<String, AdapterError> {
        let evolution = self.evolution.clone();
        let prompt = prompt.to_string();
        match self.bridge.run(
            async move { evolution.generate_code(&prompt, deadline).await },
            deadline,
        ) {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(err)) => Err(evo_to_adapter(err)),
            Err(err) => Err(bridge_to_adapter(err)),
        }
    }

    fn evolve(
        &self,
        code: &str,
        error_text: &str,
        deadline: Duration,
    ) -> Result<String, AdapterError> {
        let evolution = self.evolution.clone();
        let code = code.to_string();
        let error_text = error_text.to_string();
        match self.bridge.run(
            async move { evolution.evolve(&code, &error_text, deadline).await },
            deadline,
        ) {
            Ok(Ok(candidate)) => Ok(candidate),
            Ok(Err(err)) => Err(evo_to_adapter(err)),
            Err(err) => Err(bridge_to_adapter(err)),
        }
    }
}

fn evo_to_adapter(err: EvoError) -> AdapterError {
    let kind = match &err {
        EvoError::Client(ClientError::Timeout) => AdapterErrorKind::Timeout,
        EvoError::Client(ClientError::Malformed(_)) => AdapterErrorKind::Malformed,
        EvoError::Client(_) => AdapterErrorKind::Unavailable,
        EvoError::Bridge(BridgeError::Timeout) => AdapterErrorKind::Timeout,
        EvoError::Bridge(_) => AdapterErrorKind::Unavailable,
        EvoError::NoCandidate(_) => AdapterErrorKind::EvolutionFailed,
    };
    AdapterError::new(kind, err.to_string())
}

fn bridge_to_adapter(err: BridgeError) -> AdapterError {
    let kind = match err {
        BridgeError::Timeout => AdapterErrorKind::Timeout,
        _ => AdapterErrorKind::Unavailable,
    };
    AdapterError::new(kind, err.to_string())
}
