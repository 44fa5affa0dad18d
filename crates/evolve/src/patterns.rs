//! Error-pattern store
//!
//! Each observed failure is categorized by keyword table and matched
//! against stored patterns by word overlap (Jaccard over lowercased
//! tokens). A match above 0.6 in the same category increments the
//! pattern's frequency and makes its fix templates available to the
//! generator; anything else becomes a new pattern. Validation outcomes
//! update `fix_success_rate` as a running mean.
//!
//! Patterns export as newline-delimited JSON, one object per pattern;
//! import is additive and merges by (category, pattern text).

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, Write};
use std::time::SystemTime;

/// Failure category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    StackUnderflow,
    DivisionByZero,
    InvalidAddress,
    UnknownOpcode,
    CallDepthExceeded,
    StepLimitExceeded,
    LlmUnavailable,
    ParseFailure,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::StackUnderflow => "StackUnderflow",
            ErrorCategory::DivisionByZero => "DivisionByZero",
            ErrorCategory::InvalidAddress => "InvalidAddress",
            ErrorCategory::UnknownOpcode => "UnknownOpcode",
            ErrorCategory::CallDepthExceeded => "CallDepthExceeded",
            ErrorCategory::StepLimitExceeded => "StepLimitExceeded",
            ErrorCategory::LlmUnavailable => "LlmUnavailable",
            ErrorCategory::ParseFailure => "ParseFailure",
            ErrorCategory::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Keyword fragments checked in order; first hit wins.
const CATEGORY_TABLE: &[(&str, ErrorCategory)] = &[
    ("stack underflow", ErrorCategory::StackUnderflow),
    ("underflow", ErrorCategory::StackUnderflow),
    ("division by zero", ErrorCategory::DivisionByZero),
    ("divide by zero", ErrorCategory::DivisionByZero),
    ("invalid address", ErrorCategory::InvalidAddress),
    ("address", ErrorCategory::InvalidAddress),
    ("unknown opcode", ErrorCategory::UnknownOpcode),
    ("call depth", ErrorCategory::CallDepthExceeded),
    ("step limit", ErrorCategory::StepLimitExceeded),
    ("llm unavailable", ErrorCategory::LlmUnavailable),
    ("unavailable", ErrorCategory::LlmUnavailable),
    ("parse", ErrorCategory::ParseFailure),
];

/// Map an error message to its category.
pub fn categorize(error_text: &str) -> ErrorCategory {
    let lowered = error_text.to_lowercase();
    for (fragment, category) in CATEGORY_TABLE {
        if lowered.contains(fragment) {
            return *category;
        }
    }
    ErrorCategory::Other
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity over lowercased word sets, in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    let set_a = token_set(a);
    let set_b = token_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Minimum similarity for an observation to join an existing pattern.
const MATCH_THRESHOLD: f64 = 0.6;

/// A recorded failure shape with repair statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPattern {
    pub category: ErrorCategory,
    /// Representative message of the first observation
    pub message: String,
    /// How many observations matched this pattern
    pub frequency: u64,
    /// Running mean of validation outcomes, in [0, 1]
    pub fix_success_rate: f64,
    /// Fixes that passed validation, oldest first
    pub fix_templates: Vec<String>,
    /// Validation outcomes recorded (denominator of the mean)
    pub attempts: u64,
}

impl ErrorPattern {
    fn new(category: ErrorCategory, message: String) -> Self {
        ErrorPattern {
            category,
            message,
            frequency: 1,
            fix_success_rate: 0.0,
            fix_templates: Vec::new(),
            attempts: 0,
        }
    }
}

/// One generation attempt, kept in the bounded history.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionAttempt {
    pub timestamp: SystemTime,
    pub code: String,
    pub error_text: String,
    pub candidate: String,
    pub validated: bool,
    pub score: f64,
    pub model: String,
}

/// Serialized pattern row (NDJSON).
#[derive(Debug, Serialize, Deserialize)]
struct PatternRecord {
    category: ErrorCategory,
    pattern: String,
    frequency: u64,
    success_rate: f64,
    fix_templates: Vec<String>,
}

/// Persistence failure.
#[derive(Debug)]
pub enum StoreIoError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for StoreIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreIoError::Io(e) => write!(f, "pattern io error: {}", e),
            StoreIoError::Json(e) => write!(f, "pattern json error: {}", e),
        }
    }
}

impl std::error::Error for StoreIoError {}

impl From<std::io::Error> for StoreIoError {
    fn from(e: std::io::Error) -> Self {
        StoreIoError::Io(e)
    }
}

impl From<serde_json::Error> for StoreIoError {
    fn from(e: serde_json::Error) -> Self {
        StoreIoError::Json(e)
    }
}

/// Patterns plus a bounded, append-only attempt history.
///
/// Owned by one evolution instance; never process-global.
#[derive(Debug, Default)]
pub struct ErrorPatternStore {
    patterns: Vec<ErrorPattern>,
    history: VecDeque<EvolutionAttempt>,
    history_cap: Option<usize>,
}

impl ErrorPatternStore {
    pub fn new() -> Self {
        ErrorPatternStore::default()
    }

    pub fn with_history_cap(cap: usize) -> Self {
        ErrorPatternStore {
            history_cap: Some(cap),
            ..ErrorPatternStore::default()
        }
    }

    /// Record an observation; returns the index of the matched or newly
    /// created pattern.
    pub fn observe(&mut self, error_text: &str) -> usize {
        let category = categorize(error_text);
        let best = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.category == category)
            .map(|(i, p)| (i, similarity(error_text, &p.message)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((index, score)) = best
            && score > MATCH_THRESHOLD
        {
            self.patterns[index].frequency += 1;
            return index;
        }
        self.patterns
            .push(ErrorPattern::new(category, error_text.to_string()));
        self.patterns.len() - 1
    }

    /// Update the running success mean after a validation outcome; an
    /// accepted fix is also remembered as a template.
    pub fn record_outcome(&mut self, index: usize, success: bool, fix: Option<&str>) {
        let Some(pattern) = self.patterns.get_mut(index) else {
            return;
        };
        pattern.attempts += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        pattern.fix_success_rate +=
            (outcome - pattern.fix_success_rate) / pattern.attempts as f64;
        if success
            && let Some(fix) = fix
            && !pattern.fix_templates.iter().any(|t| t == fix)
        {
            pattern.fix_templates.push(fix.to_string());
        }
    }

    pub fn pattern(&self, index: usize) -> Option<&ErrorPattern> {
        self.patterns.get(index)
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    /// Append to the history, dropping the oldest entry past the cap.
    pub fn push_attempt(&mut self, attempt: EvolutionAttempt) {
        if let Some(cap) = self.history_cap
            && self.history.len() >= cap
        {
            self.history.pop_front();
        }
        self.history.push_back(attempt);
    }

    pub fn history(&self) -> impl Iterator<Item = &EvolutionAttempt> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Write all patterns as newline-delimited JSON.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), StoreIoError> {
        for pattern in &self.patterns {
            let record = PatternRecord {
                category: pattern.category,
                pattern: pattern.message.clone(),
                frequency: pattern.frequency,
                success_rate: pattern.fix_success_rate,
                fix_templates: pattern.fix_templates.clone(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Read newline-delimited JSON, merging by (category, pattern
    /// text): frequencies add, success rates average weighted by
    /// frequency, templates append without duplicates. Returns the
    /// number of records read.
    pub fn import<R: BufRead>(&mut self, reader: R) -> Result<usize, StoreIoError> {
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PatternRecord = serde_json::from_str(&line)?;
            count += 1;
            match self
                .patterns
                .iter_mut()
                .find(|p| p.category == record.category && p.message == record.pattern)
            {
                Some(existing) => {
                    let total = existing.frequency + record.frequency;
                    if total > 0 {
                        existing.fix_success_rate = (existing.fix_success_rate
                            * existing.frequency as f64
                            + record.success_rate * record.frequency as f64)
                            / total as f64;
                    }
                    existing.frequency = total;
                    for template in record.fix_templates {
                        if !existing.fix_templates.contains(&template) {
                            existing.fix_templates.push(template);
                        }
                    }
                }
                None => {
                    self.patterns.push(ErrorPattern {
                        category: record.category,
                        message: record.pattern,
                        frequency: record.frequency,
                        fix_success_rate: record.success_rate,
                        fix_templates: record.fix_templates,
                        attempts: 0,
                    });
                }
            }
        }
        Ok(count)
    }
}
