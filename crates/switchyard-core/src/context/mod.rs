//! Shared context window
//!
//! A token-budgeted, append-only transcript that several providers build on
//! in turn. Entries are immutable once appended and are shared as
//! `Arc<ContextEntry>`; the window only ever grows at the back and trims
//! whole entries from the front.
//!
//! This module provides:
//! - The window itself and its read views ([`ContextWindow`])
//! - Token counting ([`TokenCounter`])
//! - Snapshot persistence ([`ContextStore`])

pub mod store;
pub mod tokens;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use store::ContextStore;
pub use tokens::TokenCounter;

/// Pseudo provider id for prompts supplied by the caller
pub const USER_PROVIDER_ID: &str = "user";

/// Pseudo provider id for the result of a tool call
pub fn tool_provider_id(tool_name: &str) -> String {
    format!("tool:{}", tool_name)
}

/// Speaker of a context entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: Uuid,
    /// Provider that produced the entry, or `user` / `tool:<name>`
    pub provider_id: String,
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ContextEntry {
    pub fn new(
        provider_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            role,
            content: content.into(),
            token_count,
            timestamp: Utc::now(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Role and content as handed to provider adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn from_entries(entries: &[Arc<ContextEntry>]) -> Vec<ContextMessage> {
        entries.iter().map(|e| ContextMessage::from(e.as_ref())).collect()
    }
}

impl From<&ContextEntry> for ContextMessage {
    fn from(entry: &ContextEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.content.clone(),
        }
    }
}

/// Per-provider share of the window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContribution {
    pub entries: usize,
    pub tokens: usize,
}

/// Point-in-time description of a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub entry_count: usize,
    pub current_tokens: usize,
    pub max_tokens: usize,
    /// `current_tokens / max_tokens`, 0.0 for a zero budget
    pub utilization: f64,
    pub by_provider: BTreeMap<String, ProviderContribution>,
}

/// Serialisable copy of a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub max_tokens: usize,
    pub current_tokens: usize,
    pub entries: Vec<ContextEntry>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<Arc<ContextEntry>>,
    current_tokens: usize,
}

/// Token-bounded transcript shared by all providers of a session
///
/// Invariant: `current_tokens() <= max_tokens()` after every mutation, and
/// `current_tokens()` is always the sum of the retained entries' counts.
#[derive(Debug)]
pub struct ContextWindow {
    max_tokens: usize,
    counter: TokenCounter,
    state: RwLock<WindowState>,
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            counter: TokenCounter::new(),
            state: RwLock::new(WindowState::default()),
        }
    }

    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn current_tokens(&self) -> usize {
        self.state.read().current_tokens
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Append an entry, dropping the oldest entries until the budget holds.
    ///
    /// Returns the entries trimmed from the front, oldest first. An entry
    /// larger than the whole budget is rejected and the window is unchanged.
    pub fn append(&self, entry: ContextEntry) -> Result<Vec<Arc<ContextEntry>>> {
        self.append_all(vec![entry])
    }

    /// Append several entries contiguously under one write lock.
    ///
    /// Either every entry is appended or, when one of them is larger than the
    /// budget, none is.
    pub fn append_all(&self, entries: Vec<ContextEntry>) -> Result<Vec<Arc<ContextEntry>>> {
        if let Some(oversized) = entries.iter().find(|e| e.token_count > self.max_tokens) {
            return Err(Error::Validation(format!(
                "Entry of {} tokens from '{}' exceeds the context budget of {} tokens",
                oversized.token_count, oversized.provider_id, self.max_tokens
            )));
        }

        let entries: Vec<_> = entries.into_iter().map(Arc::new).collect();
        let mut dropped = Vec::new();

        let mut state = self.state.write();
        for entry in entries {
            state.current_tokens += entry.token_count;
            state.entries.push_back(entry);

            while state.current_tokens > self.max_tokens {
                match state.entries.pop_front() {
                    Some(oldest) => {
                        state.current_tokens -= oldest.token_count;
                        dropped.push(oldest);
                    }
                    None => break,
                }
            }
        }
        let current = state.current_tokens;
        drop(state);

        if !dropped.is_empty() {
            debug!(
                dropped = dropped.len(),
                current_tokens = current,
                max_tokens = self.max_tokens,
                "Trimmed context window"
            );
        }

        Ok(dropped)
    }

    /// Build an entry for `content`, counted with the window's counter
    pub fn entry_for(
        &self,
        provider_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        model: Option<&str>,
    ) -> ContextEntry {
        let content = content.into();
        let tokens = self.counter.count(&content);
        let entry = ContextEntry::new(provider_id, role, content, tokens);
        match model {
            Some(model) => entry.with_model(model),
            None => entry,
        }
    }

    /// Count `content` with the window's counter and append it
    pub fn append_text(
        &self,
        provider_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        model: Option<&str>,
    ) -> Result<Vec<Arc<ContextEntry>>> {
        self.append(self.entry_for(provider_id, role, content, model))
    }

    /// Newest suffix of whole entries whose token sum fits in `max_tokens`,
    /// in chronological order
    pub fn view(&self, max_tokens: usize) -> Vec<Arc<ContextEntry>> {
        let state = self.state.read();
        let mut budget = max_tokens;
        let mut taken = 0;
        for entry in state.entries.iter().rev() {
            if entry.token_count > budget {
                break;
            }
            budget -= entry.token_count;
            taken += 1;
        }
        let skip = state.entries.len() - taken;
        state.entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> Vec<Arc<ContextEntry>> {
        self.state.read().entries.iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<ContextMessage> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| ContextMessage::from(e.as_ref()))
            .collect()
    }

    pub fn summary(&self) -> ContextSummary {
        let state = self.state.read();
        let mut by_provider: BTreeMap<String, ProviderContribution> = BTreeMap::new();
        for entry in &state.entries {
            let contribution = by_provider.entry(entry.provider_id.clone()).or_default();
            contribution.entries += 1;
            contribution.tokens += entry.token_count;
        }

        let utilization = if self.max_tokens == 0 {
            0.0
        } else {
            state.current_tokens as f64 / self.max_tokens as f64
        };

        ContextSummary {
            entry_count: state.entries.len(),
            current_tokens: state.current_tokens,
            max_tokens: self.max_tokens,
            utilization,
            by_provider,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.current_tokens = 0;
    }

    /// Drop every entry except system entries, which keep their order.
    /// Returns how many entries were removed.
    pub fn clear_keep_system(&self) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|e| e.role == Role::System);
        state.current_tokens = state.entries.iter().map(|e| e.token_count).sum();
        before - state.entries.len()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state.read();
        ContextSnapshot {
            max_tokens: self.max_tokens,
            current_tokens: state.current_tokens,
            entries: state.entries.iter().map(|e| e.as_ref().clone()).collect(),
            taken_at: Utc::now(),
        }
    }

    /// Rebuild a window from a snapshot, rejecting inconsistent token accounting
    pub fn restore(snapshot: ContextSnapshot) -> Result<Self> {
        Self::restore_with_counter(snapshot, TokenCounter::new())
    }

    pub fn restore_with_counter(snapshot: ContextSnapshot, counter: TokenCounter) -> Result<Self> {
        let total: usize = snapshot.entries.iter().map(|e| e.token_count).sum();
        if total != snapshot.current_tokens {
            return Err(Error::Validation(format!(
                "Snapshot records {} tokens but its entries sum to {}",
                snapshot.current_tokens, total
            )));
        }
        if total > snapshot.max_tokens {
            return Err(Error::Validation(format!(
                "Snapshot holds {} tokens, over its budget of {}",
                total, snapshot.max_tokens
            )));
        }

        let entries = snapshot.entries.into_iter().map(Arc::new).collect();
        Ok(Self {
            max_tokens: snapshot.max_tokens,
            counter,
            state: RwLock::new(WindowState {
                entries,
                current_tokens: total,
            }),
        })
    }
}
