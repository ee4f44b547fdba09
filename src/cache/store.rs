//! Backing store abstraction.
//!
//! [`CacheStore`] is the seam between the cache layers and the key-value
//! backend. Two backends exist: [`super::redis_store::RedisStore`] for deployments
//! and [`MemoryStore`] for local development and tests. Both expire entries
//! on their own; nothing in the process mirrors entry state.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store is unavailable")]
    Unavailable,
    #[error("cache store connection failed: {0}")]
    Connection(String),
    #[error("cache store command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// List live keys matching a glob `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete every key starting with `prefix`.
    async fn flush(&self, prefix: &str) -> Result<u64, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let keys = self.keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete(&keys).await
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store with per-entry expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));

        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Escape glob metacharacters so `literal` matches only itself.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Redis-style glob matching: `*`, `?`, `[...]` classes with ranges and
/// `^` negation, and `\` escapes.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    match_from(&pattern, &candidate)
}

fn match_from(pattern: &[char], candidate: &[char]) -> bool {
    let (mut p, mut c) = (0, 0);
    // Position to resume from after the most recent `*`.
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('[') => match_class(&pattern[p..], candidate[c]),
            Some('\\') if p + 1 < pattern.len() => {
                (pattern[p + 1] == candidate[c]).then_some(2)
            }
            Some(&literal) => (literal == candidate[c]).then_some(1),
            None => None,
        };

        match step {
            Some(width) => {
                p += width;
                c += 1;
            }
            None => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    c = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

/// Match a `[...]` class at the start of `pattern`, returning the class
/// width on success.
fn match_class(pattern: &[char], ch: char) -> Option<usize> {
    let mut i = 1;
    let negated = pattern.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut matched = false;
    while let Some(&current) = pattern.get(i) {
        if current == ']' {
            return (matched != negated).then_some(i + 1);
        }

        let (low, width) = if current == '\\' {
            (*pattern.get(i + 1)?, 2)
        } else {
            (current, 1)
        };

        if pattern.get(i + width) == Some(&'-')
            && let Some(&high) = pattern.get(i + width + 1)
            && high != ']'
        {
            if low <= ch && ch <= high {
                matched = true;
            }
            i += width + 2;
        } else {
            if low == ch {
                matched = true;
            }
            i += width;
        }
    }

    // Unterminated class: treat `[` as a literal.
    (ch == '[').then_some(1)
}
