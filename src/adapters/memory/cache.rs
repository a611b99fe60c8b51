//! In-process key/value cache.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::ports::Cache;

/// Acknowledgement returned by a successful write.
pub const WRITE_ACK: &str = "OK";

/// Cache keeping every entry in memory. Keys are listed in sorted order.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn add_data(&self, key: &str, value: Value) -> StoreResult<String> {
        require_non_empty("add_data", "key", key)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(WRITE_ACK.to_string())
    }

    async fn get_data(&self, key: &str) -> StoreResult<Value> {
        require_non_empty("get_data", "key", key)?;
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("get_data", format!("key {key}")))
    }

    async fn get_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let pattern = if pattern.is_empty() { "*" } else { pattern };
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| glob_matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn delete_data(&self, key: &str) -> StoreResult<u64> {
        require_non_empty("delete_data", "key", key)?;
        let removed = self.entries.write().await.remove(key);
        Ok(u64::from(removed.is_some()))
    }
}

/// Glob match in the style of cache key scans: `*` matches any run, `?` one
/// character, `[abc]`/`[a-z]`/`[^a]` a class, and `\` escapes the next
/// character. An unterminated `[` is literal.
///
/// Runs in `O(pattern * key)`: a mismatch resumes from the most recent `*`
/// instead of recursing.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let tokens = tokenize(&pattern);
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;
    while k < key.len() {
        match tokens.get(p) {
            Some(Token::Star) => {
                resume = Some((p, k));
                p += 1;
            }
            Some(token) if token.matches(key[k]) => {
                p += 1;
                k += 1;
            }
            _ => match resume {
                // Let the last star swallow one more character.
                Some((star, from)) => {
                    p = star + 1;
                    k = from + 1;
                    resume = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| matches!(token, Token::Star))
}

enum Token {
    Star,
    Any,
    Literal(char),
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Star => false,
            Self::Any => true,
            Self::Literal(literal) => *literal == c,
            Self::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&c)) != *negated
            }
        }
    }
}

fn tokenize(pattern: &[char]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            '*' => {
                if !matches!(tokens.last(), Some(Token::Star)) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            '\\' if i + 1 < pattern.len() => {
                tokens.push(Token::Literal(pattern[i + 1]));
                i += 2;
            }
            '[' => match parse_class(&pattern[i + 1..]) {
                Some((class, consumed)) => {
                    tokens.push(class);
                    i += 1 + consumed;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Parse a class body (after `[`). Returns the class and how many characters
/// it used including the closing `]`, or `None` if unterminated.
fn parse_class(body: &[char]) -> Option<(Token, usize)> {
    let negated = body.first() == Some(&'^');
    let mut pos = usize::from(negated);
    let mut ranges = Vec::new();
    loop {
        match body.get(pos..)? {
            [] => return None,
            [']', ..] => return Some((Token::Class { negated, ranges }, pos + 1)),
            [lo, '-', hi, ..] if *hi != ']' => {
                ranges.push((*lo, *hi));
                pos += 3;
            }
            [ch, ..] => {
                ranges.push((*ch, *ch));
                pos += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("*", ""));
        assert!(glob_matches("user:*", "user:42"));
        assert!(!glob_matches("user:*", "order:42"));
        assert!(glob_matches("user:?", "user:4"));
        assert!(!glob_matches("user:?", "user:42"));
        assert!(glob_matches("h[ae]llo", "hello"));
        assert!(!glob_matches("h[ae]llo", "hillo"));
        assert!(glob_matches("h[^e]llo", "hallo"));
        assert!(!glob_matches("h[^e]llo", "hello"));
        assert!(glob_matches("key[0-9]", "key7"));
        assert!(!glob_matches("key[0-9]", "keyx"));
        assert!(glob_matches("a\\*b", "a*b"));
        assert!(!glob_matches("a\\*b", "axb"));
        assert!(glob_matches("a[b", "a[b"));
        assert!(glob_matches("*:*:end", "x:y:end"));
        assert!(glob_matches("**a", "ba"));
        assert!(!glob_matches("a*", ""));
        assert!(glob_matches("a*", "a"));
        assert!(glob_matches("*b*b", "abcbxb"));
    }

    #[test]
    fn test_glob_many_stars_on_long_key() {
        let pattern = "*a".repeat(12) + "*b";
        let key = "a".repeat(400);
        assert!(!glob_matches(&pattern, &key));
        assert!(glob_matches(&pattern, &(key + "b")));
    }

    #[tokio::test]
    async fn test_add_get_delete() {
        let cache = InMemoryCache::new();
        let ack = cache.add_data("user:1", json!({"name": "ada"})).await.unwrap();
        assert_eq!(ack, WRITE_ACK);
        assert_eq!(cache.get_data("user:1").await.unwrap(), json!({"name": "ada"}));

        assert_eq!(cache.delete_data("user:1").await.unwrap(), 1);
        assert_eq!(cache.delete_data("user:1").await.unwrap(), 0);
        assert!(matches!(
            cache.get_data("user:1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_keys_filters_and_sorts() {
        let cache = InMemoryCache::new();
        for key in ["user:2", "order:1", "user:1"] {
            cache.add_data(key, json!(1)).await.unwrap();
        }
        assert_eq!(cache.get_keys("user:*").await.unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(cache.get_keys("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let cache = InMemoryCache::new();
        let err = cache.add_data("", json!(1)).await.unwrap_err();
        assert!(err.is_local());
        assert!(cache.is_empty().await);
    }
}
