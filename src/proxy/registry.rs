//! In-memory registry of single-use proxy tokens.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tokio::sync::RwLock;

/// Random bytes per token. Hex-encoded tokens are twice this long.
pub const TOKEN_BYTES: usize = 16;

/// Maps opaque tokens to the private locators they stand in for.
///
/// Every mutation runs inside a single write-lock critical section with no
/// await point, so `resolve_and_consume` is an atomic compare-and-remove:
/// concurrent callers racing on the same token see exactly one winner.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `locator` under a freshly generated token and return the token.
    pub async fn mint(&self, locator: impl Into<String>) -> String {
        let locator = locator.into();
        let mut tokens = self.tokens.write().await;
        loop {
            if let Entry::Vacant(slot) = tokens.entry(generate_token()) {
                let token = slot.key().clone();
                slot.insert(locator);
                return token;
            }
        }
    }

    /// Remove the token and return its locator. Only the first call for a
    /// given token succeeds.
    pub async fn resolve_and_consume(&self, token: &str) -> Option<String> {
        self.tokens.write().await.remove(token)
    }

    /// Drop every listed token that is still live. Returns how many were removed.
    pub async fn invalidate<I, S>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut live = self.tokens.write().await;
        tokens
            .into_iter()
            .filter(|token| {
                let token: &str = token.as_ref();
                live.remove(token).is_some()
            })
            .count()
    }

    /// Number of live tokens.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn minted_token_resolves_to_its_locator() {
        let registry = TokenRegistry::new();

        let token = registry.mint("https://files.slack.com/private/report.pdf").await;

        assert_eq!(
            registry.resolve_and_consume(&token).await.as_deref(),
            Some("https://files.slack.com/private/report.pdf")
        );
    }

    #[tokio::test]
    async fn tokens_are_hex_of_expected_length() {
        let registry = TokenRegistry::new();

        let token = registry.mint("https://upstream/file1").await;

        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn second_resolve_returns_none() {
        let registry = TokenRegistry::new();
        let token = registry.mint("https://upstream/file1").await;

        assert!(registry.resolve_and_consume(&token).await.is_some());
        assert!(registry.resolve_and_consume(&token).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let registry = TokenRegistry::new();
        registry.mint("https://upstream/file1").await;

        assert!(registry.resolve_and_consume("doesnotexist").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_skips_consumed_and_unknown_tokens() {
        let registry = TokenRegistry::new();
        let consumed = registry.mint("https://upstream/a").await;
        let pending = registry.mint("https://upstream/b").await;
        registry.resolve_and_consume(&consumed).await;

        let removed = registry
            .invalidate([consumed.as_str(), pending.as_str(), "never-minted"])
            .await;

        assert_eq!(removed, 1);
        assert!(registry.is_empty().await);
        assert_eq!(registry.invalidate([&consumed, &pending]).await, 0);
    }

    #[tokio::test]
    async fn invalidated_token_cannot_be_resolved() {
        let registry = TokenRegistry::new();
        let token = registry.mint("https://upstream/a").await;

        registry.invalidate(vec![token.clone()]).await;

        assert!(registry.resolve_and_consume(&token).await.is_none());
    }

    #[tokio::test]
    async fn many_mints_produce_distinct_live_tokens() {
        let registry = TokenRegistry::new();
        let mut seen = HashSet::new();

        for index in 0..500 {
            let token = registry.mint(format!("https://upstream/{index}")).await;
            assert!(seen.insert(token));
        }

        assert_eq!(registry.len().await, 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mints_produce_distinct_live_tokens() {
        let registry = Arc::new(TokenRegistry::new());

        let mints: Vec<_> = (0..32)
            .map(|index| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.mint(format!("https://upstream/{index}")).await })
            })
            .collect();

        let mut seen = HashSet::new();
        for mint in mints {
            assert!(seen.insert(mint.await.expect("task should not panic")));
        }

        assert_eq!(registry.len().await, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_have_exactly_one_winner() {
        let registry = Arc::new(TokenRegistry::new());
        let token = registry.mint("https://upstream/contended").await;

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let token = token.clone();
                tokio::spawn(async move { registry.resolve_and_consume(&token).await })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.expect("task should not panic").is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }
}
