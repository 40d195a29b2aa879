use http::HeaderMap;
use http::header::AUTHORIZATION;
use rand::seq::IndexedRandom;

/// Tokens used for callers that bring no credential of their own.
#[derive(Clone, Debug, Default)]
pub struct CredentialPool {
    tokens: Vec<String>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<String>) -> Self {
        CredentialPool {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    /// Picks a random token, or none if the caller already sent an Authorization header.
    pub fn select(&self, headers: &HeaderMap) -> Option<&str> {
        if headers.contains_key(AUTHORIZATION) {
            tracing::debug!("using caller provided credential");
            return None;
        }

        let token = self.tokens.choose(&mut rand::rng())?;
        tracing::debug!(token = token_prefix(token), "using pooled credential");
        Some(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// First five characters of a token, safe to log.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(5) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
