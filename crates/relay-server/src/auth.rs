//! Connection authentication.

use relay_core::AgentId;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Query parameters presented on the WebSocket upgrade.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

/// Resolves a connection attempt to the agent it acts for.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, params: &ConnectParams) -> Result<AgentId, AuthError>;
}

/// Accepts connections presenting the configured server key and maps them
/// all to one agent.
pub struct SharedSecretAuthenticator {
    server_key: SecretString,
    agent_id: AgentId,
}

impl SharedSecretAuthenticator {
    pub fn new(server_key: SecretString, agent_id: AgentId) -> Self {
        Self {
            server_key,
            agent_id,
        }
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn authenticate(&self, params: &ConnectParams) -> Result<AgentId, AuthError> {
        let token = params
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        // Unencoded '+' in a query string arrives as a space.
        let token = token.replace(' ', "+");
        if constant_time_eq(token.as_bytes(), self.server_key.expose_secret().as_bytes()) {
            Ok(self.agent_id.clone())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> SharedSecretAuthenticator {
        SharedSecretAuthenticator::new(
            SecretString::from("abc+def/123=".to_string()),
            AgentId::from_raw("default_agent"),
        )
    }

    fn params(token: Option<&str>) -> ConnectParams {
        ConnectParams {
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn matching_token_resolves_agent() {
        let agent = auth().authenticate(&params(Some("abc+def/123="))).unwrap();
        assert_eq!(agent.as_str(), "default_agent");
    }

    #[test]
    fn plus_decoded_as_space_is_restored() {
        assert!(auth().authenticate(&params(Some("abc def/123="))).is_ok());
    }

    #[test]
    fn missing_or_empty_token() {
        assert_eq!(auth().authenticate(&params(None)), Err(AuthError::MissingToken));
        assert_eq!(auth().authenticate(&params(Some(""))), Err(AuthError::MissingToken));
    }

    #[test]
    fn wrong_token_rejected() {
        assert_eq!(
            auth().authenticate(&params(Some("abc+def/124="))),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(auth().authenticate(&params(Some("abc"))), Err(AuthError::InvalidToken));
    }

    #[test]
    fn constant_time_eq_compares_bytes() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
    }
}
