//! Login server handshake
//!
//! After connecting, the server sends a challenge. It is exchanged with the
//! login server for a signed assertion, which is then presented with
//! `/trn` to claim the configured name.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::BotError;

/// Default login endpoint
pub const LOGIN_URL: &str = "https://play.pokemonshowdown.com/action.php";

/// Exchanges a challenge for an assertion
#[async_trait]
pub trait Login: Send + Sync {
    /// Returns `Ok(None)` when the login server refused us
    async fn login(
        &self,
        name: &str,
        password: Option<&str>,
        challenge_key_id: &str,
        challenge: &str,
    ) -> Result<Option<String>, BotError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    assertion: Option<String>,
}

/// Login over HTTP against the login server
#[derive(Debug, Clone)]
pub struct HttpLogin {
    client: reqwest::Client,
    url: String,
}

impl HttpLogin {
    pub fn new() -> Self {
        Self::with_url(LOGIN_URL)
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

impl Default for HttpLogin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Login for HttpLogin {
    async fn login(
        &self,
        name: &str,
        password: Option<&str>,
        challenge_key_id: &str,
        challenge: &str,
    ) -> Result<Option<String>, BotError> {
        let challstr = format!("{}|{}", challenge_key_id, challenge);
        let request = match password {
            Some(password) => self.client.post(&self.url).form(&[
                ("act", "login"),
                ("name", name),
                ("pass", password),
                ("challengekeyid", challenge_key_id),
                ("challenge", challenge),
            ]),
            None => self.client.post(&self.url).form(&[
                ("act", "getassertion"),
                ("userid", name),
                ("challstr", challstr.as_str()),
            ]),
        };

        let body = request.send().await?.error_for_status()?.text().await?;
        debug!("Login server answered {} bytes", body.len());

        match password {
            Some(_) => parse_login_response(&body),
            None => Ok(parse_assertion(&body)),
        }
    }
}

/// `act=login` answers `]` followed by JSON
pub fn parse_login_response(body: &str) -> Result<Option<String>, BotError> {
    let json = body.strip_prefix(']').unwrap_or(body);
    let response: LoginResponse = serde_json::from_str(json)?;
    Ok(response.assertion.and_then(|a| parse_assertion(&a)))
}

/// A bare assertion; `;`-prefixed bodies are error messages
pub fn parse_assertion(body: &str) -> Option<String> {
    let assertion = body.trim();
    if assertion.is_empty() || assertion.starts_with(';') {
        None
    } else {
        Some(assertion.to_string())
    }
}
