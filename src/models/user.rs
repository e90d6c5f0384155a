use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated identity, `id` is `provider:login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub provider: String,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

/// Bearer credential letting a client act as its user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(provider: impl Into<String>, login: impl Into<String>) -> Self {
        let provider = provider.into();
        let login = login.into();
        Self {
            id: format!("{provider}:{login}"),
            provider,
            login,
            name: None,
            email: None,
            is_admin: false,
            created_at: Utc::now(),
            tokens: Vec::new(),
        }
    }

    /// Mint a new token and attach it to the user.
    pub fn new_token(&mut self, comment: Option<String>) -> Token {
        let token = Token {
            token: uuid::Uuid::new_v4().to_string(),
            comment,
            created_at: Utc::now(),
        };
        self.tokens.push(token.clone());
        token
    }

    pub fn token(&self, token: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.token == token)
    }

    pub fn remove_token(&mut self, token: &str) -> Option<Token> {
        let index = self.tokens.iter().position(|t| t.token == token)?;
        Some(self.tokens.remove(index))
    }
}
