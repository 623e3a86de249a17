use super::AppState;
use crate::config::AuthConfig;
use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::collections::HashMap;
use tracing::warn;

/// Bearer token -> 用户
#[derive(Debug, Clone, Default)]
pub struct TokenAuth {
    tokens: HashMap<String, String>,
}

impl TokenAuth {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            tokens: config.token_map(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

/// 已认证用户，缺少或无效的 token 直接返回 401
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AppError::Unauthorized)?;

        match state.auth.user_for(token) {
            Some(user) => Ok(AuthenticatedUser {
                user_id: user.to_string(),
            }),
            None => {
                warn!("rejected request to {} with unknown token", parts.uri.path());
                Err(AppError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_to_users() {
        let auth = TokenAuth::from_config(&AuthConfig {
            tokens: vec!["alice:secret-1".into(), " bob:secret-2 ".into(), "".into()],
        });
        assert_eq!(auth.user_for("secret-1"), Some("alice"));
        assert_eq!(auth.user_for("secret-2"), Some("bob"));
        assert_eq!(auth.user_for("alice"), None);
    }
}
