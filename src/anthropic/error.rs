//! Tipos de erro para o cliente da API Anthropic.
//!
//! [`AnthropicError`] cobre rate limiting, erros HTTP da API e falhas de rede.
//! A classificação em falha transitória ou fatal fica com o agente de estágio.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API da Anthropic.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// O servidor retornou HTTP 429. `retry_after_ms` indica quanto esperar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pela API (ex.: 401 chave inválida, 529 sobrecarga).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede ou de decodificação do corpo (DNS, conexão recusada, JSON inválido).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AnthropicError {
    /// `true` para falhas que podem desaparecer numa nova tentativa.
    pub fn is_transient(&self) -> bool {
        match self {
            AnthropicError::RateLimited { .. } | AnthropicError::NetworkError(_) => true,
            AnthropicError::ApiError { status, .. } => *status >= 500 || *status == 408,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = AnthropicError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
        assert!(err.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        let overloaded = AnthropicError::ApiError {
            status: 529,
            message: "overloaded".into(),
        };
        assert!(overloaded.is_transient());

        let unauthorized = AnthropicError::ApiError {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert!(!unauthorized.is_transient());
        assert_eq!(
            unauthorized.to_string(),
            "API error (status 401): Invalid API key"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnthropicError>();
    }
}
