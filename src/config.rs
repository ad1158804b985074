//! Configuração do propval carregada a partir de `propval.toml`.
//!
//! A struct [`PropvalConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `ANTHROPIC_API_KEY` e `PROPVAL_MODEL` têm
//! precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PropvalError;
use crate::poller::PollPolicy;
use crate::state_machine::RetryConfig;

/// Configuração de nível superior carregada de `propval.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PropvalConfig {
    /// Chave da API Anthropic. Vazia ativa os agentes offline.
    #[serde(default)]
    pub api_key: String,

    /// Modelo usado por todos os agentes.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Tempo máximo de cada chamada a um agente, em segundos.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Tentativas para falhas de transporte antes de marcar o job como falho.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Tentativas para respostas malformadas ou rejeitadas.
    #[serde(default = "default_semantic_max_attempts")]
    pub semantic_max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Quanto tempo um job terminado permanece em memória.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Intervalo de consulta do cliente enquanto a conexão está saudável.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Falhas de rede consecutivas toleradas pelo cliente antes de desistir.
    #[serde(default = "default_poll_max_retries")]
    pub poll_max_retries: u32,

    /// Atraso base do backoff do cliente após uma falha de rede, em milissegundos.
    /// Independente de `base_delay_ms`, que só vale para os agentes no servidor.
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_semantic_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_retries() -> u32 {
    5
}

fn default_poll_backoff_ms() -> u64 {
    1000
}

impl Default for PropvalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            host: default_host(),
            port: default_port(),
            stage_timeout_secs: default_stage_timeout_secs(),
            max_attempts: default_max_attempts(),
            semantic_max_attempts: default_semantic_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_retries: default_poll_max_retries(),
            poll_backoff_ms: default_poll_backoff_ms(),
        }
    }
}

impl PropvalConfig {
    /// Carrega a configuração de `propval.toml` no diretório atual.
    pub fn load() -> Result<Self, PropvalError> {
        Self::load_from(Path::new("propval.toml"))
    }

    /// Carrega de um caminho explícito; usa valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self, PropvalError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PropvalConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }
        if let Ok(model) = std::env::var("PROPVAL_MODEL")
            && !model.is_empty()
        {
            config.model = model;
        }

        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            semantic_max_attempts: self.semantic_max_attempts.max(1),
            base_delay_ms: self.base_delay_ms,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_retries: self.poll_max_retries,
            base_backoff: Duration::from_millis(self.poll_backoff_ms),
            ..PollPolicy::default()
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = PropvalConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.semantic_max_attempts, 2);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            port = 9090
            max_attempts = 5
            stage_timeout_secs = 30
        "#;
        let config: PropvalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.semantic_max_attempts, 2);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"0.0.0.0\"\nretention_secs = 10").unwrap();
        let config = PropvalConfig::load_from(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.retention(), chrono::Duration::seconds(10));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PropvalConfig::load_from(&dir.path().join("propval.toml")).unwrap();
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(PropvalConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn zero_attempt_budgets_are_clamped() {
        let config = PropvalConfig {
            max_attempts: 0,
            semantic_max_attempts: 0,
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.semantic_max_attempts, 1);
    }

    #[test]
    fn poll_backoff_is_independent_of_stage_delay() {
        let config: PropvalConfig = toml::from_str("base_delay_ms = 50").unwrap();
        assert_eq!(config.retry_config().base_delay_ms, 50);
        assert_eq!(config.poll_policy().base_backoff, Duration::from_millis(1000));

        let config: PropvalConfig = toml::from_str("poll_backoff_ms = 250").unwrap();
        assert_eq!(config.poll_policy().base_backoff, Duration::from_millis(250));
        assert_eq!(config.retry_config().base_delay_ms, 1000);
    }
}
