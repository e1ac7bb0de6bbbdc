//! Carga y gestión de configuración de la aplicación (servidor + LLM + datos).

use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Modelo para el análisis y el feedback de reportes individuales.
    fn default_analysis_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
        }
    }

    /// Modelo para la consolidación y las preguntas estratégicas.
    fn default_strategy_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Gemini => "gemini-2.5-pro",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: PathBuf,
    pub data_dir: PathBuf,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_analysis_model: String,
    pub llm_strategy_model: String,
    pub llm_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let frontend_dir = lookup("FRONTEND_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("frontend"));

        let data_dir = match lookup("DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow!("No se pudo determinar el directorio de datos; define DATA_DIR"))?
                .join("analizador-reportes"),
        };

        let open_browser = lookup("OPEN_BROWSER")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let llm_provider_str = lookup("LLM_PROVIDER").unwrap_or_else(|| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_analysis_model = lookup("LLM_ANALYSIS_MODEL")
            .unwrap_or_else(|| llm_provider.default_analysis_model().to_string());
        let llm_strategy_model = lookup("LLM_STRATEGY_MODEL")
            .unwrap_or_else(|| llm_provider.default_strategy_model().to_string());

        let llm_timeout_secs: u64 = match lookup("LLM_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("LLM_TIMEOUT_SECS inválido: {raw}"))?,
            None => 120,
        };

        Ok(Self {
            server_addr,
            frontend_dir,
            data_dir,
            open_browser,
            llm_provider,
            llm_analysis_model,
            llm_strategy_model,
            llm_timeout: Duration::from_secs(llm_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_follow_the_provider() {
        let cfg = config(&[("DATA_DIR", "/tmp/datos")]).unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::Gemini);
        assert_eq!(cfg.llm_analysis_model, "gemini-2.5-flash");
        assert_eq!(cfg.llm_strategy_model, "gemini-2.5-pro");
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.llm_timeout, Duration::from_secs(120));
        assert!(cfg.open_browser);

        let cfg = config(&[("DATA_DIR", "/tmp/datos"), ("LLM_PROVIDER", "OpenAI")]).unwrap();
        assert_eq!(cfg.llm_analysis_model, "gpt-4o-mini");
    }

    #[test]
    fn explicit_values_win() {
        let cfg = config(&[
            ("DATA_DIR", "/tmp/datos"),
            ("LLM_STRATEGY_MODEL", "gemini-exp"),
            ("LLM_TIMEOUT_SECS", "30"),
            ("OPEN_BROWSER", "false"),
        ])
        .unwrap();
        assert_eq!(cfg.llm_strategy_model, "gemini-exp");
        assert_eq!(cfg.llm_timeout, Duration::from_secs(30));
        assert!(!cfg.open_browser);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/datos"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config(&[("DATA_DIR", "/tmp"), ("LLM_PROVIDER", "ollama")]).is_err());
        assert!(config(&[("DATA_DIR", "/tmp"), ("LLM_TIMEOUT_SECS", "pronto")]).is_err());
    }
}
