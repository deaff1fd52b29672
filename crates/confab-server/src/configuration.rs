use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::Deserialize;

use confab::providers::base::LlmParameters;
use confab::providers::configs::{
    AnthropicProviderConfig, OllamaProviderConfig, OpenAiProviderConfig, OpenRouterProviderConfig,
    ProviderConfig,
};
use confab::providers::{anthropic, ollama, openai, openrouter};
use confab::registry::ToolServerConfig;

use crate::error::ConfigError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TITLE_PROMPT: &str =
    "Generate a title for this chat with only one sentence with maximum 5 words.";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_mode: LogMode,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub title_generator_prompt: Option<String>,
    pub llm: LlmSettings,
    #[serde(rename = "genTitleLLM", default)]
    pub gen_title_llm: Option<LlmSettings>,
    #[serde(rename = "mcpSSEServers", default)]
    pub mcp_sse_servers: BTreeMap<String, SseServerSettings>,
    #[serde(rename = "mcpStdIOServers", default)]
    pub mcp_stdio_servers: BTreeMap<String, StdIoServerSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseServerSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StdIoServerSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// One `llm` entry; the `provider` tag selects the remaining fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmSettings {
    Ollama {
        #[serde(default)]
        host: Option<String>,
        model: String,
        #[serde(default)]
        parameters: LlmParameters,
    },
    Anthropic {
        #[serde(default)]
        host: Option<String>,
        #[serde(rename = "apiKey", default)]
        api_key: Option<String>,
        model: String,
        #[serde(rename = "maxTokens")]
        max_tokens: u32,
        #[serde(default)]
        parameters: LlmParameters,
    },
    Openai {
        #[serde(default)]
        host: Option<String>,
        #[serde(rename = "apiKey", default)]
        api_key: Option<String>,
        model: String,
        #[serde(default)]
        parameters: LlmParameters,
    },
    Openrouter {
        #[serde(default)]
        host: Option<String>,
        #[serde(rename = "apiKey", default)]
        api_key: Option<String>,
        model: String,
        #[serde(default)]
        parameters: LlmParameters,
    },
}

impl LlmSettings {
    /// Resolve credentials (config first, environment second) into the
    /// provider configuration the factory takes.
    pub fn into_provider_config(self) -> Result<ProviderConfig, ConfigError> {
        match self {
            LlmSettings::Ollama {
                host,
                model,
                parameters,
            } => Ok(ProviderConfig::Ollama(OllamaProviderConfig {
                host: host
                    .or_else(|| env_non_empty("OLLAMA_HOST"))
                    .unwrap_or_else(|| ollama::OLLAMA_HOST.to_string()),
                model,
                parameters,
            })),
            LlmSettings::Anthropic {
                host,
                api_key,
                model,
                max_tokens,
                parameters,
            } => Ok(ProviderConfig::Anthropic(AnthropicProviderConfig {
                host: host.unwrap_or_else(|| anthropic::ANTHROPIC_HOST.to_string()),
                api_key: required_credential(api_key, "anthropic", "ANTHROPIC_API_KEY")?,
                model,
                max_tokens,
                parameters,
            })),
            LlmSettings::Openai {
                host,
                api_key,
                model,
                parameters,
            } => Ok(ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: host.unwrap_or_else(|| openai::OPENAI_HOST.to_string()),
                api_key: required_credential(api_key, "openai", "OPENAI_API_KEY")?,
                model,
                parameters,
            })),
            LlmSettings::Openrouter {
                host,
                api_key,
                model,
                parameters,
            } => Ok(ProviderConfig::OpenRouter(OpenRouterProviderConfig {
                host: host.unwrap_or_else(|| openrouter::OPENROUTER_HOST.to_string()),
                api_key: required_credential(api_key, "openrouter", "OPENROUTER_API_KEY")?,
                model,
                parameters,
            })),
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn system_prompt(&self) -> &str {
        match self.system_prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => DEFAULT_SYSTEM_PROMPT,
        }
    }

    pub fn title_prompt(&self) -> &str {
        match self.title_generator_prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => DEFAULT_TITLE_PROMPT,
        }
    }

    /// The title generator reuses the main LLM when `genTitleLLM` is absent.
    pub fn title_llm(&self) -> LlmSettings {
        self.gen_title_llm.clone().unwrap_or_else(|| self.llm.clone())
    }

    pub fn tool_server_configs(&self) -> Vec<ToolServerConfig> {
        let mut configs = Vec::new();
        for (name, server) in &self.mcp_sse_servers {
            configs.push(ToolServerConfig::Sse {
                name: name.clone(),
                url: server.url.clone(),
            });
        }
        for (name, server) in &self.mcp_stdio_servers {
            configs.push(ToolServerConfig::Stdio {
                name: name.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
            });
        }
        configs
    }
}

fn default_port() -> u16 {
    8080
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn required_credential(
    configured: Option<String>,
    provider: &'static str,
    env_var: &'static str,
) -> Result<String, ConfigError> {
    configured
        .filter(|key| !key.is_empty())
        .or_else(|| env_non_empty(env_var))
        .ok_or(ConfigError::MissingCredential {
            provider,
            field: "apiKey",
            env_var,
        })
}
