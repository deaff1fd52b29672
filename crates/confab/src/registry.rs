//! Connections to external tool servers and dispatch of tool calls.
//!
//! Servers are reachable either over an SSE URL or through a child process
//! speaking on its stdio. Each connection handshakes with a 30-second
//! timeout; a server that fails to connect is logged and skipped so the rest
//! keep working. After construction the registry is read-mostly: one flat
//! `tool name -> server` directory answers every dispatch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::{SseClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::tool::ToolSpec;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach one tool server.
#[derive(Debug, Clone)]
pub enum ToolServerConfig {
    Sse { name: String, url: String },
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
    },
}

impl ToolServerConfig {
    pub fn name(&self) -> &str {
        match self {
            ToolServerConfig::Sse { name, .. } | ToolServerConfig::Stdio { name, .. } => name,
        }
    }
}

/// Identity a connected server reported in its handshake.
#[derive(Debug, Clone)]
pub struct ServerSummary {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptInfo {
    pub name: String,
    pub description: Option<String>,
}

/// The engine's seam for tool dispatch.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Every tool known across all connected servers.
    fn tools(&self) -> &[ToolSpec];

    /// Dispatch a call to the owning server. Never fails: errors come back as
    /// a `{"error": ...}` payload with `success == false`.
    async fn call_tool(&self, name: &str, input: Value) -> (Value, bool);
}

pub struct ToolRegistry {
    peers: Vec<Peer<RoleClient>>,
    services: Mutex<Vec<RunningService<RoleClient, ()>>>,
    servers: Vec<ServerSummary>,
    tools: Vec<ToolSpec>,
    resources: Vec<ResourceInfo>,
    prompts: Vec<PromptInfo>,
    tools_map: HashMap<String, usize>,
}

fn call_tool_error(message: String) -> Value {
    json!({ "error": message })
}

impl ToolRegistry {
    /// Connect to every configured server and enumerate what it offers.
    pub async fn connect(configs: &[ToolServerConfig]) -> Self {
        let mut registry = ToolRegistry {
            peers: Vec::new(),
            services: Mutex::new(Vec::new()),
            servers: Vec::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            tools_map: HashMap::new(),
        };

        for config in configs {
            let name = config.name().to_string();
            match connect_one(config).await {
                Ok(service) => {
                    registry.register(&name, service).await;
                }
                Err(err) => {
                    error!(server = %name, %err, "failed to connect to tool server, skipping");
                }
            }
        }

        registry
    }

    async fn register(&mut self, config_name: &str, service: RunningService<RoleClient, ()>) {
        let index = self.peers.len();

        let (server_name, server_version, supports_tools, supports_resources, supports_prompts) =
            match service.peer_info() {
                Some(init) => (
                    init.server_info.name.to_string(),
                    init.server_info.version.to_string(),
                    init.capabilities.tools.is_some(),
                    init.capabilities.resources.is_some(),
                    init.capabilities.prompts.is_some(),
                ),
                None => (config_name.to_string(), String::new(), true, false, false),
            };

        if supports_tools {
            match service.list_all_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        let spec = ToolSpec::new(
                            tool.name.to_string(),
                            tool.description
                                .as_deref()
                                .unwrap_or_default()
                                .to_string(),
                            serde_json::to_value(&*tool.input_schema).unwrap_or_default(),
                        );
                        self.tools_map.insert(spec.name.clone(), index);
                        self.tools.push(spec);
                    }
                }
                Err(err) => {
                    warn!(server = %server_name, %err, "failed to list tools");
                }
            }
        }

        if supports_resources {
            match service.list_all_resources().await {
                Ok(resources) => {
                    for resource in resources {
                        self.resources.push(ResourceInfo {
                            uri: resource.uri.to_string(),
                            name: resource.name.to_string(),
                            description: resource.description.as_deref().map(str::to_string),
                            mime_type: resource.mime_type.as_deref().map(str::to_string),
                        });
                    }
                }
                Err(err) => {
                    warn!(server = %server_name, %err, "failed to list resources");
                }
            }
        }

        if supports_prompts {
            match service.list_all_prompts().await {
                Ok(prompts) => {
                    for prompt in prompts {
                        self.prompts.push(PromptInfo {
                            name: prompt.name.to_string(),
                            description: prompt.description.as_deref().map(str::to_string),
                        });
                    }
                }
                Err(err) => {
                    warn!(server = %server_name, %err, "failed to list prompts");
                }
            }
        }

        info!(server = %server_name, "connected to tool server");

        self.peers.push(service.peer().clone());
        self.servers.push(ServerSummary {
            name: server_name,
            version: server_version,
        });
        self.services.get_mut().push(service);
    }

    pub fn servers(&self) -> &[ServerSummary] {
        &self.servers
    }

    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    pub fn prompts(&self) -> &[PromptInfo] {
        &self.prompts
    }

    /// Disconnect every server, bounding each goodbye. Child-process
    /// transports take their process down with them.
    pub async fn shutdown(&self) {
        let services: Vec<_> = self.services.lock().await.drain(..).collect();
        for service in services {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, service.cancel()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%err, "error disconnecting tool server"),
                Err(_) => warn!("tool server did not disconnect in time"),
            }
        }
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    async fn call_tool(&self, name: &str, input: Value) -> (Value, bool) {
        let Some(&index) = self.tools_map.get(name) else {
            return (call_tool_error(format!("tool {name} is not found")), false);
        };

        let arguments = match input {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return (
                    call_tool_error(format!("tool input {other} is not a JSON object")),
                    false,
                );
            }
        };

        let result = self.peers[index]
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await;

        match result {
            Ok(result) => {
                let failed = result.is_error.unwrap_or(false);
                match serde_json::to_value(&result.content) {
                    Ok(content) => (content, !failed),
                    Err(err) => (
                        call_tool_error(format!("failed to encode tool result: {err}")),
                        false,
                    ),
                }
            }
            Err(err) => (call_tool_error(format!("tool call failed: {err}")), false),
        }
    }
}

async fn connect_one(config: &ToolServerConfig) -> anyhow::Result<RunningService<RoleClient, ()>> {
    match config {
        ToolServerConfig::Sse { url, .. } => {
            let transport = SseClientTransport::start(url.clone()).await?;
            let service = tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport))
                .await
                .map_err(|_| anyhow::anyhow!("handshake timed out"))??;
            Ok(service)
        }
        ToolServerConfig::Stdio { command, args, .. } => {
            let mut cmd = Command::new(command);
            cmd.args(args);
            let transport = TokioChildProcess::new(cmd)?;
            let service = tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport))
                .await
                .map_err(|_| anyhow::anyhow!("handshake timed out"))??;
            Ok(service)
        }
    }
}
