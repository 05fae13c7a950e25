use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{AgentExecutor, AgentOutput};
use crate::core::llm::{ChatMessage, Completion, LlmProvider, estimate_cost, extract_json_block};
use crate::core::plan::GraphNode;

/// Runs an agent node as a single chat completion.
///
/// The node config may carry `model`, `systemPrompt`, `fallbackModel` (tried
/// once when the primary model fails) and `apiKeyEnv` (the variable holding
/// the credential to use). The run input and the context gathered so far are
/// sent as the user message. Replies that parse as JSON are kept structured.
pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
    default_model: String,
}

impl LlmExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }
}

fn build_messages(node: &GraphNode, input: &Value, context: &Map<String, Value>) -> Vec<ChatMessage> {
    let system = node
        .config
        .get("systemPrompt")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "You are {}, one agent in a multi-agent workflow. Complete your part of the task and reply concisely.",
                node.display_label()
            )
        });

    let mut user = String::from("## Input\n");
    user.push_str(&pretty(input));
    if !context.is_empty() {
        user.push_str("\n\n## Results from earlier agents\n");
        user.push_str(&pretty(&Value::Object(context.clone())));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

fn config_str<'a>(node: &'a GraphNode, key: &str) -> Option<&'a str> {
    node.config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn credential(node: &GraphNode) -> Option<String> {
    let var = config_str(node, "apiKeyEnv")?;
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ => {
            warn!("{} is not set; [{}] uses the default credential", var, node.display_label());
            None
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn parse_output(content: &str) -> Value {
    extract_json_block(content)
        .and_then(|block| serde_json::from_str(block).ok())
        .unwrap_or_else(|| Value::String(content.trim().to_string()))
}

impl LlmExecutor {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        api_key: Option<&str>,
    ) -> anyhow::Result<Completion> {
        match api_key {
            Some(key) => self.provider.generate_with_key(model, messages, key).await,
            None => self.provider.generate(model, messages).await,
        }
    }
}

#[async_trait]
impl AgentExecutor for LlmExecutor {
    async fn execute(
        &self,
        node: &GraphNode,
        input: &Value,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> anyhow::Result<AgentOutput> {
        let mut model = config_str(node, "model")
            .unwrap_or(&self.default_model)
            .to_string();
        let fallback = config_str(node, "fallbackModel").filter(|f| *f != model);
        let api_key = credential(node);
        let messages = build_messages(node, input, context);

        let mut outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("cancelled")),
            res = self.complete(&model, &messages, api_key.as_deref()) => res,
        };
        if let (Err(e), Some(fallback)) = (&outcome, fallback) {
            warn!(
                "[{}] {} failed ({}), retrying with {}",
                node.display_label(),
                model,
                e,
                fallback
            );
            model = fallback.to_string();
            outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(anyhow!("cancelled")),
                res = self.complete(&model, &messages, api_key.as_deref()) => res,
            };
        }
        let completion = outcome?;

        Ok(AgentOutput {
            output: parse_output(&completion.content),
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            cost_usd: estimate_cost(&model, completion.tokens_in, completion.tokens_out),
        })
    }
}
