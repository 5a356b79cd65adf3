//! Inbound webhook gateway.
//!
//! Validates an inbound webhook call against its trigger's configuration and
//! dispatches the workflow. Always returns a structured [`WebhookResponse`];
//! a thin HTTP controller (out of scope here) adapts it 1:1 into a response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use super::super::errors::TriggerStoreError;
use super::super::traits::{
    start_with_timeout, workflow_name, TriggerStore, WorkflowExecutor, WorkflowStart,
};
use super::super::types::{Trigger, TriggerType, WebhookConfig};

type HmacSha256 = Hmac<Sha256>;

/// An inbound webhook call, already decoded by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    /// Header name → value. Names are matched case-insensitively.
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub path_params: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub client_ip: String,
}

/// Outcome of one webhook call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    /// One of 200, 400, 401, 403, 404, 405, 500.
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<BTreeMap<String, Value>>,
}

impl WebhookResponse {
    fn accepted(run_id: String, inputs: BTreeMap<String, Value>) -> Self {
        Self {
            success: true,
            message: "Workflow triggered successfully".into(),
            http_status: 200,
            run_id: Some(run_id),
            inputs: Some(inputs),
        }
    }

    fn rejected(message: impl Into<String>, http_status: u16) -> Self {
        Self {
            success: false,
            message: message.into(),
            http_status,
            run_id: None,
            inputs: None,
        }
    }
}

/// The HMAC-SHA256 signature expected in `x-webhook-signature`:
/// base64 of HMAC(body-as-JSON-string, secret).
pub fn hmac_signature(body: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Synchronous request handler for inbound webhook calls.
pub struct WebhookGateway {
    store: Arc<dyn TriggerStore>,
    executor: Arc<dyn WorkflowExecutor>,
    executor_timeout: Duration,
}

impl WebhookGateway {
    pub fn new(store: Arc<dyn TriggerStore>, executor: Arc<dyn WorkflowExecutor>) -> Self {
        Self::with_timeout(store, executor, Duration::from_secs(30))
    }

    pub fn with_timeout(
        store: Arc<dyn TriggerStore>,
        executor: Arc<dyn WorkflowExecutor>,
        executor_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            executor_timeout,
        }
    }

    /// Validate and dispatch one webhook call.
    ///
    /// Validation short-circuits on the first failure, in a fixed order:
    /// existence (404), enabled (403), type (400), config (500), method
    /// (405), client IP (403), secret (401), required headers (400).
    /// Never raises; internal errors come back as a 500 response.
    pub async fn process_webhook(
        &self,
        trigger_id: &str,
        request: &WebhookRequest,
    ) -> WebhookResponse {
        tracing::info!(
            trigger_id = %trigger_id,
            method = %request.method,
            client_ip = %request.client_ip,
            "processing webhook"
        );

        match self.handle(trigger_id, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(trigger_id = %trigger_id, "error processing webhook: {e}");
                WebhookResponse::rejected(format!("Internal server error: {e}"), 500)
            }
        }
    }

    async fn handle(
        &self,
        trigger_id: &str,
        request: &WebhookRequest,
    ) -> Result<WebhookResponse, TriggerStoreError> {
        let Some(mut trigger) = self.store.find_by_id(trigger_id).await? else {
            tracing::warn!(trigger_id = %trigger_id, "webhook trigger not found");
            return Ok(WebhookResponse::rejected("Trigger not found", 404));
        };

        if !trigger.enabled {
            tracing::warn!(trigger_id = %trigger_id, "webhook trigger is disabled");
            return Ok(WebhookResponse::rejected("Trigger is disabled", 403));
        }

        if trigger.trigger_type != TriggerType::Webhook {
            tracing::warn!(
                trigger_id = %trigger_id,
                trigger_type = trigger.trigger_type.as_str(),
                "trigger is not a webhook type"
            );
            return Ok(WebhookResponse::rejected("Invalid trigger type", 400));
        }

        let Some(config) = trigger.webhook_config().cloned() else {
            tracing::error!(trigger_id = %trigger_id, "webhook trigger missing configuration");
            return Ok(WebhookResponse::rejected("Trigger configuration missing", 500));
        };

        if !method_allowed(&config, &request.method) {
            tracing::warn!(trigger_id = %trigger_id, method = %request.method, "HTTP method not allowed");
            return Ok(WebhookResponse::rejected("HTTP method not allowed", 405));
        }

        if !ip_allowed(&config, &request.client_ip) {
            tracing::warn!(trigger_id = %trigger_id, client_ip = %request.client_ip, "IP not whitelisted");
            return Ok(WebhookResponse::rejected("IP not allowed", 403));
        }

        if !secret_valid(&config, request) {
            tracing::warn!(trigger_id = %trigger_id, "invalid webhook secret");
            return Ok(WebhookResponse::rejected("Invalid webhook secret", 401));
        }

        if !required_headers_present(&config, &request.headers) {
            tracing::warn!(trigger_id = %trigger_id, "missing required headers");
            return Ok(WebhookResponse::rejected("Missing required headers", 400));
        }

        let now = Utc::now();
        let inputs = build_inputs(&trigger, &config, request, now);

        let start = WorkflowStart {
            workflow_name: workflow_name(&trigger.workflow_definition_id),
            version: 1,
            inputs: inputs.clone(),
            workflow_definition_id: trigger.workflow_definition_id.clone(),
            project_id: trigger.project_id.clone(),
            requested_by: trigger.created_by.clone(),
        };

        match start_with_timeout(self.executor.as_ref(), start, self.executor_timeout).await {
            Ok(run_id) => {
                trigger.record_success(&run_id, now);
                self.store.save(&trigger).await?;
                tracing::info!(
                    trigger_id = %trigger_id,
                    run_id = %run_id,
                    "workflow started from webhook"
                );
                Ok(WebhookResponse::accepted(run_id, inputs))
            }
            Err(e) => {
                tracing::error!(trigger_id = %trigger_id, "webhook workflow dispatch failed: {e}");
                trigger.record_failure(now);
                self.store.save(&trigger).await?;
                Ok(WebhookResponse::rejected(
                    format!("Internal server error: {e}"),
                    500,
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn method_allowed(config: &WebhookConfig, method: &str) -> bool {
    config.allowed_methods.is_empty()
        || config
            .allowed_methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method))
}

fn ip_allowed(config: &WebhookConfig, client_ip: &str) -> bool {
    config.ip_whitelist.is_empty() || config.ip_whitelist.iter().any(|ip| ip == client_ip)
}

/// Secret check, only enforced when the trigger carries a secret. Accepts an
/// exact `x-webhook-secret` header, or an `x-webhook-signature` equal to the
/// body's HMAC-SHA256 signature.
fn secret_valid(config: &WebhookConfig, request: &WebhookRequest) -> bool {
    let Some(secret) = config.webhook_secret.as_deref().filter(|s| !s.is_empty()) else {
        return true;
    };

    if header(&request.headers, "x-webhook-secret") == Some(secret) {
        return true;
    }

    if let Some(signature) = header(&request.headers, "x-webhook-signature") {
        let body = request.body.as_ref().map(Value::to_string).unwrap_or_default();
        return signature == hmac_signature(&body, secret);
    }

    false
}

fn required_headers_present(
    config: &WebhookConfig,
    headers: &BTreeMap<String, String>,
) -> bool {
    config
        .required_headers
        .iter()
        .all(|(name, expected)| header(headers, name) == Some(expected.as_str()))
}

/// Workflow inputs: trigger defaults, webhook metadata, then mapped path and
/// query params, then the body (mapped fields when a mapping is configured,
/// otherwise the whole object merged).
fn build_inputs(
    trigger: &Trigger,
    config: &WebhookConfig,
    request: &WebhookRequest,
    now: DateTime<Utc>,
) -> BTreeMap<String, Value> {
    let mut inputs = trigger.default_inputs.clone();

    inputs.insert("triggerId".into(), json!(trigger.id));
    inputs.insert("triggerType".into(), json!(TriggerType::Webhook.as_str()));
    inputs.insert("webhookTimestamp".into(), json!(now.to_rfc3339()));

    for (path_param, workflow_param) in &config.path_param_mapping {
        if let Some(value) = request.path_params.get(path_param) {
            inputs.insert(workflow_param.clone(), json!(value));
        }
    }

    for (query_param, workflow_param) in &config.query_param_mapping {
        if let Some(value) = request.query_params.get(query_param) {
            inputs.insert(workflow_param.clone(), json!(value));
        }
    }

    if let Some(body) = &request.body {
        match &config.body_mapping {
            Some(mapping) => {
                for (body_field, workflow_param) in mapping {
                    if let Some(value) = body.get(body_field) {
                        inputs.insert(workflow_param.clone(), value.clone());
                    }
                }
            }
            None => {
                if let Some(object) = body.as_object() {
                    for (key, value) in object {
                        inputs.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    inputs
}
