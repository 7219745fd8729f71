//! HTTP client for the agent endpoint under evaluation.

use std::{collections::BTreeMap, time::{Duration, Instant}};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::http::{build_http_client, truncate_body};
use crate::core::{
    domain::FlowConfig,
    error::{Error, Result},
    ports::{AgentFlowClient, AgentResponse},
};

/// Posts `{sessionId, message, inputVariables}` as JSON and reads the answer from
/// the flow's `response_field`.
#[derive(Clone)]
pub struct HttpAgentFlowClient {
    http: reqwest::Client,
}

impl HttpAgentFlowClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
        })
    }
}

#[async_trait]
impl AgentFlowClient for HttpAgentFlowClient {
    async fn invoke(
        &self,
        flow: &FlowConfig,
        session_id: &str,
        message: &str,
        input_variables: &BTreeMap<String, String>,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        let mut request = self
            .http
            .post(&flow.endpoint)
            .timeout(Duration::from_millis(flow.timeout_ms.max(1)))
            .json(&json!({
                "sessionId": session_id,
                "message": message,
                "inputVariables": input_variables,
            }));
        for (name, value) in &flow.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                Error::Invocation(format!(
                    "flow '{}' timed out after {}ms",
                    flow.id, flow.timeout_ms
                ))
            } else {
                Error::Invocation(format!("flow '{}' request failed: {err}", flow.id))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Invocation(format!(
                "flow '{}' returned {status}: {}",
                flow.id,
                truncate_body(&body, 300)
            )));
        }
        let payload: Value = response.json().await.map_err(|err| {
            Error::Invocation(format!("flow '{}' returned invalid JSON: {err}", flow.id))
        })?;
        let answer = extract_field(&payload, &flow.response_field).ok_or_else(|| {
            Error::Invocation(format!(
                "flow '{}' response has no '{}' field",
                flow.id, flow.response_field
            ))
        })?;

        let execution_time_ms = started.elapsed().as_millis() as i64;
        debug!(flow_id = %flow.id, session_id, execution_time_ms, "Agent flow answered");
        Ok(AgentResponse {
            answer,
            execution_time_ms,
        })
    }
}

/// Walks a dotted path (`data.answer`, `choices.0.text`) through objects and arrays.
/// Strings are returned as is, other values in their JSON form.
pub fn extract_field(payload: &Value, path: &str) -> Option<String> {
    let mut current = payload;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
