//! Outbound notifications for run lifecycle transitions.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::core::{
    domain::{Run, WebhookConfig, WebhookEvent},
    error::{Error, Result},
    ports::{Clock, TemplateRenderer, WebhookDelivery, WebhookRequest},
};

pub const SIGNATURE_HEADER: &str = "X-Flowbench-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Renders and hands off webhook calls. Delivery runs detached and its failures
/// never reach the run.
pub struct WebhookDispatcher {
    renderer: Arc<dyn TemplateRenderer>,
    delivery: Arc<dyn WebhookDelivery>,
    clock: Arc<dyn Clock>,
}

impl WebhookDispatcher {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        delivery: Arc<dyn WebhookDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            renderer,
            delivery,
            clock,
        }
    }

    pub fn on_transition(&self, webhook: Option<&WebhookConfig>, run: &Run, event: WebhookEvent) {
        let Some(webhook) = webhook.filter(|hook| hook.subscribes_to(event)) else {
            return;
        };
        let request = match self.build_request(webhook, run, event) {
            Ok(request) => request,
            Err(err) => {
                warn!(run_id = %run.id, webhook_id = %webhook.id, event = event.as_str(), error = %err, "Webhook rendering failed");
                return;
            }
        };
        let delivery = Arc::clone(&self.delivery);
        tokio::spawn(async move {
            match delivery.deliver(&request).await {
                Ok(()) => debug!(
                    run_id = %request.run_id,
                    webhook_id = %request.webhook_id,
                    event = request.event.as_str(),
                    "Webhook delivered"
                ),
                Err(err) => warn!(
                    run_id = %request.run_id,
                    webhook_id = %request.webhook_id,
                    event = request.event.as_str(),
                    error = %err,
                    "Webhook delivery failed"
                ),
            }
        });
    }

    pub fn build_request(
        &self,
        webhook: &WebhookConfig,
        run: &Run,
        event: WebhookEvent,
    ) -> Result<WebhookRequest> {
        let variables = template_variables(run, event, self.clock.now_ms());
        let render = |template: &str| self.renderer.render(template, &variables);

        let url = render(&webhook.url)?;
        let query = webhook
            .query_params
            .iter()
            .map(|(key, value)| Ok((key.clone(), render(value)?)))
            .collect::<Result<Vec<_>>>()?;
        let mut headers = webhook
            .headers
            .iter()
            .map(|(key, value)| Ok((key.clone(), render(value)?)))
            .collect::<Result<Vec<_>>>()?;
        let body = match &webhook.body_template {
            Some(template) => render(template)?,
            None => serde_json::to_string(&variables)
                .map_err(|err| Error::TemplateRendering(err.to_string()))?,
        };

        if !headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(secret) = &webhook.secret {
            headers.push((SIGNATURE_HEADER.to_string(), sign(secret, &body)?));
        }

        Ok(WebhookRequest {
            webhook_id: webhook.id.clone(),
            event,
            run_id: run.id.clone(),
            method: webhook.method.to_uppercase(),
            url,
            query,
            headers,
            body,
        })
    }
}

/// Values available to `{{variable}}` placeholders.
pub fn template_variables(run: &Run, event: WebhookEvent, timestamp: i64) -> Value {
    json!({
        "runId": run.id,
        "testId": run.test_id,
        "testName": run.test_name,
        "testType": run.test_type.as_str(),
        "status": run.status.as_str(),
        "event": event.as_str(),
        "errorMessage": run.error_message.clone().unwrap_or_default(),
        "totalItems": run.total_items(),
        "completedItems": run.completed_items(),
        "startedAt": run.started_at,
        "completedAt": run.completed_at,
        "timestamp": timestamp,
        "isFullyEvaluated": run.is_fully_evaluated,
    })
}

/// `sha256=<hex>` HMAC of the body.
pub fn sign(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| Error::Webhook(format!("invalid signing secret: {err}")))?;
    mac.update(body.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
