use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::http::{build_http_client, truncate_body};
use crate::core::{
    error::{Error, Result},
    ports::{WebhookDelivery, WebhookRequest},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends rendered webhook requests once; no retries.
#[derive(Clone)]
pub struct HttpWebhookDelivery {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookDelivery {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            timeout: DEFAULT_TIMEOUT,
        })
    }
}

#[async_trait]
impl WebhookDelivery for HttpWebhookDelivery {
    async fn deliver(&self, request: &WebhookRequest) -> Result<()> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::Webhook(format!("unsupported method '{}'", request.method)))?;
        let mut outbound = self
            .http
            .request(method, &request.url)
            .timeout(self.timeout)
            .query(&request.query)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            outbound = outbound.header(name, value);
        }

        let response = outbound
            .send()
            .await
            .map_err(|err| Error::Webhook(format!("request to {} failed: {err}", request.url)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Webhook(format!(
                "{} answered {status}: {}",
                request.url,
                truncate_body(&body, 200)
            )));
        }
        debug!(url = %request.url, %status, "Webhook accepted");
        Ok(())
    }
}
