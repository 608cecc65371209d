use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};
use url::Url;

use super::Mailer;
use crate::error::{AppError, DeliveryError};

/// SendGrid v3 mail-send client.
pub struct SendGridMailer {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    from_email: String,
    from_name: String,
}

impl SendGridMailer {
    pub fn new(
        base_url: &str,
        api_key: String,
        from_email: String,
        from_name: String,
    ) -> Result<Self, AppError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("/v3/mail/send"))
            .map_err(|e| AppError::ConfigError(format!("Invalid SendGrid base URL: {}", e)))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            from_email,
            from_name,
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });

        let res = self.client.post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            debug!(to = %to, status = %status, "SendGrid accepted message");
            Ok(())
        } else {
            let detail = res.text().await.unwrap_or_default();
            error!(to = %to, status = %status, "SendGrid rejected message");
            Err(DeliveryError::Mail(format!("SendGrid returned {}: {}", status, detail)))
        }
    }
}
