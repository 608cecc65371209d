use async_trait::async_trait;
use tracing::{debug, error};
use url::Url;

use super::SmsProvider;
use crate::error::{AppError, DeliveryError};

/// Twilio Programmable Messaging client.
pub struct TwilioSms {
    client: reqwest::Client,
    endpoint: Url,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSms {
    pub fn new(
        base_url: &str,
        account_sid: String,
        auth_token: String,
        from_number: String,
    ) -> Result<Self, AppError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(&format!("/2010-04-01/Accounts/{}/Messages.json", account_sid)))
            .map_err(|e| AppError::ConfigError(format!("Invalid Twilio base URL: {}", e)))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            account_sid,
            auth_token,
            from_number,
        })
    }
}

#[async_trait]
impl SmsProvider for TwilioSms {
    async fn send_verification_sms(&self, phone_number: &str, code: &str) -> Result<(), DeliveryError> {
        let body = format!("Your verification code: {}", code);
        let res = self.client.post(self.endpoint.clone())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", phone_number),
                ("From", self.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeliveryError::Sms(e.to_string()))?;

        let status = res.status();
        if status.is_success() {
            debug!(to = %phone_number, "Twilio accepted message");
            Ok(())
        } else {
            error!(to = %phone_number, status = %status, "Twilio rejected message");
            Err(DeliveryError::Sms(format!("Twilio returned {}", status)))
        }
    }
}
