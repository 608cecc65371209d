//! Outbound delivery of verification codes.
//!
//! The credential core only sees the `Mailer` and `SmsProvider` traits. The
//! concrete provider (log, SendGrid or SMTP for mail; log or Twilio for SMS)
//! is picked once, at composition time, through the `MailerBackend` /
//! `SmsBackend` enums.

mod sendgrid;
mod smtp;
mod twilio;

use async_trait::async_trait;
use tracing::info;

use crate::config::{MailerKind, NotifyConfig, SmsKind};
use crate::error::{AppError, DeliveryError};

pub use sendgrid::SendGridMailer;
pub use smtp::SmtpMailer;
pub use twilio::TwilioSms;

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait SmsProvider: Send + Sync + 'static {
    async fn send_verification_sms(&self, phone_number: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Development mailer: records that a message would have been sent.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), DeliveryError> {
        info!(to = %to, subject = %subject, "Mail delivery skipped (log mailer)");
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogSms;

#[async_trait]
impl SmsProvider for LogSms {
    async fn send_verification_sms(&self, phone_number: &str, _code: &str) -> Result<(), DeliveryError> {
        info!(to = %phone_number, "SMS delivery skipped (log sender)");
        Ok(())
    }
}

pub enum MailerBackend {
    Log(LogMailer),
    SendGrid(SendGridMailer),
    Smtp(SmtpMailer),
}

impl MailerBackend {
    pub fn from_config(config: &NotifyConfig) -> Result<Self, AppError> {
        match config.mailer {
            MailerKind::Log => Ok(MailerBackend::Log(LogMailer)),
            MailerKind::Sendgrid => Ok(MailerBackend::SendGrid(SendGridMailer::new(
                &config.sendgrid_base_url,
                config.sendgrid_api_key.clone(),
                config.from_email.clone(),
                config.from_name.clone(),
            )?)),
            MailerKind::Smtp => Ok(MailerBackend::Smtp(SmtpMailer::new(config)?)),
        }
    }
}

#[async_trait]
impl Mailer for MailerBackend {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        match self {
            MailerBackend::Log(m) => m.send(to, subject, body).await,
            MailerBackend::SendGrid(m) => m.send(to, subject, body).await,
            MailerBackend::Smtp(m) => m.send(to, subject, body).await,
        }
    }
}

pub enum SmsBackend {
    Log(LogSms),
    Twilio(TwilioSms),
}

impl SmsBackend {
    pub fn from_config(config: &NotifyConfig) -> Result<Self, AppError> {
        match config.sms {
            SmsKind::Log => Ok(SmsBackend::Log(LogSms)),
            SmsKind::Twilio => Ok(SmsBackend::Twilio(TwilioSms::new(
                &config.twilio_base_url,
                config.twilio_account_sid.clone(),
                config.twilio_auth_token.clone(),
                config.twilio_from_number.clone(),
            )?)),
        }
    }
}

#[async_trait]
impl SmsProvider for SmsBackend {
    async fn send_verification_sms(&self, phone_number: &str, code: &str) -> Result<(), DeliveryError> {
        match self {
            SmsBackend::Log(s) => s.send_verification_sms(phone_number, code).await,
            SmsBackend::Twilio(s) => s.send_verification_sms(phone_number, code).await,
        }
    }
}
