use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error};

use super::Mailer;
use crate::config::NotifyConfig;
use crate::error::{AppError, DeliveryError};

/// Plain SMTP relay, authenticated when a username is configured.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &NotifyConfig) -> Result<Self, AppError> {
        let builder = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::ConfigError(format!("Invalid SMTP relay {}: {}", config.smtp_host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let mut builder = builder.port(config.smtp_port);
        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| AppError::ConfigError(format!("Invalid sender address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let recipient = to
            .parse::<Mailbox>()
            .map_err(|e| DeliveryError::Mail(format!("invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DeliveryError::Mail(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                debug!(to = %to, "SMTP relay accepted message");
                Ok(())
            }
            Err(e) => {
                error!(to = %to, error = %e, "SMTP send failed");
                Err(DeliveryError::Mail(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailerKind, Settings};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one SMTP session and returns the DATA section it received.
    async fn local_relay() -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"220 localhost ESMTP\r\n").await.unwrap();

            let mut data = String::new();
            let mut in_data = false;
            while let Ok(Some(line)) = lines.next_line().await {
                if in_data {
                    if line == "." {
                        in_data = false;
                        write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                    } else {
                        data.push_str(&line);
                        data.push('\n');
                    }
                    continue;
                }

                let command = line.to_ascii_uppercase();
                if command.starts_with("DATA") {
                    in_data = true;
                    write.write_all(b"354 end data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                } else if command.starts_with("QUIT") {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    write.write_all(b"250 localhost\r\n").await.unwrap();
                }
            }
            data
        });

        (port, handle)
    }

    fn smtp_config(port: u16) -> NotifyConfig {
        let mut settings = Settings::new_for_test().unwrap();
        settings.notify.mailer = MailerKind::Smtp;
        settings.notify.smtp_host = "127.0.0.1".into();
        settings.notify.smtp_port = port;
        settings.notify.smtp_starttls = false;
        settings.notify.from_email = "no-reply@credgate.test".into();
        settings.notify
    }

    #[tokio::test]
    async fn test_smtp_delivers_subject_and_body() {
        let (port, relay) = local_relay().await;
        let mailer = SmtpMailer::new(&smtp_config(port)).unwrap();

        mailer
            .send("a@x.com", "Email Verification", "Your verification code is: abc123")
            .await
            .unwrap();

        let data = relay.await.unwrap();
        assert!(data.contains("Subject: Email Verification"));
        assert!(data.contains("Your verification code is: abc123"));
    }

    #[tokio::test]
    async fn test_smtp_unreachable_relay_is_delivery_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mailer = SmtpMailer::new(&smtp_config(port)).unwrap();

        let result = mailer.send("a@x.com", "Email Verification", "body").await;
        assert!(matches!(result, Err(DeliveryError::Mail(_))));
    }

    #[test]
    fn test_invalid_sender_is_config_error() {
        let mut config = smtp_config(25);
        config.from_email = "not an address".into();

        assert!(matches!(SmtpMailer::new(&config), Err(AppError::ConfigError(_))));
    }
}
