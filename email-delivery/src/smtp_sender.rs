use async_trait::async_trait;
use interfaces::{DeliveryError, DeliveryGateway};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

/// Port on which SMTP servers expect implicit TLS instead of STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Clone)]
pub struct SmtpSenderConfig {
    pub address: String,
    pub secret: String,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Debug for SmtpSenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSenderConfig")
            .field("address", &self.address)
            .field("secret", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Sends rendered reports as HTML mail through an authenticated SMTP relay.
pub struct SmtpDelivery {
    sender: Mailbox,
    host: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDelivery {
    /// Build the transport. Nothing is sent over the network until `deliver`.
    pub fn new(config: SmtpSenderConfig) -> Result<Self, DeliveryError> {
        let sender = parse_mailbox(&config.address)?;

        let builder = if config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| DeliveryError::Transport(format!("SMTP relay {}: {}", config.host, e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.address.clone(), config.secret))
            .build();

        info!(
            "SMTP delivery configured for {} via {}:{}",
            config.address, config.host, config.port
        );

        Ok(Self {
            sender,
            host: config.host,
            transport,
        })
    }

    /// Compose the HTML message without sending it.
    pub fn build_message(
        &self,
        destination: &str,
        subject: &str,
        rich_content: &str,
    ) -> Result<Message, DeliveryError> {
        let recipient = parse_mailbox(destination)?;

        Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(rich_content.to_string())
            .map_err(|e| DeliveryError::Message(e.to_string()))
    }
}

#[async_trait]
impl DeliveryGateway for SmtpDelivery {
    fn gateway_name(&self) -> String {
        format!("SMTP ({})", self.host)
    }

    async fn deliver(
        &self,
        destination: &str,
        subject: &str,
        rich_content: &str,
    ) -> Result<(), DeliveryError> {
        let message = self.build_message(destination, subject, rich_content)?;

        debug!("Sending '{}' to {} via {}", subject, destination, self.host);
        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        info!("Email sent successfully to {}", destination);
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}
