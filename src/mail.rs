use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::config::SmtpArgs;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one plaintext message.
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Authenticated relay, upgraded with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(args: &SmtpArgs) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&args.smtp_host)?
            .port(args.smtp_port)
            .credentials(Credentials::new(
                args.smtp_username.clone(),
                args.smtp_password.clone(),
            ))
            .build();
        let from = args.sender().parse()?;

        Ok(Self { transport, from })
    }
}

/// Builds the plaintext message for one recipient.
pub fn compose(from: &Mailbox, to: &str, subject: &str, body: &str) -> anyhow::Result<Message> {
    Message::builder()
        .from(from.clone())
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_owned())
        .map_err(Into::into)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = compose(&self.from, to, subject, body)?;
        self.transport.send(message).await?;
        Ok(())
    }
}
