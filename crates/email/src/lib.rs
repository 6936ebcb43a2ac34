//! Sends emails.
//!
//! Mail goes through an outbox: [`queue_mail`] writes an `emails` row inside
//! the caller's transaction and [`deliver`] hands it to SMTP once that
//! transaction has committed. In debug builds nothing leaves the machine; the
//! message is logged and marked as sent.
use std::sync::Arc;

use db::{email::EmailRow, schema::emails, DbConn, SqliteConn};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("missing mail setting {0}")]
    MissingSetting(&'static str),
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A `(display name, address)` pair.
pub type Recipient<'a> = (&'a str, &'a str);

fn format_recipients(to: &[Recipient<'_>]) -> String {
    to.iter()
        .map(|(name, email)| format!("{name} <{email}>"))
        .collect::<Vec<_>>()
        .join(",")
}

fn mail_domain() -> String {
    std::env::var("SMTP_DOMAIN").unwrap_or_else(|_| "localhost".to_string())
}

/// Records a message in the outbox. Nothing is sent until [`deliver`] is
/// called with the returned row.
#[tracing::instrument(skip(conn, body))]
pub fn queue_mail(
    conn: &mut impl SqliteConn,
    to: &[Recipient<'_>],
    subject: &str,
    body: &str,
) -> QueryResult<EmailRow> {
    let message_id = format!("{}@{}", Uuid::now_v7(), mail_domain());

    let row = diesel::insert_into(emails::table)
        .values((
            emails::message_id.eq(&message_id),
            emails::recipients.eq(format_recipients(to)),
            emails::subject.eq(subject),
            emails::body.eq(body),
            emails::created_at.eq(diesel::dsl::now),
        ))
        .returning(EmailRow::as_returning())
        .get_result(conn)?;

    tracing::info!("queued email {} to {}", row.message_id, row.recipients);
    Ok(row)
}

/// Sends a queued message in the background. Failures are logged and the row
/// is left unsent.
pub fn deliver(db: Arc<DbConn>, email: EmailRow) {
    rocket::tokio::spawn(async move {
        let email_id = email.id;
        let message_id = email.message_id.clone();

        if let Err(e) = transmit(&email).await {
            tracing::warn!("could not deliver email {message_id}: {e}");
            return;
        }

        let marked = db
            .run(move |conn| {
                diesel::update(emails::table.filter(emails::id.eq(email_id)))
                    .set(emails::sent_at.eq(diesel::dsl::now))
                    .execute(conn)
            })
            .await;
        if let Err(e) = marked {
            tracing::warn!("email {message_id} sent but not marked: {e}");
        }
    });
}

#[cfg(debug_assertions)]
async fn transmit(email: &EmailRow) -> Result<(), MailError> {
    tracing::info!(
        "not sending email {} to {} in a debug build:\n{}\n\n{}",
        email.message_id,
        email.recipients,
        email.subject,
        email.body
    );
    Ok(())
}

#[cfg(not(debug_assertions))]
async fn transmit(email: &EmailRow) -> Result<(), MailError> {
    use lettre::{
        message::{header::ContentType, Mailbox},
        transport::smtp::authentication::Credentials,
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    };

    fn setting(key: &'static str) -> Result<String, MailError> {
        std::env::var(key).map_err(|_| MailError::MissingSetting(key))
    }

    let from: Mailbox = setting("SMTP_FROM")?.parse()?;
    let mut msg = Message::builder()
        .from(from)
        .message_id(Some(email.message_id.clone()))
        .subject(email.subject.clone());
    for recipient in email.recipients.split(',') {
        msg = msg.to(recipient.parse()?);
    }
    let msg = msg
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())?;

    let creds =
        Credentials::new(setting("SMTP_USERNAME")?, setting("SMTP_PASSWORD")?);
    let mailer: AsyncSmtpTransport<Tokio1Executor> =
        AsyncSmtpTransport::<Tokio1Executor>::relay(&setting("SMTP_HOST")?)?
            .credentials(creds)
            .build();

    mailer.send(msg).await?;
    Ok(())
}
