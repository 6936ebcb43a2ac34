//! Emailing another user through the site, and the per-user email allowance
//! which every workflow that queues mail on somebody's behalf is charged
//! against.
use std::sync::Arc;

use chrono::Utc;
use db::{
    email::EmailRow,
    profile::Profile,
    schema::{profiles, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::{html, Markup};
use rocket::{
    form::Form,
    http::Status,
    response::{Flash, Redirect},
    State,
};
use serde::Serialize;
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{error_alert, page_of_body, page_title};

use crate::{
    config::AppConfig,
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
};

const MAX_SUBJECT_LEN: usize = 100;
const MAX_CONTACT_MESSAGE_LEN: usize = 5000;

/// Records that `user` is sending an email, or refuses with `RateLimited` if
/// their allowance does not cover it.
#[tracing::instrument(skip(conn, user), fields(user = user.id))]
pub fn charge_email(conn: &mut impl SqliteConn, user: &User) -> WorkflowResult<()> {
    let now = Utc::now().naive_utc();
    let profile = profiles::table
        .filter(profiles::user_id.eq(user.id))
        .select(Profile::as_select())
        .first(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    if !profile.can_send_email(now) {
        tracing::warn!(
            "user {} hit their email limit ({} of {} sent)",
            user.id,
            profile.num_emails_sent,
            profile.allowed_emails
        );
        return Err(WorkflowError::RateLimited(
            "You have sent too many emails recently. Please try again later."
                .to_string(),
        ));
    }

    diesel::update(profiles::table.filter(profiles::id.eq(profile.id)))
        .set((
            profiles::last_email_sent.eq(now),
            profiles::num_emails_sent.eq(profiles::num_emails_sent + 1),
        ))
        .execute(conn)?;
    Ok(())
}

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct ContactForm {
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    fn problems(&self) -> Vec<String> {
        let mut problems = vec![];
        let subject = self.subject.trim();
        if subject.is_empty() {
            problems.push("Error: please give your message a subject.".to_string());
        } else if subject.chars().count() > MAX_SUBJECT_LEN {
            problems.push(format!(
                "Error: subjects can be at most {MAX_SUBJECT_LEN} characters."
            ));
        }
        let message = self.message.trim();
        if message.is_empty() {
            problems.push("Error: the message is empty.".to_string());
        } else if message.chars().count() > MAX_CONTACT_MESSAGE_LEN {
            problems.push(format!(
                "Error: messages can be at most {MAX_CONTACT_MESSAGE_LEN} characters."
            ));
        }
        problems
    }
}

/// Queues `form` as an email from `sender` to the user called `username`.
/// Replies go straight to the sender's address.
#[tracing::instrument(skip(conn, sender, form, config), fields(user = sender.id))]
pub fn contact_user(
    conn: &mut impl SqliteConn,
    sender: &User,
    username: &str,
    form: &ContactForm,
    config: &AppConfig,
) -> WorkflowResult<EmailRow> {
    if !has_permission(Some(sender), &Permission::ContactUser, conn)? {
        return Err(WorkflowError::PermissionDenied(
            "You are not allowed to contact other users.",
        ));
    }

    let recipient = users::table
        .filter(User::with_name(username))
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    if recipient.id == sender.id {
        return Err(WorkflowError::invalid("Error: you cannot message yourself."));
    }

    let problems = form.problems();
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    charge_email(conn, sender)?;

    let subject = format!("[{}] {}", config.site_name, form.subject.trim());
    let body = format!(
        "{} ({}) sent you a message through {}:\n\n{}\n\n\
         Reply to this address to answer them: {}\n",
        sender.display_name(),
        sender.email,
        config.site_name,
        form.message.trim(),
        sender.email
    );
    let email = email::queue_mail(
        conn,
        &[(recipient.display_name(), recipient.email.as_str())],
        &subject,
        &body,
    )?;

    tracing::info!("user {} contacted user {}", sender.id, recipient.id);
    Ok(email)
}

fn contact_page(
    username: &str,
    form: &ContactForm,
    errors: &[String],
    user: &User,
) -> Markup {
    page_of_body(
        html! {
            (page_title(format!("Message {username}")))
            @for error in errors {
                (error_alert(Some(error)))
            }
            form method="post" action=(format!("/people/{username}/contact")) {
                div class="mb-3" {
                    label for="subject" class="form-label" { "Subject" }
                    input type="text" class="form-control" id="subject" name="subject" maxlength=(MAX_SUBJECT_LEN) value=(form.subject);
                }
                div class="mb-3" {
                    label for="message" class="form-label" { "Message" }
                    textarea class="form-control" id="message" name="message" rows="8" maxlength=(MAX_CONTACT_MESSAGE_LEN) { (form.message) }
                    div class="form-text" { "Your email address is shared with the recipient." }
                }
                button type="submit" class="btn btn-primary" { "Send" }
            }
        },
        Some(user),
    )
}

#[get("/people/<username>/contact", rank = 2)]
pub async fn contact_user_page(
    username: String,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, Result<Redirect, (Status, Markup)>> {
    let Some(user) = user else {
        return Err(Ok(Redirect::to("/login")));
    };
    db.run(move |conn| {
        let found = users::table
            .filter(User::with_name(&username))
            .count()
            .get_result::<i64>(conn)
            .map_err(WorkflowError::from)
            .and_then(|n| if n == 0 { Err(WorkflowError::NotFound) } else { Ok(()) });
        match found {
            Ok(()) => Ok(contact_page(&username, &ContactForm::default(), &[], &user)),
            Err(e) => Err(Err(e.into_page(Some(&user)))),
        }
    })
    .await
}

#[post("/people/<username>/contact", data = "<form>", rank = 2)]
pub async fn do_contact_user(
    username: String,
    user: User,
    form: Form<ContactForm>,
    db: DbConn,
    config: &State<AppConfig>,
    span: TracingSpan,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let db = Arc::new(db);
    let config = config.inner().clone();
    let form = form.into_inner();
    let person_url = format!("/people/{username}");

    let email = db
        .run(move |conn| {
            let result = conn.transaction(|conn| {
                contact_user(conn, &user, &username, &form, &config)
            });
            match result {
                Ok(email) => Ok(email),
                Err(WorkflowError::Validation(errors)) => Err((
                    Status::UnprocessableEntity,
                    contact_page(&username, &form, &errors, &user),
                )),
                Err(e @ WorkflowError::RateLimited(_)) => Err((
                    e.status(),
                    contact_page(&username, &form, &[e.to_string()], &user),
                )),
                Err(e) => Err(e.into_page(Some(&user))),
            }
        })
        .instrument(span.0)
        .await?;

    email::deliver(db, email);

    Ok(Flash::success(Redirect::to(person_url), "Your message has been sent."))
}

#[cfg(test)]
mod tests {
    use db::{profile::INITIAL_MAX_MESSAGES, schema::emails};

    use super::*;
    use crate::tests::fixtures::{make_user, test_db};

    fn count_emails(conn: &mut diesel::SqliteConnection) -> i64 {
        emails::table.count().get_result(conn).unwrap()
    }

    fn hello() -> ContactForm {
        ContactForm {
            subject: "Bees".to_string(),
            message: "Do you have a spare hive?".to_string(),
        }
    }

    #[test]
    fn test_contact_queues_an_email_to_the_recipient() {
        let mut conn = test_db();
        let sender = make_user(&mut conn, "sender", false);
        make_user(&mut conn, "keeper", false);
        let config = AppConfig::default();

        let email =
            contact_user(&mut conn, &sender, "keeper", &hello(), &config).unwrap();
        assert!(email.recipients.contains("keeper@example.com"));
        assert!(email.subject.ends_with("Bees"));
        assert!(email.body.contains("sender@example.com"));
        assert!(email.body.contains("Do you have a spare hive?"));

        let profile = crate::people::profile_of(&mut conn, sender.id).unwrap();
        assert_eq!(profile.num_emails_sent, 1);
        assert!(profile.last_email_sent.is_some());
    }

    #[test]
    fn test_second_message_within_the_hour_is_rate_limited() {
        let mut conn = test_db();
        let sender = make_user(&mut conn, "sender", false);
        make_user(&mut conn, "keeper", false);
        make_user(&mut conn, "drone", false);
        let config = AppConfig::default();

        contact_user(&mut conn, &sender, "keeper", &hello(), &config).unwrap();
        let again = contact_user(&mut conn, &sender, "drone", &hello(), &config);
        assert!(matches!(again, Err(WorkflowError::RateLimited(_))));
        assert_eq!(count_emails(&mut conn), 1);
    }

    #[test]
    fn test_exhausted_allowance_is_rate_limited() {
        let mut conn = test_db();
        let sender = make_user(&mut conn, "sender", false);
        make_user(&mut conn, "keeper", false);
        diesel::update(profiles::table.filter(profiles::user_id.eq(sender.id)))
            .set(profiles::num_emails_sent.eq(INITIAL_MAX_MESSAGES))
            .execute(&mut conn)
            .unwrap();

        let result = contact_user(
            &mut conn,
            &sender,
            "keeper",
            &hello(),
            &AppConfig::default(),
        );
        assert!(matches!(result, Err(WorkflowError::RateLimited(_))));
        assert_eq!(count_emails(&mut conn), 0);
    }

    #[test]
    fn test_bad_recipients_and_messages_are_refused() {
        let mut conn = test_db();
        let sender = make_user(&mut conn, "sender", false);
        make_user(&mut conn, "keeper", false);
        let config = AppConfig::default();

        assert!(matches!(
            contact_user(&mut conn, &sender, "nobody", &hello(), &config),
            Err(WorkflowError::NotFound)
        ));
        assert!(matches!(
            contact_user(&mut conn, &sender, "sender", &hello(), &config),
            Err(WorkflowError::Validation(_))
        ));

        let empty = ContactForm {
            subject: " ".to_string(),
            message: String::new(),
        };
        let WorkflowError::Validation(problems) =
            contact_user(&mut conn, &sender, "keeper", &empty, &config).unwrap_err()
        else {
            panic!("expected a validation error");
        };
        assert_eq!(problems.len(), 2);

        // refusals do not use up the allowance
        let profile = crate::people::profile_of(&mut conn, sender.id).unwrap();
        assert_eq!(profile.num_emails_sent, 0);
        assert_eq!(count_emails(&mut conn), 0);
    }
}
