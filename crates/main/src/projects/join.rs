use std::sync::Arc;

use db::{
    email::EmailRow,
    project::{Moderation, Project},
    role::{Role, RoleStatus},
    schema::{roles, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::{
    dsl::{exists, now, select},
    prelude::*,
};
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

use super::load_project;
use crate::{
    config::{project_moderation, AppConfig},
    error::{is_unique_violation, WorkflowError, WorkflowResult},
};

const MAX_JOIN_MESSAGE_LEN: usize = 500;

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct JoinForm {
    pub message: String,
}

fn already_requested(project: &Project) -> WorkflowError {
    WorkflowError::DuplicateRequest(format!(
        "You have already asked to join {} (or are already a member).",
        project.name
    ))
}

/// Asks to join the project with the given slug.
///
/// Creates a pending role and queues an email to the lead in the caller's
/// transaction. The returned outbox row should be delivered once that
/// transaction has committed.
#[tracing::instrument(skip(conn, user, message, config), fields(user = user.id))]
pub fn request_join(
    conn: &mut impl SqliteConn,
    user: &User,
    slug: &str,
    message: &str,
    moderation: Moderation,
    config: &AppConfig,
) -> WorkflowResult<(Role, EmailRow)> {
    let project = load_project(conn, slug, moderation)?;

    if message.chars().count() > MAX_JOIN_MESSAGE_LEN {
        return Err(WorkflowError::invalid(format!(
            "Error: messages can be at most {MAX_JOIN_MESSAGE_LEN} characters."
        )));
    }

    if project.lead_id == user.id {
        return Err(already_requested(&project));
    }

    let has_role = select(exists(
        roles::table
            .filter(roles::project_id.eq(project.id))
            .filter(roles::user_id.eq(user.id)),
    ))
    .get_result::<bool>(conn)?;
    if has_role {
        tracing::warn!(
            "user {} asked to join project {} again",
            user.id,
            project.slug
        );
        return Err(already_requested(&project));
    }

    crate::people::contact::charge_email(conn, user)?;

    let role = diesel::insert_into(roles::table)
        .values((
            roles::project_id.eq(project.id),
            roles::user_id.eq(user.id),
            roles::status.eq(RoleStatus::Requested.code()),
            roles::message.eq(message),
            roles::created_at.eq(now),
        ))
        .returning(Role::as_returning())
        .get_result(conn)
        .map_err(|e| {
            if is_unique_violation(&e) {
                already_requested(&project)
            } else {
                e.into()
            }
        })?;

    let lead = users::table
        .filter(users::id.eq(project.lead_id))
        .select(User::as_select())
        .first(conn)?;

    let subject = format!(
        "[{}] {} would like to join {}",
        config.site_name,
        user.display_name(),
        project.name
    );
    let body = join_request_body(&project, user, &role, config);
    let email = email::queue_mail(
        conn,
        &[(lead.display_name(), lead.email.as_str())],
        &subject,
        &body,
    )?;

    tracing::info!("user {} asked to join project {}", user.id, project.slug);
    Ok((role, email))
}

fn join_request_body(
    project: &Project,
    user: &User,
    role: &Role,
    config: &AppConfig,
) -> String {
    let mut body = format!(
        "{} has asked to join {}.\n\n",
        user.display_name(),
        project.name
    );
    if !role.message.trim().is_empty() {
        body.push_str(&format!("They wrote:\n\n{}\n\n", role.message.trim()));
    }
    body.push_str(&format!(
        "You can approve or decline the request on the project's edit page:\n\
         {}/projects/{}/edit\n",
        config.base_url.trim_end_matches('/'),
        project.slug
    ));
    body
}

fn join_page(
    slug: &str,
    message: &str,
    notice: Option<&str>,
    user: &User,
) -> Markup {
    page_of_body(
        html! {
            (page_title("Ask to join"))
            (error_alert(notice))
            form method="post" action=(format!("/projects/{slug}/join")) {
                div class="mb-3" {
                    label for="message" class="form-label" { "Tell the project lead a little about yourself" }
                    textarea class="form-control" id="message" name="message" rows="4" maxlength=(MAX_JOIN_MESSAGE_LEN) { (message) }
                }
                button type="submit" class="btn btn-primary" { "Send request" }
            }
        },
        Some(user),
    )
}

#[get("/projects/<slug>/join", rank = 3)]
pub async fn join_project_page(
    slug: String,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, Result<Redirect, (Status, Markup)>> {
    let Some(user) = user else {
        return Err(Ok(Redirect::to("/login")));
    };
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let project = load_project(conn, &slug, moderation)?;
            Ok(join_page(&project.slug, "", None, &user))
        })
        .map_err(|e| Err(e.into_page(Some(&user))))
    })
    .await
}

#[post("/projects/<slug>/join", data = "<form>", rank = 3)]
pub async fn do_join_project(
    slug: String,
    user: User,
    form: Form<JoinForm>,
    db: DbConn,
    config: &State<AppConfig>,
    span: TracingSpan,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let db = Arc::new(db);
    let config = config.inner().clone();
    let message = form.into_inner().message;
    let project_url = format!("/projects/{slug}");

    let email = db
        .run(move |conn| {
            let result = conn.transaction(|conn| -> WorkflowResult<_> {
                let moderation = project_moderation(conn)?;
                request_join(conn, &user, &slug, &message, moderation, &config)
            });
            match result {
                Ok((_, email)) => Ok(email),
                Err(e @ WorkflowError::DuplicateRequest(_))
                | Err(e @ WorkflowError::RateLimited(_))
                | Err(e @ WorkflowError::Validation(_)) => Err((
                    e.status(),
                    join_page(&slug, &message, Some(&e.to_string()), &user),
                )),
                Err(e) => Err(e.into_page(Some(&user))),
            }
        })
        .instrument(span.0)
        .await?;

    email::deliver(db, email);

    Ok(Flash::success(
        Redirect::to(project_url),
        "Your request has been sent to the project lead.",
    ))
}

#[cfg(test)]
mod tests {
    use db::schema::{emails, projects};

    use super::*;
    use crate::tests::fixtures::{add_role, make_project, make_user, test_db};

    fn count_roles(conn: &mut diesel::SqliteConnection) -> i64 {
        roles::table.count().get_result(conn).unwrap()
    }

    fn count_emails(conn: &mut diesel::SqliteConnection) -> i64 {
        emails::table.count().get_result(conn).unwrap()
    }

    #[test]
    fn test_second_request_is_a_duplicate() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let user = make_user(&mut conn, "hopeful", false);
        make_project(&mut conn, "hive", &lead);
        let config = AppConfig::default();

        let (role, email) = request_join(
            &mut conn,
            &user,
            "hive",
            "I keep bees",
            Moderation::Unmoderated,
            &config,
        )
        .unwrap();
        assert!(role.is_pending());
        assert_eq!(role.message, "I keep bees");
        assert_eq!(email.recipients, "lead <lead@example.com>");
        assert!(email.body.contains("I keep bees"));
        assert!(email.body.contains("http://localhost:8000/projects/hive/edit"));
        assert_eq!(email.sent_at, None);

        let err = request_join(
            &mut conn,
            &user,
            "hive",
            "again",
            Moderation::Unmoderated,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateRequest(_)));
        assert_eq!(err.status(), Status::Conflict);

        assert_eq!(count_roles(&mut conn), 1);
        assert_eq!(count_emails(&mut conn), 1);
    }

    #[test]
    fn test_members_and_leads_cannot_request() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &member, RoleStatus::Approved);
        let config = AppConfig::default();

        for user in [&lead, &member] {
            let err = request_join(
                &mut conn,
                user,
                "hive",
                "",
                Moderation::Unmoderated,
                &config,
            )
            .unwrap_err();
            assert!(matches!(err, WorkflowError::DuplicateRequest(_)));
        }
        assert_eq!(count_roles(&mut conn), 1);
        assert_eq!(count_emails(&mut conn), 0);
    }

    #[test]
    fn test_requests_count_against_the_email_allowance() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let user = make_user(&mut conn, "hopeful", false);
        make_project(&mut conn, "hive", &lead);
        make_project(&mut conn, "wasps", &lead);
        let config = AppConfig::default();

        request_join(&mut conn, &user, "hive", "", Moderation::Unmoderated, &config)
            .unwrap();
        let err = request_join(
            &mut conn,
            &user,
            "wasps",
            "",
            Moderation::Unmoderated,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::RateLimited(_)));
        assert_eq!(err.status(), Status::TooManyRequests);

        assert_eq!(count_roles(&mut conn), 1);
        assert_eq!(count_emails(&mut conn), 1);
    }

    #[test]
    fn test_pending_requests_are_unique_in_storage() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let user = make_user(&mut conn, "hopeful", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &user, RoleStatus::Requested);

        let err = diesel::insert_into(roles::table)
            .values((
                roles::project_id.eq(project.id),
                roles::user_id.eq(user.id),
                roles::status.eq(RoleStatus::REQUESTED),
                roles::message.eq(""),
                roles::created_at.eq(now),
            ))
            .execute(&mut conn)
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn test_unapproved_projects_are_hidden_under_moderation() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let user = make_user(&mut conn, "hopeful", false);
        let project = make_project(&mut conn, "hive", &lead);
        diesel::update(projects::table.filter(projects::id.eq(project.id)))
            .set(projects::approved.eq(false))
            .execute(&mut conn)
            .unwrap();

        let err = request_join(
            &mut conn,
            &user,
            "hive",
            "",
            Moderation::ApprovedOnly,
            &AppConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound));
        assert_eq!(count_roles(&mut conn), 0);
    }
}
