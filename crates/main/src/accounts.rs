use db::{
    project::Project,
    role::Role,
    schema::{projects, roles, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::Markup;
use rocket::{http::Status, request::FlashMessage};
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{page_of_body_and_flash_msg, page_title};

use crate::error::WorkflowError;

/// What the account page shows.
#[derive(Debug)]
pub struct AccountOverview {
    pub led: Vec<Project>,
    pub joined: Vec<Project>,
    /// Projects the user has asked to join and is still waiting on.
    pub requested: Vec<Project>,
    /// Outstanding requests to join projects the user leads.
    pub to_review: Vec<(Role, Project, String)>,
}

pub fn account_overview(
    conn: &mut impl SqliteConn,
    user: &User,
) -> QueryResult<AccountOverview> {
    let led = projects::table
        .filter(projects::lead_id.eq(user.id))
        .select(Project::as_select())
        .order_by(projects::name.asc())
        .load(conn)?;

    let joined = roles::table
        .inner_join(projects::table)
        .filter(roles::user_id.eq(user.id))
        .filter(Role::active())
        .select(Project::as_select())
        .order_by(projects::name.asc())
        .load(conn)?;

    let requested = roles::table
        .inner_join(projects::table)
        .filter(roles::user_id.eq(user.id))
        .filter(Role::pending())
        .select(Project::as_select())
        .order_by(projects::name.asc())
        .load(conn)?;

    let to_review = roles::table
        .inner_join(projects::table)
        .inner_join(users::table)
        .filter(projects::lead_id.eq(user.id))
        .filter(Role::pending())
        .select((Role::as_select(), Project::as_select(), users::username))
        .order_by(roles::created_at.asc())
        .load(conn)?;

    Ok(AccountOverview {
        led,
        joined,
        requested,
        to_review,
    })
}

fn project_list(projects: &[Project], empty: &str) -> Markup {
    maud::html! {
        @if projects.is_empty() {
            p class="text-muted" { (empty) }
        } @else {
            ul {
                @for project in projects {
                    li { a href=(project.url()) { (project.name) } }
                }
            }
        }
    }
}

#[get("/user")]
pub async fn account_page(
    user: User,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
    span: TracingSpan,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| -> Result<Markup, (Status, Markup)> {
        let overview = account_overview(conn, &user)
            .map_err(|e| WorkflowError::from(e).into_page(Some(&user)))?;

        let markup = maud::html!(
            (page_title(format!("Hello {}", user.display_name())))

            h3 { "Quick actions" }
            ul {
                li { a href="/projects/new" { "Start a project" } }
                li { a href="/events/new" { "Add an event" } }
                li { a href="/user/profile" { "Edit your profile" } }
                li { a href=(format!("/people/{}", user.username)) { "See your public profile" } }
                @if user.is_staff {
                    li { a href="/admin/config" { "Site settings" } }
                }
            }

            @if !overview.to_review.is_empty() {
                h3 { "Requests waiting for you" }
                ul {
                    @for (role, project, username) in &overview.to_review {
                        li {
                            (username) " wants to join "
                            a href=(format!("/projects/{}/edit", project.slug)) { (project.name) }
                            @if !role.message.is_empty() {
                                ": " em { (role.message) }
                            }
                        }
                    }
                }
            }

            h3 { "Projects I lead" }
            (project_list(&overview.led, "You don't lead any projects."))
            h3 { "Projects I'm on" }
            (project_list(&overview.joined, "You haven't joined any projects yet."))
            h3 { "Waiting to join" }
            (project_list(&overview.requested, "No outstanding requests."))
        );

        Ok(page_of_body_and_flash_msg(markup, flash, Some(&user)))
    })
    .instrument(span.0)
    .await
}
