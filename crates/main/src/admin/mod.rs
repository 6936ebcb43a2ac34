use db::{
    project::Project,
    schema::{projects, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::{html, Markup};
use rocket::{
    http::Status,
    request::FlashMessage,
    response::{Flash, Redirect},
};
use ui::{page_of_body_and_flash_msg, page_title};

use crate::{
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
};

pub mod config;

/// Projects waiting on a moderator, oldest first, with their lead's name.
pub fn awaiting_approval(
    conn: &mut impl SqliteConn,
) -> QueryResult<Vec<(Project, String)>> {
    projects::table
        .inner_join(users::table)
        .filter(projects::approved.eq(false))
        .select((Project::as_select(), users::username))
        .order_by((projects::created_at.asc(), projects::id.asc()))
        .load(conn)
}

#[tracing::instrument(skip(conn, user), fields(user = user.id))]
pub fn approve_project(
    conn: &mut impl SqliteConn,
    user: &User,
    project_id: i64,
) -> WorkflowResult<Project> {
    if !has_permission(Some(user), &Permission::ModifySiteConfig, conn)? {
        return Err(WorkflowError::PermissionDenied(
            "Only staff can approve projects.",
        ));
    }

    let project = diesel::update(projects::table.filter(projects::id.eq(project_id)))
        .set(projects::approved.eq(true))
        .returning(Project::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    tracing::info!("user {} approved project {}", user.id, project.slug);
    Ok(project)
}

#[get("/admin")]
pub async fn admin_overview(
    user: User,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            if !has_permission(Some(&user), &Permission::ModifySiteConfig, conn)? {
                return Err(WorkflowError::PermissionDenied(
                    "Error: you are not authorized to view this page",
                ));
            }

            let waiting = awaiting_approval(conn)?;
            let markup = html! {
                (page_title("Admin page"))
                ul class="list-group mb-4" {
                    li class="list-group-item" {
                        a href="/admin/config" { "Site configuration" }
                    }
                }
                h3 { "Projects awaiting approval" }
                @if waiting.is_empty() {
                    p class="text-muted" { "Nothing to review." }
                }
                ul class="list-group" {
                    @for (project, lead) in &waiting {
                        li class="list-group-item d-flex justify-content-between" {
                            span {
                                a href=(project.url()) { (project.name) }
                                " by " (lead)
                            }
                            form method="post" action=(format!("/admin/projects/{}/approve", project.id)) {
                                button type="submit" class="btn btn-sm btn-success" { "Approve" }
                            }
                        }
                    }
                }
            };
            Ok(page_of_body_and_flash_msg(markup, flash, Some(&user)))
        })
        .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[post("/admin/projects/<id>/approve")]
pub async fn do_approve_project(
    id: i64,
    user: User,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| approve_project(conn, &user, id))
            .map(|project| {
                Flash::success(
                    Redirect::to("/admin"),
                    format!("{} is now listed.", project.name),
                )
            })
            .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{make_project, make_user, test_db};

    #[test]
    fn test_staff_approve_waiting_projects() {
        let mut conn = test_db();
        let staff = make_user(&mut conn, "staff", true);
        let lead = make_user(&mut conn, "lead", false);
        let project = make_project(&mut conn, "hive", &lead);
        diesel::update(projects::table.filter(projects::id.eq(project.id)))
            .set(projects::approved.eq(false))
            .execute(&mut conn)
            .unwrap();

        let waiting = awaiting_approval(&mut conn).unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].1, "lead");

        assert!(matches!(
            approve_project(&mut conn, &lead, project.id),
            Err(WorkflowError::PermissionDenied(_))
        ));
        assert!(approve_project(&mut conn, &staff, project.id).unwrap().approved);
        assert!(awaiting_approval(&mut conn).unwrap().is_empty());

        assert!(matches!(
            approve_project(&mut conn, &staff, project.id + 1),
            Err(WorkflowError::NotFound)
        ));
    }
}
