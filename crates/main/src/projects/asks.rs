use db::{
    ask::Ask,
    project::{Moderation, Project},
    schema::{asks, projects},
    user::User,
    DbConn, SqliteConn,
};
use diesel::{dsl::now, prelude::*};
use maud::{html, Markup};
use rocket::{
    form::Form,
    http::Status,
    response::{Flash, Redirect},
};
use serde::Serialize;
use ui::{error_alert, page_of_body, page_title, pager};

use super::load_project;
use crate::{
    config::project_moderation,
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
    resources::ProjectRef,
    util::{PageRequest, Paginated},
};

pub const ASKS_PER_PAGE: i64 = 20;

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct AskForm {
    pub message: String,
}

/// Posts an ask on a project. Only members of the project may do this.
///
/// Moderation is not applied: the project page offers this form to members
/// of projects still awaiting approval.
#[tracing::instrument(skip(conn, user, message), fields(user = user.id))]
pub fn add_ask(
    conn: &mut impl SqliteConn,
    user: &User,
    slug: &str,
    message: &str,
) -> WorkflowResult<Ask> {
    let project = load_project(conn, slug, Moderation::Unmoderated)?;

    if !has_permission(
        Some(user),
        &Permission::PostAsk(ProjectRef(project.id)),
        conn,
    )? {
        tracing::warn!(
            "user {} tried to post an ask on {} without being a member",
            user.id,
            project.slug
        );
        return Err(WorkflowError::PermissionDenied(
            "Only members of this project can post asks.",
        ));
    }

    let message = message.trim();
    if message.is_empty() {
        return Err(WorkflowError::invalid("Error: the ask is empty."));
    }
    if message.chars().count() > Ask::MAX_MESSAGE_LEN {
        return Err(WorkflowError::invalid(format!(
            "Error: asks can be at most {} characters.",
            Ask::MAX_MESSAGE_LEN
        )));
    }

    let ask = diesel::insert_into(asks::table)
        .values((
            asks::project_id.eq(project.id),
            asks::user_id.eq(user.id),
            asks::message.eq(message),
            asks::created_at.eq(now),
        ))
        .returning(Ask::as_returning())
        .get_result(conn)?;

    tracing::info!("user {} posted ask {} on {}", user.id, ask.id, project.slug);
    Ok(ask)
}

/// Deletes one ask, returning it along with its project. Any member of the
/// ask's project may delete it.
#[tracing::instrument(skip(conn, user), fields(user = user.id))]
pub fn delete_ask(
    conn: &mut impl SqliteConn,
    user: &User,
    ask_id: i64,
) -> WorkflowResult<(Ask, Project)> {
    let (ask, project) = asks::table
        .inner_join(projects::table)
        .filter(asks::id.eq(ask_id))
        .select((Ask::as_select(), Project::as_select()))
        .first::<(Ask, Project)>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    if !has_permission(
        Some(user),
        &Permission::DeleteAsk(ProjectRef(project.id)),
        conn,
    )? {
        tracing::warn!(
            "user {} tried to delete ask {} without being a member",
            user.id,
            ask.id
        );
        return Err(WorkflowError::PermissionDenied(
            "Only members of this project can delete its asks.",
        ));
    }

    diesel::delete(asks::table.filter(asks::id.eq(ask.id))).execute(conn)?;

    tracing::info!("user {} deleted ask {}", user.id, ask.id);
    Ok((ask, project))
}

/// Every ask, newest first. Asks on projects hidden by moderation are left
/// out.
pub fn list_asks(
    conn: &mut impl SqliteConn,
    moderation: Moderation,
    page: PageRequest,
) -> QueryResult<Paginated<(Ask, Project, User)>> {
    let visible = || {
        let query = asks::table
            .inner_join(projects::table)
            .inner_join(db::schema::users::table)
            .into_boxed();
        match moderation {
            Moderation::ApprovedOnly => query.filter(projects::approved.eq(true)),
            Moderation::Unmoderated => query,
        }
    };

    let total = visible().count().get_result::<i64>(conn)?;
    let items = visible()
        .select((Ask::as_select(), Project::as_select(), User::as_select()))
        .order_by((asks::created_at.desc(), asks::id.desc()))
        .limit(page.per_page)
        .offset(page.offset())
        .load(conn)?;

    Ok(Paginated::new(items, page, total))
}

#[get("/projects/asks?<page>")]
pub async fn asks_page(
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let listing =
                list_asks(conn, moderation, PageRequest::new(page, ASKS_PER_PAGE))?;

            let markup = html! {
                (page_title("Asks"))
                @if listing.items.is_empty() {
                    p { "Nobody has asked for anything yet." }
                }
                ul class="list-group mb-3" {
                    @for (ask, project, author) in &listing.items {
                        li class="list-group-item" {
                            (ask.message)
                            div class="small text-muted" {
                                (author.display_name()) " for "
                                a href=(project.url()) { (project.name) }
                                " on " (ask.created_at.format("%Y-%m-%d"))
                            }
                        }
                    }
                }
                (pager("/projects/asks", listing.page, listing.num_pages))
            };
            Ok(page_of_body(markup, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

#[post("/projects/<slug>/add_ask", data = "<form>", rank = 3)]
pub async fn do_add_ask(
    slug: String,
    user: User,
    form: Form<AskForm>,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let message = form.into_inner().message;
    db.run(move |conn| {
        let result = conn.transaction(|conn| add_ask(conn, &user, &slug, &message));
        match result {
            Ok(_) => Ok(Flash::success(
                Redirect::to(format!("/projects/{slug}")),
                "Your ask has been posted.",
            )),
            Err(WorkflowError::Validation(errors)) => Err((
                Status::UnprocessableEntity,
                page_of_body(
                    html! {
                        (page_title("Post an ask"))
                        @for error in &errors {
                            (error_alert(Some(error)))
                        }
                        form method="post" action=(format!("/projects/{slug}/add_ask")) {
                            div class="input-group" {
                                input type="text" name="message" class="form-control" maxlength=(Ask::MAX_MESSAGE_LEN) value=(message);
                                button type="submit" class="btn btn-primary" { "Post ask" }
                            }
                        }
                    },
                    Some(&user),
                ),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .await
}

#[post("/projects/delete_ask/<id>")]
pub async fn do_delete_ask(
    id: i64,
    user: User,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| delete_ask(conn, &user, id))
            .map(|(_, project)| {
                Flash::success(Redirect::to(project.url()), "The ask has been deleted.")
            })
            .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[cfg(test)]
mod tests {
    use db::role::RoleStatus;

    use super::*;
    use crate::tests::fixtures::{add_role, make_project, make_user, test_db};

    fn ask_count(conn: &mut diesel::SqliteConnection) -> i64 {
        asks::table.count().get_result(conn).unwrap()
    }

    #[test]
    fn test_only_members_post_asks() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let requester = make_user(&mut conn, "requester", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &member, RoleStatus::Approved);
        add_role(&mut conn, &project, &requester, RoleStatus::Requested);

        let err = add_ask(&mut conn, &requester, "hive", "need wax").unwrap_err();
        assert!(matches!(err, WorkflowError::PermissionDenied(_)));
        assert_eq!(ask_count(&mut conn), 0);

        let ask = add_ask(&mut conn, &member, "hive", " need wax ").unwrap();
        assert_eq!(ask.message, "need wax");
        assert_eq!(ask.project_id, project.id);
        assert_eq!(ask_count(&mut conn), 1);
    }

    #[test]
    fn test_ask_length_is_checked() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        make_project(&mut conn, "hive", &lead);

        let long = "x".repeat(Ask::MAX_MESSAGE_LEN + 1);
        for message in ["   ", long.as_str()] {
            let err = add_ask(&mut conn, &lead, "hive", message).unwrap_err();
            assert!(matches!(err, WorkflowError::Validation(_)));
        }
        assert_eq!(ask_count(&mut conn), 0);
    }

    #[test]
    fn test_delete_ask_removes_only_that_ask() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let stranger = make_user(&mut conn, "stranger", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &member, RoleStatus::Approved);

        let first = add_ask(&mut conn, &lead, "hive", "first").unwrap();
        let second = add_ask(&mut conn, &lead, "hive", "second").unwrap();

        let err = delete_ask(&mut conn, &stranger, first.id).unwrap_err();
        assert!(matches!(err, WorkflowError::PermissionDenied(_)));
        assert_eq!(ask_count(&mut conn), 2);

        // any member may delete, not just the author
        let (deleted, on) = delete_ask(&mut conn, &member, first.id).unwrap();
        assert_eq!(deleted.id, first.id);
        assert_eq!(on.id, project.id);

        let left = asks::table
            .select(asks::id)
            .load::<i64>(&mut conn)
            .unwrap();
        assert_eq!(left, vec![second.id]);

        assert!(matches!(
            delete_ask(&mut conn, &member, first.id),
            Err(WorkflowError::NotFound)
        ));
    }

    #[test]
    fn test_members_of_unapproved_projects_can_post_asks() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let project = make_project(&mut conn, "hive", &lead);
        diesel::update(projects::table.filter(projects::id.eq(project.id)))
            .set(projects::approved.eq(false))
            .execute(&mut conn)
            .unwrap();
        db::config::upsert(&mut conn, db::config::MODERATE_PROJECTS, "1").unwrap();

        let ask = add_ask(&mut conn, &lead, "hive", "need wax").unwrap();
        assert_eq!(ask.project_id, project.id);

        // still hidden from the public listing
        let listing = list_asks(
            &mut conn,
            Moderation::ApprovedOnly,
            PageRequest::new(None, ASKS_PER_PAGE),
        )
        .unwrap();
        assert_eq!(listing.total, 0);

        delete_ask(&mut conn, &lead, ask.id).unwrap();
        assert_eq!(ask_count(&mut conn), 0);
    }

    #[test]
    fn test_asks_are_listed_newest_first() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        make_project(&mut conn, "hive", &lead);
        let mut ids = vec![];
        for i in 0..25 {
            ids.push(
                add_ask(&mut conn, &lead, "hive", &format!("ask {i}"))
                    .unwrap()
                    .id,
            );
        }

        let first_page =
            list_asks(&mut conn, Moderation::Unmoderated, PageRequest::new(None, ASKS_PER_PAGE))
                .unwrap();
        assert_eq!(first_page.total, 25);
        assert_eq!(first_page.num_pages, 2);
        assert_eq!(first_page.items.len(), 20);
        // same timestamp, so ties fall back to id
        assert_eq!(first_page.items[0].0.id, ids[24]);

        let second_page = list_asks(
            &mut conn,
            Moderation::Unmoderated,
            PageRequest::new(Some(2), ASKS_PER_PAGE),
        )
        .unwrap();
        assert_eq!(second_page.items.len(), 5);
        assert_eq!(second_page.items[4].0.id, ids[0]);

        let far_away = list_asks(
            &mut conn,
            Moderation::Unmoderated,
            PageRequest::new(Some(i64::MAX), ASKS_PER_PAGE),
        )
        .unwrap();
        assert!(far_away.items.is_empty());
        assert_eq!(far_away.total, 25);
    }
}
