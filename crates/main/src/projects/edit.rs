//! The project edit form: project fields plus the link, role and feed sets,
//! all submitted together and applied in one transaction.
use std::collections::BTreeSet;

use db::{
    project::{Moderation, Project},
    role::{Role, RoleStatus},
    schema::{project_links, projects, roles, users},
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
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{error_alert, page_of_body, page_title};

use super::{
    create::{project_field_inputs, set_tags, slug_taken, ProjectFields},
    load_project,
    reconcile::{
        self, apply_feed_plan, apply_link_plan, apply_role_plan, FeedFields,
        LinkFields, Plan, RoleFields, Submitted,
    },
    tags_of,
};
use crate::{
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
    resources::ProjectRef,
    util::{is_valid_http_url, parse_tags},
};

#[derive(FromForm, Debug, Clone, Default)]
pub struct LinkEntry {
    pub id: Option<i64>,
    pub title: String,
    pub url: String,
    pub delete: bool,
}

#[derive(FromForm, Debug, Clone, Default)]
pub struct RoleEntry {
    pub id: Option<i64>,
    pub username: String,
    /// `R` (requested) or `A` (approved).
    pub status: String,
    pub message: String,
    pub delete: bool,
}

#[derive(FromForm, Debug, Clone, Default)]
pub struct FeedEntry {
    pub id: Option<i64>,
    pub title: String,
    pub url: String,
    pub delete: bool,
}

#[derive(FromForm, Debug, Clone, Default)]
pub struct EditProjectForm {
    pub project: ProjectFields,
    pub links: Vec<LinkEntry>,
    pub roles: Vec<RoleEntry>,
    pub feeds: Vec<FeedEntry>,
}

/// Checks a title/url pair. Rows marked for deletion are not checked.
fn check_titled_url(
    kind: &str,
    n: usize,
    title: &str,
    url: &str,
    problems: &mut Vec<String>,
) {
    if title.trim().is_empty() {
        problems.push(format!("Error: {kind} {} needs a title.", n + 1));
    }
    if !is_valid_http_url(url.trim()) {
        problems.push(format!(
            "Error: the url of {kind} {} must be an absolute http(s) url.",
            n + 1
        ));
    }
}

fn collect_plan<T>(
    kind: &str,
    existing: &[i64],
    submitted: Vec<Submitted<T>>,
    problems: &mut Vec<String>,
) -> Option<Plan<T>> {
    match reconcile::plan(kind, existing, submitted) {
        Ok(plan) => Some(plan),
        Err(errors) => {
            problems.extend(errors);
            None
        }
    }
}

/// Problems with the users a submission adds to the project.
fn check_new_roles(
    conn: &mut impl SqliteConn,
    project: &Project,
    new_roles: &[RoleFields],
) -> QueryResult<Vec<String>> {
    let mut problems = vec![];
    let mut seen = BTreeSet::new();

    for fields in new_roles {
        if !seen.insert(fields.username.as_str()) {
            problems.push(format!(
                "Error: {} was added more than once.",
                fields.username
            ));
            continue;
        }

        let user = users::table
            .filter(User::with_name(&fields.username))
            .select(User::as_select())
            .first::<User>(conn)
            .optional()?;
        let Some(user) = user else {
            problems.push(format!(
                "Error: there is no user called {}.",
                fields.username
            ));
            continue;
        };

        if user.id == project.lead_id {
            problems.push(format!(
                "Error: {} already leads this project.",
                fields.username
            ));
            continue;
        }

        let has_role = diesel::select(diesel::dsl::exists(
            roles::table
                .filter(roles::project_id.eq(project.id))
                .filter(roles::user_id.eq(user.id)),
        ))
        .get_result::<bool>(conn)?;
        if has_role {
            problems.push(format!(
                "Error: {} already has a role on this project.",
                fields.username
            ));
        }
    }

    Ok(problems)
}

/// Applies an edit submission to the project with the given slug.
///
/// The submission is validated as a whole (including every id in the three
/// sets) before anything is written.
#[tracing::instrument(skip(conn, user, form), fields(user = user.id))]
pub fn edit_project(
    conn: &mut impl SqliteConn,
    user: &User,
    slug: &str,
    form: &EditProjectForm,
) -> WorkflowResult<Project> {
    // leads and staff can always reach their own project
    let project = load_project(conn, slug, Moderation::Unmoderated)?;
    if !has_permission(
        Some(user),
        &Permission::EditProject(ProjectRef(project.id)),
        conn,
    )? {
        tracing::warn!("user {} may not edit project {}", user.id, project.slug);
        return Err(WorkflowError::PermissionDenied(
            "Only the project lead can edit this project.",
        ));
    }

    let mut problems = form.project.problems();
    if problems.is_empty() && slug_taken(conn, &form.project.slug, Some(project.id))? {
        problems.push(format!(
            "Error: the slug '{}' is already in use.",
            form.project.slug
        ));
    }

    let mut links = vec![];
    for (n, entry) in form.links.iter().enumerate() {
        if !entry.delete {
            check_titled_url("link", n, &entry.title, &entry.url, &mut problems);
        }
        links.push(Submitted {
            id: entry.id,
            delete: entry.delete,
            value: LinkFields {
                title: entry.title.trim().to_string(),
                url: entry.url.trim().to_string(),
            },
        });
    }

    let mut feeds = vec![];
    for (n, entry) in form.feeds.iter().enumerate() {
        if !entry.delete {
            check_titled_url("feed", n, &entry.title, &entry.url, &mut problems);
        }
        feeds.push(Submitted {
            id: entry.id,
            delete: entry.delete,
            value: FeedFields {
                title: entry.title.trim().to_string(),
                url: entry.url.trim().to_string(),
            },
        });
    }

    let mut role_rows = vec![];
    for (n, entry) in form.roles.iter().enumerate() {
        let status = match RoleStatus::from_code(&entry.status) {
            Some(status) => status,
            None if entry.delete => RoleStatus::Requested,
            None => {
                problems.push(format!(
                    "Error: role {} has an unknown status.",
                    n + 1
                ));
                continue;
            }
        };
        role_rows.push(Submitted {
            id: entry.id,
            delete: entry.delete,
            value: RoleFields {
                username: entry.username.trim().to_string(),
                status,
                message: entry.message.clone(),
            },
        });
    }

    let link_plan = collect_plan(
        "link",
        &reconcile::link_ids(conn, project.id)?,
        links,
        &mut problems,
    );
    let role_plan = collect_plan(
        "role",
        &reconcile::role_ids(conn, project.id)?,
        role_rows,
        &mut problems,
    );
    let feed_plan = collect_plan(
        "feed",
        &reconcile::subscribed_feed_ids(conn, project.id)?,
        feeds,
        &mut problems,
    );
    if let Some(plan) = &role_plan {
        problems.extend(check_new_roles(conn, &project, &plan.create)?);
    }

    let (Some(link_plan), Some(role_plan), Some(feed_plan)) =
        (link_plan, role_plan, feed_plan)
    else {
        return Err(WorkflowError::Validation(problems));
    };
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    let official = if user.is_staff {
        form.project.official
    } else {
        project.official
    };
    let updated = diesel::update(projects::table.filter(projects::id.eq(project.id)))
        .set((
            projects::name.eq(form.project.name.trim()),
            projects::slug.eq(&form.project.slug),
            projects::description.eq(&form.project.description),
            projects::official.eq(official),
            projects::updated_at.eq(now),
        ))
        .returning(Project::as_returning())
        .get_result(conn)?;

    set_tags(conn, project.id, &parse_tags(&form.project.tags))?;
    apply_link_plan(conn, project.id, link_plan)?;
    apply_role_plan(conn, project.id, role_plan)?;
    apply_feed_plan(conn, project.id, feed_plan)?;

    tracing::info!("user {} edited project {}", user.id, updated.slug);
    Ok(updated)
}

/// The edit form as it would be submitted unchanged.
pub fn current_form(
    conn: &mut impl SqliteConn,
    project: &Project,
) -> QueryResult<EditProjectForm> {
    let tags = tags_of(conn, project.id)?;

    let links = project_links::table
        .filter(project_links::project_id.eq(project.id))
        .select((project_links::id, project_links::title, project_links::url))
        .order_by(project_links::id.asc())
        .load::<(i64, String, String)>(conn)?
        .into_iter()
        .map(|(id, title, url)| LinkEntry {
            id: Some(id),
            title,
            url,
            delete: false,
        })
        .collect();

    let roles = roles::table
        .inner_join(users::table)
        .filter(roles::project_id.eq(project.id))
        .select((Role::as_select(), users::username))
        .order_by(roles::id.asc())
        .load::<(Role, String)>(conn)?
        .into_iter()
        .map(|(role, username)| RoleEntry {
            id: Some(role.id),
            username,
            status: role.status,
            message: role.message,
            delete: false,
        })
        .collect();

    let feeds = reconcile::subscribed_feeds(conn, project.id)?
        .into_iter()
        .map(|feed| FeedEntry {
            id: Some(feed.id),
            title: feed.title,
            url: feed.url,
            delete: false,
        })
        .collect();

    Ok(EditProjectForm {
        project: ProjectFields::of_project(project, &tags),
        links,
        roles,
        feeds,
    })
}

fn status_select(name: &str, current: &str) -> Markup {
    html! {
        select class="form-select" name=(name) {
            @for status in [RoleStatus::Approved, RoleStatus::Requested] {
                option value=(status.code()) selected[status.code() == current] { (status.label()) }
            }
        }
    }
}

fn edit_page(
    slug: &str,
    form: &EditProjectForm,
    errors: &[String],
    user: &User,
) -> Markup {
    // one blank row per set for adding entries
    let next_link = form.links.len();
    let next_role = form.roles.len();
    let next_feed = form.feeds.len();

    page_of_body(
        html! {
            (page_title(format!("Edit {}", form.project.name)))
            @for error in errors {
                (error_alert(Some(error)))
            }
            form method="post" action=(format!("/projects/{slug}/edit")) {
                (project_field_inputs(&form.project, user, "project."))

                h3 { "Links" }
                table class="table" {
                    thead { tr { th { "Title" } th { "URL" } th { "Remove" } } }
                    tbody {
                        @for (i, link) in form.links.iter().enumerate() {
                            tr {
                                td {
                                    @if let Some(id) = link.id {
                                        input type="hidden" name=(format!("links[{i}].id")) value=(id);
                                    }
                                    input type="text" class="form-control" name=(format!("links[{i}].title")) value=(link.title);
                                }
                                td { input type="url" class="form-control" name=(format!("links[{i}].url")) value=(link.url); }
                                td { input type="checkbox" class="form-check-input" name=(format!("links[{i}].delete")) value="true" checked[link.delete]; }
                            }
                        }
                        tr {
                            td { input type="text" class="form-control" name=(format!("links[{next_link}].title")) placeholder="New link"; }
                            td { input type="url" class="form-control" name=(format!("links[{next_link}].url")); }
                            td {}
                        }
                    }
                }

                h3 { "Members and requests" }
                table class="table" {
                    thead { tr { th { "User" } th { "Status" } th { "Message" } th { "Remove" } } }
                    tbody {
                        @for (i, role) in form.roles.iter().enumerate() {
                            tr {
                                td {
                                    @if let Some(id) = role.id {
                                        input type="hidden" name=(format!("roles[{i}].id")) value=(id);
                                    }
                                    input type="text" readonly class="form-control-plaintext" name=(format!("roles[{i}].username")) value=(role.username);
                                }
                                td { (status_select(&format!("roles[{i}].status"), &role.status)) }
                                td { input type="text" class="form-control" name=(format!("roles[{i}].message")) value=(role.message); }
                                td { input type="checkbox" class="form-check-input" name=(format!("roles[{i}].delete")) value="true" checked[role.delete]; }
                            }
                        }
                        tr {
                            td { input type="text" class="form-control" name=(format!("roles[{next_role}].username")) placeholder="Add a user"; }
                            td { (status_select(&format!("roles[{next_role}].status"), RoleStatus::APPROVED)) }
                            td { input type="text" class="form-control" name=(format!("roles[{next_role}].message")); }
                            td {}
                        }
                    }
                }

                h3 { "Feeds" }
                table class="table" {
                    thead { tr { th { "Title" } th { "URL" } th { "Remove" } } }
                    tbody {
                        @for (i, feed) in form.feeds.iter().enumerate() {
                            tr {
                                td {
                                    @if let Some(id) = feed.id {
                                        input type="hidden" name=(format!("feeds[{i}].id")) value=(id);
                                    }
                                    input type="text" class="form-control" name=(format!("feeds[{i}].title")) value=(feed.title);
                                }
                                td { input type="url" class="form-control" name=(format!("feeds[{i}].url")) value=(feed.url); }
                                td { input type="checkbox" class="form-check-input" name=(format!("feeds[{i}].delete")) value="true" checked[feed.delete]; }
                            }
                        }
                        tr {
                            td { input type="text" class="form-control" name=(format!("feeds[{next_feed}].title")) placeholder="New feed"; }
                            td { input type="url" class="form-control" name=(format!("feeds[{next_feed}].url")); }
                            td {}
                        }
                    }
                }

                button type="submit" class="btn btn-primary" { "Save" }
            }
        },
        Some(user),
    )
}

/// Drops the blank "add" rows the edit page always renders.
fn without_blank_rows(mut form: EditProjectForm) -> EditProjectForm {
    form.links
        .retain(|l| l.id.is_some() || !(l.title.is_empty() && l.url.is_empty()));
    form.roles.retain(|r| r.id.is_some() || !r.username.trim().is_empty());
    form.feeds
        .retain(|f| f.id.is_some() || !(f.title.is_empty() && f.url.is_empty()));
    form
}

#[get("/projects/<slug>/edit", rank = 3)]
pub async fn edit_project_page(
    slug: String,
    user: User,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let project = load_project(conn, &slug, Moderation::Unmoderated)?;
            if !has_permission(
                Some(&user),
                &Permission::EditProject(ProjectRef(project.id)),
                conn,
            )? {
                return Err(WorkflowError::PermissionDenied(
                    "Only the project lead can edit this project.",
                ));
            }
            let form = current_form(conn, &project)?;
            Ok(edit_page(&project.slug, &form, &[], &user))
        })
        .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[post("/projects/<slug>/edit", data = "<form>", rank = 3)]
pub async fn do_edit_project(
    slug: String,
    user: User,
    form: Form<EditProjectForm>,
    db: DbConn,
    span: TracingSpan,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = without_blank_rows(form.into_inner());
    db.run(move |conn| {
        match conn.transaction(|conn| edit_project(conn, &user, &slug, &form)) {
            Ok(project) => Ok(Flash::success(
                Redirect::to(project.url()),
                "Your changes have been saved.",
            )),
            Err(WorkflowError::Validation(errors)) => Err((
                Status::UnprocessableEntity,
                edit_page(&slug, &form, &errors, &user),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .instrument(span.0)
    .await
}

#[cfg(test)]
mod tests {
    use db::{feed::Feed, project::ProjectLink, schema::feeds};

    use super::*;
    use crate::{
        permissions::user_on_project,
        tests::fixtures::{add_role, make_project, make_user, subscribe, test_db},
    };

    fn load_form(conn: &mut diesel::SqliteConnection, slug: &str) -> EditProjectForm {
        let project = load_project(conn, slug, Moderation::Unmoderated).unwrap();
        current_form(conn, &project).unwrap()
    }

    #[test]
    fn test_unchanged_submission_keeps_everything() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &member, RoleStatus::Approved);
        let feed = subscribe(&mut conn, &project, "News", "https://hive.example.com/rss");

        let form = load_form(&mut conn, "hive");
        edit_project(&mut conn, &lead, "hive", &form).unwrap();

        assert!(user_on_project(&mut conn, ProjectRef(project.id), &member).unwrap());
        assert_eq!(
            reconcile::subscribed_feed_ids(&mut conn, project.id).unwrap(),
            vec![feed]
        );
    }

    #[test]
    fn test_lead_approves_rejects_and_adds_roles() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let approve_me = make_user(&mut conn, "approve-me", false);
        let reject_me = make_user(&mut conn, "reject-me", false);
        let newcomer = make_user(&mut conn, "newcomer", false);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &approve_me, RoleStatus::Requested);
        add_role(&mut conn, &project, &reject_me, RoleStatus::Requested);

        let mut form = load_form(&mut conn, "hive");
        for role in form.roles.iter_mut() {
            if role.username == "approve-me" {
                role.status = RoleStatus::APPROVED.to_string();
            } else {
                role.delete = true;
            }
        }
        form.roles.push(RoleEntry {
            id: None,
            username: "newcomer".to_string(),
            status: RoleStatus::APPROVED.to_string(),
            message: String::new(),
            delete: false,
        });

        edit_project(&mut conn, &lead, "hive", &form).unwrap();

        let at = ProjectRef(project.id);
        assert!(user_on_project(&mut conn, at, &approve_me).unwrap());
        assert!(user_on_project(&mut conn, at, &newcomer).unwrap());
        assert!(!user_on_project(&mut conn, at, &reject_me).unwrap());
        let reject_me_roles = roles::table
            .filter(roles::user_id.eq(reject_me.id))
            .count()
            .get_result::<i64>(&mut conn)
            .unwrap();
        assert_eq!(reject_me_roles, 0);
    }

    #[test]
    fn test_links_follow_submitted_set() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let project = make_project(&mut conn, "hive", &lead);

        let mut form = load_form(&mut conn, "hive");
        form.links.push(LinkEntry {
            id: None,
            title: "Repo".to_string(),
            url: "https://git.example.com/hive".to_string(),
            delete: false,
        });
        form.links.push(LinkEntry {
            id: None,
            title: "Wiki".to_string(),
            url: "https://wiki.example.com/hive".to_string(),
            delete: false,
        });
        edit_project(&mut conn, &lead, "hive", &form).unwrap();

        // drop the wiki by leaving it out
        let mut form = load_form(&mut conn, "hive");
        form.links.retain(|l| l.title != "Wiki");
        form.links[0].title = "Source".to_string();
        edit_project(&mut conn, &lead, "hive", &form).unwrap();

        let links = project_links::table
            .filter(project_links::project_id.eq(project.id))
            .select(ProjectLink::as_select())
            .load(&mut conn)
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Source");
    }

    #[test]
    fn test_foreign_feed_id_rejects_whole_submission() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let other_lead = make_user(&mut conn, "other", false);
        let project = make_project(&mut conn, "hive", &lead);
        let other = make_project(&mut conn, "other-hive", &other_lead);
        let theirs = subscribe(&mut conn, &other, "Theirs", "https://other.example.com/rss");

        let mut form = load_form(&mut conn, "hive");
        form.project.name = "Renamed".to_string();
        form.feeds.push(FeedEntry {
            id: Some(theirs),
            title: "Stolen".to_string(),
            url: "https://other.example.com/rss".to_string(),
            delete: false,
        });

        let err = edit_project(&mut conn, &lead, "hive", &form).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let name = projects::table
            .filter(projects::id.eq(project.id))
            .select(projects::name)
            .first::<String>(&mut conn)
            .unwrap();
        assert_eq!(name, project.name);
        let feed = feeds::table
            .filter(feeds::id.eq(theirs))
            .select(Feed::as_select())
            .first(&mut conn)
            .unwrap();
        assert_eq!(feed.title, "Theirs");
    }

    #[test]
    fn test_unknown_username_and_bad_url_are_reported_together() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        make_project(&mut conn, "hive", &lead);

        let mut form = load_form(&mut conn, "hive");
        form.roles.push(RoleEntry {
            id: None,
            username: "nobody".to_string(),
            status: RoleStatus::APPROVED.to_string(),
            message: String::new(),
            delete: false,
        });
        form.feeds.push(FeedEntry {
            id: None,
            title: "Feed".to_string(),
            url: "not a url".to_string(),
            delete: false,
        });

        let WorkflowError::Validation(problems) =
            edit_project(&mut conn, &lead, "hive", &form).unwrap_err()
        else {
            panic!("expected a validation error");
        };
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_members_cannot_edit_but_staff_can() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let staff = make_user(&mut conn, "staff", true);
        let project = make_project(&mut conn, "hive", &lead);
        add_role(&mut conn, &project, &member, RoleStatus::Approved);

        let form = load_form(&mut conn, "hive");
        assert!(matches!(
            edit_project(&mut conn, &member, "hive", &form),
            Err(WorkflowError::PermissionDenied(_))
        ));

        let mut form = load_form(&mut conn, "hive");
        form.project.official = true;
        let updated = edit_project(&mut conn, &staff, "hive", &form).unwrap();
        assert!(updated.official);
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let form = without_blank_rows(EditProjectForm {
            links: vec![LinkEntry::default()],
            roles: vec![RoleEntry {
                status: RoleStatus::APPROVED.to_string(),
                ..RoleEntry::default()
            }],
            feeds: vec![FeedEntry::default()],
            ..EditProjectForm::default()
        });
        assert!(form.links.is_empty());
        assert!(form.roles.is_empty());
        assert!(form.feeds.is_empty());
    }
}
