use db::{
    project::{Moderation, Project},
    schema::{project_tags, projects},
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
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{error_alert, page_of_body, page_title};

use crate::{
    config::project_moderation,
    error::{is_unique_violation, WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
    util::{is_valid_slug, parse_tags},
};

const MAX_NAME_LEN: usize = 100;
const MAX_TAG_LEN: usize = 30;

/// Path segments under `/projects/` taken by fixed routes. A project with one
/// of these slugs could never be reached at `/projects/<slug>`.
pub const RESERVED_SLUGS: &[&str] =
    &["all", "asks", "community", "delete_ask", "new", "official", "tag"];

/// The fields shared by the create and edit forms.
#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct ProjectFields {
    pub name: String,
    pub slug: String,
    pub description: String,
    /// Comma separated.
    pub tags: String,
    /// Only honoured for staff.
    pub official: bool,
}

impl ProjectFields {
    pub fn of_project(project: &Project, tags: &[String]) -> ProjectFields {
        ProjectFields {
            name: project.name.clone(),
            slug: project.slug.clone(),
            description: project.description.clone(),
            tags: tags.join(", "),
            official: project.official,
        }
    }

    /// Every problem with the submitted fields, in form order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = vec![];
        let name = self.name.trim();
        if name.is_empty() {
            problems.push("Error: the project needs a name.".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            problems.push(format!(
                "Error: project names can be at most {MAX_NAME_LEN} characters."
            ));
        }
        if !is_valid_slug(&self.slug) {
            problems.push(
                "Error: the slug may only contain letters, digits, '_' and '-' \
                 (at most 50 characters)."
                    .to_string(),
            );
        } else if RESERVED_SLUGS.contains(&self.slug.to_lowercase().as_str()) {
            problems.push(format!(
                "Error: '{}' is reserved, please pick another slug.",
                self.slug
            ));
        }
        for tag in parse_tags(&self.tags) {
            if tag.chars().count() > MAX_TAG_LEN || !is_valid_slug(&tag) {
                problems.push(format!("Error: '{tag}' is not a valid tag."));
            }
        }
        problems
    }
}

/// Replaces the tags on a project.
pub fn set_tags(
    conn: &mut impl SqliteConn,
    project_id: i64,
    tags: &[String],
) -> QueryResult<()> {
    diesel::delete(
        project_tags::table.filter(project_tags::project_id.eq(project_id)),
    )
    .execute(conn)?;
    for tag in tags {
        diesel::insert_into(project_tags::table)
            .values((
                project_tags::project_id.eq(project_id),
                project_tags::tag.eq(tag),
            ))
            .execute(conn)?;
    }
    Ok(())
}

pub(crate) fn slug_taken(
    conn: &mut impl SqliteConn,
    slug: &str,
    except: Option<i64>,
) -> QueryResult<bool> {
    let mut query = projects::table
        .filter(projects::slug.eq(slug))
        .select(projects::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(projects::id.ne(id));
    }
    Ok(query.first::<i64>(conn).optional()?.is_some())
}

/// Creates a project led by `user`.
///
/// When moderation is on, projects started by anyone other than staff wait
/// for approval before they appear in listings.
#[tracing::instrument(skip(conn, user, fields), fields(user = user.id))]
pub fn create_project(
    conn: &mut impl SqliteConn,
    user: &User,
    fields: &ProjectFields,
    moderation: Moderation,
) -> WorkflowResult<Project> {
    if !has_permission(Some(user), &Permission::CreateProject, conn)? {
        return Err(WorkflowError::PermissionDenied(
            "You may not start a project.",
        ));
    }

    let mut problems = fields.problems();
    if problems.is_empty() && slug_taken(conn, &fields.slug, None)? {
        problems.push(format!(
            "Error: the slug '{}' is already in use.",
            fields.slug
        ));
    }
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    let approved = user.is_staff || moderation == Moderation::Unmoderated;
    let project = diesel::insert_into(projects::table)
        .values((
            projects::slug.eq(&fields.slug),
            projects::name.eq(fields.name.trim()),
            projects::description.eq(&fields.description),
            projects::lead_id.eq(user.id),
            projects::official.eq(fields.official && user.is_staff),
            projects::approved.eq(approved),
            projects::created_at.eq(now),
            projects::updated_at.eq(now),
        ))
        .returning(Project::as_returning())
        .get_result(conn)
        .map_err(|e| {
            if is_unique_violation(&e) {
                WorkflowError::invalid(format!(
                    "Error: the slug '{}' is already in use.",
                    fields.slug
                ))
            } else {
                e.into()
            }
        })?;

    set_tags(conn, project.id, &parse_tags(&fields.tags))?;

    tracing::info!(
        "user {} created project {} (approved: {approved})",
        user.id,
        project.slug
    );
    Ok(project)
}

/// The name/slug/description/tags inputs, prefilled from `fields`. Input
/// names are prefixed with `prefix` so the fields can be nested in a larger
/// form.
pub fn project_field_inputs(
    fields: &ProjectFields,
    user: &User,
    prefix: &str,
) -> Markup {
    html! {
        div class="mb-3" {
            label for="name" class="form-label" { "Name" }
            input type="text" class="form-control" id="name" name=(format!("{prefix}name")) value=(fields.name) required;
        }
        div class="mb-3" {
            label for="slug" class="form-label" { "Slug" }
            input type="text" class="form-control" id="slug" name=(format!("{prefix}slug")) value=(fields.slug) required;
            div class="form-text" { "Used in the project's address, e.g. /projects/my-project." }
        }
        div class="mb-3" {
            label for="description" class="form-label" { "Description" }
            textarea class="form-control" id="description" name=(format!("{prefix}description")) rows="5" { (fields.description) }
        }
        div class="mb-3" {
            label for="tags" class="form-label" { "Tags" }
            input type="text" class="form-control" id="tags" name=(format!("{prefix}tags")) value=(fields.tags);
            div class="form-text" { "Separate tags with commas." }
        }
        @if user.is_staff {
            div class="form-check mb-3" {
                input class="form-check-input" type="checkbox" id="official" name=(format!("{prefix}official")) value="true" checked[fields.official];
                label class="form-check-label" for="official" { "Official project" }
            }
        }
    }
}

fn new_project_page(
    fields: &ProjectFields,
    errors: &[String],
    user: &User,
) -> Markup {
    page_of_body(
        html! {
            (page_title("Start a project"))
            @for error in errors {
                (error_alert(Some(error)))
            }
            form method="post" action="/projects/new" {
                (project_field_inputs(fields, user, ""))
                button type="submit" class="btn btn-primary" { "Create project" }
            }
        },
        Some(user),
    )
}

#[get("/projects/new")]
pub async fn new_project_form(user: Option<User>) -> Result<Markup, Redirect> {
    match user {
        Some(user) => Ok(new_project_page(&ProjectFields::default(), &[], &user)),
        None => Err(Redirect::to("/login")),
    }
}

#[post("/projects/new", data = "<form>")]
pub async fn do_create_project(
    user: User,
    form: Form<ProjectFields>,
    db: DbConn,
    span: TracingSpan,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let fields = form.into_inner();
    db.run(move |conn| {
        let result = conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            create_project(conn, &user, &fields, moderation)
        });
        match result {
            Ok(project) => {
                let msg = if project.approved {
                    "Your project has been created."
                } else {
                    "Your project has been created and will be listed once \
                     a moderator approves it."
                };
                Ok(Flash::success(Redirect::to(project.url()), msg))
            }
            Err(WorkflowError::Validation(errors)) => Err((
                Status::UnprocessableEntity,
                new_project_page(&fields, &errors, &user),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .instrument(span.0)
    .await
}

#[cfg(test)]
mod tests {
    use db::config::MODERATE_PROJECTS;

    use super::*;
    use crate::{
        projects::tags_of,
        tests::fixtures::{make_project, make_user, test_db},
    };

    fn fields(slug: &str) -> ProjectFields {
        ProjectFields {
            name: "Beehive".to_string(),
            slug: slug.to_string(),
            description: "Keeping bees".to_string(),
            tags: "Bees, honey,bees".to_string(),
            official: true,
        }
    }

    #[test]
    fn test_create_project_makes_creator_lead() {
        let mut conn = test_db();
        let user = make_user(&mut conn, "keeper", false);

        let project =
            create_project(&mut conn, &user, &fields("beehive"), Moderation::Unmoderated)
                .unwrap();

        assert_eq!(project.lead_id, user.id);
        assert!(project.approved);
        // only staff can mark projects official
        assert!(!project.official);
        assert_eq!(
            tags_of(&mut conn, project.id).unwrap(),
            vec!["bees".to_string(), "honey".to_string()]
        );
    }

    #[test]
    fn test_moderated_projects_wait_unless_staff() {
        let mut conn = test_db();
        db::config::upsert(&mut conn, MODERATE_PROJECTS, "1").unwrap();
        let user = make_user(&mut conn, "keeper", false);
        let staff = make_user(&mut conn, "staff", true);

        let moderation = project_moderation(&mut conn).unwrap();
        let by_user =
            create_project(&mut conn, &user, &fields("one"), moderation).unwrap();
        let by_staff =
            create_project(&mut conn, &staff, &fields("two"), moderation).unwrap();

        assert!(!by_user.approved);
        assert!(by_staff.approved);
        assert!(by_staff.official);
    }

    #[test]
    fn test_invalid_or_taken_slugs_are_rejected() {
        let mut conn = test_db();
        let user = make_user(&mut conn, "keeper", false);
        make_project(&mut conn, "taken", &user);

        let err = create_project(
            &mut conn,
            &user,
            &fields("has spaces"),
            Moderation::Unmoderated,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let err =
            create_project(&mut conn, &user, &fields("taken"), Moderation::Unmoderated)
                .unwrap_err();
        let WorkflowError::Validation(problems) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(problems[0].contains("already in use"));

        let n = projects::table.count().get_result::<i64>(&mut conn).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_route_names_cannot_be_slugs() {
        let mut conn = test_db();
        let user = make_user(&mut conn, "keeper", false);

        for slug in RESERVED_SLUGS.iter().copied().chain(["Asks"]) {
            let err =
                create_project(&mut conn, &user, &fields(slug), Moderation::Unmoderated)
                    .unwrap_err();
            let WorkflowError::Validation(problems) = err else {
                panic!("expected a validation error for {slug}, got {err:?}");
            };
            assert!(problems[0].contains("reserved"), "{slug}");
        }

        let n = projects::table.count().get_result::<i64>(&mut conn).unwrap();
        assert_eq!(n, 0);

        create_project(&mut conn, &user, &fields("asking"), Moderation::Unmoderated)
            .unwrap();
    }

    #[test]
    fn test_blank_name_is_reported_with_bad_tags() {
        let mut f = fields("ok");
        f.name = "   ".to_string();
        f.tags = "fine, not/fine".to_string();
        let problems = f.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[1].contains("not/fine"));
    }
}
