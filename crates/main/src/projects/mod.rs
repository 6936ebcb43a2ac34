//! Projects: listings, the detail page, and (in the submodules) the
//! create/edit, join request and ask workflows.
use db::{
    ask::Ask,
    event::Event,
    feed::Feed,
    project::{Moderation, Project, ProjectFilter, ProjectLink},
    role::Role,
    schema::{
        event_projects, events, project_links, project_tags, roles,
        users,
    },
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::{html, Markup};
use rocket::{http::Status, request::FlashMessage};
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{page_of_body, page_of_body_and_flash_msg, page_title, pager};

use crate::{
    config::project_moderation,
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, user_on_project, Permission},
    resources::ProjectRef,
    util::{PageRequest, Paginated},
};

pub mod asks;
pub mod create;
pub mod edit;
pub mod join;
pub mod reconcile;

pub const PROJECTS_PER_PAGE: i64 = 10;
const RECENT_PROJECTS: i64 = 5;

/// Loads a project by slug, or fails with `NotFound`.
pub fn load_project(
    conn: &mut impl SqliteConn,
    slug: &str,
    moderation: Moderation,
) -> WorkflowResult<Project> {
    Project::with_slug(slug, moderation)
        .first::<Project>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)
}

pub fn recent_projects(
    conn: &mut impl SqliteConn,
    moderation: Moderation,
) -> QueryResult<Vec<Project>> {
    Project::listing(moderation, ProjectFilter::All)
        .limit(RECENT_PROJECTS)
        .load(conn)
}

pub fn project_archive(
    conn: &mut impl SqliteConn,
    moderation: Moderation,
    filter: ProjectFilter,
    page: PageRequest,
) -> QueryResult<Paginated<Project>> {
    let total = Project::listing(moderation, filter)
        .count()
        .get_result::<i64>(conn)?;
    let items = Project::listing(moderation, filter)
        .limit(page.per_page)
        .offset(page.offset())
        .load(conn)?;
    Ok(Paginated::new(items, page, total))
}

pub fn projects_tagged(
    conn: &mut impl SqliteConn,
    tag: &str,
    moderation: Moderation,
    page: PageRequest,
) -> QueryResult<Paginated<Project>> {
    let total = Project::tagged(tag, moderation)
        .count()
        .get_result::<i64>(conn)?;
    let items = Project::tagged(tag, moderation)
        .limit(page.per_page)
        .offset(page.offset())
        .load(conn)?;
    Ok(Paginated::new(items, page, total))
}

pub fn tags_of(
    conn: &mut impl SqliteConn,
    project_id: i64,
) -> QueryResult<Vec<String>> {
    project_tags::table
        .filter(project_tags::project_id.eq(project_id))
        .select(project_tags::tag)
        .order_by(project_tags::tag.asc())
        .load(conn)
}

/// Everything shown on a project's page.
#[derive(Debug)]
pub struct ProjectDetail {
    pub project: Project,
    pub lead: User,
    pub tags: Vec<String>,
    pub links: Vec<ProjectLink>,
    pub feeds: Vec<Feed>,
    pub members: Vec<(Role, User)>,
    pub asks: Vec<(Ask, User)>,
    pub upcoming_events: Vec<Event>,
}

/// Loads a project page. Moderation is deliberately not applied here, so
/// a direct link to a project awaiting approval still works.
pub fn project_detail(
    conn: &mut impl SqliteConn,
    slug: &str,
) -> WorkflowResult<ProjectDetail> {
    let project = load_project(conn, slug, Moderation::Unmoderated)?;

    let lead = users::table
        .filter(users::id.eq(project.lead_id))
        .select(User::as_select())
        .first(conn)?;

    let links = project_links::table
        .filter(project_links::project_id.eq(project.id))
        .select(ProjectLink::as_select())
        .order_by(project_links::id.asc())
        .load(conn)?;

    let members = roles::table
        .inner_join(users::table)
        .filter(roles::project_id.eq(project.id))
        .filter(Role::active())
        .select((Role::as_select(), User::as_select()))
        .order_by(roles::created_at.asc())
        .load(conn)?;

    let asks = db::schema::asks::table
        .inner_join(users::table)
        .filter(db::schema::asks::project_id.eq(project.id))
        .select((Ask::as_select(), User::as_select()))
        .order_by((db::schema::asks::created_at.desc(), db::schema::asks::id.desc()))
        .load(conn)?;

    let upcoming_events = Event::future(crate::events::local_now())
        .filter(
            events::id.eq_any(
                event_projects::table
                    .filter(event_projects::project_id.eq(project.id))
                    .select(event_projects::event_id),
            ),
        )
        .load::<Event>(conn)?;

    Ok(ProjectDetail {
        tags: tags_of(conn, project.id)?,
        feeds: reconcile::subscribed_feeds(conn, project.id)?,
        project,
        lead,
        links,
        members,
        asks,
        upcoming_events,
    })
}

pub fn project_table(projects: &[Project]) -> Markup {
    html! {
        @if projects.is_empty() {
            p { "There are no projects here yet." }
        } @else {
            table class="table" {
                thead {
                    tr {
                        th scope="col" { "Project" }
                        th scope="col" { "Last updated" }
                        th scope="col" {}
                    }
                }
                tbody {
                    @for project in projects {
                        tr {
                            th scope="row" {
                                a href=(project.url()) { (project.name) }
                            }
                            td { (project.updated_at.format("%Y-%m-%d")) }
                            td {
                                @if project.official {
                                    span class="badge text-bg-primary" { "Official" }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[get("/projects")]
pub async fn projects_page(
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
    span: TracingSpan,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let projects = recent_projects(conn, moderation)?;

            let markup = html! {
                (page_title("Projects"))
                (project_table(&projects))
                a class="btn btn-outline-primary m-1" href="/projects/all" { "All projects" }
                a class="btn btn-outline-primary m-1" href="/projects/official" { "Official projects" }
                a class="btn btn-outline-primary m-1" href="/projects/community" { "Community projects" }
                @if user.is_some() {
                    a class="btn btn-primary m-1" href="/projects/new" { "Start a project" }
                }
            };
            Ok(page_of_body_and_flash_msg(markup, flash, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .instrument(span.0)
    .await
}

async fn archive_page(
    filter: ProjectFilter,
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let request = PageRequest::new(page, PROJECTS_PER_PAGE);
            let listing = project_archive(conn, moderation, filter, request)?;

            let title = match filter {
                ProjectFilter::All => "All projects",
                ProjectFilter::Official => "Official projects",
                ProjectFilter::Community => "Community projects",
            };
            let markup = html! {
                (page_title(title))
                (project_table(&listing.items))
                (pager(&format!("/projects/{}", filter.as_str()), listing.page, listing.num_pages))
            };
            Ok(page_of_body(markup, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

#[get("/projects/all?<page>")]
pub async fn all_projects(
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    archive_page(ProjectFilter::All, page, user, db).await
}

#[get("/projects/official?<page>")]
pub async fn official_projects(
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    archive_page(ProjectFilter::Official, page, user, db).await
}

#[get("/projects/community?<page>")]
pub async fn community_projects(
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    archive_page(ProjectFilter::Community, page, user, db).await
}

#[get("/projects/tag/<tag>?<page>")]
pub async fn tagged_projects(
    tag: String,
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let request = PageRequest::new(page, PROJECTS_PER_PAGE);
            let listing = projects_tagged(conn, &tag, moderation, request)?;

            let markup = html! {
                (page_title(format!("Projects tagged \u{201c}{tag}\u{201d}")))
                (project_table(&listing.items))
                (pager(&format!("/projects/tag/{tag}"), listing.page, listing.num_pages))
                p { a href=(format!("/people/skill/{tag}")) { "People who know " (tag) } }
            };
            Ok(page_of_body(markup, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

#[get("/projects/<slug>", rank = 3)]
pub async fn project_page(
    slug: String,
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let detail = project_detail(conn, &slug)?;
            let at = ProjectRef(detail.project.id);
            let (is_member, can_edit) = match &user {
                Some(user) => (
                    user_on_project(conn, at, user)?,
                    has_permission(Some(user), &Permission::EditProject(at), conn)?,
                ),
                None => (false, false),
            };

            let markup = render_project_detail(&detail, user.as_ref(), is_member, can_edit);
            Ok(page_of_body_and_flash_msg(markup, flash, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

fn render_project_detail(
    detail: &ProjectDetail,
    user: Option<&User>,
    is_member: bool,
    can_edit: bool,
) -> Markup {
    let project = &detail.project;
    html! {
        (page_title(&project.name))
        p class="text-muted" {
            "Led by " (detail.lead.display_name())
            @if project.official {
                " " span class="badge text-bg-primary" { "Official" }
            }
            @if !project.approved {
                " " span class="badge text-bg-warning" { "Awaiting approval" }
            }
        }
        p { (project.description) }
        @if !detail.tags.is_empty() {
            p {
                @for tag in &detail.tags {
                    a class="badge text-bg-secondary me-1" href=(format!("/projects/tag/{tag}")) { (tag) }
                }
            }
        }
        @if can_edit {
            a class="btn btn-primary m-1" href=(format!("/projects/{}/edit", project.slug)) { "Edit project" }
        }
        @if user.is_some() && !is_member {
            a class="btn btn-outline-primary m-1" href=(format!("/projects/{}/join", project.slug)) { "Ask to join" }
        }

        @if !detail.links.is_empty() {
            h3 { "Links" }
            ul {
                @for link in &detail.links {
                    li { a href=(link.url) { (link.title) } }
                }
            }
        }

        @if !detail.feeds.is_empty() {
            h3 { "Feeds" }
            ul {
                @for feed in &detail.feeds {
                    li { a href=(feed.url) { (feed.title) } }
                }
            }
        }

        h3 { "Members" }
        ul {
            li { (detail.lead.display_name()) " (lead)" }
            @for (_, member) in &detail.members {
                li { (member.display_name()) }
            }
        }

        h3 { "Asks" }
        @if is_member {
            form method="post" action=(format!("/projects/{}/add_ask", project.slug)) class="mb-3" {
                div class="input-group" {
                    input type="text" name="message" class="form-control" maxlength=(Ask::MAX_MESSAGE_LEN) placeholder="What does the project need?" required;
                    button type="submit" class="btn btn-primary" { "Post ask" }
                }
            }
        }
        @if detail.asks.is_empty() {
            p { "Nothing has been asked yet." }
        }
        ul class="list-group mb-3" {
            @for (ask, author) in &detail.asks {
                li class="list-group-item d-flex justify-content-between" {
                    span { (ask.message) " \u{00b7} " em { (author.display_name()) } }
                    @if is_member {
                        form method="post" action=(format!("/projects/delete_ask/{}", ask.id)) {
                            button type="submit" class="btn btn-sm btn-outline-danger" { "Delete" }
                        }
                    }
                }
            }
        }

        @if !detail.upcoming_events.is_empty() {
            h3 { "Upcoming events" }
            ul {
                @for event in &detail.upcoming_events {
                    li {
                        a href=(event.url()) { (event.title) }
                        " on " (event.start_date.format("%Y-%m-%d %H:%M"))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use db::{
        config::MODERATE_PROJECTS, role::RoleStatus, schema::projects,
    };

    use super::*;
    use crate::tests::fixtures::{add_role, make_project, make_user, test_db};

    fn set_official(conn: &mut diesel::SqliteConnection, id: i64) {
        diesel::update(projects::table.filter(projects::id.eq(id)))
            .set(projects::official.eq(true))
            .execute(conn)
            .unwrap();
    }

    #[test]
    fn test_archive_filters_and_paginates() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        for i in 0..12 {
            let project = make_project(&mut conn, &format!("p{i}"), &lead);
            if i % 3 == 0 {
                set_official(&mut conn, project.id);
            }
        }

        let all = project_archive(
            &mut conn,
            Moderation::Unmoderated,
            ProjectFilter::All,
            PageRequest::new(Some(2), PROJECTS_PER_PAGE),
        )
        .unwrap();
        assert_eq!(all.total, 12);
        assert_eq!(all.num_pages, 2);
        assert_eq!(all.items.len(), 2);

        let official = project_archive(
            &mut conn,
            Moderation::Unmoderated,
            ProjectFilter::Official,
            PageRequest::new(None, PROJECTS_PER_PAGE),
        )
        .unwrap();
        assert_eq!(official.total, 4);
        assert!(official.items.iter().all(|p| p.official));

        let community = project_archive(
            &mut conn,
            Moderation::Unmoderated,
            ProjectFilter::Community,
            PageRequest::new(None, PROJECTS_PER_PAGE),
        )
        .unwrap();
        assert_eq!(community.total, 8);
    }

    #[test]
    fn test_recent_projects_are_five_newest_and_respect_moderation() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let mut ids = vec![];
        for i in 0..7 {
            ids.push(make_project(&mut conn, &format!("p{i}"), &lead).id);
        }
        // give every project a distinct update time
        for (n, id) in ids.iter().enumerate() {
            diesel::update(projects::table.filter(projects::id.eq(id)))
                .set(projects::updated_at.eq(
                    chrono::NaiveDate::from_ymd_opt(2025, 1, 1 + n as u32)
                        .unwrap()
                        .and_hms_opt(12, 0, 0)
                        .unwrap(),
                ))
                .execute(&mut conn)
                .unwrap();
        }
        diesel::update(projects::table.filter(projects::id.eq(ids[6])))
            .set(projects::approved.eq(false))
            .execute(&mut conn)
            .unwrap();

        let recent = recent_projects(&mut conn, Moderation::Unmoderated).unwrap();
        assert_eq!(
            recent.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![ids[6], ids[5], ids[4], ids[3], ids[2]]
        );

        let approved = recent_projects(&mut conn, Moderation::ApprovedOnly).unwrap();
        assert_eq!(approved.len(), 5);
        assert!(approved.iter().all(|p| p.id != ids[6]));
    }

    #[test]
    fn test_moderation_flag_comes_from_site_config() {
        let mut conn = test_db();
        assert_eq!(project_moderation(&mut conn).unwrap(), Moderation::Unmoderated);
        db::config::upsert(&mut conn, MODERATE_PROJECTS, "1").unwrap();
        assert_eq!(project_moderation(&mut conn).unwrap(), Moderation::ApprovedOnly);
    }

    #[test]
    fn test_detail_ignores_moderation_and_lists_only_active_members() {
        let mut conn = test_db();
        let lead = make_user(&mut conn, "lead", false);
        let member = make_user(&mut conn, "member", false);
        let requester = make_user(&mut conn, "requester", false);
        let project = make_project(&mut conn, "hidden", &lead);
        diesel::update(projects::table.filter(projects::id.eq(project.id)))
            .set(projects::approved.eq(false))
            .execute(&mut conn)
            .unwrap();
        add_role(&mut conn, &project, &member, RoleStatus::Approved);
        add_role(&mut conn, &project, &requester, RoleStatus::Requested);

        assert!(matches!(
            load_project(&mut conn, "hidden", Moderation::ApprovedOnly),
            Err(WorkflowError::NotFound)
        ));

        let detail = project_detail(&mut conn, "hidden").unwrap();
        assert_eq!(detail.lead, lead);
        assert_eq!(detail.members.len(), 1);
        assert_eq!(detail.members[0].1, member);

        assert!(matches!(
            project_detail(&mut conn, "missing"),
            Err(WorkflowError::NotFound)
        ));
    }
}
