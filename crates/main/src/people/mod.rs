//! People: profiles, the skills directory, and (in `contact`) messaging
//! other users.
use db::{
    profile::{Profile, ProfileRole, INITIAL_MAX_MESSAGES},
    project::{Moderation, Project, ProjectFilter},
    role::Role,
    schema::{profile_skills, profiles, projects, roles, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::{dsl::now, prelude::*};
use maud::{html, Markup};
use rocket::{
    form::Form,
    http::Status,
    request::FlashMessage,
    response::{Flash, Redirect},
};
use serde::Serialize;
use trace_request::TracingSpan;
use tracing::Instrument;
use ui::{error_alert, page_of_body, page_of_body_and_flash_msg, page_title, pager};

use crate::{
    config::project_moderation,
    error::{WorkflowError, WorkflowResult},
    projects::project_table,
    util::{
        is_valid_http_url, is_valid_slug, is_valid_twitter_id, parse_tags,
        PageRequest, Paginated,
    },
};

pub mod contact;

pub const PEOPLE_PER_PAGE: i64 = 20;
const MAX_ABOUT_LEN: usize = 5000;
const MAX_LOCATION_LEN: usize = 100;
const MAX_SKILL_LEN: usize = 30;

/// Gives a new account its profile. Called in the same transaction that
/// creates the user.
pub fn create_profile(
    conn: &mut impl SqliteConn,
    user_id: i64,
) -> QueryResult<Profile> {
    diesel::insert_into(profiles::table)
        .values((
            profiles::user_id.eq(user_id),
            profiles::role.eq(ProfileRole::Other.code()),
            profiles::signup_date.eq(now),
            profiles::allowed_emails.eq(INITIAL_MAX_MESSAGES),
        ))
        .returning(Profile::as_returning())
        .get_result(conn)
}

pub fn profile_of(
    conn: &mut impl SqliteConn,
    user_id: i64,
) -> QueryResult<Profile> {
    profiles::table
        .filter(profiles::user_id.eq(user_id))
        .select(Profile::as_select())
        .first(conn)
}

pub fn skills_of(
    conn: &mut impl SqliteConn,
    profile_id: i64,
) -> QueryResult<Vec<String>> {
    profile_skills::table
        .filter(profile_skills::profile_id.eq(profile_id))
        .select(profile_skills::skill)
        .order_by(profile_skills::skill.asc())
        .load(conn)
}

/// Replaces the skills on a profile.
pub fn set_skills(
    conn: &mut impl SqliteConn,
    profile_id: i64,
    skills: &[String],
) -> QueryResult<()> {
    diesel::delete(
        profile_skills::table.filter(profile_skills::profile_id.eq(profile_id)),
    )
    .execute(conn)?;
    for skill in skills {
        diesel::insert_into(profile_skills::table)
            .values((
                profile_skills::profile_id.eq(profile_id),
                profile_skills::skill.eq(skill),
            ))
            .execute(conn)?;
    }
    Ok(())
}

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct ProfileForm {
    pub url: String,
    pub about: String,
    /// One of the [`ProfileRole`] codes.
    pub role: String,
    pub twitter_id: String,
    pub location: String,
    /// Comma separated, like project tags.
    pub skills: String,
    pub allow_org_emails: bool,
}

impl ProfileForm {
    pub fn of_profile(profile: &Profile, skills: &[String]) -> ProfileForm {
        ProfileForm {
            url: profile.url.clone(),
            about: profile.about.clone(),
            role: profile.role.clone(),
            twitter_id: profile.twitter_id.clone(),
            location: profile.location.clone(),
            skills: skills.join(", "),
            allow_org_emails: profile.allow_org_emails,
        }
    }

    fn twitter_id(&self) -> &str {
        self.twitter_id.trim().trim_start_matches('@')
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = vec![];
        let url = self.url.trim();
        if !url.is_empty() && !is_valid_http_url(url) {
            problems.push("Error: the website must be an absolute http(s) url.".to_string());
        }
        if self.about.chars().count() > MAX_ABOUT_LEN {
            problems.push(format!(
                "Error: the about text can be at most {MAX_ABOUT_LEN} characters."
            ));
        }
        if ProfileRole::from_code(&self.role).is_none() {
            problems.push("Error: pick one of the listed roles.".to_string());
        }
        let twitter_id = self.twitter_id();
        if !twitter_id.is_empty() && !is_valid_twitter_id(twitter_id) {
            problems.push(format!("Error: '{twitter_id}' is not a Twitter handle."));
        }
        if self.location.trim().chars().count() > MAX_LOCATION_LEN {
            problems.push(format!(
                "Error: the location can be at most {MAX_LOCATION_LEN} characters."
            ));
        }
        for skill in parse_tags(&self.skills) {
            if skill.chars().count() > MAX_SKILL_LEN || !is_valid_slug(&skill) {
                problems.push(format!("Error: '{skill}' is not a valid skill."));
            }
        }
        problems
    }
}

#[tracing::instrument(skip(conn, user, form), fields(user = user.id))]
pub fn update_profile(
    conn: &mut impl SqliteConn,
    user: &User,
    form: &ProfileForm,
) -> WorkflowResult<Profile> {
    let problems = form.problems();
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    let profile = diesel::update(profiles::table.filter(profiles::user_id.eq(user.id)))
        .set((
            profiles::url.eq(form.url.trim()),
            profiles::about.eq(&form.about),
            profiles::role.eq(&form.role),
            profiles::twitter_id.eq(form.twitter_id()),
            profiles::location.eq(form.location.trim()),
            profiles::allow_org_emails.eq(form.allow_org_emails),
        ))
        .returning(Profile::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    set_skills(conn, profile.id, &parse_tags(&form.skills))?;

    tracing::info!("user {} updated their profile", user.id);
    Ok(profile)
}

/// Everything shown on somebody's profile page.
#[derive(Debug)]
pub struct PersonDetail {
    pub user: User,
    pub profile: Profile,
    pub skills: Vec<String>,
    pub led: Vec<Project>,
    pub joined: Vec<Project>,
}

/// Loads a profile page. Projects hidden by moderation are left out of the
/// person's project lists.
pub fn person_detail(
    conn: &mut impl SqliteConn,
    username: &str,
    moderation: Moderation,
) -> WorkflowResult<PersonDetail> {
    let (user, profile) = users::table
        .inner_join(profiles::table)
        .filter(User::with_name(username))
        .select((User::as_select(), Profile::as_select()))
        .first::<(User, Profile)>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    let led = Project::listing(moderation, ProjectFilter::All)
        .filter(projects::lead_id.eq(user.id))
        .load(conn)?;

    let joined = Project::listing(moderation, ProjectFilter::All)
        .filter(
            projects::id.eq_any(
                roles::table
                    .filter(roles::user_id.eq(user.id))
                    .filter(Role::active())
                    .select(roles::project_id),
            ),
        )
        .load(conn)?;

    Ok(PersonDetail {
        skills: skills_of(conn, profile.id)?,
        user,
        profile,
        led,
        joined,
    })
}

/// Everybody, newest first, optionally only those listing `skill`.
pub fn people_list(
    conn: &mut impl SqliteConn,
    skill: Option<&str>,
    page: PageRequest,
) -> QueryResult<Paginated<(User, Profile)>> {
    let matching = || {
        let query = users::table.inner_join(profiles::table).into_boxed();
        match skill {
            Some(skill) => query.filter(
                profiles::id.eq_any(
                    profile_skills::table
                        .filter(profile_skills::skill.eq(skill))
                        .select(profile_skills::profile_id),
                ),
            ),
            None => query,
        }
    };

    let total = matching().count().get_result::<i64>(conn)?;
    let items = matching()
        .select((User::as_select(), Profile::as_select()))
        .order_by((profiles::signup_date.desc(), users::id.desc()))
        .limit(page.per_page)
        .offset(page.offset())
        .load(conn)?;

    Ok(Paginated::new(items, page, total))
}

fn people_table(people: &[(User, Profile)]) -> Markup {
    html! {
        @if people.is_empty() {
            p { "Nobody here yet." }
        } @else {
            table class="table" {
                thead {
                    tr {
                        th scope="col" { "Name" }
                        th scope="col" { "Role" }
                        th scope="col" { "Location" }
                    }
                }
                tbody {
                    @for (user, profile) in people {
                        tr {
                            th scope="row" {
                                a href=(format!("/people/{}", user.username)) { (user.display_name()) }
                            }
                            td { (profile.role().label()) }
                            td { (profile.location) }
                        }
                    }
                }
            }
        }
    }
}

async fn directory_page(
    title: String,
    base_url: String,
    skill: Option<String>,
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
    flash: Option<(String, String)>,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        people_list(
            conn,
            skill.as_deref(),
            PageRequest::new(page, PEOPLE_PER_PAGE),
        )
        .map(|listing| {
            let markup = html! {
                (page_title(&title))
                (people_table(&listing.items))
                (pager(&base_url, listing.page, listing.num_pages))
            };
            page_of_body_and_flash_msg(markup, flash, user.as_ref())
        })
        .map_err(|e| WorkflowError::from(e).into_page(user.as_ref()))
    })
    .await
}

#[get("/people?<page>")]
pub async fn people_page(
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    directory_page(
        "People".to_string(),
        "/people".to_string(),
        None,
        page,
        user,
        db,
        flash,
    )
    .await
}

#[get("/people/skill/<skill>?<page>")]
pub async fn people_with_skill(
    skill: String,
    page: Option<i64>,
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    let skill = skill.to_lowercase();
    directory_page(
        format!("People who know {skill}"),
        format!("/people/skill/{skill}"),
        Some(skill),
        page,
        user,
        db,
        None,
    )
    .await
}

fn render_person(detail: &PersonDetail, viewer: Option<&User>) -> Markup {
    let profile = &detail.profile;
    let is_me = viewer.is_some_and(|viewer| viewer.id == detail.user.id);
    html! {
        (page_title(detail.user.display_name()))
        p class="text-muted" {
            (profile.role().label())
            @if !profile.location.is_empty() {
                " in " (profile.location)
            }
            ", joined " (profile.signup_date.format("%B %Y"))
        }
        @if !profile.url.is_empty() {
            p { a href=(profile.url) { (profile.url) } }
        }
        @if !profile.twitter_id.is_empty() {
            p {
                a href=(format!("https://twitter.com/{}", profile.twitter_id)) {
                    "@" (profile.twitter_id)
                }
            }
        }
        @for paragraph in profile.about.split("\n\n").filter(|p| !p.trim().is_empty()) {
            p { (paragraph) }
        }

        @if !detail.skills.is_empty() {
            h3 { "Skills" }
            p {
                @for skill in &detail.skills {
                    a class="badge text-bg-secondary me-1" href=(format!("/people/skill/{skill}")) { (skill) }
                }
            }
        }

        h3 { "Leads" }
        (project_table(&detail.led))
        h3 { "Member of" }
        (project_table(&detail.joined))

        @if is_me {
            a class="btn btn-outline-primary" href="/user/profile" { "Edit your profile" }
        } @else if viewer.is_some() {
            a class="btn btn-primary" href=(format!("/people/{}/contact", detail.user.username)) { "Send a message" }
        }
    }
}

#[get("/people/<username>")]
pub async fn person_page(
    username: String,
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
    span: TracingSpan,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let detail = person_detail(conn, &username, moderation)?;
            Ok(page_of_body_and_flash_msg(
                render_person(&detail, user.as_ref()),
                flash,
                user.as_ref(),
            ))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .instrument(span.0)
    .await
}

fn edit_profile_form(form: &ProfileForm, errors: &[String], user: &User) -> Markup {
    page_of_body(
        html! {
            (page_title("Your profile"))
            @for error in errors {
                (error_alert(Some(error)))
            }
            form method="post" action="/user/profile" {
                div class="mb-3" {
                    label for="role" class="form-label" { "What do you do?" }
                    select class="form-select" id="role" name="role" {
                        @for role in ProfileRole::ALL {
                            option value=(role.code()) selected[form.role == role.code()] { (role.label()) }
                        }
                    }
                }
                div class="mb-3" {
                    label for="location" class="form-label" { "Location" }
                    input type="text" class="form-control" id="location" name="location" value=(form.location);
                }
                div class="mb-3" {
                    label for="url" class="form-label" { "Website" }
                    input type="url" class="form-control" id="url" name="url" value=(form.url);
                }
                div class="mb-3" {
                    label for="twitter_id" class="form-label" { "Twitter" }
                    input type="text" class="form-control" id="twitter_id" name="twitter_id" value=(form.twitter_id);
                }
                div class="mb-3" {
                    label for="skills" class="form-label" { "Skills" }
                    input type="text" class="form-control" id="skills" name="skills" value=(form.skills);
                    div class="form-text" { "Comma separated, for example: python, django" }
                }
                div class="mb-3" {
                    label for="about" class="form-label" { "About you" }
                    textarea class="form-control" id="about" name="about" rows="6" maxlength=(MAX_ABOUT_LEN) { (form.about) }
                }
                div class="form-check mb-3" {
                    input class="form-check-input" type="checkbox" id="allow_org_emails" name="allow_org_emails" value="true" checked[form.allow_org_emails];
                    label class="form-check-label" for="allow_org_emails" { "Email me news from the site's organisers" }
                }
                button type="submit" class="btn btn-primary" { "Save" }
            }
        },
        Some(user),
    )
}

#[get("/user/profile")]
pub async fn edit_profile_page(
    user: User,
    db: DbConn,
) -> Result<Markup, (Status, Markup)> {
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let profile = profile_of(conn, user.id)?;
            let skills = skills_of(conn, profile.id)?;
            Ok(edit_profile_form(
                &ProfileForm::of_profile(&profile, &skills),
                &[],
                &user,
            ))
        })
        .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[post("/user/profile", data = "<form>")]
pub async fn do_edit_profile(
    user: User,
    form: Form<ProfileForm>,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    db.run(move |conn| {
        match conn.transaction(|conn| update_profile(conn, &user, &form)) {
            Ok(_) => Ok(Flash::success(
                Redirect::to(format!("/people/{}", user.username)),
                "Your profile has been saved.",
            )),
            Err(WorkflowError::Validation(errors)) => Err((
                Status::UnprocessableEntity,
                edit_profile_form(&form, &errors, &user),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .await
}
