//! Events: the list of upcoming events, event pages, creating events and
//! RSVPs.
use chrono::{Local, NaiveDateTime};
use db::{
    event::{Attendance, Event},
    project::Project,
    schema::{attendances, event_projects, events, projects, users},
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
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
use ui::{error_alert, page_of_body, page_of_body_and_flash_msg, page_title};

use crate::{
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
    util::{is_valid_http_url, parse_tags},
};

/// The format `<input type="datetime-local">` submits.
const DATETIME_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Event times are entered, stored and compared as the server's local wall
/// clock time, so "now" has to be read the same way.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Events which have not finished yet, soonest first.
pub fn future_events(
    conn: &mut impl SqliteConn,
    now: NaiveDateTime,
) -> QueryResult<Vec<Event>> {
    Event::future(now).load(conn)
}

#[derive(Debug)]
pub struct EventDetail {
    pub event: Event,
    pub creator: User,
    pub projects: Vec<Project>,
    pub attendees: Vec<(Attendance, User)>,
}

pub fn event_detail(
    conn: &mut impl SqliteConn,
    id: i64,
) -> WorkflowResult<EventDetail> {
    let (event, creator) = events::table
        .inner_join(users::table)
        .filter(events::id.eq(id))
        .select((Event::as_select(), User::as_select()))
        .first::<(Event, User)>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound)?;

    let projects = event_projects::table
        .inner_join(projects::table)
        .filter(event_projects::event_id.eq(id))
        .select(Project::as_select())
        .order_by(projects::name.asc())
        .load(conn)?;

    let attendees = attendances::table
        .inner_join(users::table)
        .filter(attendances::event_id.eq(id))
        .select((Attendance::as_select(), User::as_select()))
        .order_by(attendances::id.asc())
        .load(conn)?;

    Ok(EventDetail {
        event,
        creator,
        projects,
        attendees,
    })
}

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct EventForm {
    pub title: String,
    pub description: String,
    pub url: String,
    pub location: String,
    pub start_date: String,
    pub end_date: String,
    /// Comma separated project slugs.
    pub projects: String,
    /// Only honoured for staff.
    pub official: bool,
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DATETIME_INPUT_FORMAT).ok()
}

#[tracing::instrument(skip(conn, user, form), fields(user = user.id))]
pub fn create_event(
    conn: &mut impl SqliteConn,
    user: &User,
    form: &EventForm,
) -> WorkflowResult<Event> {
    if !has_permission(Some(user), &Permission::CreateEvent, conn)? {
        return Err(WorkflowError::PermissionDenied(
            "You may not create events.",
        ));
    }

    let mut problems = vec![];
    if form.title.trim().is_empty() {
        problems.push("Error: the event needs a title.".to_string());
    }

    let url = form.url.trim();
    if !url.is_empty() && !is_valid_http_url(url) {
        problems.push("Error: the url must be an absolute http(s) url.".to_string());
    }

    let start_date = parse_datetime(&form.start_date);
    if start_date.is_none() {
        problems.push("Error: the start date is missing or malformed.".to_string());
    }
    let end_date = if form.end_date.trim().is_empty() {
        None
    } else {
        match parse_datetime(&form.end_date) {
            None => {
                problems.push("Error: the end date is malformed.".to_string());
                None
            }
            Some(end) if start_date.is_some_and(|start| end < start) => {
                problems
                    .push("Error: the event cannot end before it starts.".to_string());
                None
            }
            end => end,
        }
    };

    let slugs = parse_tags(&form.projects);
    let related = projects::table
        .filter(projects::slug.eq_any(&slugs))
        .select((projects::id, projects::slug))
        .load::<(i64, String)>(conn)?;
    for slug in &slugs {
        if !related.iter().any(|(_, s)| s == slug) {
            problems.push(format!("Error: there is no project called '{slug}'."));
        }
    }

    let Some(start_date) = start_date else {
        return Err(WorkflowError::Validation(problems));
    };
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    let event = diesel::insert_into(events::table)
        .values((
            events::title.eq(form.title.trim()),
            events::description.eq(&form.description),
            events::official.eq(form.official && user.is_staff),
            events::url.eq((!url.is_empty()).then_some(url)),
            events::location.eq(form.location.trim()),
            events::start_date.eq(start_date),
            events::end_date.eq(end_date),
            events::creator_id.eq(user.id),
            events::created_at.eq(diesel::dsl::now),
        ))
        .returning(Event::as_returning())
        .get_result(conn)?;

    for (project_id, _) in &related {
        diesel::insert_into(event_projects::table)
            .values((
                event_projects::event_id.eq(event.id),
                event_projects::project_id.eq(project_id),
            ))
            .execute(conn)?;
    }

    tracing::info!("user {} created event {}", user.id, event.id);
    Ok(event)
}

#[derive(FromForm, Debug, Clone, Default)]
pub struct AttendForm {
    pub guests: i64,
    pub message: String,
}

/// Records (or updates) `user`'s RSVP to an event.
#[tracing::instrument(skip(conn, user, form), fields(user = user.id))]
pub fn attend(
    conn: &mut impl SqliteConn,
    user: &User,
    event_id: i64,
    form: &AttendForm,
) -> WorkflowResult<Attendance> {
    if form.guests < 0 {
        return Err(WorkflowError::invalid(
            "Error: the number of guests cannot be negative.",
        ));
    }

    let exists = diesel::select(diesel::dsl::exists(
        events::table.filter(events::id.eq(event_id)),
    ))
    .get_result::<bool>(conn)?;
    if !exists {
        return Err(WorkflowError::NotFound);
    }

    let today = local_now().date();
    let attendance = diesel::insert_into(attendances::table)
        .values((
            attendances::user_id.eq(user.id),
            attendances::event_id.eq(event_id),
            attendances::join_time.eq(today),
            attendances::guests.eq(form.guests),
            attendances::message.eq(&form.message),
        ))
        .on_conflict((attendances::user_id, attendances::event_id))
        .do_update()
        .set((
            attendances::guests.eq(form.guests),
            attendances::message.eq(&form.message),
        ))
        .returning(Attendance::as_returning())
        .get_result(conn)?;

    tracing::info!(
        "user {} will attend event {event_id} with {} guests",
        user.id,
        attendance.guests
    );
    Ok(attendance)
}

fn event_when(event: &Event) -> String {
    match event.end_date {
        Some(end) => format!(
            "{} until {}",
            event.start_date.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        ),
        None => event.start_date.format("%Y-%m-%d %H:%M").to_string(),
    }
}

#[get("/events")]
pub async fn events_page(
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        future_events(conn, local_now())
            .map(|events| {
                let markup = html! {
                    (page_title("Upcoming events"))
                    @if user.is_some() {
                        a class="btn btn-primary mb-3" href="/events/new" { "Add an event" }
                    }
                    @if events.is_empty() {
                        p { "There are no upcoming events." }
                    }
                    ul class="list-group" {
                        @for event in &events {
                            li class="list-group-item" {
                                a href=(event.url()) { (event.title) }
                                @if event.official {
                                    " " span class="badge text-bg-primary" { "Official" }
                                }
                                div class="small text-muted" { (event_when(event)) }
                            }
                        }
                    }
                };
                page_of_body_and_flash_msg(markup, flash, user.as_ref())
            })
            .map_err(|e| WorkflowError::from(e).into_page(user.as_ref()))
    })
    .await
}

fn event_form_page(form: &EventForm, errors: &[String], user: &User) -> Markup {
    page_of_body(
        html! {
            (page_title("Add an event"))
            @for error in errors {
                (error_alert(Some(error)))
            }
            form method="post" action="/events/new" {
                div class="mb-3" {
                    label for="title" class="form-label" { "Title" }
                    input type="text" class="form-control" id="title" name="title" value=(form.title) required;
                }
                div class="mb-3" {
                    label for="description" class="form-label" { "Description" }
                    textarea class="form-control" id="description" name="description" rows="4" { (form.description) }
                }
                div class="mb-3" {
                    label for="url" class="form-label" { "Website" }
                    input type="url" class="form-control" id="url" name="url" value=(form.url);
                }
                div class="mb-3" {
                    label for="location" class="form-label" { "Where" }
                    input type="text" class="form-control" id="location" name="location" value=(form.location);
                }
                div class="row mb-3" {
                    div class="form-text" { "Times are the site's local time." }
                    div class="col" {
                        label for="start_date" class="form-label" { "Starts" }
                        input type="datetime-local" class="form-control" id="start_date" name="start_date" value=(form.start_date) required;
                    }
                    div class="col" {
                        label for="end_date" class="form-label" { "Ends" }
                        input type="datetime-local" class="form-control" id="end_date" name="end_date" value=(form.end_date);
                    }
                }
                div class="mb-3" {
                    label for="projects" class="form-label" { "Related projects" }
                    input type="text" class="form-control" id="projects" name="projects" value=(form.projects);
                    div class="form-text" { "Project slugs, separated by commas." }
                }
                @if user.is_staff {
                    div class="form-check mb-3" {
                        input class="form-check-input" type="checkbox" id="official" name="official" value="true" checked[form.official];
                        label class="form-check-label" for="official" { "Official event" }
                    }
                }
                button type="submit" class="btn btn-primary" { "Create event" }
            }
        },
        Some(user),
    )
}

#[get("/events/new")]
pub async fn new_event_form(user: Option<User>) -> Result<Markup, Redirect> {
    match user {
        Some(user) => Ok(event_form_page(&EventForm::default(), &[], &user)),
        None => Err(Redirect::to("/login")),
    }
}

#[post("/events/new", data = "<form>")]
pub async fn do_create_event(
    user: User,
    form: Form<EventForm>,
    db: DbConn,
    span: TracingSpan,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    db.run(move |conn| {
        match conn.transaction(|conn| create_event(conn, &user, &form)) {
            Ok(event) => Ok(Flash::success(
                Redirect::to(event.url()),
                "The event has been created.",
            )),
            Err(WorkflowError::Validation(errors)) => Err((
                Status::UnprocessableEntity,
                event_form_page(&form, &errors, &user),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .instrument(span.0)
    .await
}

#[get("/events/<id>")]
pub async fn event_page(
    id: i64,
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| event_detail(conn, id))
            .map(|detail| {
                let mine = user.as_ref().and_then(|user| {
                    detail
                        .attendees
                        .iter()
                        .find(|(_, attendee)| attendee.id == user.id)
                        .map(|(attendance, _)| attendance.clone())
                });
                let markup = render_event(&detail, user.as_ref(), mine.as_ref());
                page_of_body_and_flash_msg(markup, flash, user.as_ref())
            })
            .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

fn render_event(
    detail: &EventDetail,
    user: Option<&User>,
    mine: Option<&Attendance>,
) -> Markup {
    let event = &detail.event;
    let guests: i64 = detail.attendees.iter().map(|(a, _)| 1 + a.guests).sum();
    html! {
        (page_title(&event.title))
        p class="text-muted" {
            (event_when(event))
            @if !event.location.is_empty() {
                " at " (event.location)
            }
            ", added by " (detail.creator.display_name())
        }
        @if let Some(url) = &event.url {
            p { a href=(url) { (url) } }
        }
        p { (event.description) }

        @if !detail.projects.is_empty() {
            h3 { "Projects" }
            ul {
                @for project in &detail.projects {
                    li { a href=(project.url()) { (project.name) } }
                }
            }
        }

        h3 { "Attending (" (guests) ")" }
        ul {
            @for (attendance, attendee) in &detail.attendees {
                li {
                    (attendee.display_name())
                    @if attendance.guests > 0 {
                        " +" (attendance.guests)
                    }
                    @if !attendance.message.is_empty() {
                        ": " em { (attendance.message) }
                    }
                }
            }
        }

        @if user.is_some() {
            form method="post" action=(format!("/events/{}/attend", event.id)) class="row g-2" {
                div class="col-auto" {
                    label for="guests" class="form-label" { "Guests" }
                    input type="number" min="0" class="form-control" id="guests" name="guests" value=(mine.map(|a| a.guests).unwrap_or(0));
                }
                div class="col" {
                    label for="message" class="form-label" { "Message" }
                    input type="text" class="form-control" id="message" name="message" value=(mine.map(|a| a.message.as_str()).unwrap_or(""));
                }
                div class="col-auto align-self-end" {
                    button type="submit" class="btn btn-primary" {
                        @if mine.is_some() { "Update RSVP" } @else { "I'm going" }
                    }
                }
            }
        }
    }
}

#[post("/events/<id>/attend", data = "<form>")]
pub async fn do_attend(
    id: i64,
    user: User,
    form: Form<AttendForm>,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    db.run(move |conn| {
        match conn.transaction(|conn| attend(conn, &user, id, &form)) {
            Ok(_) => Ok(Flash::success(
                Redirect::to(format!("/events/{id}")),
                "Your RSVP has been saved.",
            )),
            Err(WorkflowError::Validation(errors)) => Ok(Flash::error(
                Redirect::to(format!("/events/{id}")),
                errors.join(" "),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .await
}
