use db::{user::User, DbConn};
use diesel::Connection;
use diesel_migrations::{
    embed_migrations, EmbeddedMigrations, MigrationHarness,
};
use maud::Markup;
use rocket::{
    fairing::AdHoc,
    figment::{
        util::map,
        value::{Map, Value},
    },
    http::Status,
    request::FlashMessage,
    Build, Rocket,
};
use trace_request::RequestIdFairing;
use ui::page_of_body_and_flash_msg;

use crate::{
    config::{project_moderation, AppConfig},
    error::WorkflowResult,
    projects::{project_table, recent_projects},
};

pub mod accounts;
pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod people;
pub mod permissions;
pub mod projects;
pub mod resources;
#[cfg(test)]
pub mod tests;
pub mod util;

#[macro_use]
extern crate rocket;

const HOME_PAGE_EVENTS: usize = 5;

#[get("/")]
async fn index(
    user: Option<User>,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            let moderation = project_moderation(conn)?;
            let projects = recent_projects(conn, moderation)?;
            let mut upcoming =
                events::future_events(conn, events::local_now())?;
            upcoming.truncate(HOME_PAGE_EVENTS);

            let markup = maud::html! {
                div class="p-4 mb-4 bg-body-tertiary rounded-3" {
                    h1 { "Anthill" }
                    p class="lead" {
                        "Find a project to work on, ask for help with yours, and meet the people behind them."
                    }
                }
                h2 { "Recently updated projects" }
                (project_table(&projects))
                a href="/projects/all" { "Browse all projects" }
                h2 class="mt-4" { "Coming up" }
                @if upcoming.is_empty() {
                    p { "No events are planned yet." }
                }
                ul {
                    @for event in &upcoming {
                        li {
                            a href=(event.url()) { (event.title) }
                            " " (event.start_date.format("%Y-%m-%d %H:%M"))
                        }
                    }
                }
            };
            Ok(page_of_body_and_flash_msg(markup, flash, user.as_ref()))
        })
        .map_err(|e| e.into_page(user.as_ref()))
    })
    .await
}

pub const MIGRATIONS: EmbeddedMigrations =
    embed_migrations!("../../migrations");

pub fn make_rocket(default_db: &str) -> Rocket<Build> {
    let db: Map<_, Value> = map![
        "url" => std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| default_db.to_string())
            .into(),
        "pool_size" => 10.into(),
        "timeout" => 5.into(),
    ];

    let figment =
        rocket::Config::figment().merge(("databases", map!["anthill" => db]));

    rocket::custom(figment)
        .attach(DbConn::fairing())
        .attach(AdHoc::try_on_ignite("migrations", |rocket| async move {
            let Some(db_conn) = DbConn::get_one(&rocket).await else {
                tracing::error!("no database connection available for migrations");
                return Err(rocket);
            };

            let ret: Result<(), Box<dyn std::error::Error + Send + Sync>> =
                db_conn
                    .run(move |conn| {
                        let applied = conn.run_pending_migrations(MIGRATIONS)?;
                        for migration in applied {
                            tracing::info!("applied migration {migration}");
                        }
                        Ok(())
                    })
                    .await;

            match ret {
                Ok(_) => Ok(rocket),
                Err(e) => {
                    tracing::error!("could not run migrations: {e}");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("site config", |rocket| async move {
            match rocket.figment().focus("anthill").extract::<AppConfig>() {
                Ok(config) => {
                    tracing::info!("serving {} at {}", config.site_name, config.base_url);
                    Ok(rocket.manage(config))
                }
                Err(e) => {
                    tracing::error!("invalid anthill configuration: {e}");
                    Err(rocket)
                }
            }
        }))
        .mount(
            "/",
            routes![
                index,
                auth::login::login_form,
                auth::login::do_login,
                auth::logout::logout,
                auth::register::register_form,
                auth::register::do_register,
                accounts::account_page,
                admin::admin_overview,
                admin::do_approve_project,
                admin::config::config_page,
                admin::config::do_upsert_config,
                projects::projects_page,
                projects::all_projects,
                projects::official_projects,
                projects::community_projects,
                projects::tagged_projects,
                projects::project_page,
                projects::create::new_project_form,
                projects::create::do_create_project,
                projects::edit::edit_project_page,
                projects::edit::do_edit_project,
                projects::join::join_project_page,
                projects::join::do_join_project,
                projects::asks::asks_page,
                projects::asks::do_add_ask,
                projects::asks::do_delete_ask,
                events::events_page,
                events::new_event_form,
                events::do_create_event,
                events::event_page,
                events::do_attend,
                people::people_page,
                people::people_with_skill,
                people::person_page,
                people::edit_profile_page,
                people::do_edit_profile,
                people::contact::contact_user_page,
                people::contact::do_contact_user,
            ],
        )
        .attach(RequestIdFairing)
}
