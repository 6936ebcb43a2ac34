use db::{
    config::{flag_is_set, MODERATE_PROJECTS},
    project::Moderation,
    SqliteConn,
};
use diesel::QueryResult;
use serde::Deserialize;

/// Settings read from Rocket's figment (the `[default.anthill]` table of
/// `Rocket.toml`, or `ROCKET_ANTHILL={site_name="..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_site_name")]
    pub site_name: String,
    /// Absolute URL the site is served from, used for links in emails.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_site_name() -> String {
    "Anthill".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            site_name: default_site_name(),
            base_url: default_base_url(),
        }
    }
}

/// The moderation policy for project listings, taken from the site settings
/// staff manage at `/admin/config`.
pub fn project_moderation(conn: &mut impl SqliteConn) -> QueryResult<Moderation> {
    Ok(if flag_is_set(conn, MODERATE_PROJECTS)? {
        Moderation::ApprovedOnly
    } else {
        Moderation::Unmoderated
    })
}
