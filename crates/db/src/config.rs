use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{schema::config, SqliteConn};

#[derive(
    Debug,
    Queryable,
    Selectable,
    Serialize,
    Deserialize,
    Clone,
    Hash,
    PartialEq,
    Eq,
)]
#[diesel(table_name = config)]
pub struct ConfigItem {
    pub id: i64,
    pub key: String,
    pub value: String,
}

pub const DISABLE_SIGNUPS: &str = "disable_signups";
pub const MODERATE_PROJECTS: &str = "moderate_projects";

/// The keys staff are allowed to change, and a description of each.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    (DISABLE_SIGNUPS, "Set to 1 to stop new users from registering."),
    (
        MODERATE_PROJECTS,
        "Set to 1 to hide unapproved projects from listings.",
    ),
];

/// Reads a boolean site setting stored as "0"/"1". Missing keys are off.
pub fn flag_is_set(
    conn: &mut impl SqliteConn,
    key: &str,
) -> QueryResult<bool> {
    let value = config::table
        .filter(config::key.eq(key))
        .select(config::value)
        .first::<String>(conn)
        .optional()?;

    Ok(matches!(value.as_deref(), Some("1")))
}

/// Inserts or replaces a setting.
pub fn upsert(
    conn: &mut impl SqliteConn,
    key: &str,
    value: &str,
) -> QueryResult<usize> {
    diesel::insert_into(config::table)
        .values((config::key.eq(key), config::value.eq(value)))
        .on_conflict(config::key)
        .do_update()
        .set(config::value.eq(value))
        .execute(conn)
}
