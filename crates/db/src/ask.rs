use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::asks;

/// A short request for help posted on a project by one of its members.
#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = asks)]
pub struct Ask {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub message: String,
    pub created_at: NaiveDateTime,
}

impl Ask {
    pub const MAX_MESSAGE_LEN: usize = 140;
}
