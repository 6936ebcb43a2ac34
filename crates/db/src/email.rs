use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::emails;

/// A message in the outbox. Rows are written in the same transaction as the
/// change that caused them and marked sent once the transport accepts them.
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
#[diesel(table_name = emails)]
pub struct EmailRow {
    pub id: i64,
    pub message_id: String,
    pub recipients: String,
    pub subject: String,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
}
