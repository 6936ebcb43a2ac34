use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{feeds, subscriptions};

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = feeds)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
}

/// Links a project to a feed it follows.
#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = subscriptions)]
pub struct Subscription {
    pub id: i64,
    pub project_id: i64,
    pub feed_id: i64,
}
