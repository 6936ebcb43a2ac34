use chrono::{NaiveDate, NaiveDateTime};
use diesel::{prelude::*, sqlite::Sqlite};
use serde::Serialize;

use crate::schema::{attendances, events};

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub official: bool,
    pub url: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub creator_id: i64,
    pub created_at: NaiveDateTime,
    /// Free text, such as a venue or an address.
    pub location: String,
}

impl Event {
    /// Events which have not finished as of `now`: either they start after
    /// `now`, or they are still running. Soonest first.
    pub fn future<'a>(now: NaiveDateTime) -> events::BoxedQuery<'a, Sqlite> {
        events::table
            .filter(
                events::start_date
                    .gt(now)
                    .or(events::end_date.gt(now).assume_not_null()),
            )
            .order_by((events::start_date.asc(), events::id.asc()))
            .into_boxed()
    }

    pub fn url(&self) -> String {
        format!("/events/{}", self.id)
    }
}

/// A user's RSVP to an event.
#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = attendances)]
pub struct Attendance {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub join_time: NaiveDate,
    pub guests: i64,
    pub message: String,
}
