//! Diff-and-apply for the sets edited on the project form (links, roles and
//! feeds). The submitted set is authoritative: rows with an id are updated,
//! rows without one are created, and stored rows which are marked for
//! deletion or missing from the submission are deleted.
//!
//! Planning is pure and happens before anything is written, so a submission
//! with a bad id is rejected as a whole.
use std::collections::BTreeSet;

use db::{
    feed::Feed,
    role::RoleStatus,
    schema::{feeds, project_links, roles, subscriptions, users},
    user::User,
    SqliteConn,
};
use diesel::prelude::*;

/// One row of a submitted set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted<T> {
    pub id: Option<i64>,
    pub delete: bool,
    pub value: T,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Plan<T> {
    pub create: Vec<T>,
    pub update: Vec<(i64, T)>,
    /// Ids to remove, ascending.
    pub delete: Vec<i64>,
}

/// Works out what has to change to turn `existing` into the submitted set.
///
/// Errors (one message per problem) if an id does not belong to `existing`
/// or appears more than once; in particular an id cannot be both kept and
/// deleted in the same submission.
pub fn plan<T>(
    kind: &str,
    existing: &[i64],
    submitted: Vec<Submitted<T>>,
) -> Result<Plan<T>, Vec<String>> {
    let known: BTreeSet<i64> = existing.iter().copied().collect();
    let mut seen = BTreeSet::new();
    let mut errors = vec![];

    let mut create = vec![];
    let mut update = vec![];
    let mut delete = BTreeSet::new();

    for row in submitted {
        match row.id {
            Some(id) => {
                if !known.contains(&id) {
                    errors.push(format!(
                        "Error: {kind} {id} does not belong to this project."
                    ));
                    continue;
                }
                if !seen.insert(id) {
                    errors.push(format!(
                        "Error: {kind} {id} was submitted more than once."
                    ));
                    continue;
                }
                if row.delete {
                    delete.insert(id);
                } else {
                    update.push((id, row.value));
                }
            }
            // a new row which was removed again before submitting
            None if row.delete => {}
            None => create.push(row.value),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    delete.extend(known.difference(&seen).copied());

    Ok(Plan {
        create,
        update,
        delete: delete.into_iter().collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFields {
    pub title: String,
    pub url: String,
}

/// Ids of the feeds `project_id` is subscribed to.
pub fn subscribed_feed_ids(
    conn: &mut impl SqliteConn,
    project_id: i64,
) -> QueryResult<Vec<i64>> {
    subscriptions::table
        .filter(subscriptions::project_id.eq(project_id))
        .select(subscriptions::feed_id)
        .order_by(subscriptions::feed_id.asc())
        .load(conn)
}

pub fn subscribed_feeds(
    conn: &mut impl SqliteConn,
    project_id: i64,
) -> QueryResult<Vec<Feed>> {
    subscriptions::table
        .inner_join(feeds::table)
        .filter(subscriptions::project_id.eq(project_id))
        .select(Feed::as_select())
        .order_by(feeds::id.asc())
        .load(conn)
}

/// Writes a feed plan. Deletes run last, after every update and creation.
#[tracing::instrument(skip(conn, plan))]
pub fn apply_feed_plan(
    conn: &mut impl SqliteConn,
    project_id: i64,
    plan: Plan<FeedFields>,
) -> QueryResult<()> {
    for (id, fields) in plan.update {
        diesel::update(feeds::table.filter(feeds::id.eq(id)))
            .set((feeds::title.eq(fields.title), feeds::url.eq(fields.url)))
            .execute(conn)?;
    }

    for fields in plan.create {
        let feed_id = diesel::insert_into(feeds::table)
            .values((feeds::title.eq(fields.title), feeds::url.eq(fields.url)))
            .returning(feeds::id)
            .get_result::<i64>(conn)?;
        diesel::insert_into(subscriptions::table)
            .values((
                subscriptions::project_id.eq(project_id),
                subscriptions::feed_id.eq(feed_id),
            ))
            .execute(conn)?;
        tracing::info!("subscribed project {project_id} to new feed {feed_id}");
    }

    let to_delete = plan.delete;
    if !to_delete.is_empty() {
        // subscriptions go with their feed (ON DELETE CASCADE)
        let n = diesel::delete(feeds::table.filter(feeds::id.eq_any(to_delete)))
            .execute(conn)?;
        tracing::info!("deleted {n} feeds from project {project_id}");
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFields {
    pub title: String,
    pub url: String,
}

pub fn link_ids(
    conn: &mut impl SqliteConn,
    project_id: i64,
) -> QueryResult<Vec<i64>> {
    project_links::table
        .filter(project_links::project_id.eq(project_id))
        .select(project_links::id)
        .order_by(project_links::id.asc())
        .load(conn)
}

#[tracing::instrument(skip(conn, plan))]
pub fn apply_link_plan(
    conn: &mut impl SqliteConn,
    project_id: i64,
    plan: Plan<LinkFields>,
) -> QueryResult<()> {
    for (id, fields) in plan.update {
        diesel::update(project_links::table.filter(project_links::id.eq(id)))
            .set((
                project_links::title.eq(fields.title),
                project_links::url.eq(fields.url),
            ))
            .execute(conn)?;
    }

    for fields in plan.create {
        diesel::insert_into(project_links::table)
            .values((
                project_links::project_id.eq(project_id),
                project_links::title.eq(fields.title),
                project_links::url.eq(fields.url),
            ))
            .execute(conn)?;
    }

    if !plan.delete.is_empty() {
        diesel::delete(
            project_links::table
                .filter(project_links::project_id.eq(project_id))
                .filter(project_links::id.eq_any(plan.delete)),
        )
        .execute(conn)?;
    }

    Ok(())
}

/// A row of the role set. `username` only matters for new rows; an
/// existing role always stays with the user who holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFields {
    pub username: String,
    pub status: RoleStatus,
    pub message: String,
}

pub fn role_ids(
    conn: &mut impl SqliteConn,
    project_id: i64,
) -> QueryResult<Vec<i64>> {
    roles::table
        .filter(roles::project_id.eq(project_id))
        .select(roles::id)
        .order_by(roles::id.asc())
        .load(conn)
}

/// Writes a role plan: updates approve (or demote) roles, creations add
/// users by username, deletions reject requests and remove members. New
/// usernames must already have been checked by the caller.
#[tracing::instrument(skip(conn, plan))]
pub fn apply_role_plan(
    conn: &mut impl SqliteConn,
    project_id: i64,
    plan: Plan<RoleFields>,
) -> QueryResult<()> {
    for (id, fields) in plan.update {
        diesel::update(
            roles::table
                .filter(roles::id.eq(id))
                .filter(roles::project_id.eq(project_id)),
        )
        .set((
            roles::status.eq(fields.status.code()),
            roles::message.eq(fields.message),
        ))
        .execute(conn)?;
    }

    if !plan.delete.is_empty() {
        let n = diesel::delete(
            roles::table
                .filter(roles::project_id.eq(project_id))
                .filter(roles::id.eq_any(plan.delete)),
        )
        .execute(conn)?;
        tracing::info!("removed {n} roles from project {project_id}");
    }

    for fields in plan.create {
        let user = users::table
            .filter(User::with_name(&fields.username))
            .select(User::as_select())
            .first(conn)?;
        diesel::insert_into(roles::table)
            .values((
                roles::project_id.eq(project_id),
                roles::user_id.eq(user.id),
                roles::status.eq(fields.status.code()),
                roles::message.eq(fields.message),
                roles::created_at.eq(diesel::dsl::now),
            ))
            .execute(conn)?;
        tracing::info!("added {} to project {project_id}", user.username);
    }

    Ok(())
}
