use db::{
    config::{flag_is_set, DISABLE_SIGNUPS},
    role::Role,
    schema::{projects, roles},
    user::User,
    SqliteConn,
};
use diesel::{
    dsl::{exists, select},
    prelude::*,
};

use crate::resources::ProjectRef;

#[derive(Debug)]
/// A permission for a given resource on the system.
pub enum Permission {
    /// Start a new project (and so become its lead).
    CreateProject,
    /// Change a project's details, links, roles and feeds.
    EditProject(ProjectRef),
    PostAsk(ProjectRef),
    DeleteAsk(ProjectRef),
    CreateEvent,
    /// Send another user an email through the site.
    ContactUser,
    RegisterAsNewUser,
    /// Edit the site-wide configuration.
    ModifySiteConfig,
}

/// Returns whether a requester has the requisite permission on the given
/// object. Anonymous requesters only ever get `RegisterAsNewUser`.
#[tracing::instrument(skip(conn))]
pub fn has_permission(
    user: Option<&User>,
    permission: &Permission,
    conn: &mut impl SqliteConn,
) -> QueryResult<bool> {
    match (permission, user) {
        (Permission::RegisterAsNewUser, _) => {
            Ok(!flag_is_set(conn, DISABLE_SIGNUPS)?)
        }
        (_, None) => Ok(false),
        (
            Permission::CreateProject
            | Permission::CreateEvent
            | Permission::ContactUser,
            Some(_),
        ) => Ok(true),
        (Permission::EditProject(project), Some(user)) => {
            if user.is_staff {
                return Ok(true);
            }
            is_project_lead(conn, *project, user)
        }
        (
            Permission::PostAsk(project) | Permission::DeleteAsk(project),
            Some(user),
        ) => user_on_project(conn, *project, user),
        (Permission::ModifySiteConfig, Some(user)) => Ok(user.is_staff),
    }
}

#[tracing::instrument(skip(conn))]
fn is_project_lead(
    conn: &mut impl SqliteConn,
    project: ProjectRef,
    user: &User,
) -> QueryResult<bool> {
    let ProjectRef(project_id) = project;
    select(exists(
        projects::table
            .filter(projects::id.eq(project_id))
            .filter(projects::lead_id.eq(user.id)),
    ))
    .get_result::<bool>(conn)
}

/// Whether `user` is a current member of the project: its lead, or the holder
/// of a role which is not an outstanding join request.
#[tracing::instrument(skip(conn))]
pub fn user_on_project(
    conn: &mut impl SqliteConn,
    project: ProjectRef,
    user: &User,
) -> QueryResult<bool> {
    if is_project_lead(conn, project, user)? {
        return Ok(true);
    }

    let ProjectRef(project_id) = project;
    select(exists(
        roles::table
            .filter(roles::project_id.eq(project_id))
            .filter(roles::user_id.eq(user.id))
            .filter(Role::active()),
    ))
    .get_result::<bool>(conn)
}
