use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::roles;

/// The stored `status` of a project role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoleStatus {
    /// The user has asked to join and is waiting on the project lead.
    Requested,
    /// The lead has accepted the user onto the project.
    Approved,
}

impl RoleStatus {
    pub const REQUESTED: &'static str = "R";
    pub const APPROVED: &'static str = "A";

    pub fn code(&self) -> &'static str {
        match self {
            RoleStatus::Requested => Self::REQUESTED,
            RoleStatus::Approved => Self::APPROVED,
        }
    }

    pub fn from_code(code: &str) -> Option<RoleStatus> {
        match code {
            Self::REQUESTED => Some(RoleStatus::Requested),
            Self::APPROVED => Some(RoleStatus::Approved),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoleStatus::Requested => "Requested",
            RoleStatus::Approved => "Member",
        }
    }
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = roles)]
pub struct Role {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub status: String,
    pub message: String,
    pub created_at: NaiveDateTime,
}

impl Role {
    pub fn is_pending(&self) -> bool {
        self.status == RoleStatus::REQUESTED
    }

    /// Roles which make their holder a member of the project, i.e. anything
    /// other than an outstanding request.
    pub fn active() -> diesel::dsl::NotEq<roles::status, &'static str> {
        roles::status.ne(RoleStatus::REQUESTED)
    }

    pub fn pending() -> diesel::dsl::Eq<roles::status, &'static str> {
        roles::status.eq(RoleStatus::REQUESTED)
    }
}

#[cfg(test)]
#[test]
fn test_role_status_codes() {
    for status in [RoleStatus::Requested, RoleStatus::Approved] {
        assert_eq!(RoleStatus::from_code(status.code()), Some(status));
    }
    assert_eq!(RoleStatus::from_code("X"), None);
}
