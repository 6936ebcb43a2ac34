use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::profiles;

/// Minutes a user has to wait between two emails sent on their behalf.
pub const MESSAGE_WAIT_MINUTES: i64 = 60;

/// How many emails a new user may send in total. Staff can raise
/// `allowed_emails` per profile.
pub const INITIAL_MAX_MESSAGES: i64 = 100;

/// What somebody does, as shown on their profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileRole {
    Other,
    Developer,
    Designer,
    ProjectManager,
    Educator,
}

impl ProfileRole {
    pub const ALL: [ProfileRole; 5] = [
        ProfileRole::Other,
        ProfileRole::Developer,
        ProfileRole::Designer,
        ProfileRole::ProjectManager,
        ProfileRole::Educator,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ProfileRole::Other => "other",
            ProfileRole::Developer => "dev",
            ProfileRole::Designer => "des",
            ProfileRole::ProjectManager => "pm",
            ProfileRole::Educator => "edu",
        }
    }

    pub fn from_code(code: &str) -> Option<ProfileRole> {
        ProfileRole::ALL.into_iter().find(|role| role.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProfileRole::Other => "Other",
            ProfileRole::Developer => "Developer",
            ProfileRole::Designer => "Designer",
            ProfileRole::ProjectManager => "Project manager",
            ProfileRole::Educator => "Educator",
        }
    }
}

/// The public side of an account. Every user has exactly one, created along
/// with the account.
#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub about: String,
    pub role: String,
    pub twitter_id: String,
    pub location: String,
    pub allow_org_emails: bool,
    pub signup_date: NaiveDateTime,
    #[serde(skip)]
    pub last_email_sent: Option<NaiveDateTime>,
    #[serde(skip)]
    pub num_emails_sent: i64,
    #[serde(skip)]
    pub allowed_emails: i64,
}

impl Profile {
    pub fn role(&self) -> ProfileRole {
        ProfileRole::from_code(&self.role).unwrap_or(ProfileRole::Other)
    }

    /// Whether this user may send another email at `now`. Emails are limited
    /// both by time since the last one and in total.
    pub fn can_send_email(&self, now: NaiveDateTime) -> bool {
        let waited = match self.last_email_sent {
            Some(last) => now - last > Duration::minutes(MESSAGE_WAIT_MINUTES),
            None => true,
        };
        waited && self.num_emails_sent < self.allowed_emails
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn profile(last_email_sent: Option<NaiveDateTime>, sent: i64) -> Profile {
        let signup = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Profile {
            id: 1,
            user_id: 1,
            url: String::new(),
            about: String::new(),
            role: "dev".to_string(),
            twitter_id: String::new(),
            location: String::new(),
            allow_org_emails: false,
            signup_date: signup,
            last_email_sent,
            num_emails_sent: sent,
            allowed_emails: INITIAL_MAX_MESSAGES,
        }
    }

    #[test]
    fn test_email_rate_limit() {
        let now = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        assert!(profile(None, 0).can_send_email(now));
        assert!(!profile(Some(now - Duration::minutes(10)), 1).can_send_email(now));
        assert!(profile(Some(now - Duration::minutes(61)), 1).can_send_email(now));
        assert!(!profile(None, INITIAL_MAX_MESSAGES).can_send_email(now));
    }

    #[test]
    fn test_profile_role_codes() {
        for role in ProfileRole::ALL {
            assert_eq!(ProfileRole::from_code(role.code()), Some(role));
        }
        assert_eq!(profile(None, 0).role(), ProfileRole::Developer);
        let mut odd = profile(None, 0);
        odd.role = "wizard".to_string();
        assert_eq!(odd.role(), ProfileRole::Other);
    }
}
