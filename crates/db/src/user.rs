use chrono::NaiveDateTime;
use diesel::prelude::*;
use rocket::{
    http::{Cookie, CookieJar, Status},
    outcome::try_outcome,
    request::{self, FromRequest},
    Request,
};
use serde::Serialize;

use crate::{schema::users, DbConn};

pub const LOGIN_COOKIE: &str = "anthill_session";

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub public_id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: NaiveDateTime,
    pub is_staff: bool,
}

type WithName<'a> = diesel::dsl::Eq<users::username, &'a str>;

type WithEmail<'a> = diesel::dsl::Eq<users::email, &'a str>;

impl User {
    pub fn with_name(name: &str) -> WithName<'_> {
        users::username.eq(name)
    }

    pub fn with_email(email: &str) -> WithEmail<'_> {
        users::email.eq(email)
    }

    /// The name shown next to anything this user authored.
    pub fn display_name(&self) -> &str {
        &self.username
    }
}

#[derive(Debug)]
pub enum AuthError {
    CookieMissingOrMalformed,
    NoDatabase,
    Unauthorized,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct LoginSession {
    id: i64,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = AuthError;

    async fn from_request(
        request: &'r Request<'_>,
    ) -> request::Outcome<Self, AuthError> {
        let db = try_outcome!(request
            .guard::<DbConn>()
            .await
            .map_error(|(t, _)| (t, AuthError::NoDatabase)));

        let login_cookie = match request.cookies().get_private(LOGIN_COOKIE) {
            Some(cookie) => cookie,
            None => {
                return request::Outcome::Error((
                    Status::Unauthorized,
                    AuthError::CookieMissingOrMalformed,
                ));
            }
        };

        let login: LoginSession =
            match serde_json::from_str(login_cookie.value()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("discarding malformed login cookie: {e}");
                    // a malformed cookie would otherwise stick around and
                    // keep the user from logging in again
                    request.cookies().remove_private(LOGIN_COOKIE);
                    return request::Outcome::Error((
                        Status::BadRequest,
                        AuthError::CookieMissingOrMalformed,
                    ));
                }
            };

        let user = db
            .run(move |conn| {
                users::table
                    .filter(users::id.eq(login.id))
                    .select(User::as_select())
                    .first::<User>(conn)
                    .optional()
            })
            .await;

        match user {
            Ok(Some(user)) => request::Outcome::Success(user),
            Ok(None) => request::Outcome::Error((
                Status::Unauthorized,
                AuthError::Unauthorized,
            )),
            Err(e) => {
                tracing::error!("could not load logged in user: {e}");
                request::Outcome::Error((
                    Status::InternalServerError,
                    AuthError::NoDatabase,
                ))
            }
        }
    }
}

pub fn set_login_cookie(id: i64, jar: &CookieJar<'_>) {
    let session = serde_json::json!({ "id": id }).to_string();
    jar.add_private(Cookie::new(LOGIN_COOKIE, session));
}
