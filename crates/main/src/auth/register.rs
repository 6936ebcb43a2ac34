use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use db::{
    schema::users,
    user::{set_login_cookie, User},
    DbConn, SqliteConn,
};
use diesel::{dsl::now, insert_into, prelude::*};
use maud::Markup;
use rand::rngs::OsRng;
use rocket::{
    form::Form,
    http::{CookieJar, Status},
    response::{Flash, Redirect},
};
use serde::Serialize;
use uuid::Uuid;

use ui::{error_alert, page_of_body, page_title};

use crate::{
    error::{is_unique_violation, WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
    util::{is_valid_email, is_valid_username},
};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Creates an account. The very first account on a site is made staff, so
/// that somebody can reach the site settings.
#[tracing::instrument(skip(conn, form), fields(username = %form.username))]
pub fn register_user(
    conn: &mut impl SqliteConn,
    form: &RegisterForm,
) -> WorkflowResult<User> {
    if !has_permission(None, &Permission::RegisterAsNewUser, conn)? {
        return Err(WorkflowError::PermissionDenied(
            "Signups are currently disabled.",
        ));
    }

    let username = form.username.trim();
    let email = form.email.trim();

    let mut problems = vec![];
    if !is_valid_username(username) {
        problems.push(
            "Error: usernames are 2 to 30 letters, digits, '.', '_' or '-'."
                .to_string(),
        );
    }
    if !is_valid_email(email) {
        problems.push("Error: that email is not valid.".to_string());
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "Error: passwords must be at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if form.password != form.password2 {
        problems.push("Error: your passwords do not match.".to_string());
    }
    if problems.is_empty() {
        let name_taken = users::table
            .filter(User::with_name(username))
            .count()
            .get_result::<i64>(conn)?
            > 0;
        if name_taken {
            problems.push("Error: that username is taken.".to_string());
        }
        let email_taken = users::table
            .filter(User::with_email(email))
            .count()
            .get_result::<i64>(conn)?
            > 0;
        if email_taken {
            problems
                .push("Error: an account with that email already exists.".to_string());
        }
    }
    if !problems.is_empty() {
        return Err(WorkflowError::Validation(problems));
    }

    let password_hash = hash_password(&form.password).map_err(|e| {
        tracing::error!("could not hash password: {e}");
        WorkflowError::invalid("Error: that password could not be used.")
    })?;

    let first_user = users::table.count().get_result::<i64>(conn)? == 0;

    let user = insert_into(users::table)
        .values((
            users::public_id.eq(Uuid::now_v7().to_string()),
            users::username.eq(username),
            users::email.eq(email),
            users::password_hash.eq(&password_hash),
            users::created_at.eq(now),
            users::is_staff.eq(first_user),
        ))
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| {
            if is_unique_violation(&e) {
                WorkflowError::invalid(
                    "Error: that username or email is already registered.",
                )
            } else {
                e.into()
            }
        })?;
    crate::people::create_profile(conn, user.id)?;

    tracing::info!("registered user {} (staff: {first_user})", user.id);
    Ok(user)
}

fn register_page(form: &RegisterForm, errors: &[String]) -> Markup {
    let markup = maud::html! {
        (page_title("Register"))
        @for error in errors {
            (error_alert(Some(error)))
        }
        form method="post" action="/register" {
            div class="mb-3" {
                label for="username" class="form-label" { "Username" }
                input type="text" class="form-control" id="username" name="username" value=(form.username);
            }
            div class="mb-3" {
                label for="email" class="form-label" { "Email" }
                input type="email" class="form-control" id="email" name="email" value=(form.email);
            }
            div class="mb-3" {
                label for="password" class="form-label" { "Password" }
                input type="password" class="form-control" id="password" name="password";
            }
            div class="mb-3" {
                label for="password2" class="form-label" { "Confirm password" }
                input type="password" class="form-control" id="password2" name="password2";
            }
            button type="submit" class="btn btn-primary" { "Register" }
        }
    };
    page_of_body(markup, None)
}

fn signups_closed() -> Markup {
    page_of_body(
        maud::html! {
            (page_title("Signups are currently disabled!"))
            p { "Please ask a member of staff to create an account for you." }
        },
        None,
    )
}

#[get("/register")]
pub async fn register_form(
    user: Option<User>,
    db: DbConn,
) -> Result<Markup, Result<Flash<Redirect>, (Status, Markup)>> {
    if user.is_some() {
        return Err(Ok(Flash::error(
            Redirect::to("/user"),
            "You already have an account.",
        )));
    }

    let open = db
        .run(|conn| has_permission(None, &Permission::RegisterAsNewUser, conn))
        .await
        .map_err(|e| Err(WorkflowError::from(e).into_page(None)))?;
    if !open {
        return Err(Err((Status::Forbidden, signups_closed())));
    }

    Ok(register_page(&RegisterForm::default(), &[]))
}

#[post("/register", data = "<form>")]
pub async fn do_register(
    form: Form<RegisterForm>,
    jar: &CookieJar<'_>,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    let user = db
        .run(move |conn| {
            match conn.transaction(|conn| register_user(conn, &form)) {
                Ok(user) => Ok(user),
                Err(WorkflowError::Validation(errors)) => Err((
                    Status::UnprocessableEntity,
                    register_page(&form, &errors),
                )),
                Err(WorkflowError::PermissionDenied(_)) => {
                    Err((Status::Forbidden, signups_closed()))
                }
                Err(e) => Err(e.into_page(None)),
            }
        })
        .await?;

    set_login_cookie(user.id, jar);
    Ok(Flash::success(
        Redirect::to("/user"),
        format!("Welcome, {}!", user.username),
    ))
}
