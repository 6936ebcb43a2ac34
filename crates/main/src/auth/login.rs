use argon2::{Argon2, PasswordHash, PasswordVerifier};
use db::{
    schema::users,
    user::{set_login_cookie, User},
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::Markup;
use rocket::{
    form::Form,
    http::{CookieJar, Status},
    request::FlashMessage,
    response::{Flash, Redirect},
};
use serde::Serialize;

use ui::{error_alert, page_of_body_and_flash_msg, page_title};

use crate::error::{WorkflowError, WorkflowResult};

#[derive(FromForm, Serialize, Debug, Clone, Default)]
pub struct PasswordLoginForm {
    /// Either the username or the email address.
    pub login: String,
    pub password: String,
}

/// Checks a username (or email) and password pair.
#[tracing::instrument(skip(conn, form), fields(login = %form.login))]
pub fn authenticate(
    conn: &mut impl SqliteConn,
    form: &PasswordLoginForm,
) -> WorkflowResult<User> {
    let login = form.login.trim();
    let user = users::table
        .filter(User::with_name(login).or(User::with_email(login)))
        .select(User::as_select())
        .first::<User>(conn)
        .optional()?;

    let verified = user.filter(|user| match PasswordHash::new(&user.password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(form.password.as_bytes(), &hash)
            .is_ok(),
        Err(e) => {
            tracing::warn!("user {} has an unreadable password hash: {e}", user.id);
            false
        }
    });

    match verified {
        Some(user) => {
            tracing::info!("user {} logged in", user.id);
            Ok(user)
        }
        None => {
            tracing::warn!("failed login attempt");
            Err(WorkflowError::invalid("Incorrect username or password."))
        }
    }
}

fn login_page(
    login: &str,
    error: Option<&str>,
    flash: Option<(String, String)>,
) -> Markup {
    let markup = maud::html! {
        (page_title("Log in"))
        (error_alert(error))
        form method="post" action="/login" {
            div class="mb-3" {
                label for="login" class="form-label" { "Username or email" }
                input type="text" class="form-control" id="login" name="login" value=(login);
            }
            div class="mb-3" {
                label for="password" class="form-label" { "Password" }
                input type="password" class="form-control" id="password" name="password";
            }
            button type="submit" class="btn btn-primary" { "Log in" }
            p class="mt-3" {
                "No account yet? " a href="/register" { "Register" } "."
            }
        }
    };
    page_of_body_and_flash_msg(markup, flash, None)
}

#[get("/login")]
pub async fn login_form(
    user: Option<User>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, Flash<Redirect>> {
    if user.is_some() {
        return Err(Flash::error(
            Redirect::to("/"),
            "You are already logged in!",
        ));
    }
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    Ok(login_page("", None, flash))
}

#[post("/login", data = "<form>")]
pub async fn do_login(
    form: Form<PasswordLoginForm>,
    jar: &CookieJar<'_>,
    db: DbConn,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    let user = db
        .run(move |conn| match authenticate(conn, &form) {
            Ok(user) => Ok(user),
            Err(WorkflowError::Validation(errors)) => Err((
                Status::Unauthorized,
                login_page(&form.login, errors.first().map(String::as_str), None),
            )),
            Err(e) => Err(e.into_page(None)),
        })
        .await?;

    set_login_cookie(user.id, jar);
    Ok(Flash::success(Redirect::to("/"), "You are now logged in."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::register::{register_user, RegisterForm},
        tests::fixtures::test_db,
    };

    #[test]
    fn test_login_by_name_or_email() {
        let mut conn = test_db();
        let registered = register_user(
            &mut conn,
            &RegisterForm {
                username: "keeper".to_string(),
                email: "keeper@example.com".to_string(),
                password: "correct horse".to_string(),
                password2: "correct horse".to_string(),
            },
        )
        .unwrap();

        for login in ["keeper", "keeper@example.com"] {
            let user = authenticate(
                &mut conn,
                &PasswordLoginForm {
                    login: login.to_string(),
                    password: "correct horse".to_string(),
                },
            )
            .unwrap();
            assert_eq!(user, registered);
        }

        let wrong = authenticate(
            &mut conn,
            &PasswordLoginForm {
                login: "keeper".to_string(),
                password: "battery staple".to_string(),
            },
        );
        assert!(matches!(wrong, Err(WorkflowError::Validation(_))));

        // unknown users get the same answer as a wrong password
        let unknown = authenticate(
            &mut conn,
            &PasswordLoginForm {
                login: "nobody".to_string(),
                password: "correct horse".to_string(),
            },
        );
        assert!(matches!(unknown, Err(WorkflowError::Validation(_))));
    }
}
