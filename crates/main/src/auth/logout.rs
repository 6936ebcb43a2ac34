use db::user::LOGIN_COOKIE;
use rocket::{
    http::CookieJar,
    response::{Flash, Redirect},
};

#[get("/logout")]
pub async fn logout(jar: &CookieJar<'_>) -> Flash<Redirect> {
    jar.remove_private(LOGIN_COOKIE);
    Flash::success(Redirect::to("/"), "You have been logged out.")
}
