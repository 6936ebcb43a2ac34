use db::{
    role::{Role, RoleStatus},
    schema::{asks, emails, profiles, projects, roles, users},
    CONNECTION_PRAGMAS,
};
use diesel::{connection::SimpleConnection, prelude::*, SqliteConnection};
use rocket::{
    http::{ContentType, Status},
    local::blocking::{Client, LocalResponse},
};
use tempfile::TempDir;

use crate::{
    auth::{login::PasswordLoginForm, register::RegisterForm},
    make_rocket,
    people::{contact::ContactForm, ProfileForm},
    projects::{asks::AskForm, create::ProjectFields, join::JoinForm},
};

/// Returns the client, a connection to the same database for assertions,
/// and the directory holding the database (which must outlive both).
fn get_test_rocket_instance() -> (Client, SqliteConnection, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_name = dir.path().join("anthill.db").to_string_lossy().to_string();

    let client = Client::tracked(make_rocket(&db_name)).unwrap();

    let mut conn = SqliteConnection::establish(&db_name).unwrap();
    conn.batch_execute(CONNECTION_PRAGMAS).unwrap();

    (client, conn, dir)
}

fn post_form<'c, T: serde::Serialize + ?Sized>(
    client: &'c Client,
    uri: &str,
    form: &T,
) -> LocalResponse<'c> {
    client
        .post(uri.to_string())
        .header(ContentType::Form)
        .body(serde_urlencoded::to_string(form).unwrap())
        .dispatch()
}

fn register(client: &Client, username: &str) {
    let response = post_form(
        client,
        "/register",
        &RegisterForm {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "correct horse".to_string(),
            password2: "correct horse".to_string(),
        },
    );
    assert_eq!(response.status(), Status::SeeOther);
}

fn login(client: &Client, username: &str) {
    let response = post_form(
        client,
        "/login",
        &PasswordLoginForm {
            login: username.to_string(),
            password: "correct horse".to_string(),
        },
    );
    assert_eq!(response.status(), Status::SeeOther);
}

fn logout(client: &Client) {
    assert_eq!(client.get("/logout").dispatch().status(), Status::SeeOther);
}

#[test]
fn test_project_lifecycle_over_http() {
    let (client, mut conn, _dir) = get_test_rocket_instance();

    // the first account is staff
    register(&client, "queen");
    let queen_is_staff = users::table
        .filter(users::username.eq("queen"))
        .select(users::is_staff)
        .first::<bool>(&mut conn)
        .unwrap();
    assert!(queen_is_staff);

    let response = post_form(
        &client,
        "/projects/new",
        &ProjectFields {
            name: "Hive".to_string(),
            slug: "hive".to_string(),
            description: "Keeping bees on the roof.".to_string(),
            tags: "Bees, roof".to_string(),
            official: true,
        },
    );
    assert_eq!(response.status(), Status::SeeOther);
    assert_eq!(response.headers().get_one("Location"), Some("/projects/hive"));

    let (approved, official) = projects::table
        .filter(projects::slug.eq("hive"))
        .select((projects::approved, projects::official))
        .first::<(bool, bool)>(&mut conn)
        .unwrap();
    assert!(approved && official);

    // route names are not available as slugs
    let clash = post_form(
        &client,
        "/projects/new",
        &ProjectFields {
            name: "Asks".to_string(),
            slug: "asks".to_string(),
            description: String::new(),
            tags: String::new(),
            official: false,
        },
    );
    assert_eq!(clash.status(), Status::UnprocessableEntity);

    let page = client.get("/projects/hive").dispatch();
    assert_eq!(page.status(), Status::Ok);
    assert!(page.into_string().unwrap().contains("Keeping bees on the roof."));

    let tagged = client.get("/projects/tag/bees").dispatch();
    assert!(tagged.into_string().unwrap().contains("/projects/hive"));

    // a second user asks to join
    logout(&client);
    register(&client, "drone");

    let response = post_form(
        &client,
        "/projects/hive/join",
        &JoinForm {
            message: "I have a smoker.".to_string(),
        },
    );
    assert_eq!(response.status(), Status::SeeOther);

    let pending = roles::table.select(Role::as_select()).load(&mut conn).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].is_pending());
    let queued = emails::table.count().get_result::<i64>(&mut conn).unwrap();
    assert_eq!(queued, 1);

    let again = post_form(
        &client,
        "/projects/hive/join",
        &JoinForm {
            message: "Hello?".to_string(),
        },
    );
    assert_eq!(again.status(), Status::Conflict);

    // requests do not make you a member
    let ask = AskForm {
        message: "Spare frames".to_string(),
    };
    let denied = post_form(&client, "/projects/hive/add_ask", &ask);
    assert_eq!(denied.status(), Status::Forbidden);
    assert_eq!(client.get("/projects/hive/edit").dispatch().status(), Status::Forbidden);

    // the lead approves the request
    logout(&client);
    login(&client, "queen");
    assert_eq!(client.get("/projects/hive/edit").dispatch().status(), Status::Ok);

    let role_id = pending[0].id.to_string();
    let response = post_form(
        &client,
        "/projects/hive/edit",
        &[
            ("project.name", "Hive"),
            ("project.slug", "hive"),
            ("project.description", "Keeping bees on the roof."),
            ("project.tags", "bees, roof"),
            ("project.official", "true"),
            ("roles[0].id", role_id.as_str()),
            ("roles[0].username", "drone"),
            ("roles[0].status", RoleStatus::APPROVED),
            ("roles[0].message", "I have a smoker."),
            ("links[0].title", "Wiki"),
            ("links[0].url", "https://example.com/hive"),
        ],
    );
    assert_eq!(response.status(), Status::SeeOther);

    let status = roles::table
        .filter(roles::id.eq(pending[0].id))
        .select(roles::status)
        .first::<String>(&mut conn)
        .unwrap();
    assert_eq!(status, RoleStatus::APPROVED);

    // now a member, the second user can post an ask
    logout(&client);
    login(&client, "drone");
    let posted = post_form(&client, "/projects/hive/add_ask", &ask);
    assert_eq!(posted.status(), Status::SeeOther);
    assert_eq!(asks::table.count().get_result::<i64>(&mut conn).unwrap(), 1);

    let listing = client.get("/projects/asks").dispatch();
    assert_eq!(listing.status(), Status::Ok);
    assert!(listing.into_string().unwrap().contains("Spare frames"));

    let account = client.get("/user").dispatch();
    assert_eq!(account.status(), Status::Ok);
    assert!(account.into_string().unwrap().contains("Hive"));
}

#[test]
fn test_profiles_and_messages_over_http() {
    let (client, mut conn, _dir) = get_test_rocket_instance();

    register(&client, "queen");
    logout(&client);
    register(&client, "drone");
    assert_eq!(profiles::table.count().get_result::<i64>(&mut conn).unwrap(), 2);

    assert_eq!(client.get("/user/profile").dispatch().status(), Status::Ok);
    let response = post_form(
        &client,
        "/user/profile",
        &ProfileForm {
            role: "dev".to_string(),
            location: "Leeds".to_string(),
            skills: "Rust, beekeeping".to_string(),
            ..ProfileForm::default()
        },
    );
    assert_eq!(response.status(), Status::SeeOther);
    assert_eq!(response.headers().get_one("Location"), Some("/people/drone"));

    let skilled = client.get("/people/skill/rust").dispatch();
    assert_eq!(skilled.status(), Status::Ok);
    let skilled = skilled.into_string().unwrap();
    assert!(skilled.contains("/people/drone"));
    assert!(!skilled.contains("/people/queen"));

    let page = client.get("/people/drone").dispatch();
    assert!(page.into_string().unwrap().contains("beekeeping"));

    let message = ContactForm {
        subject: "Hello".to_string(),
        message: "Fancy a chat about bees?".to_string(),
    };
    let sent = post_form(&client, "/people/queen/contact", &message);
    assert_eq!(sent.status(), Status::SeeOther);
    let again = post_form(&client, "/people/queen/contact", &message);
    assert_eq!(again.status(), Status::TooManyRequests);
    assert_eq!(emails::table.count().get_result::<i64>(&mut conn).unwrap(), 1);

    logout(&client);
    let response = client.get("/people/queen/contact").dispatch();
    assert_eq!(response.headers().get_one("Location"), Some("/login"));
}

#[test]
fn test_anonymous_visitors_are_sent_to_login() {
    let (client, _conn, _dir) = get_test_rocket_instance();

    for page in ["/", "/projects", "/projects/all", "/projects/asks", "/events", "/people"] {
        assert_eq!(client.get(page).dispatch().status(), Status::Ok, "{page}");
    }

    let response = client.get("/projects/new").dispatch();
    assert_eq!(response.status(), Status::SeeOther);
    assert_eq!(response.headers().get_one("Location"), Some("/login"));

    assert_eq!(
        client.get("/projects/nowhere").dispatch().status(),
        Status::NotFound
    );
}
