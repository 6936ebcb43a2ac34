use db::{
    config::{upsert, ConfigItem, KNOWN_KEYS},
    schema::config,
    user::User,
    DbConn, SqliteConn,
};
use diesel::prelude::*;
use maud::Markup;
use rocket::{
    form::{Form, FromForm},
    http::Status,
    request::FlashMessage,
    response::{Flash, Redirect},
};
use ui::{page_of_body_and_flash_msg, page_title};

use crate::{
    error::{WorkflowError, WorkflowResult},
    permissions::{has_permission, Permission},
};

fn require_staff(conn: &mut impl SqliteConn, user: &User) -> WorkflowResult<()> {
    if has_permission(Some(user), &Permission::ModifySiteConfig, conn)? {
        Ok(())
    } else {
        tracing::warn!("user {} tried to reach the site settings", user.id);
        Err(WorkflowError::PermissionDenied(
            "Error: you are not authorized to view this page!",
        ))
    }
}

/// Changes one site setting. Only the known keys can be set, and only to
/// "0" or "1".
#[tracing::instrument(skip(conn, user), fields(user = user.id))]
pub fn set_config(
    conn: &mut impl SqliteConn,
    user: &User,
    key: &str,
    value: &str,
) -> WorkflowResult<()> {
    require_staff(conn, user)?;

    if !KNOWN_KEYS.iter().any(|(known, _)| *known == key) {
        return Err(WorkflowError::invalid(format!(
            "Error: '{key}' is not a site setting."
        )));
    }
    if !matches!(value, "0" | "1") {
        return Err(WorkflowError::invalid("Error: settings are either 0 or 1."));
    }

    upsert(conn, key, value)?;
    tracing::info!("user {} set {key} to {value}", user.id);
    Ok(())
}

#[get("/admin/config")]
pub async fn config_page(
    user: User,
    db: DbConn,
    flash: Option<FlashMessage<'_>>,
) -> Result<Markup, (Status, Markup)> {
    let flash = flash.map(|f| (f.kind().to_string(), f.message().to_string()));
    db.run(move |conn| {
        conn.transaction(|conn| -> WorkflowResult<_> {
            require_staff(conn, &user)?;

            let items = config::table
                .select(ConfigItem::as_select())
                .order_by(config::key.asc())
                .load::<ConfigItem>(conn)?;
            let value_of = |key: &str| {
                items
                    .iter()
                    .find(|item| item.key == key)
                    .map(|item| item.value.clone())
                    .unwrap_or_else(|| "0".to_string())
            };

            let markup = maud::html! {
                (page_title("Site configuration"))
                table class="table" {
                    thead {
                        tr {
                            th scope="col" { "Setting" }
                            th scope="col" { "Meaning" }
                            th scope="col" { "Value" }
                        }
                    }
                    tbody {
                        @for (key, meaning) in KNOWN_KEYS {
                            @let value = value_of(key);
                            tr {
                                td { code { (key) } }
                                td { (meaning) }
                                td {
                                    form action="/admin/config" method="post" class="d-flex" {
                                        input type="hidden" name="key" value=(key);
                                        select class="form-select form-select-sm me-2" name="value" {
                                            option value="0" selected[value == "0"] { "0" }
                                            option value="1" selected[value == "1"] { "1" }
                                        }
                                        button type="submit" class="btn btn-sm btn-primary" { "Save" }
                                    }
                                }
                            }
                        }
                    }
                }
            };

            Ok(page_of_body_and_flash_msg(markup, flash, Some(&user)))
        })
        .map_err(|e| e.into_page(Some(&user)))
    })
    .await
}

#[derive(FromForm)]
pub struct UpsertConfigForm {
    key: String,
    value: String,
}

#[post("/admin/config", data = "<form>")]
pub async fn do_upsert_config(
    db: DbConn,
    user: User,
    form: Form<UpsertConfigForm>,
) -> Result<Flash<Redirect>, (Status, Markup)> {
    let form = form.into_inner();
    db.run(move |conn| {
        match conn.transaction(|conn| set_config(conn, &user, &form.key, &form.value)) {
            Ok(()) => Ok(Flash::success(
                Redirect::to("/admin/config"),
                format!("Saved {}.", form.key),
            )),
            Err(WorkflowError::Validation(errors)) => Ok(Flash::error(
                Redirect::to("/admin/config"),
                errors.join(" "),
            )),
            Err(e) => Err(e.into_page(Some(&user))),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use db::config::{flag_is_set, DISABLE_SIGNUPS, MODERATE_PROJECTS};

    use super::*;
    use crate::tests::fixtures::{make_user, test_db};

    #[test]
    fn test_staff_toggle_known_settings() {
        let mut conn = test_db();
        let staff = make_user(&mut conn, "staff", true);

        set_config(&mut conn, &staff, MODERATE_PROJECTS, "1").unwrap();
        assert!(flag_is_set(&mut conn, MODERATE_PROJECTS).unwrap());
        set_config(&mut conn, &staff, MODERATE_PROJECTS, "0").unwrap();
        assert!(!flag_is_set(&mut conn, MODERATE_PROJECTS).unwrap());

        assert!(matches!(
            set_config(&mut conn, &staff, "made_up", "1"),
            Err(WorkflowError::Validation(_))
        ));
        assert!(matches!(
            set_config(&mut conn, &staff, DISABLE_SIGNUPS, "yes"),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_non_staff_cannot_change_settings() {
        let mut conn = test_db();
        let user = make_user(&mut conn, "user", false);
        assert!(matches!(
            set_config(&mut conn, &user, DISABLE_SIGNUPS, "1"),
            Err(WorkflowError::PermissionDenied(_))
        ));
        assert!(!flag_is_set(&mut conn, DISABLE_SIGNUPS).unwrap());
    }
}
