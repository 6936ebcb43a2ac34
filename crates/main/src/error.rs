use db::user::User;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use maud::Markup;
use rocket::http::Status;
use ui::{error_403, error_404, error_500, page_of_body};

/// Why a workflow refused to (or could not) carry out a request. Every
/// variant leaves the database untouched: workflows run inside a transaction
/// and validate a whole submission before writing anything.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),
    #[error("{0}")]
    PermissionDenied(&'static str),
    #[error("{0}")]
    DuplicateRequest(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn invalid<T: ToString>(message: T) -> WorkflowError {
        WorkflowError::Validation(vec![message.to_string()])
    }

    pub fn status(&self) -> Status {
        match self {
            WorkflowError::Validation(_) => Status::UnprocessableEntity,
            WorkflowError::PermissionDenied(_) => Status::Forbidden,
            WorkflowError::DuplicateRequest(_) => Status::Conflict,
            WorkflowError::RateLimited(_) => Status::TooManyRequests,
            WorkflowError::NotFound => Status::NotFound,
            WorkflowError::Database(_) => Status::InternalServerError,
        }
    }

    /// Renders the error as a full page, for handlers which have no form to
    /// redisplay.
    pub fn into_page(self, user: Option<&User>) -> (Status, Markup) {
        let status = self.status();
        let page = match self {
            WorkflowError::PermissionDenied(msg) => error_403(Some(msg), user),
            WorkflowError::NotFound => error_404(None::<&str>, user),
            WorkflowError::Database(e) => {
                tracing::error!("database error while handling request: {e}");
                error_500(None::<&str>, user)
            }
            WorkflowError::Validation(errors) => page_of_body(
                maud::html! {
                    @for error in errors {
                        div class="alert alert-danger" role="alert" { (error) }
                    }
                },
                user,
            ),
            WorkflowError::DuplicateRequest(msg) | WorkflowError::RateLimited(msg) => page_of_body(
                maud::html! {
                    div class="alert alert-warning" role="alert" { (msg) }
                },
                user,
            ),
        };
        (status, page)
    }
}

/// Whether `error` came from a UNIQUE constraint.
pub fn is_unique_violation(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}
