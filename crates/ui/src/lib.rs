use db::user::User;
use maud::{html, Markup, DOCTYPE};

/// The flash message kinds Rocket's `Flash` responder sets, mapped onto
/// Bootstrap alert classes.
fn alert_class(kind: &str) -> &'static str {
    match kind {
        "success" => "alert-success",
        "info" => "alert-info",
        "warning" => "alert-warning",
        _ => "alert-danger",
    }
}

pub fn page_of_body_and_flash_msg(
    body: Markup,
    flash: Option<(String, String)>,
    user: Option<&User>,
) -> Markup {
    page_of_body(
        html! {
            @if let Some((kind, msg)) = flash {
                div class="container mt-3" {
                    div class={"alert " (alert_class(&kind))} role="alert" {
                        (msg)
                    }
                }
            }
            (body)
        },
        user,
    )
}

pub fn page_of_body_with_extra_head(
    body: Markup,
    user: Option<&User>,
    extra_head: Option<Markup>,
) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                title { "Anthill" }
                link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-QWTKZyjpPEjISv5WaRU9OFeRpok6YctnYmDr5pNlyT2bRjXh0JMhjY6hW+ALEwIH" crossorigin="anonymous" {}
                meta name="viewport" content="width=device-width, initial-scale=1" {}
                @if let Some(head) = extra_head {
                    (head)
                }
            }
            body {
                nav class="navbar navbar-expand" style="background-color: #8A5A2B" data-bs-theme="dark" {
                    div class="container-fluid" {
                        ul class="nav nav-justify-start" data-bs-theme="dark" {
                            li class="nav-item" {
                                a class="nav-link text-white" href="/" { "Home" }
                            }
                            li class="nav-item" {
                                a class="nav-link text-white" href="/projects" { "Projects" }
                            }
                            li class="nav-item" {
                                a class="nav-link text-white" href="/projects/asks" { "Asks" }
                            }
                            li class="nav-item" {
                                a class="nav-link text-white" href="/events" { "Events" }
                            }
                            li class="nav-item" {
                                a class="nav-link text-white" href="/people" { "People" }
                            }
                        }
                        ul class="nav nav-justify-end" data-bs-theme="dark" {
                            @if let Some(user) = user {
                                li class="nav-item" {
                                    a class="nav-link text-white" aria-current="page" href="/user" { (user.username) }
                                }
                                li class="nav-item" {
                                    a class="nav-link text-white" href="/logout" { "Logout" }
                                }
                            } @else {
                                li class="nav-item" {
                                    a class="nav-link text-white" href="/login" { "Login" }
                                }
                                li class="nav-item" {
                                    a class="nav-link text-white" href="/register" { "Register" }
                                }
                            }
                        }
                    }
                }
                div class="container" {
                    div class="mt-4" {
                        (body)
                    }
                }
            }
        }
    }
}

/// Renders an HTML page with the provided body markup.
pub fn page_of_body(body: Markup, user: Option<&User>) -> Markup {
    page_of_body_with_extra_head(body, user, None)
}

fn error_page<T: ToString>(
    code: u16,
    heading: &str,
    lead: &str,
    error: Option<T>,
    user: Option<&User>,
) -> Markup {
    page_of_body(
        html! {
            div class="text-center" {
                h1 class="display-1 text-danger" { (code) }
                h2 class="mb-4" { (heading) }
                p class="lead" { (lead) }
                @if let Some(err) = error {
                    div class="alert alert-danger" role="alert" {
                        (err.to_string())
                    }
                }
                a class="btn btn-danger" href="/" { "Return Home" }
            }
        },
        user,
    )
}

pub fn error_403<T: ToString>(error: Option<T>, user: Option<&User>) -> Markup {
    error_page(
        403,
        "Forbidden",
        "You don't have permission to access this resource.",
        error,
        user,
    )
}

pub fn error_404<T: ToString>(error: Option<T>, user: Option<&User>) -> Markup {
    error_page(
        404,
        "Not found",
        "We couldn't find what you were looking for.",
        error,
        user,
    )
}

pub fn error_500<T: ToString>(error: Option<T>, user: Option<&User>) -> Markup {
    error_page(
        500,
        "Internal server error",
        "Something went wrong on our side. Please try again later.",
        error,
        user,
    )
}

pub fn page_title<T: ToString>(title: T) -> Markup {
    maud::html! {
        div class="col-md m-3 h2 d-flex align-items-center" {
            h1 { (title.to_string()) }
        }
    }
}

/// Previous/next links for a paginated listing. `page` is 1-based.
pub fn pager(base_url: &str, page: i64, num_pages: i64) -> Markup {
    html! {
        @if num_pages > 1 {
            nav aria-label="Pages" {
                ul class="pagination" {
                    @if page > 1 {
                        li class="page-item" {
                            a class="page-link" href=(format!("{base_url}?page={}", page - 1)) { "Previous" }
                        }
                    }
                    li class="page-item disabled" {
                        span class="page-link" { "Page " (page) " of " (num_pages) }
                    }
                    @if page < num_pages {
                        li class="page-item" {
                            a class="page-link" href=(format!("{base_url}?page={}", page + 1)) { "Next" }
                        }
                    }
                }
            }
        }
    }
}

pub fn error_alert<T: ToString>(error: Option<T>) -> Markup {
    html! {
        @if let Some(error) = error {
            div class="alert alert-danger" role="alert" {
                (error.to_string())
            }
        }
    }
}
