use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub fn is_valid_email(string: &str) -> bool {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?m)^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("email regex is valid")
    });
    RE.is_match(string)
}

/// Slugs appear in URLs, so they are restricted to word characters and
/// hyphens.
pub fn is_valid_slug(string: &str) -> bool {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[-\w]+$").expect("slug regex is valid"));
    string.len() <= 50 && RE.is_match(string)
}

pub fn is_valid_username(string: &str) -> bool {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z0-9_.-]{2,30}$").expect("username regex is valid")
    });
    RE.is_match(string)
}

/// A Twitter handle without the leading `@`.
pub fn is_valid_twitter_id(string: &str) -> bool {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("twitter id regex is valid")
    });
    RE.is_match(string)
}

/// Accepts absolute http(s) URLs only.
pub fn is_valid_http_url(string: &str) -> bool {
    match url::Url::parse(string) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && url.host().is_some()
        }
        Err(_) => false,
    }
}

/// Splits a comma separated tag field into normalised, deduplicated tags.
pub fn parse_tags(field: &str) -> Vec<String> {
    let mut tags: Vec<String> = field
        .split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Which page of a listing was asked for, and how big pages are.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    /// `page` is 1-based; anything below 1 is treated as the first page.
    pub fn new(page: Option<i64>, per_page: i64) -> PageRequest {
        PageRequest {
            page: page.unwrap_or(1).max(1),
            per_page,
        }
    }

    /// Saturates, so an absurd page number reads as a page past the end
    /// rather than overflowing.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn num_pages(&self, total: i64) -> i64 {
        ((total + self.per_page - 1) / self.per_page).max(1)
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub num_pages: i64,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        Paginated {
            items,
            page: request.page,
            num_pages: request.num_pages(total),
            total,
        }
    }
}
