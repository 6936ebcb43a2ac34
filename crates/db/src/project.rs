use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use serde::Serialize;

use crate::schema::{project_links, project_tags, projects};

#[derive(
    Debug, Queryable, Selectable, Identifiable, Serialize, Clone, PartialEq, Eq,
)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub lead_id: i64,
    pub official: bool,
    pub approved: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Whether listings should hide projects a moderator has not yet approved.
///
/// This is chosen by the caller (normally from the `moderate_projects` site
/// setting) and passed into every listing query, rather than being a property
/// of the query itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moderation {
    ApprovedOnly,
    Unmoderated,
}

/// Which slice of the project archive to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectFilter {
    All,
    Official,
    Community,
}

impl ProjectFilter {
    pub fn from_path(segment: &str) -> Option<ProjectFilter> {
        match segment {
            "all" => Some(ProjectFilter::All),
            "official" => Some(ProjectFilter::Official),
            "community" => Some(ProjectFilter::Community),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectFilter::All => "all",
            ProjectFilter::Official => "official",
            ProjectFilter::Community => "community",
        }
    }
}

impl Project {
    /// Projects visible under the given moderation setting, most recently
    /// updated first.
    pub fn listing<'a>(
        moderation: Moderation,
        filter: ProjectFilter,
    ) -> projects::BoxedQuery<'a, Sqlite> {
        let mut query = projects::table
            .order_by((projects::updated_at.desc(), projects::id.desc()))
            .into_boxed();

        query = match filter {
            ProjectFilter::All => query,
            ProjectFilter::Official => query.filter(projects::official.eq(true)),
            ProjectFilter::Community => {
                query.filter(projects::official.eq(false))
            }
        };

        match moderation {
            Moderation::ApprovedOnly => query.filter(projects::approved.eq(true)),
            Moderation::Unmoderated => query,
        }
    }

    /// Projects carrying `tag`, subject to moderation.
    pub fn tagged<'a>(
        tag: &'a str,
        moderation: Moderation,
    ) -> projects::BoxedQuery<'a, Sqlite> {
        Project::listing(moderation, ProjectFilter::All).filter(
            projects::id.eq_any(
                project_tags::table
                    .filter(project_tags::tag.eq(tag))
                    .select(project_tags::project_id),
            ),
        )
    }

    /// Look a project up by slug, subject to moderation.
    pub fn with_slug<'a>(
        slug: &'a str,
        moderation: Moderation,
    ) -> projects::BoxedQuery<'a, Sqlite> {
        Project::listing(moderation, ProjectFilter::All)
            .filter(projects::slug.eq(slug))
    }

    pub fn url(&self) -> String {
        format!("/projects/{}", self.slug)
    }
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = project_tags)]
pub struct ProjectTag {
    pub id: i64,
    pub project_id: i64,
    pub tag: String,
}

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = project_links)]
pub struct ProjectLink {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub url: String,
}
