/// Refers to a row in `projects` by its primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectRef(pub i64);
