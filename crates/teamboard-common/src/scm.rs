use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collector::CollectorItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitType {
    New,
    Merge,
    NotBuilt,
}

impl CommitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Merge => "merge",
            Self::NotBuilt => "not_built",
        }
    }
}

impl FromStr for CommitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "merge" => Ok(Self::Merge),
            "not_built" => Ok(Self::NotBuilt),
            _ => Err(format!("Invalid commit type: {}", s)),
        }
    }
}

/// A commit collected from an SCM branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: Option<String>,
    pub collector_item_id: Option<String>,
    /// Epoch millis when the commit was collected.
    pub timestamp: i64,
    pub scm_url: String,
    pub scm_branch: String,
    pub scm_revision_number: String,
    #[serde(default)]
    pub scm_parent_revision_numbers: Vec<String>,
    pub scm_author: Option<String>,
    pub scm_commit_log: Option<String>,
    /// Epoch millis of the commit itself.
    pub scm_commit_timestamp: i64,
    pub number_of_changes: i64,
    pub commit_type: CommitType,
}

/// A GitLab repository branch tracked by the SCM collector.
///
/// Thin typed view over a [`CollectorItem`] whose options hold `url` and
/// `branch`. Two repos are equal when they point at the same url and branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabRepo {
    pub item: CollectorItem,
}

impl GitLabRepo {
    pub const URL: &'static str = "url";
    pub const BRANCH: &'static str = "branch";

    pub fn new(collector_id: &str, repo_url: &str, branch: &str) -> Self {
        let mut item = CollectorItem::new(collector_id);
        item.set_option(Self::URL, repo_url);
        item.set_option(Self::BRANCH, branch);
        Self { item }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn repo_url(&self) -> &str {
        self.item.option_str(Self::URL).unwrap_or_default()
    }

    pub fn branch(&self) -> &str {
        self.item.option_str(Self::BRANCH).unwrap_or_default()
    }
}

impl From<CollectorItem> for GitLabRepo {
    fn from(item: CollectorItem) -> Self {
        Self { item }
    }
}

impl PartialEq for GitLabRepo {
    fn eq(&self, other: &Self) -> bool {
        self.repo_url() == other.repo_url() && self.branch() == other.branch()
    }
}

impl Eq for GitLabRepo {}

impl Hash for GitLabRepo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repo_url().hash(state);
        self.branch().hash(state);
    }
}
