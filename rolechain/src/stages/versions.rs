//! Append-only document versions with line diffs and model-backed merging.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::errors::RolechainError;
use crate::invoker::SharedInvoker;
use crate::prompt::PromptTemplate;

const MERGE_TEMPLATE: &str = r#"Resolve the conflict between two versions of a document:

Base Version:
{base}

Version 1 (by {current_author}):
{current}

Version 2 (by {proposed_author}):
{proposed}

Merge these versions into a single coherent document, preserving the best elements of both changes.
Ensure the merged version is consistent and logical."#;

/// One stored revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Position in the store, starting at zero.
    pub number: usize,
    /// Full document text.
    pub content: String,
    /// Who produced it.
    pub author: String,
    /// When it was stored.
    pub created_at: DateTime<Utc>,
}

/// A proposed revision that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Who proposes it.
    pub author: String,
    /// Full document text.
    pub content: String,
}

impl Edit {
    /// Creates an edit.
    #[must_use]
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
        }
    }
}

/// One line of a diff between two versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "line", rename_all = "snake_case")]
pub enum DiffLine {
    /// Present in both.
    Same(String),
    /// Only in the older text.
    Removed(String),
    /// Only in the newer text.
    Added(String),
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same(line) => write!(f, " {line}"),
            Self::Removed(line) => write!(f, "-{line}"),
            Self::Added(line) => write!(f, "+{line}"),
        }
    }
}

/// Computes a line diff from `old` to `new` over their longest common
/// subsequence. Removals are listed before additions at each change.
#[must_use]
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    // common[i][j]: length of the common subsequence of a[i..] and b[j..]
    let mut common = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            common[i][j] = if a[i] == b[j] {
                common[i + 1][j + 1] + 1
            } else {
                common[i + 1][j].max(common[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(DiffLine::Same(a[i].to_string()));
            i += 1;
            j += 1;
        } else if common[i + 1][j] >= common[i][j + 1] {
            out.push(DiffLine::Removed(a[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Added(b[j].to_string()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|line| DiffLine::Removed((*line).to_string())));
    out.extend(b[j..].iter().map(|line| DiffLine::Added((*line).to_string())));
    out
}

/// Merges conflicting revisions by asking the model.
pub struct ConflictResolver {
    invoker: SharedInvoker,
    template: PromptTemplate,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("invoker", &self.invoker.name())
            .finish_non_exhaustive()
    }
}

impl ConflictResolver {
    /// Creates a resolver with the default merge prompt.
    #[must_use]
    pub fn new(invoker: SharedInvoker) -> Self {
        Self {
            invoker,
            template: PromptTemplate::new(MERGE_TEMPLATE),
        }
    }

    /// Replaces the merge prompt (`{base}`, `{current}`, `{current_author}`,
    /// `{proposed}`, `{proposed_author}`).
    #[must_use]
    pub fn with_template(mut self, template: impl Into<PromptTemplate>) -> Self {
        self.template = template.into();
        self
    }

    /// Returns the merged document text.
    ///
    /// # Errors
    ///
    /// Fails when the template is incomplete or the invoker is unreachable.
    pub async fn resolve(
        &self,
        base: &Version,
        current: &Version,
        proposed: &Edit,
    ) -> Result<String, RolechainError> {
        let prompt = self.template.render(&[
            ("base", &base.content),
            ("current", &current.content),
            ("current_author", &current.author),
            ("proposed", &proposed.content),
            ("proposed_author", &proposed.author),
        ])?;
        let merged = self.invoker.invoke(&prompt).await?;
        Ok(merged.trim().to_string())
    }
}

/// An append-only, lock-protected list of versions.
///
/// Stored versions are never rewritten; numbers are assigned at append time.
#[derive(Debug, Default)]
pub struct VersionStore {
    versions: RwLock<Vec<Version>>,
}

impl VersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a version and returns its number.
    pub fn create_version(&self, content: impl Into<String>, author: impl Into<String>) -> usize {
        let mut versions = self.versions.write();
        let number = versions.len();
        versions.push(Version {
            number,
            content: content.into(),
            author: author.into(),
            created_at: Utc::now(),
        });
        number
    }

    /// Returns a copy of a version.
    #[must_use]
    pub fn get(&self, number: usize) -> Option<Version> {
        self.versions.read().get(number).cloned()
    }

    /// Returns the most recent version.
    #[must_use]
    pub fn latest(&self) -> Option<Version> {
        self.versions.read().last().cloned()
    }

    /// Returns every version, oldest first.
    #[must_use]
    pub fn versions(&self) -> Vec<Version> {
        self.versions.read().clone()
    }

    /// Returns the number of versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }

    /// Diffs version `from` against version `to`.
    ///
    /// # Errors
    ///
    /// Returns [`RolechainError::Version`] if either version is unknown.
    pub fn diff(&self, from: usize, to: usize) -> Result<Vec<DiffLine>, RolechainError> {
        let versions = self.versions.read();
        let old = versions.get(from).ok_or_else(|| unknown(from))?;
        let new = versions.get(to).ok_or_else(|| unknown(to))?;
        Ok(diff_lines(&old.content, &new.content))
    }

    /// Stores an edit made against version `base`.
    ///
    /// When someone other than the base author edits a document that has
    /// moved on since `base`, the resolver merges the latest version with
    /// the edit and the merged text is stored instead, credited to both
    /// authors.
    ///
    /// # Errors
    ///
    /// Returns [`RolechainError::Version`] for an unknown base, or the
    /// resolver's failure. Nothing is stored on error.
    pub async fn edit(
        &self,
        base: usize,
        edit: Edit,
        resolver: &ConflictResolver,
    ) -> Result<usize, RolechainError> {
        let base_version = self.get(base).ok_or_else(|| unknown(base))?;
        let latest = self.latest().ok_or_else(|| unknown(base))?;

        if base_version.author != edit.author && latest.content != base_version.content {
            info!(
                base,
                latest = latest.number,
                author = %edit.author,
                "Merging conflicting edit"
            );
            let merged = resolver.resolve(&base_version, &latest, &edit).await?;
            let author = format!("Merged: {}, {}", latest.author, edit.author);
            return Ok(self.create_version(merged, author));
        }

        Ok(self.create_version(edit.content, edit.author))
    }
}

fn unknown(number: usize) -> RolechainError {
    RolechainError::Version(format!("no version {number}"))
}
