//! Version control for the configuration repository
//!
//! Checkpoints of the table files are git commits. The store only needs a
//! handful of operations, collected in the [`VersionControl`] trait; [`Git`]
//! implements them by running the `git` binary with explicit arguments (no
//! shell) and parsing its text output.

use crate::core::error::{Error, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// Message of the first checkpoint of a new repository
pub const INITIAL_COMMIT_MESSAGE: &str = "Configuration database created.";

/// Message used when saving without one
pub const EMPTY_COMMIT_MESSAGE: &str = "(no message)";

/// Checkpoint operations needed by the configuration store.
pub trait VersionControl {
    /// Tells if the repository directory is the root of a repository.
    fn is_repo(&self) -> Result<bool>;

    fn init(&self) -> Result<()>;

    /// Stages every change in the repository directory.
    fn add_all(&self) -> Result<()>;

    /// Commits staged changes. Nothing to commit is not an error.
    fn commit(&self, message: &str) -> Result<()>;

    /// True when tracked files differ from the last checkpoint.
    fn status_dirty(&self) -> Result<bool>;

    /// Checkpoint history in `git log --date=iso` format.
    fn log(&self) -> Result<String>;

    /// Changes introduced by a checkpoint, in unified diff format.
    fn show(&self, commit: &str) -> Result<String>;

    /// Discards uncommitted changes and moves to `target` (HEAD if `None`).
    fn reset_hard(&self, target: Option<&str>) -> Result<()>;
}

/// Committer identity passed to git on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "Firelet".to_string(),
            email: "firelet@localhost".to_string(),
        }
    }
}

const GIT: &str = "git";

/// `git` binary collaborator
#[derive(Debug, Clone)]
pub struct Git {
    repodir: PathBuf,
    author: Option<GitAuthor>,
}

impl Git {
    pub fn new(repodir: impl Into<PathBuf>) -> Self {
        Self {
            repodir: repodir.into(),
            author: None,
        }
    }

    /// Commits as `author` instead of the user's git identity.
    pub fn with_author(mut self, author: GitAuthor) -> Self {
        self.author = Some(author);
        self
    }

    pub fn repodir(&self) -> &Path {
        &self.repodir
    }

    /// Tells if the git binary can be executed.
    pub fn available(&self) -> bool {
        Command::new(GIT)
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        debug!("Running {GIT} {}", args.join(" "));
        let mut cmd = Command::new(GIT);
        cmd.current_dir(&self.repodir).env("LC_ALL", "C");
        if let Some(author) = &self.author {
            cmd.arg("-c")
                .arg(format!("user.name={}", author.name))
                .arg("-c")
                .arg(format!("user.email={}", author.email));
        }
        cmd.args(args).output().map_err(|e| Error::Vcs {
            message: format!("Failed to run {GIT}: {e}"),
            stderr: None,
        })
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(failure(args, &output))
        }
    }
}

fn failure(args: &[&str], output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Error::Vcs {
        message: format!("'git {}' failed: {stderr}", args.join(" ")),
        stderr: Some(stderr),
    }
}

impl VersionControl for Git {
    fn is_repo(&self) -> Result<bool> {
        if !self.repodir.is_dir() {
            return Ok(false);
        }
        let output = self.output(&["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Ok(false);
        }
        let toplevel = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let same = match (toplevel.canonicalize(), self.repodir.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        Ok(same)
    }

    fn init(&self) -> Result<()> {
        info!("Creating git repository in {}", self.repodir.display());
        self.run(&["init", "--quiet"])?;
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        self.run(&["add", "--all", "."])?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<()> {
        let args = ["commit", "--quiet", "-m", message];
        let output = self.output(&args)?;
        if output.status.success() {
            return Ok(());
        }
        if String::from_utf8_lossy(&output.stdout).contains("nothing to commit") {
            debug!("Nothing to commit");
            return Ok(());
        }
        Err(failure(&args, &output))
    }

    fn status_dirty(&self) -> Result<bool> {
        let out = self.run(&["status", "--porcelain", "-uno"])?;
        Ok(!out.trim().is_empty())
    }

    fn log(&self) -> Result<String> {
        self.run(&["log", "--no-color", "--no-decorate", "--date=iso"])
    }

    fn show(&self, commit: &str) -> Result<String> {
        self.run(&["show", "--no-color", "--format=", commit])
    }

    fn reset_hard(&self, target: Option<&str>) -> Result<()> {
        let mut args = vec!["reset", "--hard", "--quiet"];
        args.extend(target);
        self.run(&args)?;
        Ok(())
    }
}

/// Where a rollback moves the repository to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// This many checkpoints before the current one
    Steps(usize),
    /// An explicit checkpoint identifier
    Commit(String),
}

impl RollbackTarget {
    /// Revision understood by `git reset`
    pub fn revision(&self) -> String {
        match self {
            RollbackTarget::Steps(n) => format!("HEAD~{n}"),
            RollbackTarget::Commit(id) => id.clone(),
        }
    }
}

/// One checkpoint of the configuration repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub commit: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
    pub message: Vec<String>,
}

/// Kind of line in a checkpoint diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    /// Name of the table the following lines belong to
    #[strum(serialize = "title")]
    Title,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "del")]
    Del,
    #[strum(serialize = "")]
    Context,
}

fn parse_date(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z").map_err(|e| Error::Vcs {
        message: format!("Unable to parse date '{value}': {e}"),
        stderr: None,
    })
}

/// Parses `git log --date=iso` output, newest checkpoint first.
///
/// # Errors
///
/// Returns `Error::Vcs` for an entry without author or with an unparsable date.
pub fn parse_log(text: &str) -> Result<Vec<Version>> {
    struct Pending {
        commit: String,
        author: Option<String>,
        date: Option<DateTime<FixedOffset>>,
        message: Vec<String>,
    }

    fn finish(p: Pending) -> Result<Version> {
        match (p.author, p.date) {
            (Some(author), Some(date)) => Ok(Version {
                commit: p.commit,
                author,
                date,
                message: p.message,
            }),
            _ => Err(Error::Vcs {
                message: format!("Incomplete log entry for commit {}", p.commit),
                stderr: None,
            }),
        }
    }

    let mut versions = Vec::new();
    let mut current: Option<Pending> = None;

    for line in text.lines() {
        if let Some(commit) = line.strip_prefix("commit ") {
            if let Some(p) = current.take() {
                versions.push(finish(p)?);
            }
            current = Some(Pending {
                commit: commit.split_whitespace().next().unwrap_or_default().to_string(),
                author: None,
                date: None,
                message: Vec::new(),
            });
            continue;
        }
        let Some(p) = current.as_mut() else {
            continue;
        };
        if let Some(author) = line.strip_prefix("Author:") {
            p.author = Some(author.trim().to_string());
        } else if let Some(date) = line.strip_prefix("Date:") {
            p.date = Some(parse_date(date.trim())?);
        } else if !line.trim().is_empty() && !line.starts_with("Merge:") {
            p.message.push(line.trim().to_string());
        }
    }
    if let Some(p) = current {
        versions.push(finish(p)?);
    }
    Ok(versions)
}

/// Parses a unified diff into tagged lines.
///
/// File headers become a [`DiffTag::Title`] line holding the table name;
/// hunk headers and git metadata lines are dropped.
pub fn parse_diff(text: &str) -> Vec<(String, DiffTag)> {
    const IGNORED: [&str; 7] = [
        "---",
        "@@",
        "diff --git",
        "index ",
        "new file mode",
        "deleted file mode",
        "\\ No newline",
    ];

    let mut lines = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_end();
        if let Some(file) = line.strip_prefix("+++ ") {
            let file = file.strip_prefix("b/").unwrap_or(file);
            let title = file.strip_suffix(".csv").unwrap_or(file);
            lines.push((title.to_string(), DiffTag::Title));
            continue;
        }
        if IGNORED.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            lines.push((added.to_string(), DiffTag::Add));
        } else if let Some(removed) = line.strip_prefix('-') {
            lines.push((removed.to_string(), DiffTag::Del));
        } else {
            let context = line.strip_prefix(' ').unwrap_or(line);
            lines.push((context.to_string(), DiffTag::Context));
        }
    }
    lines
}
