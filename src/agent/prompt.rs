use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::platform::types::Issue;

static PLACEHOLDER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}"));

/// Everything a phase template may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub issue_context: String,
    pub issue_number: Option<u64>,
    pub repo: String,
    pub last_test_output: String,
    pub last_review_feedback: String,
    pub suggested_issues_count: Option<u32>,
}

impl PromptContext {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "issue_context" => self.issue_context.clone(),
            "issue_number" => self
                .issue_number
                .map(|n| n.to_string())
                .unwrap_or_default(),
            "repo" => self.repo.clone(),
            "last_test_output" => self.last_test_output.clone(),
            "last_review_feedback" => self.last_review_feedback.clone(),
            "suggested_issues_count" => self
                .suggested_issues_count
                .map(|n| n.to_string())
                .unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }
}

/// Substitute every `{{name}}` placeholder in `template`.
///
/// Referencing a name that [`PromptContext`] does not know is an error listing
/// all unknown names, so a typo in a template never silently renders as text.
pub fn render(template: &str, context: &PromptContext) -> Result<String> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|e| AppError::Template(format!("Invalid placeholder pattern: {e}")))?;

    let unknown: BTreeSet<String> = placeholder
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| context.lookup(name).is_none())
        .collect();

    if !unknown.is_empty() {
        return Err(AppError::Template(format!(
            "Unknown placeholder(s): {}",
            unknown.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let rendered = placeholder.replace_all(template, |caps: &Captures| {
        context.lookup(&caps[1]).unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// Append caller-supplied context as a trailing block.
pub fn with_extra_context(prompt: String, extra: Option<&str>) -> String {
    match extra.filter(|e| !e.trim().is_empty()) {
        Some(extra) => format!("{prompt}\n\n## Additional Context\n\n{extra}\n"),
        None => prompt,
    }
}

/// Markdown block describing an issue and its discussion.
pub fn issue_context(issue: &Issue) -> String {
    let comments = issue
        .comments
        .iter()
        .map(|c| format!("**@{}:** {}", c.author, c.body))
        .collect::<Vec<_>>()
        .join("\n\n");

    let labels = if issue.labels.is_empty() {
        String::new()
    } else {
        format!("**Labels:** {}\n\n", issue.labels.join(", "))
    };

    let comments_section = if comments.is_empty() {
        String::new()
    } else {
        format!("\n\n**Comments:**\n{comments}")
    };

    format!(
        "# Issue #{number}: {title}\n\n{labels}**Description:**\n{body}{comments_section}",
        number = issue.number,
        title = issue.title,
        body = issue.body,
    )
}

/// SHA-256 over the relative paths and contents of every file below `dir`.
///
/// Used to notice that the prompt set changed between a run and its resumption.
/// A missing directory hashes like an empty one.
pub async fn fingerprint(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || hash_dir(&dir))
        .await
        .map_err(|e| AppError::Internal(format!("Fingerprint task panicked: {e}")))?
}

fn hash_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_files(dir, &mut files)?;
    }
    files.sort();

    let mut hasher = Sha256::new();
    for path in files {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&path)?);
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
