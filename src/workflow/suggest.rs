use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::platform::types::{NewIssue, NewLabel};
use crate::state::keys;
use crate::workflow::phase::Phase;
use crate::workflow::session::Session;
use crate::workflow::types::WorkflowMode;

/// Suggestions requested in suggest mode when no count is configured.
pub const DEFAULT_SUGGESTION_COUNT: u32 = 3;

const MARKER_LABEL_COLOR: &str = "c5def5";

/// The refine phase's answer for one suggestion.
#[derive(Debug, Clone, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub create: Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// A list of names or a comma-separated string.
    #[serde(default)]
    pub labels: Value,
    #[serde(default)]
    pub priority: Option<Value>,
}

impl Suggestion {
    pub fn label_names(&self) -> Vec<String> {
        match &self.labels {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Value::String(csv) => csv.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    pub fn priority_text(&self) -> Option<String> {
        match self.priority.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }
}

/// Why a suggestion did not become an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    RefinementFailed,
    NoRefinedOutput,
    Unparsable(String),
    NotApproved,
    MissingFields,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::RefinementFailed => f.write_str("refinement phase failed"),
            SkipReason::NoRefinedOutput => f.write_str("refinement produced no output"),
            SkipReason::Unparsable(e) => write!(f, "refined output is not valid JSON: {e}"),
            SkipReason::NotApproved => f.write_str("refinement did not approve creation"),
            SkipReason::MissingFields => f.write_str("refined title or body is empty"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuggestionReport {
    /// URLs of created issues, in the agent's order.
    pub created: Vec<String>,
    pub skipped: usize,
    pub failed: usize,
}

enum ItemResult {
    Created(String),
    Skipped(SkipReason),
    Failed,
    DryRun,
}

/// Number of suggestions to request, or `None` when the loop should not run.
///
/// Unset and empty mean zero. Zero means [`DEFAULT_SUGGESTION_COUNT`] in suggest
/// mode and "do not suggest" elsewhere.
pub fn resolve_target_count(raw: Option<&str>, mode: WorkflowMode) -> Option<u32> {
    let raw = raw.map(str::trim).unwrap_or_default();
    let count = if raw.is_empty() {
        0
    } else {
        match raw.parse::<u32>() {
            Ok(count) => count,
            Err(_) => {
                tracing::warn!(value = raw, "Suggested issue count is not a non-negative integer, skipping suggestions");
                return None;
            }
        }
    };

    match (count, mode) {
        (0, WorkflowMode::Suggest) => Some(DEFAULT_SUGGESTION_COUNT),
        (0, _) => None,
        (count, _) => Some(count),
    }
}

/// Marker label first, then the refined labels trimmed and without repeats.
pub fn build_labels(marker: &str, refined: &[String]) -> Vec<String> {
    let mut labels = vec![marker.to_string()];
    for label in refined {
        let label = label.trim();
        if !label.is_empty() && !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

impl Session {
    /// Propose up to `target` follow-up issues and create the approved ones.
    ///
    /// The agent proposes a batch in `suggested_issues.json`. Each element is
    /// refined on its own: it is written to `current_suggestion.json`, the refine
    /// phase answers with `refined_issue.json`, and only an answer with
    /// `"create": true` becomes an issue. A bad item is skipped and the batch
    /// goes on.
    pub async fn suggestion_loop(&self, target: u32) -> SuggestionReport {
        let mut report = SuggestionReport::default();

        self.store
            .clear(&[
                keys::SUGGESTED_ISSUES,
                keys::SUGGESTED_ISSUE_URLS,
                keys::CURRENT_SUGGESTION,
                keys::REFINED_ISSUE,
            ])
            .await;

        let labels = match self.host.list_labels().await {
            Ok(labels) => labels.join(", "),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list labels");
                String::new()
            }
        };

        let request = format!("Number of issues to suggest: {target}\nAvailable labels: {labels}");
        if !self.phases.run(Phase::SuggestIssues, Some(&request)).await {
            tracing::warn!("Issue suggestion phase failed, no issues suggested");
            return report;
        }

        let Some(suggestions) = self.read_suggestions().await else {
            return report;
        };
        tracing::info!(count = suggestions.len(), "Refining suggested issues");

        self.ensure_marker_label().await;

        for (index, suggestion) in suggestions.iter().enumerate() {
            match self.process_suggestion(suggestion, &labels).await {
                ItemResult::Created(url) => {
                    tracing::info!(index, url = %url, "Created suggested issue");
                    report.created.push(url);
                }
                ItemResult::Skipped(reason) => {
                    tracing::info!(index, reason = %reason, "Skipping suggestion");
                    report.skipped += 1;
                }
                ItemResult::Failed => report.failed += 1,
                ItemResult::DryRun => {}
            }
            self.store
                .clear(&[keys::CURRENT_SUGGESTION, keys::REFINED_ISSUE])
                .await;
        }

        if let Err(e) = self
            .store
            .save(keys::SUGGESTED_ISSUE_URLS, &report.created.join("\n"))
            .await
        {
            tracing::warn!(error = %e, "Failed to store suggested issue URLs");
        }

        tracing::info!(
            created = report.created.len(),
            skipped = report.skipped,
            failed = report.failed,
            "Suggestion loop finished"
        );
        report
    }

    async fn read_suggestions(&self) -> Option<Vec<Value>> {
        let raw = self.store.load(keys::SUGGESTED_ISSUES, "").await;
        if raw.trim().is_empty() {
            tracing::warn!("No suggested issues were produced");
            return None;
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) if items.is_empty() => {
                tracing::info!("Agent suggested no issues");
                None
            }
            Ok(Value::Array(items)) => Some(items),
            Ok(_) => {
                tracing::warn!("Suggested issues are not a JSON array");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse suggested issues");
                None
            }
        }
    }

    async fn ensure_marker_label(&self) {
        let label = &self.settings.suggestion_label;
        if self.settings.dry_run {
            tracing::info!(label = %label, "Dry run: not creating marker label");
            return;
        }
        let new_label = NewLabel {
            name: label.clone(),
            color: MARKER_LABEL_COLOR.to_string(),
            description: "Issue suggested by Hyphae".to_string(),
        };
        if let Err(e) = self.host.ensure_label(&new_label).await {
            tracing::warn!(label = %label, error = %e, "Failed to ensure marker label");
        }
    }

    async fn process_suggestion(&self, suggestion: &Value, labels: &str) -> ItemResult {
        let suggestion_json = match serde_json::to_string_pretty(suggestion) {
            Ok(json) => json,
            Err(e) => return ItemResult::Skipped(SkipReason::Unparsable(e.to_string())),
        };
        if let Err(e) = self.store.save(keys::CURRENT_SUGGESTION, &suggestion_json).await {
            tracing::warn!(error = %e, "Failed to store current suggestion");
        }

        let context = format!(
            "Suggestion to refine:\n```json\n{suggestion_json}\n```\nAvailable labels: {labels}"
        );
        if !self.phases.run(Phase::RefineIssue, Some(&context)).await {
            return ItemResult::Skipped(SkipReason::RefinementFailed);
        }

        let raw = self.store.load(keys::REFINED_ISSUE, "").await;
        if raw.trim().is_empty() {
            return ItemResult::Skipped(SkipReason::NoRefinedOutput);
        }
        let refined: Suggestion = match serde_json::from_str(&raw) {
            Ok(refined) => refined,
            Err(e) => return ItemResult::Skipped(SkipReason::Unparsable(e.to_string())),
        };
        if refined.create != Value::Bool(true) {
            return ItemResult::Skipped(SkipReason::NotApproved);
        }
        if refined.title.trim().is_empty() || refined.body.trim().is_empty() {
            return ItemResult::Skipped(SkipReason::MissingFields);
        }

        let issue = NewIssue {
            title: refined.title.trim().to_string(),
            body: self.issue_body(&refined),
            labels: build_labels(&self.settings.suggestion_label, &refined.label_names()),
        };

        if self.settings.dry_run {
            tracing::info!(title = %issue.title, labels = ?issue.labels, "Dry run: would create issue");
            return ItemResult::DryRun;
        }

        match self.host.create_issue(&issue).await {
            Ok(url) => ItemResult::Created(url),
            Err(e) => {
                tracing::warn!(title = %issue.title, error = %e, "Failed to create suggested issue");
                ItemResult::Failed
            }
        }
    }

    fn issue_body(&self, refined: &Suggestion) -> String {
        let mut body = refined.body.trim().to_string();
        if let Some(priority) = refined.priority_text() {
            body.push_str(&format!("\n\n**Priority:** {priority}"));
        }
        let origin = match self.issue {
            Some(number) => format!("while working on #{number}"),
            None => format!("while reviewing {}", self.repo_full_name),
        };
        body.push_str(&format!("\n\n---\n*Suggested by Hyphae {origin}*"));
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, Reaction};

    fn refined(title: &str) -> String {
        serde_json::json!({
            "create": true,
            "title": title,
            "body": format!("Details for {title}"),
            "labels": ["enhancement", " enhancement ", "ai-suggested"],
        })
        .to_string()
    }

    fn suggestions(titles: &[&str]) -> String {
        Value::Array(
            titles
                .iter()
                .map(|t| serde_json::json!({ "title": t, "body": "idea" }))
                .collect(),
        )
        .to_string()
    }

    #[test]
    fn test_target_count_resolution() {
        assert_eq!(resolve_target_count(None, WorkflowMode::Suggest), Some(3));
        assert_eq!(resolve_target_count(Some(""), WorkflowMode::Suggest), Some(3));
        assert_eq!(resolve_target_count(Some("0"), WorkflowMode::Suggest), Some(3));
        assert_eq!(resolve_target_count(Some("5"), WorkflowMode::Suggest), Some(5));
        assert_eq!(resolve_target_count(None, WorkflowMode::Resolve), None);
        assert_eq!(resolve_target_count(Some("0"), WorkflowMode::Resolve), None);
        assert_eq!(resolve_target_count(Some(" 2 "), WorkflowMode::Resolve), Some(2));
        assert_eq!(resolve_target_count(Some("-1"), WorkflowMode::Suggest), None);
        assert_eq!(resolve_target_count(Some("many"), WorkflowMode::Resolve), None);
    }

    #[test]
    fn test_build_labels_marker_first_and_deduplicated() {
        let refined = vec![
            " bug ".to_string(),
            "ai-suggested".to_string(),
            "bug".to_string(),
            "".to_string(),
            "docs".to_string(),
        ];
        assert_eq!(
            build_labels("ai-suggested", &refined),
            vec!["ai-suggested", "bug", "docs"]
        );
    }

    #[test]
    fn test_suggestion_accepts_csv_labels_and_numeric_priority() {
        let s: Suggestion = serde_json::from_str(
            r#"{"create": true, "title": "t", "body": "b", "labels": "a, b", "priority": 2}"#,
        )
        .unwrap();
        assert_eq!(s.label_names(), vec!["a", " b"]);
        assert_eq!(s.priority_text().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_failed_refinement_skips_only_that_item() {
        let harness = Harness::new().await;
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A", "B", "C"]))],
        );
        harness.agent.script(
            "refine_issue",
            vec![
                Reaction::write(keys::REFINED_ISSUE, &refined("A")),
                Reaction::Fail,
                Reaction::Fail,
                Reaction::Fail,
                Reaction::write(keys::REFINED_ISSUE, &refined("C")),
            ],
        );
        let session = harness.session(None);

        let report = session.suggestion_loop(3).await;

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.skipped, 1);
        let issues = harness.host.log().issues;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title, "A");
        assert_eq!(issues[1].title, "C");
        assert_eq!(issues[0].labels, vec!["ai-suggested", "enhancement"]);
        assert_eq!(harness.host.log().labels_ensured, vec!["ai-suggested"]);
        assert_eq!(
            harness.store.load(keys::SUGGESTED_ISSUE_URLS, "").await,
            report.created.join("\n")
        );
        assert!(!harness.store.contains(keys::CURRENT_SUGGESTION).await);
        assert!(!harness.store.contains(keys::REFINED_ISSUE).await);
    }

    #[tokio::test]
    async fn test_refinement_must_approve_with_literal_true() {
        let harness = Harness::new().await;
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A", "B", "C"]))],
        );
        harness.agent.script(
            "refine_issue",
            vec![
                Reaction::write(keys::REFINED_ISSUE, r#"{"create": "true", "title": "A", "body": "b"}"#),
                Reaction::write(keys::REFINED_ISSUE, r#"{"create": true, "title": "B", "body": "  "}"#),
                Reaction::write(keys::REFINED_ISSUE, "not json"),
            ],
        );
        let session = harness.session(None);

        let report = session.suggestion_loop(3).await;

        assert!(report.created.is_empty());
        assert_eq!(report.skipped, 3);
        assert!(harness.host.log().issues.is_empty());
    }

    #[tokio::test]
    async fn test_refined_output_does_not_leak_between_items() {
        let harness = Harness::new().await;
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A", "B"]))],
        );
        // Only the first refinement writes an answer
        harness.agent.script(
            "refine_issue",
            vec![Reaction::write(keys::REFINED_ISSUE, &refined("A"))],
        );
        let session = harness.session(None);

        let report = session.suggestion_loop(2).await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_creation_failure_is_isolated() {
        let harness = Harness::new().await;
        harness.host.configure(|b| b.fail_issue_titles = vec!["A".to_string()]);
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A", "B"]))],
        );
        harness.agent.script(
            "refine_issue",
            vec![
                Reaction::write(keys::REFINED_ISSUE, &refined("A")),
                Reaction::write(keys::REFINED_ISSUE, &refined("B")),
            ],
        );
        let session = harness.session(None);

        let report = session.suggestion_loop(2).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.created.len(), 1);
        assert_eq!(harness.host.log().issues[0].title, "B");
    }

    #[tokio::test]
    async fn test_body_gets_priority_and_footer() {
        let harness = Harness::new().await;
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A"]))],
        );
        harness.agent.script(
            "refine_issue",
            vec![Reaction::write(
                keys::REFINED_ISSUE,
                r#"{"create": true, "title": "A", "body": "Do A", "priority": "high"}"#,
            )],
        );
        let session = harness.session(Some(42));

        session.suggestion_loop(1).await;

        let body = harness.host.log().issues.remove(0).body;
        assert!(body.starts_with("Do A\n\n**Priority:** high"));
        assert!(body.contains("while working on #42"));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_batch_ends_quietly() {
        for artifact in [None, Some(""), Some("{\"title\": \"x\"}"), Some("[broken")] {
            let harness = Harness::new().await;
            if let Some(content) = artifact {
                harness
                    .agent
                    .script("suggest_issues", vec![Reaction::write(keys::SUGGESTED_ISSUES, content)]);
            }
            let session = harness.session(None);

            let report = session.suggestion_loop(3).await;

            assert_eq!(report, SuggestionReport::default());
            assert_eq!(harness.agent.calls_for("refine_issue"), 0);
        }
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let mut harness = Harness::new().await;
        harness.settings.dry_run = true;
        harness.agent.script(
            "suggest_issues",
            vec![Reaction::write(keys::SUGGESTED_ISSUES, &suggestions(&["A"]))],
        );
        harness.agent.script(
            "refine_issue",
            vec![Reaction::write(keys::REFINED_ISSUE, &refined("A"))],
        );
        let session = harness.session(None);

        let report = session.suggestion_loop(1).await;

        assert!(report.created.is_empty());
        let log = harness.host.log();
        assert!(log.issues.is_empty());
        assert!(log.labels_ensured.is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_count_and_labels() {
        let harness = Harness::new().await;
        harness
            .host
            .configure(|b| b.labels = vec!["bug".to_string(), "docs".to_string()]);
        let session = harness.session(None);

        session.suggestion_loop(4).await;

        let prompt = harness.agent.prompts_for("suggest_issues").remove(0);
        assert!(prompt.contains("Number of issues to suggest: 4\nAvailable labels: bug, docs"));
    }
}
