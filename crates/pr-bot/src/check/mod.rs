//! The check run
//!
//! One policy evaluation of one pull request head. The flow is fixed:
//! short-circuit on a matching fingerprint, post an in-progress check,
//! evaluate, then reconcile every visible output (labels, body
//! progress block, merge-ready comment, check conclusion). The
//! fingerprint is persisted on the check run even when evaluation
//! fails, so a deterministic failure is not retried forever.

pub mod checker;
pub mod review_coverage;

pub use checker::{CheckIssue, CheckerError, PolicyChecker, Severity};
pub use review_coverage::ReviewCoverage;

use crate::context::BotContext;
use crate::fingerprint::{self, FingerprintInput};
use crate::trackers;
use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use forge_client::{
    CheckConclusion, CheckRunInfo, CheckRunStatus, CheckRunUpdate, Comment, PullRequest,
    PullRequestState, Review, ReviewVerdict,
};
use log::{debug, info};

pub const READY_LABEL: &str = "ready";
pub const RFR_LABEL: &str = "rfr";
pub const SPONSOR_LABEL: &str = "sponsor";
pub const OUTDATED_LABEL: &str = "merge-conflict";
pub const AUTO_LABEL: &str = "auto";
pub const DELEGATED_LABEL: &str = "delegated";
pub const INTEGRATED_LABEL: &str = "integrated";
pub const BACKPORT_LABEL: &str = "backport";
pub const CLEAN_LABEL: &str = "clean";

const MERGE_CONFLICT_MARKER: &str = "<!-- PullRequestBot merge conflict comment -->";

/// Gating labels and approvals can clear outside the bot's sight, so a
/// blocked fingerprint carries an expiry and the evaluation is redone
/// after this long even when nothing visible changed.
const BLOCKED_RECHECK_MINUTES: i64 = 10;

/// Compute the fingerprint of everything that influences this check.
pub async fn metadata(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    reviews: &[Review],
    expires_at: Option<DateTime<Utc>>,
) -> anyhow::Result<String> {
    let bot = ctx.bot_user();
    let mut approvals = Vec::new();
    for review in reviews {
        if review.verdict != ReviewVerdict::Approved {
            continue;
        }
        let contributor = ctx.census.contributor(&review.reviewer).await?;
        approvals.push(fingerprint::encode_approval(
            &review.reviewer.username,
            contributor.as_ref().is_some_and(|c| c.is_reviewer()),
            contributor.as_ref().is_some_and(|c| c.is_committer()),
            &review.hash,
        ));
    }
    Ok(fingerprint::fingerprint(&FingerprintInput {
        title: pr.title.clone(),
        body: author_body(&pr.body).to_string(),
        approvals,
        marker_lines: trackers::metadata_marker_lines(comments, &bot),
        labels: pr.labels.clone(),
        target_ref: pr.target_ref.clone(),
        draft: pr.draft,
        expires_at,
    }))
}

/// The part of the body the author owns, above the progress marker.
fn author_body(body: &str) -> &str {
    match body.find(trackers::PROGRESS_MARKER) {
        Some(at) => body[..at].trim_end(),
        None => body.trim_end(),
    }
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub ready: bool,
}

struct Evaluation {
    issues: Vec<CheckIssue>,
    blockers: Vec<String>,
    coverage: ReviewCoverage,
    conflict: Option<String>,
    config_error: Option<String>,
}

/// Run the check for the current head. `stored_metadata` short-
/// circuiting has already been done by the caller; this always
/// evaluates.
pub async fn execute(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    reviews: &[Review],
) -> anyhow::Result<CheckOutcome> {
    let meta = metadata(ctx, pr, comments, reviews, None).await?;

    // An in-progress check goes up before any work happens, so the
    // forge never shows a stale conclusion during evaluation
    let existing = ctx
        .forge
        .check_run(&pr.head_hash, &ctx.config.check_name)
        .await?;
    if !existing.is_some_and(|c| c.status == CheckRunStatus::InProgress) {
        ctx.forge
            .create_check_run(CheckRunInfo {
                name: ctx.config.check_name.clone(),
                head_hash: pr.head_hash.clone(),
                status: CheckRunStatus::InProgress,
                conclusion: None,
                title: "Checking".to_string(),
                summary: String::new(),
                metadata: None,
                annotations: Vec::new(),
                completed_at: None,
            })
            .await?;
    }

    let result = evaluate(ctx, pr, comments, reviews).await;
    let evaluation = match result {
        Ok(evaluation) => evaluation,
        Err(e) => {
            // Persist the fingerprint anyway: a deterministic failure
            // must not be re-attempted on every pass
            ctx.forge
                .update_check_run(
                    &pr.head_hash,
                    &ctx.config.check_name,
                    CheckRunUpdate {
                        status: Some(CheckRunStatus::Completed),
                        conclusion: Some(CheckConclusion::Failure),
                        title: Some("An error occurred during evaluation".to_string()),
                        summary: Some(format!("{e:#}")),
                        metadata: Some(meta),
                        annotations: None,
                    },
                )
                .await?;
            return Err(e);
        }
    };

    let ready = finalize(ctx, pr, comments, &evaluation).await?;

    // A blocked state can clear without any forge activity, so its
    // fingerprint expires and a retry is queued
    let expires_at = (!evaluation.blockers.is_empty())
        .then(|| Utc::now() + Duration::minutes(BLOCKED_RECHECK_MINUTES));

    // The fingerprint is computed from the reconciled state, so a
    // stable pull request hashes to what the next pass will observe
    let fresh_pr = ctx.forge.pull_request(pr.number).await?;
    let fresh_comments = ctx.forge.comments(pr.number).await?;
    let meta = metadata(ctx, &fresh_pr, &fresh_comments, reviews, expires_at).await?;
    ctx.forge
        .update_check_run(
            &pr.head_hash,
            &ctx.config.check_name,
            CheckRunUpdate {
                metadata: Some(meta),
                ..Default::default()
            },
        )
        .await?;
    if let Some(at) = expires_at {
        ctx.state.schedule_retry(pr.number, at);
    }
    Ok(CheckOutcome { ready })
}

async fn evaluate(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    reviews: &[Review],
) -> anyhow::Result<Evaluation> {
    let bot = ctx.bot_user();
    let repo = ctx
        .repos
        .materialize(pr)
        .await
        .context("materializing pull request")?;

    let conflict = match repo.merge_target(&bot.full_name, &format!("{}@bots.invalid", bot.username))?
    {
        crate::repo::MergeOutcome::Merged { .. } => None,
        crate::repo::MergeOutcome::Conflict { message } => Some(message),
    };

    let (mut issues, config_error) = match ctx.checker.check(repo.as_ref(), pr) {
        Ok(issues) => (issues, None),
        Err(CheckerError::Configuration(message)) => (Vec::new(), Some(message)),
        Err(CheckerError::Other(e)) => return Err(e),
    };

    let coverage = review_coverage::evaluate(ctx, pr, comments, reviews).await?;
    issues.extend(coverage.issues.clone());

    let mut blockers = Vec::new();
    for (label, message) in &ctx.config.blocking_labels {
        if pr.has_label(label) {
            blockers.push(message.clone());
        }
    }
    let allowed = regex::Regex::new(&ctx.config.allowed_target_branches)?;
    if !allowed.is_match(&pr.target_ref) {
        blockers.push(format!(
            "The branch `{}` is not a valid integration target.",
            pr.target_ref
        ));
    }
    if let Some((id, _)) = crate::tracker::parse_issue_title(&pr.title) {
        for other in ctx.forge.list_pull_requests().await? {
            if other.number == pr.number || other.state != PullRequestState::Open {
                continue;
            }
            if crate::tracker::parse_issue_title(&other.title).map(|(i, _)| i) == Some(id) {
                issues.push(CheckIssue::DuplicateIssue {
                    id: id.to_string(),
                    other: other.number,
                });
            }
        }
    }

    Ok(Evaluation {
        issues,
        blockers,
        coverage,
        conflict,
        config_error,
    })
}

async fn finalize(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    evaluation: &Evaluation,
) -> anyhow::Result<bool> {
    let bot = ctx.bot_user();
    let number = pr.number;

    if let Some(message) = &evaluation.config_error {
        if trackers::find_marked_comment(comments, &bot, trackers::CONFIG_ERROR_MARKER).is_none() {
            ctx.forge
                .add_comment(
                    number,
                    &format!(
                        "{}\n@{} the policy configuration for this repository is broken and \
                         checks cannot be run:\n```\n{}\n```",
                        trackers::CONFIG_ERROR_MARKER,
                        pr.author.username,
                        message
                    ),
                )
                .await?;
        }
        complete_check(
            ctx,
            pr,
            CheckConclusion::Failure,
            "Policy configuration is broken",
            message,
            Vec::new(),
        )
        .await?;
        return Ok(false);
    }

    if let Some(conflict) = &evaluation.conflict {
        if !pr.has_label(OUTDATED_LABEL) {
            ctx.forge.add_label(number, OUTDATED_LABEL).await?;
        }
        if pr.has_label(READY_LABEL) {
            ctx.forge.remove_label(number, READY_LABEL).await?;
        }
        if trackers::find_marked_comment(comments, &bot, MERGE_CONFLICT_MARKER).is_none() {
            ctx.forge
                .add_comment(
                    number,
                    &format!(
                        "{}\n@{} this pull request can not be integrated into \
                         `{}` due to one or more merge conflicts:\n```\n{}\n```\n\
                         Please merge the latest changes from `{}` into your branch.",
                        MERGE_CONFLICT_MARKER,
                        pr.author.username,
                        pr.target_ref,
                        conflict,
                        pr.target_ref
                    ),
                )
                .await?;
        }
        complete_check(
            ctx,
            pr,
            CheckConclusion::Failure,
            "Merge conflict with the target branch",
            conflict,
            Vec::new(),
        )
        .await?;
        return Ok(false);
    }

    if pr.has_label(OUTDATED_LABEL) {
        ctx.forge.remove_label(number, OUTDATED_LABEL).await?;
    }

    let errors: Vec<&CheckIssue> = evaluation
        .issues
        .iter()
        .filter(|i| i.severity() == Severity::Error)
        .collect();
    let checks_pass = errors.is_empty() && evaluation.blockers.is_empty();
    let ready = checks_pass && !pr.draft;

    // Review state labels
    if !pr.draft && !pr.has_label(RFR_LABEL) {
        ctx.forge.add_label(number, RFR_LABEL).await?;
    }
    if pr.draft && pr.has_label(RFR_LABEL) {
        ctx.forge.remove_label(number, RFR_LABEL).await?;
    }
    if ready && !pr.has_label(READY_LABEL) {
        ctx.forge.add_label(number, READY_LABEL).await?;
    }
    if !ready {
        if pr.has_label(READY_LABEL) {
            ctx.forge.remove_label(number, READY_LABEL).await?;
        }
        if pr.has_label(SPONSOR_LABEL) {
            ctx.forge.remove_label(number, SPONSOR_LABEL).await?;
        }
    }

    // Progress block in the body, spliced below the fixed marker.
    // Byte-equality skip keeps the edit history quiet.
    let progress = progress_text(evaluation);
    let new_body = splice_progress(&pr.body, &progress);
    if new_body != pr.body {
        ctx.forge.set_body(number, &new_body).await?;
    }

    update_merge_ready_comment(ctx, pr, comments, ready).await?;

    let annotations: Vec<_> = evaluation
        .issues
        .iter()
        .filter_map(CheckIssue::annotation)
        .collect();
    let (conclusion, title) = if checks_pass {
        (CheckConclusion::Success, "All required checks passed")
    } else {
        (CheckConclusion::Failure, "Required checks failed")
    };
    complete_check(ctx, pr, conclusion, title, &progress, annotations).await?;

    // Auto mode: the bot asks itself to integrate once the change is
    // ready and not waiting for a sponsor
    if ready && pr.has_label(AUTO_LABEL) && !pr.has_label(SPONSOR_LABEL) {
        let pending = comments.iter().any(|c| {
            c.author.username == bot.username
                && trackers::is_valid_self_command(c)
                && c.body.contains("/integrate")
                && !trackers::replied_command_ids(comments, &bot).contains(&c.id)
        });
        if !pending {
            info!("{}#{number}: ready in auto mode, requesting integration", ctx.repository());
            ctx.forge
                .add_comment(
                    number,
                    &format!("/integrate {}\n{}", pr.head_hash, trackers::SELF_COMMAND_MARKER),
                )
                .await?;
        }
    } else {
        debug!("{}#{number}: check complete, ready={ready}", ctx.repository());
    }

    Ok(ready)
}

async fn complete_check(
    ctx: &BotContext,
    pr: &PullRequest,
    conclusion: CheckConclusion,
    title: &str,
    summary: &str,
    annotations: Vec<forge_client::FileAnnotation>,
) -> anyhow::Result<()> {
    ctx.forge
        .update_check_run(
            &pr.head_hash,
            &ctx.config.check_name,
            CheckRunUpdate {
                status: Some(CheckRunStatus::Completed),
                conclusion: Some(conclusion),
                title: Some(title.to_string()),
                summary: Some(summary.to_string()),
                metadata: None,
                annotations: Some(annotations),
            },
        )
        .await
}

/// Render the progress block shown in the body and the check summary.
fn progress_text(evaluation: &Evaluation) -> String {
    let mut text = String::from("### Progress\n");
    let coverage = &evaluation.coverage;
    let reviewed = if coverage.satisfied { 'x' } else { ' ' };
    if coverage.required > 0 {
        text.push_str(&format!(
            "- [{reviewed}] Change must be properly reviewed ({} review{} of role `{}` required)\n",
            coverage.required,
            if coverage.required == 1 { "" } else { "s" },
            coverage.role
        ));
    }
    let has_issue = !evaluation
        .issues
        .iter()
        .any(|i| matches!(i, CheckIssue::MissingIssueReference));
    text.push_str(&format!(
        "- [{}] Change must reference an issue\n",
        if has_issue { 'x' } else { ' ' }
    ));

    let other_errors: Vec<&CheckIssue> = evaluation
        .issues
        .iter()
        .filter(|i| {
            i.severity() == Severity::Error
                && !matches!(
                    i,
                    CheckIssue::MissingIssueReference | CheckIssue::TooFewReviewers { .. }
                )
        })
        .collect();
    if !other_errors.is_empty() || !evaluation.blockers.is_empty() {
        text.push_str("\n### Integration blockers\n");
        for issue in &other_errors {
            text.push_str(&format!("- {}\n", issue.message()));
        }
        for blocker in &evaluation.blockers {
            text.push_str(&format!("- {blocker}\n"));
        }
    }

    let warnings: Vec<&CheckIssue> = evaluation
        .issues
        .iter()
        .filter(|i| i.severity() == Severity::Warning)
        .collect();
    if !warnings.is_empty() {
        text.push_str("\n### Warnings\n");
        for warning in &warnings {
            text.push_str(&format!("- {}\n", warning.message()));
        }
    }
    text
}

/// Replace everything below the progress marker, adding the marker if
/// the body does not carry one yet.
fn splice_progress(body: &str, progress: &str) -> String {
    let author = author_body(body);
    if author.is_empty() {
        format!("{}\n\n{}", trackers::PROGRESS_MARKER, progress)
    } else {
        format!("{}\n\n{}\n\n{}", author, trackers::PROGRESS_MARKER, progress)
    }
}

async fn update_merge_ready_comment(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    ready: bool,
) -> anyhow::Result<()> {
    let bot = ctx.bot_user();
    let existing = trackers::find_marked_comment(comments, &bot, trackers::MERGE_READY_MARKER);
    if ready {
        let author_is_committer = ctx.census.is_committer(&pr.author).await?;
        let mut text = format!(
            "{}\n@{} This change now passes all *automated* pre-integration checks.\n\n",
            trackers::MERGE_READY_MARKER,
            pr.author.username
        );
        if author_is_committer {
            text.push_str(&format!(
                "➡️ To integrate this PR with the above commit message to the `{}` branch, \
                 type `/integrate` in a new comment.",
                pr.target_ref
            ));
        } else {
            text.push_str(&format!(
                "As you do not have [Committer](https://openjdk.org/bylaws#committer) status in \
                 this project, an existing Committer must agree to sponsor your change.\n\n\
                 ➡️ To flag this PR as ready for integration with the above commit message, \
                 type `/integrate` in a new comment. (Afterwards, your sponsor types \
                 `/sponsor` in a new comment to perform the integration).",
            ));
        }
        match existing {
            Some(comment) if comment.body == text => {}
            Some(comment) => {
                ctx.forge.update_comment(pr.number, &comment.id, &text).await?;
            }
            None => {
                ctx.forge.add_comment(pr.number, &text).await?;
            }
        }
    } else if let Some(comment) = existing {
        let text = format!(
            "{}\n@{} This change is no longer ready for integration - \
             check the PR body for details.",
            trackers::MERGE_READY_MARKER,
            pr.author.username
        );
        if comment.body != text {
            ctx.forge.update_comment(pr.number, &comment.id, &text).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_coverage(satisfied: bool) -> ReviewCoverage {
        ReviewCoverage {
            approvals: Vec::new(),
            required: 1,
            role: "reviewer".to_string(),
            issues: Vec::new(),
            satisfied,
        }
    }

    #[test]
    fn test_splice_progress_is_idempotent() {
        let body = "My description";
        let spliced = splice_progress(body, "### Progress\n- [x] Done\n");
        assert!(spliced.starts_with("My description"));
        assert!(spliced.contains(trackers::PROGRESS_MARKER));

        // Splicing an updated progress block keeps the author part intact
        let respliced = splice_progress(&spliced, "### Progress\n- [ ] Not done\n");
        assert!(respliced.starts_with("My description"));
        assert_eq!(respliced.matches(trackers::PROGRESS_MARKER).count(), 1);
        assert!(respliced.contains("Not done"));
        assert!(!respliced.contains("[x] Done"));
    }

    #[test]
    fn test_splice_progress_empty_body() {
        let spliced = splice_progress("", "progress");
        assert!(spliced.starts_with(trackers::PROGRESS_MARKER));
    }

    #[test]
    fn test_progress_text_sections() {
        let evaluation = Evaluation {
            issues: vec![
                CheckIssue::MissingIssueReference,
                CheckIssue::Whitespace {
                    path: "a.c".to_string(),
                    line: 3,
                },
                CheckIssue::CopyrightFormat {
                    path: "b.c".to_string(),
                },
            ],
            blockers: vec!["The CSR is not approved".to_string()],
            coverage: empty_coverage(false),
            conflict: None,
            config_error: None,
        };
        let text = progress_text(&evaluation);
        assert!(text.contains("- [ ] Change must be properly reviewed"));
        assert!(text.contains("- [ ] Change must reference an issue"));
        assert!(text.contains("### Integration blockers"));
        assert!(text.contains("Whitespace error in a.c on line 3"));
        assert!(text.contains("The CSR is not approved"));
        assert!(text.contains("### Warnings"));
        assert!(text.contains("Copyright header"));
    }

    #[test]
    fn test_progress_text_all_satisfied() {
        let evaluation = Evaluation {
            issues: Vec::new(),
            blockers: Vec::new(),
            coverage: empty_coverage(true),
            conflict: None,
            config_error: None,
        };
        let text = progress_text(&evaluation);
        assert!(text.contains("- [x] Change must be properly reviewed"));
        assert!(text.contains("- [x] Change must reference an issue"));
        assert!(!text.contains("Integration blockers"));
    }
}
