//! Review coverage evaluation
//!
//! Decides whether a pull request has enough qualified approvals. The
//! latest review per reviewer wins, the author can never cover their
//! own change, and manually credited reviewers count as if they had
//! approved the current head.

use crate::census::Role;
use crate::check::checker::CheckIssue;
use crate::check::{BACKPORT_LABEL, CLEAN_LABEL};
use crate::context::BotContext;
use crate::trackers;
use forge_client::{Comment, PullRequest, Review, ReviewVerdict};
use std::collections::HashMap;

/// One approval that currently counts.
#[derive(Debug, Clone)]
pub struct ActiveApproval {
    pub username: String,
    pub role: Option<Role>,
    /// Head hash the approval was made against
    pub hash: String,
    /// Approval was made against an older head but still counts
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct ReviewCoverage {
    pub approvals: Vec<ActiveApproval>,
    pub required: usize,
    pub role: String,
    pub issues: Vec<CheckIssue>,
    pub satisfied: bool,
}

fn parse_role(name: &str) -> Role {
    match name {
        "lead" => Role::Lead,
        "reviewer" => Role::Reviewer,
        "committer" => Role::Committer,
        _ => Role::Author,
    }
}

pub async fn evaluate(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    reviews: &[Review],
) -> anyhow::Result<ReviewCoverage> {
    let mut issues = Vec::new();
    let bot = ctx.bot_user();

    // Latest review per reviewer wins
    let mut latest: HashMap<&str, &Review> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for review in reviews {
        let name = review.reviewer.username.as_str();
        if latest.insert(name, review).is_none() {
            order.push(name);
        }
    }

    let mut approvals: Vec<ActiveApproval> = Vec::new();
    for name in order {
        let review = latest[name];
        if review.verdict != ReviewVerdict::Approved {
            continue;
        }
        if review.reviewer.username == pr.author.username {
            issues.push(CheckIssue::SelfReview);
            continue;
        }
        let stale = review.hash != pr.head_hash;
        if stale && ctx.config.ignore_stale_reviews {
            // Stale approvals are discarded outright in strict mode
            continue;
        }
        let role = ctx
            .census
            .contributor(&review.reviewer)
            .await?
            .map(|c| c.role);
        approvals.push(ActiveApproval {
            username: review.reviewer.username.clone(),
            role,
            hash: review.hash.clone(),
            stale,
        });
    }

    // Manually credited reviewers always cover the current head
    for name in trackers::credited_reviewers(comments, &bot) {
        if approvals.iter().any(|a| a.username == name) {
            continue;
        }
        let role = ctx
            .census
            .contributor(&forge_client::User::new(0, &name))
            .await?
            .map(|c| c.role);
        approvals.push(ActiveApproval {
            username: name,
            role,
            hash: pr.head_hash.clone(),
            stale: false,
        });
    }

    let (required, role_name) = requirement(ctx, pr, comments, &bot);
    let required_role = parse_role(&role_name);
    let found = approvals
        .iter()
        .filter(|a| a.role.is_some_and(|r| r >= required_role))
        .count();
    let satisfied = found >= required;
    if !satisfied {
        issues.push(CheckIssue::TooFewReviewers {
            required,
            found,
            role: role_name.clone(),
        });
    }

    Ok(ReviewCoverage {
        approvals,
        required,
        role: role_name,
        issues,
        satisfied,
    })
}

/// How many qualified approvals this pull request needs. Clean
/// backports keep the review coverage of the original change, so the
/// requirement is waived entirely.
fn requirement(
    ctx: &BotContext,
    pr: &PullRequest,
    comments: &[Comment],
    bot: &forge_client::User,
) -> (usize, String) {
    if pr.has_label(BACKPORT_LABEL) && pr.has_label(CLEAN_LABEL) {
        return (0, "reviewer".to_string());
    }
    let mut required = 1;
    let mut role = "reviewer".to_string();
    if ctx
        .config
        .two_reviewers_labels
        .iter()
        .any(|l| pr.has_label(l))
    {
        required = 2;
    }
    if let Some((count, marker_role)) = trackers::additional_required_reviewers(comments, bot) {
        if count > required {
            required = count;
        }
        role = marker_role;
    }
    (required, role)
}
