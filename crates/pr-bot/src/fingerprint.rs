//! Check run fingerprints
//!
//! A fingerprint is a digest of every input that influences the outcome
//! of a policy evaluation. It is stored on the check run itself, so a
//! fresh evaluation can be skipped whenever the stored fingerprint still
//! matches the state the bot observes. This is what makes re-checking
//! idempotent and cheap.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Everything that goes into a fingerprint. The caller is responsible
/// for extracting marker lines from the bot's own comments and for
/// encoding approvals; this module only hashes.
#[derive(Debug, Clone, Default)]
pub struct FingerprintInput {
    /// Pull request title, significant whitespace trimmed
    pub title: String,

    /// Pull request body
    pub body: String,

    /// One entry per active approval: username, role bits and the hash
    /// the review was made against. Sorted before hashing so review
    /// order does not matter.
    pub approvals: Vec<String>,

    /// Lines from the bot's own comments that carry state markers
    pub marker_lines: Vec<String>,

    /// Current label names. Sorted before hashing.
    pub labels: Vec<String>,

    /// Target branch of the pull request
    pub target_ref: String,

    /// Draft flag
    pub draft: bool,

    /// When part of the hashed state stops being valid (e.g. a review
    /// that will go stale). Appended to the fingerprint as an epoch
    /// second suffix.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Encode an approval for inclusion in a fingerprint: the reviewer's
/// username, their role flags and the head hash the approval covers.
/// The `;` separators keep username and hash unambiguous; forge
/// usernames cannot contain one.
pub fn encode_approval(username: &str, is_reviewer: bool, is_committer: bool, hash: &str) -> String {
    format!(
        "{};{}{};{}",
        username,
        u8::from(is_reviewer),
        u8::from(is_committer),
        hash
    )
}

/// Feed one field into the hasher, length-prefixed. Bare concatenation
/// would let adjacent fields trade bytes and still hash the same.
fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Compute the fingerprint for the given inputs. The result is a hex
/// encoded SHA-256 digest, optionally followed by `:<epoch seconds>`
/// when the state has an expiry.
pub fn fingerprint(input: &FingerprintInput) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, input.title.trim().as_bytes());
    hash_field(&mut hasher, input.body.as_bytes());

    let mut approvals = input.approvals.clone();
    approvals.sort();
    hasher.update((approvals.len() as u64).to_be_bytes());
    for entry in &approvals {
        hash_field(&mut hasher, entry.as_bytes());
    }

    hasher.update((input.marker_lines.len() as u64).to_be_bytes());
    for line in &input.marker_lines {
        hash_field(&mut hasher, line.as_bytes());
    }

    let mut labels = input.labels.clone();
    labels.sort();
    hasher.update((labels.len() as u64).to_be_bytes());
    for label in &labels {
        hash_field(&mut hasher, label.as_bytes());
    }

    hash_field(&mut hasher, input.target_ref.as_bytes());
    hasher.update([u8::from(input.draft)]);

    let digest = hex::encode(hasher.finalize());
    match input.expires_at {
        Some(at) => format!("{}:{}", digest, at.timestamp()),
        None => digest,
    }
}

/// Whether a stored fingerprint still covers the freshly computed one.
///
/// The digest parts must be equal, and a stored expiry must not have
/// passed. An expired fingerprint never matches, which forces a
/// re-evaluation even when nothing visible changed.
pub fn is_current(stored: &str, fresh: &str, now: DateTime<Utc>) -> bool {
    let (stored_digest, stored_expiry) = split(stored);
    let (fresh_digest, _) = split(fresh);
    if stored_digest != fresh_digest {
        return false;
    }
    match stored_expiry {
        Some(epoch) => now.timestamp() < epoch,
        None => true,
    }
}

fn split(fingerprint: &str) -> (&str, Option<i64>) {
    match fingerprint.split_once(':') {
        Some((digest, suffix)) => (digest, suffix.parse().ok()),
        None => (fingerprint, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_input() -> FingerprintInput {
        FingerprintInput {
            title: "123: Fix the frobnicator".to_string(),
            body: "A description".to_string(),
            approvals: vec![encode_approval("rev", true, true, "abc123")],
            marker_lines: vec!["<!-- add reviewer: 'extra' -->".to_string()],
            labels: vec!["rfr".to_string(), "ready".to_string()],
            target_ref: "master".to_string(),
            draft: false,
            expires_at: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&base_input());
        let b = fingerprint(&base_input());
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_of_labels_and_approvals_is_irrelevant() {
        let mut reordered = base_input();
        reordered.labels = vec!["ready".to_string(), "rfr".to_string()];
        reordered.approvals = vec![
            encode_approval("rev", true, true, "abc123"),
            encode_approval("alt", true, false, "abc123"),
        ];

        let mut original = base_input();
        original.approvals = vec![
            encode_approval("alt", true, false, "abc123"),
            encode_approval("rev", true, true, "abc123"),
        ];

        assert_eq!(fingerprint(&original), fingerprint(&reordered));
    }

    #[test]
    fn test_any_field_changes_the_fingerprint() {
        let base = fingerprint(&base_input());

        let mut changed = base_input();
        changed.title = "124: Fix the frobnicator".to_string();
        assert_ne!(base, fingerprint(&changed));

        let mut changed = base_input();
        changed.draft = true;
        assert_ne!(base, fingerprint(&changed));

        let mut changed = base_input();
        changed.target_ref = "release".to_string();
        assert_ne!(base, fingerprint(&changed));
    }

    #[test]
    fn test_adjacent_fields_do_not_trade_bytes() {
        let mut a = base_input();
        a.title = "123:Fix".to_string();
        a.body = "x".to_string();

        let mut b = base_input();
        b.title = "123:Fixx".to_string();
        b.body = String::new();

        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_list_entry_boundaries_are_significant() {
        let mut a = base_input();
        a.labels = vec!["ab".to_string(), "c".to_string()];

        let mut b = base_input();
        b.labels = vec!["a".to_string(), "bc".to_string()];

        assert_ne!(fingerprint(&a), fingerprint(&b));

        // An entry must not slide from one list into the next
        let mut a = base_input();
        a.approvals = vec!["x".to_string()];
        a.marker_lines = Vec::new();

        let mut b = base_input();
        b.approvals = Vec::new();
        b.marker_lines = vec!["x".to_string()];

        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_approval_encoding_is_unambiguous() {
        // Username ending in a role digit must not collide with a
        // hash starting with one
        let a = encode_approval("x", true, true, "0abc");
        let b = encode_approval("x1", true, false, "abc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_suffix_and_matching() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();

        let mut input = base_input();
        input.expires_at = Some(now + chrono::Duration::hours(1));
        let stored = fingerprint(&input);
        assert!(stored.contains(':'));

        let fresh = fingerprint(&base_input());
        assert!(is_current(&stored, &fresh, now));
        assert!(!is_current(
            &stored,
            &fresh,
            now + chrono::Duration::hours(2)
        ));
    }

    #[test]
    fn test_mismatched_digest_never_matches() {
        let mut other = base_input();
        other.body = "Different".to_string();
        assert!(!is_current(
            &fingerprint(&base_input()),
            &fingerprint(&other),
            Utc::now()
        ));
    }
}
