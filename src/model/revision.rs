//! Revision metadata: PR details parsed from a merge commit summary.
//!
//! The summary comes from the source-control integration as free text, e.g.
//! `Merge pull request #42 from alice/feature-x Add widget`. Extraction is
//! positional:
//!
//! - token 5 (space separated) is `<author>/<branch>`
//! - the PR number runs from the first `#` to the next space
//! - the PR title is everything after the first occurrence of the branch
//!
//! Anything richer than that belongs in a replacement for [`parse_summary`],
//! not in the update rules.

use serde::{Deserialize, Serialize};

/// Errors raised when a summary doesn't have the expected shape.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RevisionError {
    #[error("revision summary has {0} tokens, expected at least 6")]
    TooFewTokens(usize),

    #[error("revision summary token {0:?} is not <author>/<branch>")]
    MissingBranch(String),

    #[error("revision summary has no PR number")]
    MissingPullRequest,
}

/// Parsed PR metadata for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub author: String,
    pub branch: String,
    pub pr_number: String,
    pub pr_title: String,
    pub pr_url: Option<String>,
}

/// Parse a revision summary into PR metadata.
pub fn parse_summary(summary: &str, url: Option<&str>) -> Result<RevisionInfo, RevisionError> {
    let summary = summary.replace('\n', " ");

    let tokens: Vec<&str> = summary.split(' ').collect();
    let ref_token = tokens
        .get(5)
        .ok_or(RevisionError::TooFewTokens(tokens.len()))?;

    let (author, branch) = ref_token
        .split_once('/')
        .filter(|(author, branch)| !author.is_empty() && !branch.is_empty())
        .ok_or_else(|| RevisionError::MissingBranch((*ref_token).to_string()))?;

    let pr_number = summary
        .split_once('#')
        .map(|(_, rest)| rest.split(' ').next().unwrap_or_default())
        .filter(|n| !n.is_empty())
        .ok_or(RevisionError::MissingPullRequest)?;

    let pr_title = summary
        .split_once(branch)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();

    Ok(RevisionInfo {
        author: author.to_string(),
        branch: branch.to_string(),
        pr_number: pr_number.to_string(),
        pr_title: pr_title.to_string(),
        pr_url: url.filter(|u| !u.is_empty()).map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_merge_commit_summary() {
        let info =
            parse_summary("Merge pull request #42 from alice/feature-x Add widget", None).unwrap();

        assert_eq!(info.author, "alice");
        assert_eq!(info.branch, "feature-x");
        assert_eq!(info.pr_number, "42");
        assert_eq!(info.pr_title, "Add widget");
        assert_eq!(info.pr_url, None);
    }

    #[test]
    fn newlines_count_as_spaces() {
        let info = parse_summary(
            "Merge pull request #7 from bob/fix/login\n\nFix the login form",
            Some("https://github.com/acme/app/pull/7"),
        )
        .unwrap();

        assert_eq!(info.author, "bob");
        assert_eq!(info.branch, "fix/login");
        assert_eq!(info.pr_number, "7");
        assert_eq!(info.pr_title, "Fix the login form");
        assert_eq!(
            info.pr_url.as_deref(),
            Some("https://github.com/acme/app/pull/7")
        );
    }

    #[test]
    fn empty_url_is_dropped() {
        let info = parse_summary("Merge pull request #1 from a/b c", Some("")).unwrap();
        assert_eq!(info.pr_url, None);
    }

    #[test]
    fn short_summary_is_rejected() {
        let err = parse_summary("Update README.md", None).unwrap_err();
        assert_eq!(err, RevisionError::TooFewTokens(2));
    }

    #[test]
    fn token_without_slash_is_rejected() {
        let err = parse_summary("Merge pull request #3 from main into release", None).unwrap_err();
        assert_eq!(err, RevisionError::MissingBranch("main".into()));
    }

    #[test]
    fn summary_without_hash_is_rejected() {
        let err = parse_summary("Merged change 12 from repo alice/feature now", None).unwrap_err();
        assert_eq!(err, RevisionError::MissingPullRequest);
    }
}
