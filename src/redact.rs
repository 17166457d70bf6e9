//! Scrubs secrets from text before it leaves the process.

use crate::static_lazy_lock;

use regex::Regex;

/// The replacement for every scrubbed secret.
pub const MASK: &str = "***";

static_lazy_lock! {
    GITHUB_TOKEN_PATTERN: Option<Regex> =
        Regex::new(r"\b(?:github_pat_[A-Za-z0-9_]{20,}|gh[pousr]_[A-Za-z0-9]{20,})").ok();
}

/// Replaces `secret` and anything shaped like a GitHub token in `text` with [`MASK`].
pub fn scrub(text: &str, secret: Option<&str>) -> String {
    let text = match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, MASK),
        _ => text.to_owned(),
    };

    match &*GITHUB_TOKEN_PATTERN {
        Some(pattern) => pattern.replace_all(&text, MASK).into_owned(),
        None => text,
    }
}
