/// Temporary errors are retried with backoff; permanent ones terminate the
/// message immediately (spec.md §4.5/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Temporary,
    Permanent,
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "421",
    "450",
    "451",
    "452",
    "throttl",
    "try again",
    "temporarily unavailable",
    "connection refused",
    "connection reset",
    "timeout",
];

const PERMANENT_PATTERNS: &[&str] = &[
    "wrong_version_number",
    "certificate verify failed",
    "certificate_unknown",
    "unknown_ca",
    "certificate has expired",
    "self signed certificate",
    "ssl handshake",
    "530",
    "534",
    "535",
    "auth",
    "authentication failed",
];

/// Classifies a failed SMTP attempt. `smtp_code`, if known, takes priority:
/// 4xx is temporary, 5xx is permanent. Otherwise the message is
/// substring-matched against the transient list, then the permanent list,
/// in that order; unmatched errors default to temporary (spec.md §4.5 step
/// 6, §7 "Classification heuristic").
pub fn classify(smtp_code: Option<u16>, message: &str) -> Outcome {
    if let Some(code) = smtp_code {
        if (400..500).contains(&code) {
            return Outcome::Temporary;
        }
        if (500..600).contains(&code) {
            return Outcome::Permanent;
        }
    }

    let lower = message.to_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Outcome::Temporary;
    }
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Outcome::Permanent;
    }
    Outcome::Temporary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_4xx_is_temporary() {
        assert_eq!(classify(Some(450), "deferred"), Outcome::Temporary);
    }

    #[test]
    fn smtp_5xx_is_permanent() {
        assert_eq!(classify(Some(550), "no such user"), Outcome::Permanent);
    }

    #[test]
    fn transient_pattern_match() {
        assert_eq!(classify(None, "Connection timed out"), Outcome::Temporary);
        assert_eq!(
            classify(None, "Service is throttling you"),
            Outcome::Temporary
        );
    }

    #[test]
    fn permanent_pattern_match() {
        assert_eq!(
            classify(None, "ssl handshake failure"),
            Outcome::Permanent
        );
        assert_eq!(
            classify(None, "535 Authentication failed"),
            Outcome::Permanent
        );
    }

    #[test]
    fn unknown_defaults_to_temporary() {
        assert_eq!(classify(None, "something weird happened"), Outcome::Temporary);
    }

    #[test]
    fn transient_checked_before_permanent() {
        // "auth" appears in the permanent list; an unrelated transient
        // pattern earlier in the message must still win.
        assert_eq!(
            classify(None, "connection reset while authenticating"),
            Outcome::Temporary
        );
    }
}
