//! Failure classification (C4) — "a small, documented table of regex →
//! classification; all classifications are enumerable for tests" (§9).

use regex::Regex;
use std::sync::LazyLock;

use super::instance::FailureClass;

struct Pattern {
    regex: LazyLock<Regex>,
    class: FailureClass,
    remediation: &'static str,
}

macro_rules! pattern {
    ($re:expr, $class:expr, $remediation:expr) => {
        Pattern {
            regex: LazyLock::new(|| Regex::new($re).expect("static diagnostic regex")),
            class: $class,
            remediation: $remediation,
        }
    };
}

static PATTERNS: &[Pattern] = &[
    pattern!(
        r"(?i)modulenotfounderror|no module named|cannot find module|ModuleNotFound",
        FailureClass::MissingDependency,
        "run the sandbox's package installer against the bundle's declared dependency list"
    ),
    pattern!(
        r"(?i)address already in use|eaddrinuse|port.*(already|in use)",
        FailureClass::PortInUse,
        "the allocated port is already bound by another process; verify no stale instance is running"
    ),
    pattern!(
        r"(?i)permission denied|eacces",
        FailureClass::PermissionDenied,
        "check filesystem permissions on the install directory and entry point"
    ),
    pattern!(
        r"(?i)version.*(incompatib|mismatch)|unsupported.*(version|runtime)",
        FailureClass::LanguageRuntimeIncompatibility,
        "install or select a runtime version matching the manifest's declared constraint"
    ),
    pattern!(
        r"(?i)connection refused|could not connect|econnrefused|upstream.*(unreachable|unavailable)",
        FailureClass::UpstreamConnectFailure,
        "verify the configured upstream (LLM or MCP) endpoint is reachable from the sandbox"
    ),
];

/// Scan captured stderr against the pattern table, returning the first match
/// or `Unknown` if nothing matches.
pub fn classify(stderr: &str) -> (FailureClass, &'static str) {
    for p in PATTERNS {
        if p.regex.is_match(stderr) {
            return (p.class, p.remediation);
        }
    }
    (FailureClass::Unknown, "inspect the full captured stdio for the root cause")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_dependency() {
        let (class, _) = classify("ModuleNotFoundError: no module named 'requests'");
        assert_eq!(class, FailureClass::MissingDependency);
    }

    #[test]
    fn classifies_port_in_use() {
        let (class, _) = classify("Error: listen EADDRINUSE: address already in use :::9000");
        assert_eq!(class, FailureClass::PortInUse);
    }

    #[test]
    fn classifies_permission_denied() {
        let (class, _) = classify("bash: ./entry.sh: Permission denied");
        assert_eq!(class, FailureClass::PermissionDenied);
    }

    #[test]
    fn classifies_runtime_incompatibility() {
        let (class, _) = classify("Unsupported python version: requires >=3.11");
        assert_eq!(class, FailureClass::LanguageRuntimeIncompatibility);
    }

    #[test]
    fn classifies_upstream_connect_failure() {
        let (class, _) = classify("requests.exceptions.ConnectionError: Connection refused");
        assert_eq!(class, FailureClass::UpstreamConnectFailure);
    }

    #[test]
    fn unmatched_stderr_is_unknown() {
        let (class, _) = classify("some completely unrelated crash trace");
        assert_eq!(class, FailureClass::Unknown);
    }

    #[test]
    fn empty_stderr_is_unknown() {
        let (class, _) = classify("");
        assert_eq!(class, FailureClass::Unknown);
    }
}
