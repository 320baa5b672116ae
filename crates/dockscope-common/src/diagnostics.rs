//! Heuristic classification of permission failures in free-form error text.
//!
//! Docker reports socket permission problems only as prose, so detection is
//! a case-sensitive substring match over known English phrases. Localized
//! Docker output is not recognized.

/// Phrases that identify a permission or daemon-access failure.
pub const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "Permission denied",
    "access denied",
    "Are you trying to connect to a TLS-enabled daemon without TLS?",
];

/// Short hint appended to peer-facing messages that classify as permission failures.
pub const REMEDIATION_HINT: &str =
    "hint: permission denied. Make sure this service is allowed to use the Docker daemon.";

/// Step-by-step remediation returned alongside failed history fetches.
pub const REMEDIATION_STEPS: &str = "Permission denied. Try the following:\n\
1. Mount the Docker socket: -v /var/run/docker.sock:/var/run/docker.sock\n\
2. Run the container in privileged mode: --privileged\n\
3. Add the service user to the docker group\n\
4. Restart the Docker service: sudo systemctl restart docker\n\
5. Check the permissions of /var/run/docker.sock\n\
6. Add `privileged: true` to the service in docker-compose.yml";

/// Returns whether `text` contains any known permission-failure phrase.
#[must_use]
pub fn is_permission_failure(text: &str) -> bool {
    PERMISSION_PATTERNS.iter().any(|p| text.contains(p))
}

/// Appends [`REMEDIATION_HINT`] on its own line when `message` classifies as
/// a permission failure; otherwise returns it unchanged.
#[must_use]
pub fn with_remediation_hint(message: impl Into<String>) -> String {
    let mut message = message.into();
    if is_permission_failure(&message) {
        message.push('\n');
        message.push_str(REMEDIATION_HINT);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_socket_permission_error() {
        let stderr = "permission denied while trying to connect to the Docker daemon socket \
                      at unix:///var/run/docker.sock";
        assert!(is_permission_failure(stderr));
    }

    #[test]
    fn detects_tls_daemon_rejection() {
        assert!(is_permission_failure(
            "Cannot connect. Are you trying to connect to a TLS-enabled daemon without TLS?"
        ));
    }

    #[test]
    fn ignores_unrelated_errors() {
        assert!(!is_permission_failure("Error: No such container: abc"));
    }

    #[test]
    fn match_is_case_sensitive() {
        assert!(!is_permission_failure("ACCESS DENIED"));
    }

    #[test]
    fn hint_is_appended_once_on_new_line() {
        let out = with_remediation_hint("Got permission denied");
        assert_eq!(out, format!("Got permission denied\n{REMEDIATION_HINT}"));
    }

    #[test]
    fn unrelated_message_passes_through() {
        assert_eq!(with_remediation_hint("tick"), "tick");
    }
}
