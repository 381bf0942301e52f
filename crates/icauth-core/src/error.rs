//! Error types for the authentication flow.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can terminate an authentication run.
///
/// Input-validation variants fail before (or without) touching the browser.
/// Step-timeout variants carry the path of the diagnostic screenshot taken
/// at the moment the polling budget ran out, when one could be captured.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The operator supplied an empty Apple ID.
    #[error("Apple ID must not be empty")]
    EmptyAppleId,

    /// The operator supplied an empty password.
    #[error("password must not be empty")]
    EmptyPassword,

    /// The operator supplied an empty two-factor code.
    #[error("two-factor code must not be empty")]
    EmptyTwoFactorCode,

    /// The sign-in button never appeared on the landing page.
    #[error("could not find sign-in button{}", snapshot_suffix(.snapshot))]
    SignInButtonNotFound { snapshot: Option<PathBuf> },

    /// The Apple ID input field never appeared in the auth document.
    #[error("could not find Apple ID input field{}", snapshot_suffix(.snapshot))]
    AppleIdFieldNotFound { snapshot: Option<PathBuf> },

    /// The password field stayed disabled for the whole polling budget.
    #[error("password field never became accessible{}", snapshot_suffix(.snapshot))]
    PasswordFieldNeverEnabled { snapshot: Option<PathBuf> },

    /// The trust cookie never materialized in the cookie jar.
    #[error("timed out waiting for trust cookie{}", snapshot_suffix(.snapshot))]
    TrustCookieTimeout { snapshot: Option<PathBuf> },

    /// The rclone config contains no iCloud remotes to select from.
    #[error("no iCloud remotes found in rclone config")]
    NoIcloudRemotes,

    /// Reading operator input failed.
    #[error("prompt failed: {0}")]
    Prompt(String),

    /// A browser automation step failed below the flow level
    /// (connection loss, protocol error, navigation failure).
    #[error("browser automation failed: {0}")]
    Automation(String),
}

fn snapshot_suffix(snapshot: &Option<PathBuf>) -> String {
    match snapshot {
        Some(path) => format!(" -- see {}", path.display()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_timeout_message_names_snapshot() {
        let err = FlowError::TrustCookieTimeout {
            snapshot: Some(PathBuf::from("/tmp/icloud-auth-timeout.png")),
        };
        let msg = err.to_string();
        assert!(msg.contains("trust cookie"));
        assert!(msg.contains("/tmp/icloud-auth-timeout.png"));
    }

    #[test]
    fn step_timeout_message_without_snapshot() {
        let err = FlowError::AppleIdFieldNotFound { snapshot: None };
        assert_eq!(err.to_string(), "could not find Apple ID input field");
    }
}
