//! Assembly of the harvested session into its two delivery forms.

use crate::config::{build_rclone_command, update_rclone_config_content};
use crate::flow::AuthResult;

/// What the caller should do with a harvested session: write the patched
/// config when one could be produced, otherwise present the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrateOutcome {
    /// The `rclone config update` invocation equivalent to the patch.
    pub rclone_command: String,
    /// Patched config content, when an existing config contained the
    /// target section.
    pub updated_config: Option<String>,
}

/// Turn an [`AuthResult`] into a config patch and/or command line for the
/// named remote.
///
/// `existing_config` is `None` when no config file exists; a present config
/// lacking the target section also yields no patch (the patcher returns the
/// content unchanged, which is not worth writing back).
pub fn assemble_outcome(
    result: &AuthResult,
    existing_config: Option<&str>,
    remote: &str,
) -> OrchestrateOutcome {
    let rclone_command = build_rclone_command(&result.cookies, &result.trust_token, remote);
    let updated_config = existing_config.and_then(|content| {
        let patched =
            update_rclone_config_content(content, &result.cookies, &result.trust_token, remote);
        (patched != content).then_some(patched)
    });

    OrchestrateOutcome {
        rclone_command,
        updated_config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> AuthResult {
        AuthResult {
            trust_token: "T1".to_string(),
            cookies: "S=1; X-APPLE-WEBAUTH-HSA-TRUST=T1".to_string(),
        }
    }

    #[test]
    fn builds_command_and_patch_when_section_present() {
        let config = "[iclouddrive]\ntype = iclouddrive\ncookies = old\ntrust_token = old\n";
        let outcome = assemble_outcome(&sample_result(), Some(config), "iclouddrive");

        assert_eq!(
            outcome.rclone_command,
            "rclone config update iclouddrive cookies='S=1; X-APPLE-WEBAUTH-HSA-TRUST=T1' trust_token='T1'"
        );
        let updated = outcome.updated_config.expect("patch expected");
        assert!(updated.contains("cookies = S=1; X-APPLE-WEBAUTH-HSA-TRUST=T1"));
        assert!(updated.contains("trust_token = T1"));
    }

    #[test]
    fn yields_no_patch_without_a_config_file() {
        let outcome = assemble_outcome(&sample_result(), None, "iclouddrive");
        assert_eq!(outcome.updated_config, None);
        assert!(outcome.rclone_command.contains("trust_token='T1'"));
    }

    #[test]
    fn yields_no_patch_when_section_absent() {
        let outcome = assemble_outcome(&sample_result(), Some("[other]\ntype = s3\n"), "iclouddrive");
        assert_eq!(outcome.updated_config, None);
    }

    #[test]
    fn targets_the_requested_remote() {
        let config = "[work-icloud]\ntype = iclouddrive\n";
        let outcome = assemble_outcome(&sample_result(), Some(config), "work-icloud");
        assert!(outcome.rclone_command.contains("update work-icloud"));
        assert!(outcome.updated_config.is_some());
    }
}
