//! Delivery of the harvested session: rclone config write, command-line
//! fallback, and the post-patch connectivity test.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;

use icauth_core::OrchestrateOutcome;

#[cfg(unix)]
const CONFIG_FILE_MODE: u32 = 0o600;

/// Default location of the rclone config file.
pub fn rclone_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".config/rclone/rclone.conf")
}

/// Read the rclone config if it exists.
pub fn read_rclone_config(path: &Path) -> anyhow::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Write the patched rclone config back, owner-readable only.
pub fn write_rclone_config(path: &Path, content: &str) -> anyhow::Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(CONFIG_FILE_MODE))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Hand the outcome to the operator: write the patch and verify
/// connectivity when one was produced, otherwise print the equivalent
/// command to run manually.
pub fn report_outcome(
    outcome: &OrchestrateOutcome,
    config_path: &Path,
    remote: &str,
) -> anyhow::Result<()> {
    match &outcome.updated_config {
        Some(content) => {
            write_rclone_config(config_path, content)?;
            println!("\n\u{2713} {} updated.\n", config_path.display());
            test_rclone_connection(remote);
        }
        None => {
            println!("\nRun the following command to configure rclone:");
            println!("{}", outcome.rclone_command);
        }
    }
    Ok(())
}

/// Run `rclone lsd <remote>:` and report pass/fail. Best-effort: a failed
/// test never undoes the patch.
pub fn test_rclone_connection(remote: &str) {
    let target = format!("{remote}:");
    match Command::new("rclone").args(["lsd", &target]).output() {
        Ok(output) if output.status.success() => {
            println!(
                "\u{2713} Connection test passed:\n{}",
                String::from_utf8_lossy(&output.stdout)
            );
        }
        Ok(output) => {
            tracing::debug!(status = %output.status, "rclone lsd failed");
            println!("\u{2717} Connection test failed \u{2014} check the config manually.");
        }
        Err(e) => {
            tracing::debug!(error = %e, "could not invoke rclone");
            println!("\u{2717} Connection test skipped: rclone not runnable ({e}).");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rclone.conf");
        assert_eq!(read_rclone_config(&path).unwrap(), None);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rclone.conf");
        write_rclone_config(&path, "[iclouddrive]\ntype = iclouddrive\n").unwrap();
        let content = read_rclone_config(&path).unwrap().unwrap();
        assert!(content.contains("[iclouddrive]"));
    }

    #[cfg(unix)]
    #[test]
    fn written_config_is_owner_readable_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rclone.conf");
        write_rclone_config(&path, "secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn default_config_path_is_under_home() {
        let path = rclone_config_path();
        assert!(path.ends_with(".config/rclone/rclone.conf"));
    }
}
