//! Selection among multiple configured iCloud remotes.

use crate::error::FlowError;

/// Outcome of the remote-selection flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSelection {
    pub remote_name: String,
}

/// Let the operator pick one of the configured iCloud remotes.
///
/// The selector is always consulted, even for a single candidate, so the
/// operator sees which remote is about to be rewritten; `saved_default` is
/// passed through for the selector to preselect. An empty candidate list is
/// an error -- callers with no remotes fall back to the command-line path
/// without entering this flow.
pub async fn run_remote_selection_flow<S, Fut>(
    remotes: &[String],
    saved_default: Option<&str>,
    selector: S,
) -> Result<RemoteSelection, FlowError>
where
    S: FnOnce(Vec<String>, Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<String, FlowError>>,
{
    if remotes.is_empty() {
        return Err(FlowError::NoIcloudRemotes);
    }

    let remote_name = selector(remotes.to_vec(), saved_default.map(str::to_string)).await?;
    Ok(RemoteSelection { remote_name })
}
