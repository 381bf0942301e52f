//! Operator-facing console prompts.
//!
//! One [`ConsolePrompt`] is constructed in `main` and lent to the flow for
//! the whole run; stdin is a process-global, internally-locked handle, so a
//! single value is the entire lifecycle. Blocking reads run on the blocking
//! thread pool to keep the async runtime free.

use std::io::{BufRead, Write};

use async_trait::async_trait;

use icauth_core::{AuthPrompter, Credentials, FlowError};

const APPLE_ID_PROMPT: &str = "Apple ID email: ";
const PASSWORD_PROMPT: &str = "Password (will be visible): ";
const TWO_FA_PROMPT: &str = "\n2FA code (from your iPhone): ";

/// The process-wide interactive input channel.
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }

    /// Print a question and read one trimmed line from stdin. EOF yields an
    /// empty answer, which the flow's validation turns into a specific
    /// empty-input error.
    pub async fn ask(&self, question: &str) -> Result<String, FlowError> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stdout = std::io::stdout();
            stdout.write_all(question.as_bytes())?;
            stdout.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| FlowError::Prompt(format!("prompt task failed: {e}")))?
        .map_err(|e| FlowError::Prompt(e.to_string()))
    }

    /// Numbered-menu selection among the configured remotes. An empty
    /// answer picks the saved default when there is one; anything else is
    /// re-prompted until it parses as an in-range number.
    pub async fn select_remote(
        &self,
        remotes: Vec<String>,
        saved_default: Option<String>,
    ) -> Result<String, FlowError> {
        println!("\nAvailable iCloud remotes:");
        for (i, name) in remotes.iter().enumerate() {
            let marker = if Some(name.as_str()) == saved_default.as_deref() {
                " (default)"
            } else {
                ""
            };
            println!("  {}) {name}{marker}", i + 1);
        }

        let default_index = saved_default
            .as_deref()
            .and_then(|default| remotes.iter().position(|name| name == default));
        let hint = match default_index {
            Some(i) => format!(" [{}]", i + 1),
            None => String::new(),
        };

        loop {
            let answer = self.ask(&format!("\nSelect remote{hint}: ")).await?;
            if let Some(index) = parse_menu_choice(&answer, remotes.len(), default_index) {
                return Ok(remotes[index].clone());
            }
            println!("  Please enter a number between 1 and {}.", remotes.len());
        }
    }
}

#[async_trait]
impl AuthPrompter for ConsolePrompt {
    async fn credentials(&mut self) -> Result<Credentials, FlowError> {
        Ok(Credentials {
            apple_id: self.ask(APPLE_ID_PROMPT).await?,
            password: self.ask(PASSWORD_PROMPT).await?,
        })
    }

    async fn two_factor_code(&mut self) -> Result<String, FlowError> {
        self.ask(TWO_FA_PROMPT).await
    }
}

/// Resolve a menu answer to a zero-based index: empty falls back to the
/// default, otherwise a 1-based number within range.
fn parse_menu_choice(answer: &str, len: usize, default_index: Option<usize>) -> Option<usize> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return default_index;
    }
    let choice: usize = trimmed.parse().ok()?;
    (1..=len).contains(&choice).then(|| choice - 1)
}
