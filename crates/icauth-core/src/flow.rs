//! The authentication flow state machine.
//!
//! Drives an abstract [`AuthFlowDriver`] through the fixed forward sequence
//! of sign-in steps: collect credentials, launch, reach the sign-in page,
//! submit identifier and password, branch on an optional second-factor
//! challenge, then wait for the trust cookie. There are no backward
//! transitions and no cross-step retries; each step polls internally within
//! its own budget and a failed step terminates the run.
//!
//! The browser session is a scoped resource: once `launch` has been
//! attempted, `close` runs on every exit path, with close-time errors logged
//! and swallowed so they never mask the primary failure.

use async_trait::async_trait;

use crate::error::FlowError;

/// Operator credentials, held in memory for the duration of one run.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub apple_id: String,
    pub password: String,
}

/// The harvested session: the trust cookie's value plus the full cookie
/// jar serialized as a `Cookie:` header (the sync tool needs every session
/// cookie, not just the trust cookie).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub trust_token: String,
    pub cookies: String,
}

/// The capability set the state machine drives. Implemented by the real
/// CDP-backed driver and by scripted fakes in tests.
#[async_trait]
pub trait AuthFlowDriver: Send {
    async fn launch(&mut self) -> Result<(), FlowError>;
    async fn navigate_to_sign_in(&mut self) -> Result<(), FlowError>;
    async fn enter_apple_id(&mut self, apple_id: &str) -> Result<(), FlowError>;
    async fn enter_password(&mut self, password: &str) -> Result<(), FlowError>;
    /// Returns whether a second-factor challenge is on screen. Absence is
    /// not an error.
    async fn check_two_factor(&mut self) -> Result<bool, FlowError>;
    async fn submit_two_factor_code(&mut self, code: &str) -> Result<(), FlowError>;
    async fn wait_for_result(&mut self) -> Result<AuthResult, FlowError>;
    async fn close(&mut self) -> Result<(), FlowError>;
}

/// Source of operator input. Both prompts are blocking, single-shot calls;
/// the flow never retries them.
#[async_trait]
pub trait AuthPrompter: Send {
    async fn credentials(&mut self) -> Result<Credentials, FlowError>;
    async fn two_factor_code(&mut self) -> Result<String, FlowError>;
}

/// Run one authentication flow to completion.
///
/// Credential validation happens before any browser call; from `launch`
/// onward, `close` is attempted exactly once regardless of outcome.
pub async fn run_auth_flow<D, P>(driver: &mut D, prompter: &mut P) -> Result<AuthResult, FlowError>
where
    D: AuthFlowDriver + ?Sized,
    P: AuthPrompter + ?Sized,
{
    let Credentials { apple_id, password } = prompter.credentials().await?;

    if apple_id.is_empty() {
        return Err(FlowError::EmptyAppleId);
    }
    if password.is_empty() {
        return Err(FlowError::EmptyPassword);
    }

    let result = drive_session(driver, prompter, &apple_id, &password).await;

    if let Err(close_err) = driver.close().await {
        tracing::warn!(error = %close_err, "browser close failed");
    }

    result
}

async fn drive_session<D, P>(
    driver: &mut D,
    prompter: &mut P,
    apple_id: &str,
    password: &str,
) -> Result<AuthResult, FlowError>
where
    D: AuthFlowDriver + ?Sized,
    P: AuthPrompter + ?Sized,
{
    tracing::info!("launching browser");
    driver.launch().await?;

    tracing::info!("navigating to sign-in page");
    driver.navigate_to_sign_in().await?;

    tracing::info!("entering Apple ID");
    driver.enter_apple_id(apple_id).await?;

    tracing::info!("entering password");
    driver.enter_password(password).await?;

    tracing::info!("checking for a second-factor challenge");
    if driver.check_two_factor().await? {
        tracing::info!("two-factor authentication required");
        let code = prompter.two_factor_code().await?;
        if code.is_empty() {
            return Err(FlowError::EmptyTwoFactorCode);
        }

        tracing::info!("submitting two-factor code");
        driver.submit_two_factor_code(&code).await?;
    }

    tracing::info!("waiting for authentication to complete");
    driver.wait_for_result().await
}
