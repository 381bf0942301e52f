//! The iCloud-specific [`AuthFlowDriver`] over the CDP browser layer.
//!
//! Everything provider-shaped lives here: URLs, selectors, auth-frame URL
//! fragments, and the per-step polling budgets and settle delays. The
//! budgets are heterogeneous on purpose -- field presence resolves in under
//! a second, the password field is gated on server-side validation of the
//! Apple ID, the second-factor UI waits on a push to a companion device,
//! and the trust cookie can take tens of seconds to materialize.
//!
//! The auth document is re-resolved before every element lookup: the
//! provider swaps frames between steps, and any reference held across an
//! operator prompt is assumed stale.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use icauth_browser::{BrowserDriver, BrowserError, ChromeSession, NodeId};
use icauth_core::cookies::{format_cookies_array, TRUST_COOKIE_NAME};
use icauth_core::{poll_until, AuthFlowDriver, AuthResult, FlowError, PollBudget};

const ICLOUD_URL: &str = "https://www.icloud.com";
const ACCOUNT_LOGIN_PATH: &str = "/accountLogin";

const SIGN_IN_BUTTON_SELECTOR: &str = ".sign-in-button";
const APPLE_ID_FIELD_SELECTOR: &str = "#account_name_text_field";
const PASSWORD_FIELD_SELECTOR: &str = "#password_text_field";
// The provider renders one of several code-input variants.
const TWO_FA_INPUT_SELECTOR: &str = "input[name='code'], input[data-mode='number'], input.digit-input, input[inputmode='numeric'], input[autocomplete='one-time-code'], input[type='number'], input[type='tel']";
const TRUST_BUTTON_SELECTOR: &str = "button#trust-browser, button[name='trust'], button[data-mode='trust']";

const AUTH_FRAME_URL_FRAGMENTS: &[&str] = &["idmsa.apple.com", "appleid"];
const PROVIDER_COOKIE_URLS: &[&str] = &[
    "https://www.icloud.com",
    "https://idmsa.apple.com",
    "https://apple.com",
];

const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_FRAME_SETTLE: Duration = Duration::from_secs(6);
const POST_APPLE_ID_SETTLE: Duration = Duration::from_secs(3);
const POST_PASSWORD_SETTLE: Duration = Duration::from_secs(5);
const PRE_ENTER_PAUSE: Duration = Duration::from_secs(1);
const POST_TWO_FA_SETTLE: Duration = Duration::from_secs(3);
const POST_TRUST_SETTLE: Duration = Duration::from_secs(2);

const SIGN_IN_BUTTON_BUDGET: PollBudget = PollBudget::new(30, Duration::from_millis(500));
const APPLE_ID_BUDGET: PollBudget = PollBudget::new(20, Duration::from_millis(500));
const PASSWORD_BUDGET: PollBudget = PollBudget::new(30, Duration::from_millis(500));
const TWO_FA_BUDGET: PollBudget = PollBudget::new(20, Duration::from_secs(1));
const TWO_FA_RELOCATE_BUDGET: PollBudget = PollBudget::new(5, Duration::from_millis(500));
const TRUST_COOKIE_BUDGET: PollBudget = PollBudget::new(60, Duration::from_secs(2));

const TYPE_DELAY: Duration = Duration::from_millis(50);
const TWO_FA_TYPE_DELAY: Duration = Duration::from_millis(200);

const SNAP_AFTER_SIGN_IN_CLICK: &str = "/tmp/icloud-auth-01-after-signin-click.png";
const SNAP_NO_SIGN_IN_BUTTON: &str = "/tmp/icloud-auth-01-no-signin-button.png";
const SNAP_NO_APPLE_ID_FIELD: &str = "/tmp/icloud-auth-02-no-appleid-field.png";
const SNAP_AFTER_APPLE_ID: &str = "/tmp/icloud-auth-03-after-appleid.png";
const SNAP_NO_PASSWORD_FIELD: &str = "/tmp/icloud-auth-04-no-password-field.png";
const SNAP_AFTER_PASSWORD: &str = "/tmp/icloud-auth-05-after-password.png";
const SNAP_TWO_FA_SCREEN: &str = "/tmp/icloud-auth-07-2fa-screen.png";
const SNAP_TWO_FA_NOT_FOUND: &str = "/tmp/icloud-auth-07-2fa-not-found.png";
const SNAP_AFTER_TWO_FA: &str = "/tmp/icloud-auth-08-after-2fa.png";
const SNAP_TRUST_COOKIE_TIMEOUT: &str = "/tmp/icloud-auth-09-trust-cookie-timeout.png";

/// Drives a real headless Chrome through the iCloud sign-in flow.
pub struct IcloudDriver {
    debug: bool,
    chrome: Option<ChromeSession>,
    browser: Option<BrowserDriver>,
}

impl IcloudDriver {
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            chrome: None,
            browser: None,
        }
    }

    fn browser(&self) -> Result<&BrowserDriver, FlowError> {
        self.browser
            .as_ref()
            .ok_or_else(|| FlowError::Automation("browser not launched".to_string()))
    }

    /// The document hosting the auth UI right now: the matching embedded
    /// document when one exists, the top-level document otherwise.
    async fn auth_document(&self) -> Result<NodeId, BrowserError> {
        let browser = match self.browser.as_ref() {
            Some(b) => b,
            None => {
                return Err(BrowserError::Protocol {
                    detail: "browser not launched".to_string(),
                })
            }
        };
        match browser.find_frame_document(AUTH_FRAME_URL_FRAGMENTS).await? {
            Some(node) => Ok(node),
            None => browser.document_root().await,
        }
    }

    /// One polling attempt: re-resolve the auth document, then look for the
    /// selector inside it. Transient CDP errors (detached frames, swapped
    /// documents) count as "not found yet".
    async fn locate_in_auth_document(&self, selector: &str) -> Option<NodeId> {
        let root = match self.auth_document().await {
            Ok(root) => root,
            Err(e) => {
                tracing::trace!(error = %e, "auth document lookup failed, will re-poll");
                return None;
            }
        };
        let browser = self.browser.as_ref()?;
        match browser.query_selector_within(root, selector).await {
            Ok(found) => found,
            Err(e) => {
                tracing::trace!(error = %e, selector, "selector lookup failed, will re-poll");
                None
            }
        }
    }

    /// Write a page screenshot to `path`, best-effort: a failed capture is
    /// logged and never masks the step error it decorates.
    async fn snapshot(&self, path: &str) -> Option<PathBuf> {
        let browser = self.browser.as_ref()?;
        let bytes = match browser.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, path, "failed to capture diagnostic screenshot");
                return None;
            }
        };
        match tokio::fs::write(path, bytes).await {
            Ok(()) => Some(PathBuf::from(path)),
            Err(e) => {
                tracing::warn!(error = %e, path, "failed to write diagnostic screenshot");
                None
            }
        }
    }

    /// Debug-mode checkpoint snapshot.
    async fn checkpoint(&self, path: &str) {
        if !self.debug {
            return;
        }
        if self.snapshot(path).await.is_some() {
            tracing::debug!(path, "checkpoint screenshot written");
        }
    }

    async fn fill_and_commit(&self, node: NodeId, text: &str, key_delay: Duration) -> Result<(), FlowError> {
        let browser = self.browser()?;
        browser.click_node(node).await.map_err(automation)?;
        browser
            .type_into_node(node, text, key_delay)
            .await
            .map_err(automation)?;
        browser.press_enter().await.map_err(automation)?;
        Ok(())
    }

    /// Click the "trust this browser" affirmation if it is on screen.
    /// Absence is not an error; some accounts skip the prompt entirely.
    async fn click_trust_button_if_present(&self) -> Result<(), FlowError> {
        let browser = self.browser()?;

        if let Ok(root) = self.auth_document().await {
            if let Ok(Some(button)) = browser.query_selector_within(root, TRUST_BUTTON_SELECTOR).await {
                tracing::info!("clicking trust button");
                browser.click_node(button).await.map_err(automation)?;
                return Ok(());
            }
        }

        // Selector miss: fall back to matching the button text across the
        // page and its same-origin frames.
        let clicked = browser
            .evaluate(TRUST_BUTTON_TEXT_FALLBACK_JS)
            .await
            .map_err(automation)?;
        if clicked.as_bool() == Some(true) {
            tracing::info!("clicked trust button via text match");
        } else {
            tracing::info!("trust button not found, proceeding anyway");
        }
        Ok(())
    }
}

const TRUST_BUTTON_TEXT_FALLBACK_JS: &str = r#"(() => {
  const docs = [document];
  for (const frame of document.querySelectorAll('iframe')) {
    try { if (frame.contentDocument) docs.push(frame.contentDocument); } catch (e) {}
  }
  for (const doc of docs) {
    const button = Array.from(doc.querySelectorAll('button'))
      .find(b => (b.textContent || '').trim() === 'Trust');
    if (button) { button.click(); return true; }
  }
  return false;
})()"#;

#[async_trait]
impl AuthFlowDriver for IcloudDriver {
    async fn launch(&mut self) -> Result<(), FlowError> {
        let binary = icauth_browser::find_chrome().map_err(automation)?;
        let chrome = ChromeSession::launch(&binary, STEALTH_USER_AGENT)
            .await
            .map_err(automation)?;
        let mut browser = BrowserDriver::connect(&chrome.ws_url).await.map_err(automation)?;

        browser.set_user_agent(STEALTH_USER_AGENT).await.map_err(automation)?;
        // One-time rule: force the extended/remember-session flag into the
        // sign-in request body.
        browser
            .rewrite_request_body(ACCOUNT_LOGIN_PATH, json!({ "extended_login": true }))
            .await
            .map_err(automation)?;

        self.chrome = Some(chrome);
        self.browser = Some(browser);
        Ok(())
    }

    async fn navigate_to_sign_in(&mut self) -> Result<(), FlowError> {
        self.browser()?.navigate(ICLOUD_URL).await.map_err(automation)?;

        if let Some(browser) = self.browser.as_mut() {
            // The SPA can fire its load event before or long after the
            // sign-in affordance exists; the button poll below is the
            // authoritative wait.
            if let Err(e) = browser.wait_until_loaded(PAGE_LOAD_TIMEOUT).await {
                tracing::debug!(error = %e, "load event not observed, polling for sign-in button anyway");
            }
        }

        let this = &*self;
        let button = poll_until(SIGN_IN_BUTTON_BUDGET, || async move {
            let browser = this.browser.as_ref()?;
            browser.query_selector(SIGN_IN_BUTTON_SELECTOR).await.ok().flatten()
        })
        .await;

        let Some(button) = button else {
            let snapshot = self.snapshot(SNAP_NO_SIGN_IN_BUTTON).await;
            return Err(FlowError::SignInButtonNotFound { snapshot });
        };

        self.browser()?.click_node(button).await.map_err(automation)?;

        // Frames may not exist immediately after the click.
        tokio::time::sleep(AUTH_FRAME_SETTLE).await;
        self.checkpoint(SNAP_AFTER_SIGN_IN_CLICK).await;
        Ok(())
    }

    async fn enter_apple_id(&mut self, apple_id: &str) -> Result<(), FlowError> {
        let this = &*self;
        let field = poll_until(APPLE_ID_BUDGET, || {
            this.locate_in_auth_document(APPLE_ID_FIELD_SELECTOR)
        })
        .await;

        let Some(field) = field else {
            let snapshot = self.snapshot(SNAP_NO_APPLE_ID_FIELD).await;
            return Err(FlowError::AppleIdFieldNotFound { snapshot });
        };

        self.fill_and_commit(field, apple_id, TYPE_DELAY).await?;

        tokio::time::sleep(POST_APPLE_ID_SETTLE).await;
        self.checkpoint(SNAP_AFTER_APPLE_ID).await;
        Ok(())
    }

    async fn enter_password(&mut self, password: &str) -> Result<(), FlowError> {
        // The field exists in the DOM before it is interactable; the
        // provider flips its disabled state only after validating the
        // Apple ID server-side. Present-but-disabled is "not found yet".
        let this = &*self;
        let field = poll_until(PASSWORD_BUDGET, || async move {
            let node = this.locate_in_auth_document(PASSWORD_FIELD_SELECTOR).await?;
            let browser = this.browser.as_ref()?;
            let attrs = browser.attributes(node).await.ok()?;
            password_field_enabled(&attrs).then_some(node)
        })
        .await;

        let Some(field) = field else {
            let snapshot = self.snapshot(SNAP_NO_PASSWORD_FIELD).await;
            return Err(FlowError::PasswordFieldNeverEnabled { snapshot });
        };

        self.fill_and_commit(field, password, TYPE_DELAY).await?;

        tokio::time::sleep(POST_PASSWORD_SETTLE).await;
        self.checkpoint(SNAP_AFTER_PASSWORD).await;
        Ok(())
    }

    async fn check_two_factor(&mut self) -> Result<bool, FlowError> {
        let this = &*self;
        let found = poll_until(TWO_FA_BUDGET, || {
            this.locate_in_auth_document(TWO_FA_INPUT_SELECTOR)
        })
        .await;

        if found.is_some() {
            self.checkpoint(SNAP_TWO_FA_SCREEN).await;
            Ok(true)
        } else {
            self.checkpoint(SNAP_TWO_FA_NOT_FOUND).await;
            tracing::warn!("no second-factor input found, assuming none required");
            Ok(false)
        }
    }

    async fn submit_two_factor_code(&mut self, code: &str) -> Result<(), FlowError> {
        // The operator prompt took arbitrary real time; the reference from
        // check_two_factor is stale by now, so locate the input afresh.
        let this = &*self;
        let field = poll_until(TWO_FA_RELOCATE_BUDGET, || {
            this.locate_in_auth_document(TWO_FA_INPUT_SELECTOR)
        })
        .await
        .ok_or_else(|| {
            FlowError::Automation("second-factor input disappeared before submission".to_string())
        })?;

        let browser = self.browser()?;
        browser.click_node(field).await.map_err(automation)?;
        browser
            .type_into_node(field, code, TWO_FA_TYPE_DELAY)
            .await
            .map_err(automation)?;
        tokio::time::sleep(PRE_ENTER_PAUSE).await;
        browser.press_enter().await.map_err(automation)?;

        tokio::time::sleep(POST_TWO_FA_SETTLE).await;
        self.checkpoint(SNAP_AFTER_TWO_FA).await;

        self.click_trust_button_if_present().await?;
        tokio::time::sleep(POST_TRUST_SETTLE).await;
        Ok(())
    }

    async fn wait_for_result(&mut self) -> Result<AuthResult, FlowError> {
        // The slowest step by far: coarse interval, long budget.
        let this = &*self;
        let result = poll_until(TRUST_COOKIE_BUDGET, || async move {
            let browser = this.browser.as_ref()?;
            let cookies = match browser.cookies(PROVIDER_COOKIE_URLS).await {
                Ok(cookies) => cookies,
                Err(e) => {
                    tracing::trace!(error = %e, "cookie read failed, will re-poll");
                    return None;
                }
            };
            let trust_token = cookies
                .iter()
                .find(|c| c.name == TRUST_COOKIE_NAME)
                .map(|c| c.value.clone())?;

            let pairs: Vec<String> = cookies.iter().map(|c| c.to_pair()).collect();
            Some(AuthResult {
                trust_token,
                cookies: format_cookies_array(&pairs),
            })
        })
        .await;

        match result {
            Some(result) => {
                tracing::info!("trust cookie found");
                Ok(result)
            }
            None => {
                let snapshot = self.snapshot(SNAP_TRUST_COOKIE_TIMEOUT).await;
                Err(FlowError::TrustCookieTimeout { snapshot })
            }
        }
    }

    async fn close(&mut self) -> Result<(), FlowError> {
        self.browser = None;
        if let Some(chrome) = self.chrome.take() {
            if let Err(e) = chrome.close().await {
                tracing::warn!(error = %e, "failed to close Chrome session");
            }
        }
        Ok(())
    }
}

/// Enabled predicate for the password field: present is not enough, the
/// provider keeps it untabbable (and sometimes disabled) until the Apple ID
/// has been validated.
fn password_field_enabled(attrs: &HashMap<String, String>) -> bool {
    if attrs.contains_key("disabled") {
        return false;
    }
    attrs.get("tabindex").map(String::as_str) != Some("-1")
}

fn automation(error: BrowserError) -> FlowError {
    FlowError::Automation(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn password_field_with_normal_tabindex_is_enabled() {
        assert!(password_field_enabled(&attrs(&[("tabindex", "0")])));
        assert!(password_field_enabled(&attrs(&[("id", "password_text_field")])));
    }

    #[test]
    fn untabbable_password_field_is_not_ready() {
        assert!(!password_field_enabled(&attrs(&[("tabindex", "-1")])));
    }

    #[test]
    fn disabled_password_field_is_not_ready() {
        assert!(!password_field_enabled(&attrs(&[
            ("tabindex", "0"),
            ("disabled", ""),
        ])));
    }

    #[test]
    fn snapshot_paths_are_fixed_well_known_locations() {
        for path in [
            SNAP_NO_SIGN_IN_BUTTON,
            SNAP_NO_APPLE_ID_FIELD,
            SNAP_NO_PASSWORD_FIELD,
            SNAP_TRUST_COOKIE_TIMEOUT,
        ] {
            assert!(Path::new(path).starts_with("/tmp"));
            assert!(path.ends_with(".png"));
        }
    }
}
