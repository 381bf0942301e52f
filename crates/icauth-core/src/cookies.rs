//! Trust-cookie extraction and cookie-header (de)serialization.

/// Name of the session cookie whose presence signals that Apple has fully
/// authenticated and trusted the browser session.
pub const TRUST_COOKIE_NAME: &str = "X-APPLE-WEBAUTH-HSA-TRUST";

/// Split a `Cookie:` header into its `name=value` entries, trimming
/// whitespace and dropping empty fragments.
pub fn parse_cookie_header(header: &str) -> Vec<String> {
    header
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Find the trust cookie among `name=value` entries and return its value.
pub fn extract_trust_token(cookies: &[String]) -> Option<String> {
    let prefix = format!("{TRUST_COOKIE_NAME}=");
    cookies
        .iter()
        .find_map(|entry| entry.strip_prefix(prefix.as_str()))
        .map(str::to_string)
}

/// Join `name=value` entries back into a single `Cookie:` header value.
pub fn format_cookies_array(cookies: &[String]) -> String {
    cookies.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_and_trims_entries() {
        let cookies = parse_cookie_header("a=1; b=2;  c=3");
        assert_eq!(cookies, vec!["a=1", "b=2", "c=3"]);
    }

    #[test]
    fn parse_drops_empty_fragments() {
        assert_eq!(parse_cookie_header("a=1;; ;b=2"), vec!["a=1", "b=2"]);
        assert!(parse_cookie_header("").is_empty());
    }

    #[test]
    fn extract_returns_trust_token_value() {
        let cookies = vec![
            "S=1".to_string(),
            format!("{TRUST_COOKIE_NAME}=tok123"),
            "other=x".to_string(),
        ];
        assert_eq!(extract_trust_token(&cookies).as_deref(), Some("tok123"));
    }

    #[test]
    fn extract_returns_none_when_trust_cookie_absent() {
        let cookies = vec!["S=1".to_string(), "other=x".to_string()];
        assert_eq!(extract_trust_token(&cookies), None);
    }

    #[test]
    fn extract_does_not_match_name_prefixes() {
        let cookies = vec![format!("{TRUST_COOKIE_NAME}-EXTRA=nope")];
        assert_eq!(extract_trust_token(&cookies), None);
    }

    #[test]
    fn format_joins_with_semicolon_space() {
        let cookies = vec!["a=1".to_string(), "b=2".to_string()];
        assert_eq!(format_cookies_array(&cookies), "a=1; b=2");
    }

    #[test]
    fn format_of_empty_set_is_empty() {
        assert_eq!(format_cookies_array(&[]), "");
    }

    #[test]
    fn parse_then_format_round_trips_a_header() {
        let header = "a=1; b=2; X-APPLE-WEBAUTH-HSA-TRUST=t";
        assert_eq!(format_cookies_array(&parse_cookie_header(header)), header);
    }
}
