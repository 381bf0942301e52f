//! rclone config patching and iCloud remote enumeration.
//!
//! The rclone config is a line-oriented file of `[section]` headers followed
//! by `key = value` lines. Patching is scoped to the named section: keys in
//! other sections are never touched, existing `cookies`/`trust_token` lines
//! are replaced in place, missing ones are inserted once right after the
//! section header, and content without the target section is returned
//! unchanged (the caller falls back to printing the equivalent command).

const COOKIES_KEY: &str = "cookies";
const TRUST_TOKEN_KEY: &str = "trust_token";
const ICLOUD_REMOTE_TYPE: &str = "iclouddrive";

/// Build the `rclone config update` invocation equivalent to the patch.
pub fn build_rclone_command(cookies: &str, trust_token: &str, remote: &str) -> String {
    format!("rclone config update {remote} cookies='{cookies}' trust_token='{trust_token}'")
}

/// Patch the `cookies` and `trust_token` keys of the named section.
///
/// Returns the content unchanged when the section is absent.
pub fn update_rclone_config_content(
    content: &str,
    cookies: &str,
    trust_token: &str,
    remote: &str,
) -> String {
    let header = format!("[{remote}]");
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let Some(start) = lines.iter().position(|line| line.trim() == header) else {
        return content.to_string();
    };
    let end = lines[start + 1..]
        .iter()
        .position(|line| is_section_header(line))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut replaced_cookies = false;
    let mut replaced_token = false;
    for line in &mut lines[start + 1..end] {
        match key_of(line) {
            Some(COOKIES_KEY) => {
                *line = format!("{COOKIES_KEY} = {cookies}");
                replaced_cookies = true;
            }
            Some(TRUST_TOKEN_KEY) => {
                *line = format!("{TRUST_TOKEN_KEY} = {trust_token}");
                replaced_token = true;
            }
            _ => {}
        }
    }

    let mut insert_at = start + 1;
    if !replaced_cookies {
        lines.insert(insert_at, format!("{COOKIES_KEY} = {cookies}"));
        insert_at += 1;
    }
    if !replaced_token {
        lines.insert(insert_at, format!("{TRUST_TOKEN_KEY} = {trust_token}"));
    }

    let mut patched = lines.join("\n");
    if had_trailing_newline {
        patched.push('\n');
    }
    patched
}

/// Names of every section with `type = iclouddrive`, in file order.
pub fn parse_icloud_remotes(content: &str) -> Vec<String> {
    let mut remotes = Vec::new();
    let mut current: Option<&str> = None;

    for line in content.lines() {
        if let Some(name) = section_name(line) {
            current = Some(name);
        } else if let (Some(name), Some(ICLOUD_REMOTE_TYPE)) = (current, typed_value(line)) {
            remotes.push(name.to_string());
            current = None;
        }
    }
    remotes
}

/// Whether the named section exists and is an iCloud Drive remote.
pub fn validate_icloud_remote(content: &str, remote: &str) -> bool {
    parse_icloud_remotes(content).iter().any(|name| name == remote)
}

fn is_section_header(line: &str) -> bool {
    section_name(line).is_some()
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed.strip_prefix('[')?.strip_suffix(']')
}

fn key_of(line: &str) -> Option<&str> {
    line.split_once('=').map(|(key, _)| key.trim())
}

fn typed_value(line: &str) -> Option<&str> {
    let (key, value) = line.split_once('=')?;
    (key.trim() == "type").then(|| value.trim())
}
