//! Secret-store key normalization.
//!
//! The store only accepts `[A-Z0-9_]+` keys. Anything else is uppercased
//! with non-alphanumerics collapsed to single underscores; keys that would
//! start with a digit get a `C` prefix. Credential keys follow
//! `CRED_<short_project_id>_<NAME>`.

use vision_common::short_id;

/// Normalize an arbitrary name into a store-safe key.
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_uppercase());
            last_was_underscore = false;
        } else if !last_was_underscore && !key.is_empty() {
            key.push('_');
            last_was_underscore = true;
        }
    }
    while key.ends_with('_') {
        key.pop();
    }

    if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        key.insert(0, 'C');
    }
    key
}

/// The store key for a project credential.
pub fn credential_key(project_id: &str, name: &str) -> String {
    format!(
        "CRED_{}_{}",
        normalize_key(short_id(project_id)),
        normalize_key(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_uppercased_and_collapsed() {
        assert_eq!(normalize_key("staging-login"), "STAGING_LOGIN");
        assert_eq!(normalize_key("my  weird!!name"), "MY_WEIRD_NAME");
        assert_eq!(normalize_key("already_OK_123"), "ALREADY_OK_123");
    }

    #[test]
    fn digit_leading_keys_get_a_prefix() {
        assert_eq!(normalize_key("2fa-token"), "C2FA_TOKEN");
    }

    #[test]
    fn trailing_separators_are_trimmed() {
        assert_eq!(normalize_key("name---"), "NAME");
    }

    #[test]
    fn credential_keys_use_the_short_project_id() {
        let key = credential_key("123e4567-e89b-12d3-a456-426614174000", "staging login");
        assert_eq!(key, "CRED_C123E4567_STAGING_LOGIN");
    }
}
