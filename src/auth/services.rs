use axum::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use crate::auth::dto::{AuthResponse, LoginRequest, RegisterRequest};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::MIN_PASSWORD_LEN;
use crate::auth::repo_types::User;
use crate::error::ApiError;

pub const INVALID_EMAIL: &str = "Please enter a valid email address";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// First failing rule wins, in the order the registration form checks them.
pub fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if !is_valid_email(&normalize_email(&req.email)) {
        return Err(ApiError::validation(INVALID_EMAIL));
    }
    if req.password != req.confirm_password {
        return Err(ApiError::validation("Passwords do not match."));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 6 characters."));
    }
    Ok(())
}

pub fn validate_login(req: &LoginRequest) -> Result<(), ApiError> {
    if !is_valid_email(&normalize_email(&req.email)) {
        return Err(ApiError::validation(INVALID_EMAIL));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 6 characters"));
    }
    Ok(())
}

pub fn issue_tokens(keys: &JwtKeys, user: User) -> anyhow::Result<AuthResponse> {
    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id)?,
        user: user.into(),
    })
}

pub fn reset_link(base_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", base_url.trim_end_matches('/'), token)
}

/// Delivers password reset links to users.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset_link(&self, user_id: Uuid, email: &str, link: &str) -> anyhow::Result<()>;
}

/// Writes the link to the log instead of sending mail.
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_reset_link(&self, user_id: Uuid, email: &str, link: &str) -> anyhow::Result<()> {
        info!(%user_id, %email, %link, "password reset link issued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, pw: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            full_name: "Ada Lovelace".into(),
            email: email.into(),
            password: pw.into(),
            confirm_password: confirm.into(),
        }
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@example.org"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.d"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn registration_rules_in_order() {
        let err = validate_registration(&register("bad", "x", "y")).unwrap_err();
        assert_eq!(err.to_string(), INVALID_EMAIL);

        let err = validate_registration(&register("a@b.co", "abcdef", "abcdeg")).unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match.");

        let err = validate_registration(&register("a@b.co", "abc", "abc")).unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters.");

        assert!(validate_registration(&register(" A@B.co ", "abcdef", "abcdef")).is_ok());
    }

    #[test]
    fn login_rejects_short_password() {
        let req = LoginRequest { email: "a@b.co".into(), password: "12345".into() };
        let err = validate_login(&req).unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        let req = LoginRequest { email: "a@b.co".into(), password: "123456".into() };
        assert!(validate_login(&req).is_ok());
    }

    #[test]
    fn reset_link_joins_cleanly() {
        assert_eq!(
            reset_link("http://x.test/", "tok"),
            "http://x.test/reset-password?token=tok"
        );
    }
}
