//! # Authstate (login orchestration & storage-state lifecycle)
//!
//! `authstate` logs a simulated user into a web application through an
//! Identity Provider, handles multi-factor challenges, persists the resulting
//! browser session per role and decides when that session must be renewed.
//!
//! ## Flow
//!
//! A caller asks the [`storage::StorageStateStore`] for a still-valid session
//! artifact. When none exists it resolves the role's credentials from the
//! environment ([`credentials`]), runs a login through an
//! [`provider::AuthProvider`] against an injected [`page::Page`] and saves the
//! resulting storage state. [`session::SessionManager`] wires these steps
//! together.
//!
//! ## Browser boundary
//!
//! The engine never embeds a browser. Everything it does to a page goes
//! through the [`page::Page`] trait, so any automation driver can be plugged
//! in.
//!
//! ## Identity Providers
//!
//! Keycloak, Azure AD, Okta and a generic fallback are supported out of the
//! box. Handlers are looked up by [`idp::IdpType`] in an
//! [`idp::HandlerRegistry`], which also accepts caller supplied handlers.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod idp;
pub mod logging;
pub mod page;
pub mod provider;
pub mod session;
pub mod storage;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
