//! Explicit logging handle passed to engine components.
//!
//! The process-wide `tracing` subscriber is installed once by the binary
//! (`cli::start`). Components never reach for global state themselves; they
//! receive a [`Logger`] that tags every event with the component name and
//! knows whether secrets may be printed.

use tracing::{debug, error, info, warn};

const MASK: &str = "****";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logger {
    component: &'static str,
    mask_secrets: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("authstate")
    }
}

impl Logger {
    #[must_use]
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            mask_secrets: true,
        }
    }

    #[must_use]
    pub fn with_masking(mut self, mask_secrets: bool) -> Self {
        self.mask_secrets = mask_secrets;
        self
    }

    /// Same sink settings, different component tag.
    #[must_use]
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            component,
            mask_secrets: self.mask_secrets,
        }
    }

    #[must_use]
    pub fn component(&self) -> &'static str {
        self.component
    }

    #[must_use]
    pub fn masks_secrets(&self) -> bool {
        self.mask_secrets
    }

    /// Render a secret for a log line.
    #[must_use]
    pub fn mask(&self, secret: &str) -> String {
        if self.mask_secrets {
            MASK.to_string()
        } else {
            secret.to_string()
        }
    }

    pub fn debug(&self, message: &str) {
        debug!(component = self.component, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(component = self.component, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(component = self.component, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(component = self.component, "{message}");
    }
}
