//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

// ── Provider errors ───────────────────────────────────────────────────────────

/// Errors raised while validating or classifying a provider configuration.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider '{0}' not found. Place its manifest at providers/{0}/provider.yaml in the context directory.")]
    NotFound(String),

    #[error(
        "Provider '{name}' declares both a create command and proxy commands.\n\n\
         A provider is either a machine provider or a proxy provider, never both."
    )]
    AmbiguousKind { name: String },

    #[error("Provider '{name}' has no '{verb}' command")]
    MissingCommand { name: String, verb: String },

    #[error("Workspace '{workspace}' references machine '{machine}' which does not exist")]
    MissingMachine { workspace: String, machine: String },

    #[error("Invalid provider name '{0}': must match ^[a-z0-9]([a-z0-9-]*[a-z0-9])?$")]
    InvalidName(String),
}

// ── Workspace errors ──────────────────────────────────────────────────────────

/// Errors related to workspace lifecycle and identity.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace '{0}' not found. Run 'berth up {0}' to create it.")]
    NotFound(String),

    #[error("Workspace '{0}' is stopped. Run 'berth up {0}' to resume.")]
    Stopped(String),

    #[error("Invalid workspace ID: {0}")]
    InvalidId(String),
}

// ── Lock errors ───────────────────────────────────────────────────────────────

/// Errors from the cross-process advisory lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "Timed out waiting for the lock on {resource} after {waited_secs}s.\n\n\
         Another berth process is operating on it. Retry once that finishes."
    )]
    Timeout { resource: String, waited_secs: u64 },

    #[error("Cannot create lock file for {resource}: {source}")]
    Create {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Status errors ─────────────────────────────────────────────────────────────

/// Errors parsing a provider-reported status.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Provider returned unknown status '{0}' (expected NotFound, Stopped, Busy or Running)")]
    Unknown(String),

    #[error("Provider returned an empty status response")]
    Empty,

    #[error("Malformed status response from provider: {0}")]
    Malformed(String),
}

// ── Download errors ───────────────────────────────────────────────────────────

/// Errors from binary resolution and download.
///
/// `is_permanent()` gates the retry loop: permanent failures are surfaced
/// immediately and any partial artifact is deleted first.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download failed: HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error(
        "Checksum mismatch for {path}.\n\n  expected: {expected}\n  actual:   {actual}\n\n\
         The artifact was deleted. This may indicate a corrupted upload or tampering."
    )]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Download of {url} timed out")]
    Timeout { url: String },

    #[error("No binary declared for platform {os}/{arch} under '{name}'")]
    NoPlatformMatch {
        name: String,
        os: String,
        arch: String,
    },

    #[error("Binary '{name}' points at '{path}' which does not exist")]
    MissingLocal { name: String, path: String },

    #[error("Archive {archive} does not contain '{member}'")]
    MissingArchiveMember { archive: String, member: String },

    #[error("Download failed: {0}")]
    Transport(String),
}

impl DownloadError {
    /// Whether retrying can possibly succeed.
    ///
    /// Checksum mismatches and 4xx HTTP statuses (except 408 and 429) are
    /// permanent: re-fetching the same bytes yields the same failure.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Http { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            Self::ChecksumMismatch { .. }
            | Self::NoPlatformMatch { .. }
            | Self::MissingLocal { .. }
            | Self::MissingArchiveMember { .. } => true,
            Self::Timeout { .. } | Self::Transport(_) => false,
        }
    }
}

// ── Option errors ─────────────────────────────────────────────────────────────

/// Errors validating provider option assignments.
#[derive(Debug, Error)]
pub enum OptionError {
    #[error("Invalid option assignment '{0}': expected KEY=VALUE")]
    Malformed(String),

    #[error("Unknown option: {key}\n\nValid options: {valid}")]
    UnknownKey { key: String, valid: String },

    #[error("Required option '{key}' is not set and has no default")]
    MissingRequired { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_is_permanent() {
        let err = DownloadError::ChecksumMismatch {
            path: "/tmp/x".into(),
            expected: "abc".into(),
            actual: "def".into(),
        };
        assert!(err.is_permanent());
    }

    #[test]
    fn http_4xx_is_permanent_except_retryable_codes() {
        let http = |status| DownloadError::Http {
            status,
            url: "https://example.com/bin".into(),
        };
        assert!(http(404).is_permanent());
        assert!(http(403).is_permanent());
        assert!(!http(408).is_permanent());
        assert!(!http(429).is_permanent());
        assert!(!http(500).is_permanent());
        assert!(!http(503).is_permanent());
    }

    #[test]
    fn transport_and_timeout_are_transient() {
        assert!(
            !DownloadError::Transport("connection reset".into()).is_permanent()
        );
        assert!(
            !DownloadError::Timeout {
                url: "https://example.com".into()
            }
            .is_permanent()
        );
    }
}
