//! Input validation for configuration values
//!
//! Checks the server URL, extension lists and stability parameters before
//! they reach the upload pipeline.

use anyhow::{bail, Result};

use crate::config::StabilityConfig;

/// Validate the upload server base URL
///
/// Expects an already normalized URL (see `config::normalize_base_url`).
pub fn validate_base_url(url: &str) -> Result<()> {
    const MAX_URL_LENGTH: usize = 2048;

    if url.trim().is_empty() {
        bail!("Server URL cannot be empty");
    }

    if url.len() > MAX_URL_LENGTH {
        bail!("Server URL too long: {} chars (max: {})", url.len(), MAX_URL_LENGTH);
    }

    if url.contains('\0') || url.contains('\n') || url.contains('\r') {
        bail!("Server URL contains control characters");
    }

    let parsed = reqwest::Url::parse(url)
        .map_err(|e| anyhow::anyhow!("Invalid server URL '{}': {}", url, e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("Unsupported URL scheme: '{}'", other),
    }

    if parsed.host_str().is_none() {
        bail!("Server URL has no host: '{}'", url);
    }

    Ok(())
}

/// Validate the API key sent as a bearer token
pub fn validate_api_key(api_key: &str) -> Result<()> {
    const MAX_KEY_LENGTH: usize = 512;

    if api_key.is_empty() {
        bail!("API key cannot be empty");
    }

    if api_key.len() > MAX_KEY_LENGTH {
        bail!("API key too long: {} chars (max: {})", api_key.len(), MAX_KEY_LENGTH);
    }

    if api_key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        bail!("API key contains whitespace or control characters");
    }

    Ok(())
}

/// Validate an extension allow-list
///
/// Entries may carry a leading dot (`.png`); they must otherwise be short
/// and alphanumeric.
pub fn validate_extensions(extensions: &[String]) -> Result<()> {
    const MAX_EXTENSIONS: usize = 100;
    const MAX_EXTENSION_LENGTH: usize = 16;

    if extensions.is_empty() {
        bail!("Extension list cannot be empty");
    }

    if extensions.len() > MAX_EXTENSIONS {
        bail!(
            "Too many extensions: {} (max: {})",
            extensions.len(),
            MAX_EXTENSIONS
        );
    }

    for ext in extensions {
        let trimmed = ext.trim().trim_start_matches('.');

        if trimmed.is_empty() {
            bail!("Extension cannot be empty");
        }

        if trimmed.len() > MAX_EXTENSION_LENGTH {
            bail!("Extension too long: '{}'", trimmed);
        }

        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("Extension contains invalid characters: '{}'", trimmed);
        }
    }

    Ok(())
}

/// Validate stability-wait parameters
pub fn validate_stability(stability: &StabilityConfig) -> Result<()> {
    if stability.max_attempts == 0 {
        bail!("Stability max_attempts must be at least 1");
    }

    if stability.required_stable_checks == 0 {
        bail!("Stability required_stable_checks must be at least 1");
    }

    if stability.required_stable_checks >= stability.max_attempts {
        bail!(
            "required_stable_checks ({}) must be smaller than max_attempts ({})",
            stability.required_stable_checks,
            stability.max_attempts
        );
    }

    for backoff in [
        &stability.small_file_backoff,
        &stability.large_file_backoff,
        &stability.lock_backoff,
    ] {
        if backoff.base_ms > backoff.max_ms {
            bail!(
                "Backoff base ({}ms) exceeds its cap ({}ms)",
                backoff.base_ms,
                backoff.max_ms
            );
        }
    }

    Ok(())
}
