// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local hostname detection

use std::env;
use std::sync::OnceLock;

use tracing::warn;

/// Environment variable overriding the detected hostname.
pub const HOSTNAME_ENV: &str = "LOGSHIP_HOSTNAME";

const FALLBACK: &str = "unknown";

/// Get the local hostname
///
/// Checked in order:
/// 1. `LOGSHIP_HOSTNAME`
/// 2. `HOSTNAME`
/// 3. the system hostname via `nix::unistd::gethostname()`
/// 4. `"unknown"`
#[must_use]
pub fn detect_hostname() -> String {
    for var in [HOSTNAME_ENV, "HOSTNAME"] {
        if let Ok(hostname) = env::var(var) {
            if !hostname.is_empty() {
                return hostname;
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => match hostname.into_string() {
            Ok(hostname) if !hostname.is_empty() => return hostname,
            Ok(_) => {}
            Err(raw) => warn!("system hostname is not valid UTF-8: {:?}", raw),
        },
        Err(e) => warn!("failed to get system hostname: {}", e),
    }

    warn!("could not determine hostname, using '{}'", FALLBACK);
    FALLBACK.to_string()
}

/// The hostname detected on first use, cached for the life of the process.
#[must_use]
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(detect_hostname)
}
