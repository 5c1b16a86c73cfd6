// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Custodia: on-device security core
//
// Entry point. Initialises logging and the security services, runs the
// startup checks (device trust, key rotation, forensic chain verification),
// and prints a JSON status summary.

mod services;

use std::process::ExitCode;
use std::sync::Arc;

use custodia_bridge::PlatformBridge;
use custodia_core::clock::SystemClock;
use custodia_security::ChainVerification;

use services::data_dir;
use services::security_services::SecurityServices;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Custodia starting");

    let bridge: Arc<dyn PlatformBridge> = Arc::from(custodia_bridge::platform_bridge());
    let services = match SecurityServices::init(data_dir::data_dir(), bridge, Arc::new(SystemClock))
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "security services failed to start");
            return ExitCode::FAILURE;
        }
    };

    services.on_resume();

    match services.verify_forensic_chain() {
        Ok(ChainVerification::Valid { entries }) => {
            tracing::info!(entries, "forensic chain verified");
        }
        Ok(ChainVerification::Broken {
            first_invalid,
            verdict,
            entries,
        }) => {
            tracing::warn!(first_invalid, ?verdict, entries, "forensic chain has been tampered with");
        }
        Err(e) => {
            tracing::error!(error = %e, "forensic chain could not be read");
            return ExitCode::FAILURE;
        }
    }

    let summary = services
        .status()
        .and_then(|status| serde_json::to_string_pretty(&status).map_err(Into::into));
    match summary {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "could not build status summary");
            ExitCode::FAILURE
        }
    }
}
