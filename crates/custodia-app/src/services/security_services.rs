// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: initialises the security subsystems and exposes the
// flows the host UI drives.
//
// Every user-visible action is recorded twice: in the audit ledger (rate
// anomaly detection, signed export) and in the forensic chain (tamper-evident
// legal record).  Failed authorization checks are recorded too.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use custodia_bridge::{AuthOutcome, AuthPrompt, PlatformBridge, shared_keychain};
use custodia_core::clock::Clock;
use custodia_core::config::SecurityConfig;
use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::{ComplianceReport, StoreMode, TokenId};
use custodia_security::crypto_store::{DATA_ACCESS, DATA_MANAGEMENT};
use custodia_security::{
    AuditLedger, ChainVerification, CryptoStore, ForensicChain, ProtectionSummary, SignedExport,
    StoreLocation, TokenAuthorizer,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Permission for reading the access log.
pub const ACCESS_LOGS: &str = "ACCESS_LOGS";
/// Permission for exporting signed logs and compliance reports.
pub const EXPORT_LOGS: &str = "EXPORT_LOGS";
/// Permission for wiping all stored data.
pub const CLEAR_DATA: &str = "CLEAR_DATA";

/// File name of the forensic chain inside the data directory.
pub const FORENSIC_FILE: &str = "forensic_log_chain.json";

/// Subdirectory holding the crypto store databases.
const STORE_DIR: &str = "secure";

/// Snapshot of the security core for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub platform: String,
    pub store: ProtectionSummary,
    pub forensic_entries: usize,
    pub forensic_chain_valid: bool,
    pub audit_events: usize,
    pub active_tokens: usize,
}

/// Shared security services.
///
/// All fields are cheaply cloneable (Arc-wrapped) so that the struct can be
/// moved into closures and async blocks.
#[derive(Clone)]
pub struct SecurityServices {
    tokens: Arc<TokenAuthorizer>,
    chain: Arc<ForensicChain>,
    ledger: Arc<AuditLedger>,
    store: Arc<CryptoStore>,
    bridge: Arc<dyn PlatformBridge>,
    data_dir: PathBuf,
    config: Arc<Mutex<SecurityConfig>>,
}

#[allow(dead_code)]
impl SecurityServices {
    /// Initialise all services.  Call once at startup.
    ///
    /// Refuses to start on an untrusted device unless the config allows it.
    /// Opening the crypto store runs the key rotation check.
    #[instrument(skip_all, fields(path = %data_dir.as_ref().display()))]
    pub fn init(
        data_dir: impl AsRef<Path>,
        bridge: Arc<dyn PlatformBridge>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        // Load persisted config or use defaults
        let config = load_config(&dir).unwrap_or_default();

        if config.require_trusted_device {
            let trust = bridge.device_trust()?;
            if !trust.is_trusted() {
                let signals = trust.risk_signals().join(", ");
                error!(%signals, "refusing to start on untrusted device");
                return Err(CustodiaError::DeviceUntrusted(signals));
            }
        }

        let store = CryptoStore::initialize(
            StoreLocation::Directory(dir.join(STORE_DIR)),
            shared_keychain(Arc::clone(&bridge)),
            &config,
            Arc::clone(&clock),
        )?;
        if store.mode() == StoreMode::Fallback {
            warn!("secure storage is running unencrypted");
        }

        let chain = ForensicChain::open(dir.join(FORENSIC_FILE), Arc::clone(&clock));
        let ledger = AuditLedger::new(&config, Arc::clone(&clock))?;
        let tokens = TokenAuthorizer::from_config(&config, clock);

        info!(platform = bridge.platform_name(), "security services initialised");

        Ok(Self {
            tokens: Arc::new(tokens),
            chain: Arc::new(chain),
            ledger: Arc::new(ledger),
            store: Arc::new(store),
            bridge,
            data_dir: dir,
            config: Arc::new(Mutex::new(config)),
        })
    }

    // -- Session flows -------------------------------------------------------

    /// Open a session for `user_id`: issue an access-log token and record the
    /// navigation in every trail.
    pub fn begin_session(&self, user_id: &str) -> Result<TokenId> {
        let token = self.tokens.request_token(ACCESS_LOGS);
        self.store.log_access("NAVIGATION", "security session opened")?;
        self.record_action(user_id, "NAVIGATION", "opened the data protection session")?;
        Ok(token)
    }

    /// Record one action in both the audit ledger and the forensic chain.
    ///
    /// Returns whether the audit ledger flagged the user's request rate.
    pub fn record_action(&self, user_id: &str, action: &str, details: &str) -> Result<bool> {
        let anomalous = self.ledger.register_event(user_id, action, details);
        self.chain.log_event(user_id, action, details)?;
        Ok(anomalous)
    }

    /// Check `token` for `permission`.  A rejection is recorded in both
    /// trails before it is returned; the token is gone either way.
    pub fn authorize(&self, user_id: &str, token: &TokenId, permission: &str) -> Result<()> {
        match self.tokens.check_token(token, permission) {
            Ok(()) => Ok(()),
            Err(reason) => {
                self.record_action(
                    user_id,
                    "AUTHORIZATION_FAILURE",
                    &format!("{permission}: {reason}"),
                )?;
                Err(reason.into())
            }
        }
    }

    /// Access-log lines, newest first.
    pub fn view_access_logs(&self, user_id: &str, token: &TokenId) -> Result<Vec<String>> {
        self.authorize(user_id, token, ACCESS_LOGS)?;
        let logs = self.store.get_access_logs()?;
        self.store.log_access(DATA_ACCESS, "access logs viewed")?;
        self.ledger.register_event(user_id, "ACTION", "viewed access logs");
        self.chain.log_event(user_id, ACCESS_LOGS, "viewed access logs")?;
        Ok(logs)
    }

    /// Export the audit ledger with its signature.
    ///
    /// A signing failure still yields the export, with an empty signature and
    /// `signing_error` set; the ledger has already recorded it.
    pub fn export_signed_logs(&self, user_id: &str, token: &TokenId) -> Result<SignedExport> {
        self.authorize(user_id, token, EXPORT_LOGS)?;
        let export = self.ledger.export_logs_signed();
        let details = match &export.signing_error {
            None => "exported signed audit logs".to_owned(),
            Some(e) => format!("exported audit logs without signature: {e}"),
        };
        self.record_action(user_id, "EXPORT", &details)?;
        Ok(export)
    }

    /// GDPR/CCPA activity report over the forensic chain.
    pub fn compliance_report(&self, user_id: &str, token: &TokenId) -> Result<ComplianceReport> {
        self.authorize(user_id, token, EXPORT_LOGS)?;
        let report = self.chain.generate_compliance_report()?;
        self.chain
            .log_event(user_id, "COMPLIANCE", "viewed the compliance report")?;
        Ok(report)
    }

    /// Erase every stored value and the access log.
    pub fn wipe_all_data(&self, user_id: &str, token: &TokenId) -> Result<()> {
        self.authorize(user_id, token, CLEAR_DATA)?;
        self.ledger
            .register_event(user_id, "SECURITY", "requested a full data wipe");
        self.store.clear_all_data()?;
        self.store
            .log_access(DATA_MANAGEMENT, "all data erased at user request")?;
        self.record_action(user_id, DATA_MANAGEMENT, "all stored data erased")?;
        Ok(())
    }

    /// Host came back to the foreground: sweep expired tokens.
    pub fn on_resume(&self) {
        self.tokens.clear_expired_tokens();
    }

    /// Ask the platform authenticator to re-prove identity and, on success,
    /// issue a fresh token for `permission`.
    ///
    /// The prompt may block on user interaction, so it runs on a blocking
    /// thread.
    pub async fn reauthenticate(&self, user_id: &str, permission: &str) -> Result<TokenId> {
        let bridge = Arc::clone(&self.bridge);
        let prompt = AuthPrompt::new(
            "Confirm your identity",
            format!("Required for {permission}"),
        );

        let outcome = tokio::task::spawn_blocking(move || bridge.authenticate(&prompt))
            .await
            .map_err(|e| {
                error!(error = %e, "authenticator task failed");
                CustodiaError::AuthenticationFailed
            })??;

        match outcome {
            AuthOutcome::Success => {
                let token = self.tokens.request_token(permission);
                self.record_action(
                    user_id,
                    "REAUTHENTICATION",
                    &format!("identity re-proved for {permission}"),
                )?;
                Ok(token)
            }
            AuthOutcome::Failure | AuthOutcome::FallbackRequested => {
                warn!(user_id, ?outcome, "re-authentication not completed");
                self.record_action(
                    user_id,
                    "REAUTHENTICATION",
                    &format!("re-authentication for {permission} failed: {outcome:?}"),
                )?;
                Err(CustodiaError::AuthenticationFailed)
            }
        }
    }

    // -- Status --------------------------------------------------------------

    pub fn verify_forensic_chain(&self) -> Result<ChainVerification> {
        self.chain.verify_chain()
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        let verification = self.chain.verify_chain()?;
        Ok(ServiceStatus {
            platform: self.bridge.platform_name().to_owned(),
            store: self.store.protection_summary()?,
            forensic_entries: self.chain.len()?,
            forensic_chain_valid: verification.is_valid(),
            audit_events: self.ledger.len(),
            active_tokens: self.tokens.active_tokens(),
        })
    }

    // -- Subsystem access ----------------------------------------------------

    pub fn tokens(&self) -> &TokenAuthorizer {
        &self.tokens
    }

    pub fn chain(&self) -> &ForensicChain {
        &self.chain
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn store(&self) -> &CryptoStore {
        &self.store
    }

    // -- Config Persistence --------------------------------------------------

    /// Get a clone of the current config.
    pub fn config(&self) -> SecurityConfig {
        self.config.lock().clone()
    }

    /// Update and persist the config.  Takes effect on the next start.
    pub fn save_config(&self, config: &SecurityConfig) -> Result<()> {
        *self.config.lock() = config.clone();
        persist_config(&self.data_dir, config)
    }

    /// Path to the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

// -- Config file persistence -------------------------------------------------

const CONFIG_FILE: &str = "config.json";

fn load_config(data_dir: &Path) -> Option<SecurityConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "config.json unreadable, using defaults");
            None
        }
    }
}

pub(crate) fn persist_config(data_dir: &Path, config: &SecurityConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}
