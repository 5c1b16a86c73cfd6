// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security audit ledger: in-memory event log with a per-user sliding-window
// rate anomaly detector and signed export.
//
// The ledger lives for the lifetime of the process; `export_logs_signed` is
// its only durability path.  Exports are signed with one key generated when
// the ledger is created, so every export verifies against the same public key.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use custodia_core::clock::{Clock, elapsed_between};
use custodia_core::config::{SecurityConfig, SigningScheme};
use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::{
    ANOMALOUS_BEHAVIOR, AuditEvent, SIGNING_FAILURE, SignedAuditExport, format_log_timestamp,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::signing::{LogSigner, generate_signer, verify_signature};

/// User id under which the ledger records its own failures.
pub const SYSTEM_USER: &str = "system";

/// Result of [`AuditLedger::export_logs_signed`].
///
/// When signing fails the export still carries the logs, with an empty
/// signature, and `signing_error` says why.
#[derive(Debug)]
pub struct SignedExport {
    pub export: SignedAuditExport,
    pub signing_error: Option<CustodiaError>,
}

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<AuditEvent>,
    /// Recent registration times per user, oldest first.
    windows: HashMap<String, VecDeque<DateTime<Utc>>>,
}

/// In-memory audit log with rate anomaly detection.
pub struct AuditLedger {
    state: Mutex<LedgerState>,
    signer: Box<dyn LogSigner>,
    window: Duration,
    max_requests: usize,
    clock: Arc<dyn Clock>,
}

impl AuditLedger {
    /// Create a ledger and generate its signing key.
    pub fn new(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let signer = generate_signer(config.signing_scheme)?;
        Ok(Self::with_signer(config, clock, signer))
    }

    /// Create a ledger around an existing signing key.
    pub fn with_signer(
        config: &SecurityConfig,
        clock: Arc<dyn Clock>,
        signer: Box<dyn LogSigner>,
    ) -> Self {
        info!(scheme = ?signer.scheme(), "audit ledger ready");
        Self {
            state: Mutex::new(LedgerState::default()),
            signer,
            window: config.anomaly_window(),
            max_requests: config.anomaly_max_requests,
            clock,
        }
    }

    /// Record an event for `user_id`.
    ///
    /// Returns `true` when this registration pushed the user past the rate
    /// threshold, in which case an `ANOMALOUS_BEHAVIOR` entry was written
    /// immediately before the event itself.  Every registration past the
    /// threshold inside the window triggers again.
    pub fn register_event(&self, user_id: &str, event_type: &str, metadata: &str) -> bool {
        let now = self.clock.now();
        let timestamp = format_log_timestamp(now);
        let mut state = self.state.lock();

        let window = state.windows.entry(user_id.to_owned()).or_default();
        window.push_back(now);
        while let Some(&oldest) = window.front() {
            if elapsed_between(oldest, now) > self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        let in_window = window.len();
        let anomalous = in_window > self.max_requests;
        if anomalous {
            warn!(user_id, in_window, "suspicious request rate detected");
            state.events.push(AuditEvent {
                timestamp: timestamp.clone(),
                user: user_id.to_owned(),
                event: ANOMALOUS_BEHAVIOR.to_owned(),
                details: format!(
                    "too many requests: {in_window} within {}s",
                    self.window.as_secs()
                ),
            });
        }

        state.events.push(AuditEvent {
            timestamp,
            user: user_id.to_owned(),
            event: event_type.to_owned(),
            details: metadata.to_owned(),
        });
        debug!(user_id, event_type, "audit event registered");
        anomalous
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.state.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize all events and sign them with the ledger key.
    pub fn export_logs_signed(&self) -> SignedExport {
        let logs = self.events();

        let signed = SignedAuditExport::signed_payload(&logs)
            .map_err(CustodiaError::from)
            .and_then(|payload| self.signer.sign(&payload));

        match signed {
            Ok(sig) => {
                info!(events = logs.len(), "audit log exported and signed");
                SignedExport {
                    export: SignedAuditExport {
                        logs,
                        signature: BASE64.encode(sig),
                    },
                    signing_error: None,
                }
            }
            Err(e) => {
                error!(error = %e, "failed to sign audit export");
                self.record_system_event(SIGNING_FAILURE, &e.to_string());
                SignedExport {
                    export: SignedAuditExport {
                        logs,
                        signature: String::new(),
                    },
                    signing_error: Some(e),
                }
            }
        }
    }

    /// Check an export's signature against this ledger's public key.
    pub fn verify_export(&self, export: &SignedAuditExport) -> Result<()> {
        if !export.is_signed() {
            return Err(CustodiaError::IntegrityViolation("export is unsigned".into()));
        }
        let sig = BASE64
            .decode(&export.signature)
            .map_err(|e| CustodiaError::InvalidInput(format!("signature is not base64: {e}")))?;
        let payload = SignedAuditExport::signed_payload(&export.logs)?;
        verify_signature(self.signer.scheme(), self.signer.public_key_der(), &payload, &sig)
    }

    pub fn public_key_der(&self) -> &[u8] {
        self.signer.public_key_der()
    }

    pub fn signing_scheme(&self) -> SigningScheme {
        self.signer.scheme()
    }

    fn record_system_event(&self, event_type: &str, details: &str) {
        self.state.lock().events.push(AuditEvent {
            timestamp: format_log_timestamp(self.clock.now()),
            user: SYSTEM_USER.to_owned(),
            event: event_type.to_owned(),
            details: details.to_owned(),
        });
    }
}
