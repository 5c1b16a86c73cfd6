// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-threaded tests for the subsystems that share mutable state between
// callers: the token table, the forensic chain file, the per-user anomaly
// windows, and the crypto store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use custodia_bridge::StubBridge;
use custodia_core::clock::{ManualClock, SystemClock};
use custodia_core::config::{SecurityConfig, SigningScheme};
use custodia_core::types::ANOMALOUS_BEHAVIOR;
use custodia_security::{AuditLedger, CryptoStore, ForensicChain, StoreLocation, TokenAuthorizer};

/// Threads per test.
const CONCURRENCY: usize = 8;

/// Operations each thread performs.
const OPS_PER_THREAD: usize = 25;

// ---------------------------------------------------------------------------
// Token table
// ---------------------------------------------------------------------------

/// Every thread races to check one token with the wrong permission.  Exactly
/// one of them evicts it; nobody sees it valid afterwards.
#[test]
fn concurrent_mismatch_evicts_exactly_once() {
    let auth = TokenAuthorizer::from_config(&SecurityConfig::default(), Arc::new(SystemClock));
    let token = auth.request_token("ACCESS_LOGS");
    let mismatches = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..CONCURRENCY {
            s.spawn(|| {
                if let Err(custodia_core::TokenRejection::PermissionMismatch) =
                    auth.check_token(&token, "DELETE_DATA")
                {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(mismatches.load(Ordering::SeqCst), 1);
    assert!(!auth.validate_token(&token, "ACCESS_LOGS"));
    assert_eq!(auth.active_tokens(), 0);
}

/// Issuing from many threads never loses or duplicates a token.
#[test]
fn concurrent_issue_and_sweep() {
    let auth = TokenAuthorizer::from_config(&SecurityConfig::default(), Arc::new(SystemClock));

    let issued: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..CONCURRENCY)
            .map(|_| {
                s.spawn(|| {
                    (0..OPS_PER_THREAD)
                        .map(|_| {
                            auth.clear_expired_tokens();
                            auth.request_token("ACCESS_LOGS")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread should not panic"))
            .collect()
    });

    let unique: HashSet<_> = issued.iter().collect();
    assert_eq!(unique.len(), CONCURRENCY * OPS_PER_THREAD);
    assert_eq!(auth.active_tokens(), CONCURRENCY * OPS_PER_THREAD);
    assert!(issued.iter().all(|t| auth.validate_token(t, "ACCESS_LOGS")));
}

// ---------------------------------------------------------------------------
// Forensic chain
// ---------------------------------------------------------------------------

/// Concurrent appends through one shared chain never fork it.
#[test]
fn concurrent_appends_keep_chain_valid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = ForensicChain::open(
        dir.path().join("forensic_log_chain.json"),
        Arc::new(SystemClock),
    );

    thread::scope(|s| {
        for t in 0..CONCURRENCY {
            let chain = &chain;
            s.spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    chain
                        .log_event(&format!("user{t}"), "NAVIGATION", &format!("step {i}"))
                        .expect("append should succeed");
                }
            });
        }
    });

    let entries = chain.entries().expect("read chain");
    assert_eq!(entries.len(), CONCURRENCY * OPS_PER_THREAD);
    assert!(chain.verify_chain().expect("verify").is_valid());

    let previous: HashSet<_> = entries.iter().map(|e| e.previous_hash.as_str()).collect();
    assert_eq!(previous.len(), entries.len(), "no two entries share a predecessor");

    let report = chain.generate_compliance_report().expect("report");
    assert_eq!(report.users.len(), CONCURRENCY);
    assert!(report.users.iter().all(|u| u.actions.len() == OPS_PER_THREAD));
}

/// Separate handles opened on one path serialise through the file lock, so
/// no append is lost to an interleaved rewrite.
#[test]
fn separate_handles_on_one_file_lose_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("forensic_log_chain.json");
    let handles: Vec<_> = (0..2)
        .map(|_| ForensicChain::open(&path, Arc::new(SystemClock)))
        .collect();

    thread::scope(|s| {
        for (t, chain) in handles.iter().enumerate() {
            s.spawn(move || {
                for i in 0..100 {
                    chain
                        .log_event(&format!("user{t}"), "NAVIGATION", &format!("step {i}"))
                        .expect("append should succeed");
                }
            });
        }
    });

    let reader = ForensicChain::open(&path, Arc::new(SystemClock));
    assert_eq!(reader.len().expect("read chain"), 200);
    assert!(reader.verify_chain().expect("verify").is_valid());
    for t in 0..2 {
        assert_eq!(
            reader.events_for_user(&format!("user{t}")).expect("query").len(),
            100
        );
    }
}

// ---------------------------------------------------------------------------
// Audit ledger
// ---------------------------------------------------------------------------

/// Six concurrent registrations for one user at one instant trip the
/// detector exactly once.
#[test]
fn concurrent_registrations_count_every_event() {
    let config = SecurityConfig {
        signing_scheme: SigningScheme::EcdsaP256Sha256,
        ..SecurityConfig::default()
    };
    let ledger = AuditLedger::new(&config, Arc::new(ManualClock::starting_now())).expect("ledger");

    thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| ledger.register_event("alice", "ACTION", "tap"));
        }
    });

    let events = ledger.events();
    assert_eq!(events.len(), 7);
    assert_eq!(events.iter().filter(|e| e.event == ANOMALOUS_BEHAVIOR).count(), 1);
    ledger
        .verify_export(&ledger.export_logs_signed().export)
        .expect("export verifies");
}

// ---------------------------------------------------------------------------
// Crypto store
// ---------------------------------------------------------------------------

/// Parallel writers to distinct keys all land with intact tags.
#[test]
fn concurrent_store_writes_stay_verifiable() {
    let store = CryptoStore::initialize(
        StoreLocation::InMemory,
        Arc::new(StubBridge::new()),
        &SecurityConfig::default(),
        Arc::new(SystemClock),
    )
    .expect("initialise store");

    thread::scope(|s| {
        for t in 0..CONCURRENCY {
            let store = &store;
            s.spawn(move || {
                for i in 0..5 {
                    store
                        .store_secure_data(&format!("key{t}-{i}"), &format!("value{t}-{i}"))
                        .expect("store should succeed");
                }
            });
        }
    });

    for t in 0..CONCURRENCY {
        for i in 0..5 {
            let key = format!("key{t}-{i}");
            assert!(store.verify_data_integrity(&key).expect("verify"));
        }
    }
    assert_eq!(store.get_access_logs().expect("logs").len(), CONCURRENCY * 5);
}
