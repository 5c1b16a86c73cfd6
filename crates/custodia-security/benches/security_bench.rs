// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for token checks, HMAC tagging, forensic chain
// verification, and encrypted store writes in the custodia-security crate.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use custodia_bridge::StubBridge;
use custodia_core::clock::SystemClock;
use custodia_core::config::SecurityConfig;
use custodia_core::types::{ForensicEntry, GENESIS_HASH};
use custodia_security::forensic::compute_entry_hash;
use custodia_security::{
    CryptoStore, StoreLocation, TokenAuthorizer, hmac_sha256, verify_entries,
};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Issue-then-validate against a table already holding 1000 live tokens.
fn bench_token_validate(c: &mut Criterion) {
    let auth = TokenAuthorizer::from_config(&SecurityConfig::default(), Arc::new(SystemClock));
    for _ in 0..1000 {
        auth.request_token("BACKGROUND");
    }

    c.bench_function("token_request_validate (1000 live)", |b| {
        b.iter(|| {
            let token = auth.request_token("ACCESS_LOGS");
            black_box(auth.validate_token(&token, black_box("ACCESS_LOGS")));
            auth.revoke_token(&token);
        });
    });
}

/// HMAC-SHA256 tagging of stored values at a few sizes.
fn bench_hmac(c: &mut Criterion) {
    let sizes: &[(&str, usize)] = &[("64 B", 64), ("1 KiB", 1024), ("64 KiB", 64 * 1024)];

    let mut group = c.benchmark_group("hmac_sha256");
    for &(label, size) in sizes {
        let data = vec![0xABu8; size];
        group.bench_function(label, |b| {
            b.iter(|| black_box(hmac_sha256(black_box(&data), b"api_token")));
        });
    }
    group.finish();
}

/// Verify a 1000-entry chain in memory.
fn bench_chain_verify(c: &mut Criterion) {
    let mut entries = Vec::with_capacity(1000);
    let mut previous = GENESIS_HASH.to_owned();
    for i in 0..1000i64 {
        let details = format!("event {i}");
        let hash = compute_entry_hash(i, "alice", "NAVIGATION", &details, &previous);
        entries.push(ForensicEntry {
            timestamp: i,
            user_id: "alice".into(),
            action: "NAVIGATION".into(),
            details,
            previous_hash: previous,
            hash: hash.clone(),
        });
        previous = hash;
    }

    c.bench_function("forensic_verify (1000 entries)", |b| {
        b.iter(|| black_box(verify_entries(black_box(&entries))));
    });
}

/// Encrypted store write: age encryption plus HMAC plus one SQLite
/// transaction and an access-log line.
fn bench_store_secure_data(c: &mut Criterion) {
    let store = CryptoStore::initialize(
        StoreLocation::InMemory,
        Arc::new(StubBridge::new()),
        &SecurityConfig::default(),
        Arc::new(SystemClock),
    )
    .expect("initialise store");

    c.bench_function("store_secure_data (in-memory SQLite)", |b| {
        b.iter(|| {
            store
                .store_secure_data(black_box("api_token"), black_box("s3cr3t-value"))
                .expect("store failed");
        });
    });
}

criterion_group!(
    benches,
    bench_token_validate,
    bench_hmac,
    bench_chain_verify,
    bench_store_secure_data,
);
criterion_main!(benches);
