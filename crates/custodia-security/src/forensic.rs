// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Forensic chain: append-only, hash-linked evidence log persisted as a JSON
// array file.
//
// File format:
//   [
//     {"timestamp": 1760000000000, "userId": "...", "action": "...",
//      "details": "...", "previousHash": "GENESIS", "hash": "<sha256 base64>"},
//     ...
//   ]
//
// `hash = SHA256("timestamp|userId|action|details|previousHash")` and every
// entry's `previousHash` is its predecessor's `hash`.  Editing any field of
// any entry breaks that entry and everything after it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use custodia_core::clock::Clock;
use custodia_core::error::Result;
use custodia_core::types::{
    ComplianceReport, ForensicEntry, GENESIS_HASH, UserActions, format_log_timestamp,
};
use fs2::FileExt;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::integrity::hash_bytes;

/// Outcome of checking a single entry against its own fields and predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryVerdict {
    Authentic,
    /// Stored hash does not match the recomputed one.
    HashMismatch,
    /// `previous_hash` does not point at the predecessor's hash.
    BrokenLink,
    /// This entry is intact but an earlier one is not.
    Tainted,
}

impl EntryVerdict {
    pub fn is_authentic(&self) -> bool {
        matches!(self, Self::Authentic)
    }
}

/// Result of verifying a whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChainVerification {
    Valid { entries: usize },
    Broken {
        /// Index of the first entry that failed.
        first_invalid: usize,
        verdict: EntryVerdict,
        entries: usize,
    },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Compute the hash an entry with these fields must carry.
pub fn compute_entry_hash(
    timestamp: i64,
    user_id: &str,
    action: &str,
    details: &str,
    previous_hash: &str,
) -> String {
    hash_bytes(format!("{timestamp}|{user_id}|{action}|{details}|{previous_hash}").as_bytes())
}

/// Per-entry verdicts for `entries`, in order.
///
/// The first failing entry gets `HashMismatch` or `BrokenLink`; every entry
/// after it is at best `Tainted`.
pub fn verify_entries(entries: &[ForensicEntry]) -> Vec<EntryVerdict> {
    let mut verdicts = Vec::with_capacity(entries.len());
    let mut expected_previous = GENESIS_HASH;
    let mut broken = false;

    for entry in entries {
        let verdict = if entry.previous_hash != expected_previous {
            EntryVerdict::BrokenLink
        } else if hash_bytes(entry.hash_preimage().as_bytes()) != entry.hash {
            EntryVerdict::HashMismatch
        } else if broken {
            EntryVerdict::Tainted
        } else {
            EntryVerdict::Authentic
        };

        broken |= !verdict.is_authentic();
        verdicts.push(verdict);
        expected_previous = entry.hash.as_str();
    }
    verdicts
}

/// Append-only forensic log stored at a single file path.
///
/// Each append reads the whole chain, links the new entry to the last hash,
/// and rewrites the file while holding an exclusive advisory lock on a
/// sidecar `<file>.lock`.  Any number of handles, in this process or
/// another, may append to the same path.
#[derive(Debug)]
pub struct ForensicChain {
    path: PathBuf,
    lock_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ForensicChain {
    /// Use (or lazily create) the chain file at `path`.
    ///
    /// Nothing is written until the first event is logged.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new event to the chain and persist it.
    #[instrument(skip(self, details), fields(%user_id, %action))]
    pub fn log_event(&self, user_id: &str, action: &str, details: &str) -> Result<ForensicEntry> {
        let _lock = self.lock_exclusive()?;

        let mut entries = self.read_entries()?;
        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_owned());
        let timestamp = self.clock.now_millis();
        let hash = compute_entry_hash(timestamp, user_id, action, details, &previous_hash);

        let entry = ForensicEntry {
            timestamp,
            user_id: user_id.to_owned(),
            action: action.to_owned(),
            details: details.to_owned(),
            previous_hash,
            hash,
        };
        entries.push(entry.clone());
        self.write_entries(&entries)?;

        debug!(position = entries.len() - 1, hash = %entry.hash, "forensic entry appended");
        Ok(entry)
    }

    /// Every entry, in chain order.
    ///
    /// The file is only ever replaced by rename, so a reader sees either the
    /// chain before an append or after it.
    pub fn entries(&self) -> Result<Vec<ForensicEntry>> {
        self.read_entries()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Recompute every hash and link in the persisted chain.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let entries = self.entries()?;
        let verdicts = verify_entries(&entries);
        let outcome = match verdicts.iter().position(|v| !v.is_authentic()) {
            None => ChainVerification::Valid {
                entries: entries.len(),
            },
            Some(first_invalid) => {
                warn!(
                    first_invalid,
                    verdict = ?verdicts[first_invalid],
                    "forensic chain integrity broken"
                );
                ChainVerification::Broken {
                    first_invalid,
                    verdict: verdicts[first_invalid],
                    entries: entries.len(),
                }
            }
        };
        Ok(outcome)
    }

    /// Actions grouped by user, users in order of first appearance.
    pub fn generate_compliance_report(&self) -> Result<ComplianceReport> {
        let entries = self.entries()?;
        let mut users: Vec<UserActions> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            match position.get(&entry.user_id) {
                Some(&i) => users[i].actions.push(entry.action),
                None => {
                    position.insert(entry.user_id.clone(), users.len());
                    users.push(UserActions {
                        user_id: entry.user_id,
                        actions: vec![entry.action],
                    });
                }
            }
        }

        Ok(ComplianceReport {
            generated_at: format_log_timestamp(self.clock.now()),
            users,
        })
    }

    /// Entries whose details contain `keyword`, ignoring case.
    pub fn filter_events_by_keyword(&self, keyword: &str) -> Result<Vec<ForensicEntry>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.details.to_lowercase().contains(&needle))
            .collect())
    }

    /// Every entry recorded for one data subject.
    pub fn events_for_user(&self, user_id: &str) -> Result<Vec<ForensicEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect())
    }

    fn read_entries(&self) -> Result<Vec<ForensicEntry>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Block until this handle owns the chain's lock file.  The lock is
    /// released when the returned file is dropped.
    fn lock_exclusive(&self) -> Result<fs::File> {
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(file)
    }

    /// Replace the chain file atomically: uniquely named temp file in the
    /// same directory, fsync, rename.
    fn write_entries(&self, entries: &[ForensicEntry]) -> Result<()> {
        let json = serde_json::to_vec(entries)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_core::clock::ManualClock;
    use custodia_core::error::CustodiaError;
    use std::time::Duration;

    fn make_chain() -> (tempfile::TempDir, ForensicChain, Arc<ManualClock>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::starting_now());
        let chain = ForensicChain::open(dir.path().join("forensic_log_chain.json"), clock.clone());
        (dir, chain, clock)
    }

    fn populate(chain: &ForensicChain, clock: &ManualClock) {
        chain.log_event("alice", "NAVIGATION", "Opened data protection screen").unwrap();
        clock.advance(Duration::from_millis(10));
        chain.log_event("bob", "ACCESS_LOGS", "Viewed access logs").unwrap();
        clock.advance(Duration::from_millis(10));
        chain.log_event("alice", "EXPORT", "Exported signed logs").unwrap();
        clock.advance(Duration::from_millis(10));
        chain.log_event("alice", "DATA_MANAGEMENT", "Requested full data wipe").unwrap();
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let (_dir, chain, _) = make_chain();
        let entry = chain.log_event("alice", "LOGIN", "first").unwrap();
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(
            entry.hash,
            compute_entry_hash(entry.timestamp, "alice", "LOGIN", "first", GENESIS_HASH)
        );
    }

    #[test]
    fn entry_hash_known_vector() {
        // SHA-256 of "1700000000000|alice|LOGIN|first|GENESIS", standard base64.
        assert_eq!(
            compute_entry_hash(1_700_000_000_000, "alice", "LOGIN", "first", GENESIS_HASH),
            "EAGblj5sJY1KQJW7tG7UnCbP/Ck6TpjuutaXur0pIkI="
        );
    }

    #[test]
    fn two_handles_on_one_file_share_the_chain() {
        let (dir, first, clock) = make_chain();
        let second = ForensicChain::open(dir.path().join("forensic_log_chain.json"), clock);

        for i in 0..5 {
            first.log_event("alice", "NAVIGATION", &format!("a{i}")).unwrap();
            second.log_event("bob", "NAVIGATION", &format!("b{i}")).unwrap();
        }

        assert_eq!(first.len().unwrap(), 10);
        assert_eq!(second.verify_chain().unwrap(), ChainVerification::Valid { entries: 10 });
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| !name.starts_with("forensic_log_chain.json"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[test]
    fn entries_link_and_verify() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);

        let entries = chain.entries().unwrap();
        assert_eq!(entries.len(), 4);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        assert_eq!(
            chain.verify_chain().unwrap(),
            ChainVerification::Valid { entries: 4 }
        );
    }

    #[test]
    fn chain_survives_reopen() {
        let (dir, chain, clock) = make_chain();
        populate(&chain, &clock);
        let last = chain.entries().unwrap().pop().unwrap();

        let reopened = ForensicChain::open(dir.path().join("forensic_log_chain.json"), clock);
        let next = reopened.log_event("carol", "LOGIN", "after restart").unwrap();
        assert_eq!(next.previous_hash, last.hash);
        assert!(reopened.verify_chain().unwrap().is_valid());
    }

    #[test]
    fn single_edit_taints_downstream_only() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);

        let mut entries = chain.entries().unwrap();
        entries[1].details = "Viewed nothing at all".into();

        let verdicts = verify_entries(&entries);
        assert_eq!(
            verdicts,
            vec![
                EntryVerdict::Authentic,
                EntryVerdict::HashMismatch,
                EntryVerdict::Tainted,
                EntryVerdict::Tainted,
            ]
        );
    }

    #[test]
    fn every_field_edit_is_detected() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);
        let pristine = chain.entries().unwrap();

        let edits: [fn(&mut ForensicEntry); 6] = [
            |e| e.timestamp += 1,
            |e| e.user_id.push('x'),
            |e| e.action = "OTHER".into(),
            |e| e.details.clear(),
            |e| e.previous_hash = GENESIS_HASH.into(),
            |e| e.hash = "0".repeat(64),
        ];
        for edit in edits {
            let mut entries = pristine.clone();
            edit(&mut entries[2]);
            let verdicts = verify_entries(&entries);
            assert!(verdicts[0].is_authentic() && verdicts[1].is_authentic());
            assert!(verdicts[2..].iter().all(|v| !v.is_authentic()));
        }
    }

    #[test]
    fn tampered_file_fails_verification() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);

        let mut entries = chain.entries().unwrap();
        entries[0].action = "NOTHING_TO_SEE".into();
        fs::write(chain.path(), serde_json::to_vec(&entries).unwrap()).unwrap();

        match chain.verify_chain().unwrap() {
            ChainVerification::Broken {
                first_invalid,
                verdict,
                entries,
            } => {
                assert_eq!(first_invalid, 0);
                assert_eq!(verdict, EntryVerdict::HashMismatch);
                assert_eq!(entries, 4);
            }
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn compliance_report_groups_by_user_in_order() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);

        let report = chain.generate_compliance_report().unwrap();
        assert_eq!(report.users.len(), 2);
        assert_eq!(report.users[0].user_id, "alice");
        assert_eq!(
            report.users[0].actions,
            vec!["NAVIGATION", "EXPORT", "DATA_MANAGEMENT"]
        );
        assert_eq!(report.users[1].user_id, "bob");
        assert_eq!(report.users[1].actions, vec!["ACCESS_LOGS"]);
        assert_eq!(report.generated_at, format_log_timestamp(clock.now()));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["generatedAt"].is_string());
        assert_eq!(json["users"][0]["userId"], "alice");
    }

    #[test]
    fn empty_chain_reports_nothing() {
        let (_dir, chain, _) = make_chain();
        assert!(chain.is_empty().unwrap());
        assert!(chain.generate_compliance_report().unwrap().users.is_empty());
        assert!(chain.verify_chain().unwrap().is_valid());
    }

    #[test]
    fn keyword_filter_is_case_insensitive_and_ordered() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);

        let hits = chain.filter_events_by_keyword("LOGS").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].details, "Viewed access logs");
        assert_eq!(hits[1].details, "Exported signed logs");
        assert!(chain.filter_events_by_keyword("printer").unwrap().is_empty());
    }

    #[test]
    fn events_for_user_filters_subject() {
        let (_dir, chain, clock) = make_chain();
        populate(&chain, &clock);
        assert_eq!(chain.events_for_user("alice").unwrap().len(), 3);
        assert_eq!(chain.events_for_user("nobody").unwrap().len(), 0);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let (_dir, chain, _) = make_chain();
        fs::write(chain.path(), b"{not json").unwrap();
        assert!(matches!(
            chain.log_event("alice", "LOGIN", "x"),
            Err(CustodiaError::Serialization(_))
        ));
        // The corrupt file was left alone.
        assert_eq!(fs::read(chain.path()).unwrap(), b"{not json");
    }

    #[test]
    fn unwritable_location_propagates_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ForensicChain::open(
            dir.path().join("missing-subdir").join("chain.json"),
            Arc::new(ManualClock::starting_now()),
        );
        let err = chain.log_event("alice", "LOGIN", "x").unwrap_err();
        assert!(err.is_persistence_failure());
    }
}
