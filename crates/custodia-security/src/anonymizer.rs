// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Anonymization helpers: k-anonymity bucketing, Laplace noise, field masking,
// retention expiry, and free-text redaction.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use custodia_core::clock::elapsed_between;
use custodia_core::error::{CustodiaError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MASK: &str = "****";

/// Sensitivity of a counting query.
const SENSITIVITY: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: u32,
    pub city: String,
}

/// A record reduced to its generalized quasi-identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedRecord {
    /// Shared by every record of the same equivalence class.
    pub group_id: String,
    /// Decade range, e.g. "30-39".
    pub generalized_age: String,
    pub generalized_city: String,
}

/// Group records by `(age decade, city)` and release only classes of at
/// least `k` records.
///
/// Smaller classes are dropped whole.  Classes appear in order of their first
/// record, each class's records contiguously.
pub fn anonymize_with_k_anonymity(
    records: &[PersonalRecord],
    k: usize,
) -> Result<Vec<AnonymizedRecord>> {
    if k == 0 {
        return Err(CustodiaError::InvalidInput("k must be at least 1".into()));
    }

    let mut index: HashMap<(u32, &str), usize> = HashMap::new();
    let mut classes: Vec<((u32, &str), usize)> = Vec::new();
    for record in records {
        let key = (record.age / 10, record.city.as_str());
        match index.get(&key) {
            Some(&i) => classes[i].1 += 1,
            None => {
                index.insert(key, classes.len());
                classes.push((key, 1));
            }
        }
    }

    let mut released = Vec::new();
    for ((decade, city), size) in classes.into_iter().filter(|(_, size)| *size >= k) {
        let group_id = short_group_id();
        let generalized_age = format!("{}-{}", decade * 10, decade * 10 + 9);
        let generalized_city = mask_city(city);
        released.extend((0..size).map(|_| AnonymizedRecord {
            group_id: group_id.clone(),
            generalized_age: generalized_age.clone(),
            generalized_city: generalized_city.clone(),
        }));
    }
    Ok(released)
}

fn short_group_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_owned()
}

/// Keep the first character and mask the rest.
fn mask_city(city: &str) -> String {
    let mut chars = city.chars();
    match chars.next() {
        Some(first) => std::iter::once(first)
            .chain(chars.map(|_| '*'))
            .collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericValue {
    pub label: String,
    pub value: f64,
}

/// Add Laplace noise with scale `1 / epsilon` to `data`.
pub fn apply_differential_privacy(data: &NumericValue, epsilon: f64) -> Result<NumericValue> {
    apply_differential_privacy_with(&mut rand::thread_rng(), data, epsilon)
}

/// [`apply_differential_privacy`] drawing from a caller-supplied RNG.
pub fn apply_differential_privacy_with<R: Rng + ?Sized>(
    rng: &mut R,
    data: &NumericValue,
    epsilon: f64,
) -> Result<NumericValue> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(CustodiaError::InvalidInput(format!(
            "epsilon must be a positive finite number, got {epsilon}"
        )));
    }
    Ok(NumericValue {
        label: data.label.clone(),
        value: data.value + laplace_noise(rng, SENSITIVITY / epsilon),
    })
}

/// One sample from Laplace(0, `scale`) by inverse transform.
pub fn laplace_noise<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> f64 {
    loop {
        let u: f64 = rng.gen_range(-0.5..0.5);
        let tail = 1.0 - 2.0 * u.abs();
        // u = -0.5 would give ln(0).
        if tail > 0.0 {
            return -scale * u.signum() * tail.ln();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    Email,
    Phone,
    Name,
}

/// Partially redact `value` according to its kind.
///
/// - email: first two characters of the local part, then `****@domain`
/// - phone: first three and last two digits around `****`
/// - name: first character followed by `****`
///
/// Input too short to keep anything collapses to `****`.
pub fn mask(value: &str, kind: DataKind) -> String {
    match kind {
        DataKind::Email => match value.split_once('@') {
            Some((local, domain)) if !domain.contains('@') => {
                let head: String = local.chars().take(2).collect();
                format!("{head}{MASK}@{domain}")
            }
            _ => MASK.to_owned(),
        },
        DataKind::Phone => {
            let chars: Vec<char> = value.chars().collect();
            if chars.len() <= 5 {
                return MASK.to_owned();
            }
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[chars.len() - 2..].iter().collect();
            format!("{head}{MASK}{tail}")
        }
        DataKind::Name => match value.chars().next() {
            Some(first) => format!("{first}{MASK}"),
            None => MASK.to_owned(),
        },
    }
}

/// How long a record may be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub recorded_at: DateTime<Utc>,
    pub retention: Duration,
}

impl RetentionPolicy {
    pub fn new(recorded_at: DateTime<Utc>, retention: Duration) -> Self {
        Self {
            recorded_at,
            retention,
        }
    }

    /// Strictly past the retention period at `now`.
    pub fn should_delete(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.recorded_at, now) > self.retention
    }
}

/// Replace every digit with `*` and every run of three or more ASCII letters
/// with `***`.
pub fn redact_free_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();

    let flush = |run: &mut String, out: &mut String| {
        if run.len() >= 3 {
            out.push_str("***");
        } else {
            out.push_str(run);
        }
        run.clear();
    };

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            run.push(c);
            continue;
        }
        flush(&mut run, &mut out);
        out.push(if c.is_ascii_digit() { '*' } else { c });
    }
    flush(&mut run, &mut out);
    out
}
