// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: composes the security subsystems the way the host UI
// drives them.
//
// The subsystems never call each other; every flow that touches more than one
// of them lives here.

pub mod data_dir;
pub mod security_services;
