// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Custodia: Native platform capability abstractions.
//
// The security core never talks to Android Keystore, iOS Keychain, or the
// biometric prompt directly.  It consumes the traits in `traits`; the host
// application supplies an implementation for its platform.  On desktop and CI
// the `stub` bridge stands in.

pub mod stub;
pub mod traits;

use std::sync::Arc;

use custodia_core::error::Result;

pub use stub::StubBridge;
pub use traits::{
    AuthOutcome, AuthPrompt, DeviceTrust, NativeAuthenticator, NativeDeviceIntegrity,
    NativeKeychain, PlatformBridge,
};

/// Bridge for targets without a native implementation linked in.
///
/// Mobile hosts construct their own `PlatformBridge` and hand it to the
/// services layer instead of calling this.
pub fn platform_bridge() -> Box<dyn PlatformBridge> {
    Box::new(StubBridge::new())
}

/// The keychain half of a shared bridge.
pub fn shared_keychain(bridge: Arc<dyn PlatformBridge>) -> Arc<dyn NativeKeychain> {
    Arc::new(BridgeKeychain(bridge))
}

struct BridgeKeychain(Arc<dyn PlatformBridge>);

impl NativeKeychain for BridgeKeychain {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.0.store_secret(key, value)
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.0.load_secret(key)
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.0.delete_secret(key)
    }
}
