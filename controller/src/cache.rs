// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Cached firmware properties.
//!
//! Properties that only change when the firmware restarts are read once and
//! then served from the cache, until a firmware re-initialization event
//! invalidates every entry.

use pon_decode::Capabilities;
use pon_decode::Limits;
use pon_decode::OperatingMode;
use pon_decode::VersionInfo;
use std::sync::Mutex;
use std::sync::PoisonError;

/// The cached values. `None` means the entry must be read from firmware.
#[derive(Clone, Debug, Default)]
pub(crate) struct CacheState {
    pub capabilities: Option<Capabilities>,
    pub version: Option<VersionInfo>,
    pub limits: Option<Limits>,
    pub mode: Option<OperatingMode>,
    pub external_calibration: Option<bool>,
    // Bumped on each invalidation.
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Cache {
    state: Mutex<CacheState>,
}

impl Cache {
    /// Run `f` on the cached values.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.read(|s| s.generation)
    }

    /// Store a value read from firmware.
    ///
    /// `generation` is the generation observed before the read was issued.
    /// If the cache was invalidated in the meantime the value may predate
    /// the firmware restart, and it is discarded.
    pub(crate) fn store(&self, generation: u64, f: impl FnOnce(&mut CacheState)) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            return false;
        }
        f(&mut state);
        true
    }

    /// Mark every entry invalid.
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = state.generation.wrapping_add(1);
        *state = CacheState {
            generation,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::Cache;
    use pon_decode::Capabilities;

    #[test]
    fn test_invalidate_clears_everything() {
        let cache = Cache::default();
        let gen = cache.generation();
        assert!(cache.store(gen, |s| {
            s.capabilities = Some(Capabilities::GPON);
            s.external_calibration = Some(true);
        }));
        assert_eq!(cache.read(|s| s.capabilities), Some(Capabilities::GPON));
        cache.invalidate();
        assert_eq!(cache.generation(), gen + 1);
        let empty = cache.read(|s| {
            s.capabilities.is_none() && s.external_calibration.is_none() && s.version.is_none()
        });
        assert!(empty);
    }

    #[test]
    fn test_store_after_invalidate_is_discarded() {
        let cache = Cache::default();
        let gen = cache.generation();
        cache.invalidate();
        assert!(!cache.store(gen, |s| s.capabilities = Some(Capabilities::XGSPON)));
        assert!(cache.read(|s| s.capabilities.is_none()));
    }
}
