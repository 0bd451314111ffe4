// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Application-wide context: the single, process-wide [`HybridLogicalClock`] singleton shared
//! by every invoker, executor, sender, and receiver attached to one session (spec §4.8/§9:
//! "shared mutable singletons become an explicitly constructed context object").

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use uuid::Uuid;

use crate::common::{
    aio_protocol_error::AIOProtocolError,
    hybrid_logical_clock::{HybridLogicalClock, DEFAULT_MAX_CLOCK_DRIFT},
};

/// Wraps the application-level [`HybridLogicalClock`] with the lock and drift policy needed to
/// update it safely from many concurrent tasks.
pub struct ApplicationHybridLogicalClock {
    hlc: Mutex<HybridLogicalClock>,
    max_clock_drift: Duration,
}

impl ApplicationHybridLogicalClock {
    /// Creates a new clock for `node_id` with the given maximum clock drift.
    #[must_use]
    pub fn new(node_id: impl Into<String>, max_clock_drift: Duration) -> Self {
        Self {
            hlc: Mutex::new(HybridLogicalClock::new(node_id)),
            max_clock_drift,
        }
    }

    /// Reads the current value of the clock.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned by a prior panic while holding it.
    #[must_use]
    pub fn read(&self) -> HybridLogicalClock {
        self.hlc.lock().expect("hlc mutex poisoned").clone()
    }

    /// Merges `other_hlc` (typically parsed from an incoming message's `__ts` property) into
    /// the application clock.
    ///
    /// # Errors
    /// `InternalLogicError` on counter overflow; `StateInvalid` if drift exceeds the configured
    /// maximum.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned by a prior panic while holding it.
    pub(crate) fn update(&self, other_hlc: &HybridLogicalClock) -> Result<(), AIOProtocolError> {
        self.hlc
            .lock()
            .expect("hlc mutex poisoned")
            .update(other_hlc, self.max_clock_drift)
    }

    /// Advances the clock to the current wall time (a local event, e.g. a pre-publish stamp)
    /// and returns its encoded string form, ready to use as the `__ts` user property.
    ///
    /// # Errors
    /// Same as [`ApplicationHybridLogicalClock::update`].
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned by a prior panic while holding it.
    pub(crate) fn update_now(&self) -> Result<String, AIOProtocolError> {
        let mut hlc = self.hlc.lock().expect("hlc mutex poisoned");
        hlc.update_now(self.max_clock_drift)?;
        Ok(hlc.to_string())
    }
}

/// Options for creating an [`ApplicationContext`].
#[derive(Builder)]
#[builder(setter(into))]
pub struct ApplicationContextOptions {
    /// Identifier unique to this process, stamped as the `node_id` of every HLC this process
    /// produces. Defaults to a random UUID if not supplied.
    #[builder(default = "Uuid::new_v4().to_string()")]
    pub node_id: String,
    /// The maximum clock drift allowed for the application [`HybridLogicalClock`].
    #[builder(default = "DEFAULT_MAX_CLOCK_DRIFT")]
    pub max_clock_drift: Duration,
}

/// Process-wide context shared by every invoker, executor, sender, and receiver.
///
/// <div class="warning"> There must be a max of one per session, and there should only be one
/// per application (which may contain multiple sessions). </div>
#[derive(Clone)]
pub struct ApplicationContext {
    /// The application-wide [`HybridLogicalClock`] singleton.
    pub application_hlc: Arc<ApplicationHybridLogicalClock>,
}

impl ApplicationContext {
    /// Creates a new [`ApplicationContext`] with the provided options.
    #[must_use]
    pub fn new(options: ApplicationContextOptions) -> Self {
        Self {
            application_hlc: Arc::new(ApplicationHybridLogicalClock::new(
                options.node_id,
                options.max_clock_drift,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_now_never_moves_counter_backwards() {
        let ctx = ApplicationContext::new(ApplicationContextOptionsBuilder::default().build().unwrap());
        let first = ctx.application_hlc.update_now().unwrap();
        let second = ctx.application_hlc.update_now().unwrap();
        let first_hlc: HybridLogicalClock = first.parse().unwrap();
        let second_hlc: HybridLogicalClock = second.parse().unwrap();
        assert_ne!(first_hlc.compare(&second_hlc), std::cmp::Ordering::Greater);
    }

    #[test]
    fn update_merges_remote_clock_from_different_node() {
        let ctx = ApplicationContext::new(
            ApplicationContextOptionsBuilder::default().node_id("A").build().unwrap(),
        );
        let remote = HybridLogicalClock::new("B");
        ctx.application_hlc.update(&remote).unwrap();
        assert_eq!(ctx.application_hlc.read().node_id, "A");
    }
}
