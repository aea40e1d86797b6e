//! Facade composing access lists, keying, and the sliding-window limiter.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::access::{Access, AccessList};
use crate::clock::Clock;
use crate::config::{FailurePolicy, FormgateConfig};
use crate::error::Result;
use crate::limiter::{Decision, LimiterKey, SlidingWindowLimiter};
use crate::storage::StorageBackend;

/// Per-request admission guard for form submissions.
///
/// Everything is injected: configuration, storage, and clock are supplied
/// by the caller, so the guard carries no process-wide state and two guards
/// with different policies can coexist over one store.
pub struct FormRateGuard {
    config: FormgateConfig,
    interval: Duration,
    access: AccessList,
    limiter: SlidingWindowLimiter,
}

impl FormRateGuard {
    /// Build a guard, failing fast on invalid configuration.
    pub fn new(
        config: FormgateConfig,
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let interval = config.validate()?;
        let access = AccessList::parse(&config.allow_list, &config.deny_list);
        let (allow_count, deny_count) = access.entry_counts();
        debug!(
            limit = config.limit,
            interval_secs = interval.as_secs(),
            allow_entries = allow_count,
            deny_entries = deny_count,
            "Admission guard configured"
        );
        let limiter = SlidingWindowLimiter::new(storage, clock);
        Ok(Self {
            config,
            interval,
            access,
            limiter,
        })
    }

    /// Decide admission for one submission.
    ///
    /// Access lists short-circuit the limiter: allow-listed clients are
    /// accepted without consuming a slot, deny-listed clients are rejected
    /// permanently, and both apply even when the limiter itself is
    /// disabled. With the limiter disabled, everything else is accepted
    /// without touching storage.
    pub async fn decide(&self, form_identifier: &str, client_address: &str) -> Decision {
        if let Ok(addr) = client_address.parse::<IpAddr>() {
            match self.access.classify(addr) {
                Access::Allowed => {
                    if self.config.logging_enabled {
                        info!(form = %form_identifier, ip = %client_address, "ip_allowed");
                    }
                    return Decision::unlimited();
                }
                Access::Denied => {
                    if self.config.logging_enabled {
                        error!(form = %form_identifier, ip = %client_address, "ip_denied");
                    }
                    return Decision::denied();
                }
                Access::Unclassified => {}
            }
        }

        if !self.config.enabled {
            return Decision::unlimited();
        }

        let key = LimiterKey::derive(self.config.keying_mode, form_identifier, client_address);
        match self
            .limiter
            .consume(&key, self.config.limit, self.interval)
            .await
        {
            Ok(decision) => {
                if !decision.accepted && self.config.logging_enabled {
                    warn!(
                        form = %form_identifier,
                        ip = %client_address,
                        retry_after_seconds =
                            decision.retry_after.unwrap_or_default().as_secs(),
                        "rate_limit_exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    form = %form_identifier,
                    ip = %client_address,
                    error = %e,
                    "Storage unavailable, applying failure policy"
                );
                match self.config.failure_policy {
                    FailurePolicy::FailClosed => Decision::rejected(self.interval),
                    FailurePolicy::FailOpen => Decision::unlimited(),
                }
            }
        }
    }
}
