//! Exclusive-access leases
//!
//! An external caller (a configuration tool sending raw commands, say) can
//! take a bus for a bounded time. While the lease is fresh the engine stops
//! emitting its own requests; answers keep being evaluated.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Holder {
    owner: String,
    since: Instant,
}

/// A renewable lease with a fixed timeout
#[derive(Debug, Clone)]
pub struct OwnershipLease {
    timeout: Duration,
    holder: Option<Holder>,
}

impl OwnershipLease {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            holder: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take or renew the lease
    ///
    /// Fails with the current owner's name if someone else holds a fresh
    /// lease. An expired lease is taken over.
    pub fn take(&mut self, owner: &str, now: Instant) -> Result<(), String> {
        if let Some(current) = self.owner(now) {
            if current != owner {
                return Err(current.to_string());
            }
        }
        self.holder = Some(Holder {
            owner: owner.to_string(),
            since: now,
        });
        Ok(())
    }

    /// Give the lease back; returns false if `owner` did not hold it
    pub fn release(&mut self, owner: &str) -> bool {
        match &self.holder {
            Some(holder) if holder.owner == owner => {
                self.holder = None;
                true
            }
            _ => false,
        }
    }

    /// Current owner of a fresh lease
    pub fn owner(&self, now: Instant) -> Option<&str> {
        self.holder
            .as_ref()
            .filter(|h| now.saturating_duration_since(h.since) < self.timeout)
            .map(|h| h.owner.as_str())
    }

    pub fn is_owned(&self, now: Instant) -> bool {
        self.owner(now).is_some()
    }

    /// Drop a lease that has run out; returns the previous owner if it did
    pub fn expire(&mut self, now: Instant) -> Option<String> {
        if self.holder.is_some() && !self.is_owned(now) {
            self.holder.take().map(|h| h.owner)
        } else {
            None
        }
    }
}
