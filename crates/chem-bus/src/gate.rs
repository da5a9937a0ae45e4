//! Half-duplex turn gate
//!
//! On a shared line the host must not start a new request while a board may
//! still be answering the previous one. The gate is a binary signal: the
//! transmitter takes it before each frame and the receiver gives it back
//! when a complete answer frame arrives. A missing answer only delays the
//! next frame by the acquire timeout; collisions are possible and accepted.

use std::time::Duration;

use tokio::sync::Semaphore;

/// How long the transmitter waits for the previous answer
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_millis(300);

/// Binary semaphore guarding a half-duplex line
#[derive(Debug)]
pub struct TurnGate {
    permit: Semaphore,
}

impl TurnGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
        }
    }

    /// Take the line
    ///
    /// Returns false if the previous answer never arrived within `timeout`;
    /// the caller proceeds anyway and the gate stays closed.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.permit.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            _ => false,
        }
    }

    /// Give the line back after an answer; never opens more than one turn
    pub fn release(&self) {
        if self.permit.available_permits() == 0 {
            self.permit.add_permits(1);
        }
    }

    /// Reopen the gate after the link is re-established
    pub fn reset(&self) {
        self.release();
    }

    /// Returns true if a transmitter could take the line right now
    pub fn is_open(&self) -> bool {
        self.permit.available_permits() > 0
    }
}

impl Default for TurnGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gate_closes_until_released() {
        let gate = TurnGate::new();
        assert!(gate.acquire(DEFAULT_GATE_TIMEOUT).await);
        assert!(!gate.is_open());

        gate.release();
        assert!(gate.acquire(DEFAULT_GATE_TIMEOUT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_without_answer() {
        let gate = TurnGate::new();
        assert!(gate.acquire(DEFAULT_GATE_TIMEOUT).await);

        let start = tokio::time::Instant::now();
        assert!(!gate.acquire(DEFAULT_GATE_TIMEOUT).await);
        assert!(start.elapsed() >= DEFAULT_GATE_TIMEOUT);
    }

    #[test]
    fn test_release_is_binary() {
        let gate = TurnGate::new();
        gate.release();
        gate.release();
        assert_eq!(gate.permit.available_permits(), 1);
    }
}
