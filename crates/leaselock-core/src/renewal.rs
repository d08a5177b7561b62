//! Background lease renewal.
//!
//! One task per live guard. Each tick performs a compare-and-extend so a
//! lease that has already passed to another owner is never extended.
//!
//! The task also tracks how long the lease is known to last: the send time
//! of the last confirmed write plus the lease, minus a clock drift allowance.
//! Once that moment passes without a confirmed renewal the lease is reported
//! lost, before any other client can see the key gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, error, warn};

use crate::error::LeaseLost;
use crate::guard::{LeaseBinding, LeaseStatus};

const DRIFT_FLOOR: Duration = Duration::from_millis(2);

/// Margin for clock rate differences between this process and the store:
/// 1% of the lease plus 2ms.
fn drift_allowance(lease: Duration) -> Duration {
    lease / 100 + DRIFT_FLOOR
}

/// Last instant the lease is guaranteed to be held, given a write sent at `sent_at`.
fn held_until(sent_at: Instant, lease: Duration) -> Instant {
    let expiry = sent_at.checked_add(lease).unwrap_or(sent_at);
    expiry
        .checked_sub(drift_allowance(lease))
        .unwrap_or(sent_at)
        .max(sent_at)
}

/// Handle to a running renewal task, owned by its guard.
pub(crate) struct RenewalTask {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl RenewalTask {
    /// Spawn the renewal loop. The first renewal fires one `period` after
    /// acquisition.
    pub(crate) fn start(
        binding: Arc<LeaseBinding>,
        written_at: Instant,
        period: Duration,
        max_failures: u32,
        status_tx: watch::Sender<LeaseStatus>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let confirmed_until = held_until(written_at, binding.lease);
        let handle = tokio::spawn(Self::run(
            binding,
            confirmed_until,
            period,
            max_failures,
            status_tx,
            stop_rx,
        ));
        Self { stop_tx, handle }
    }

    async fn run(
        binding: Arc<LeaseBinding>,
        mut confirmed_until: Instant,
        period: Duration,
        max_failures: u32,
        status_tx: watch::Sender<LeaseStatus>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        let lost = |reason: LeaseLost| {
            binding.stats.record_lost();
            status_tx.send_replace(LeaseStatus::Lost(reason));
        };

        loop {
            tokio::select! {
                biased;
                // A closed channel means the guard is gone
                _ = stop_rx.recv() => break,
                _ = sleep_until(confirmed_until) => {
                    error!(
                        key = %binding.name,
                        failures = consecutive_failures,
                        "Lease ran out without a confirmed renewal, lease considered lost"
                    );
                    lost(LeaseLost::Expired);
                    break;
                }
                _ = ticker.tick() => {
                    let sent_at = Instant::now();
                    let outcome = tokio::select! {
                        biased;
                        outcome = binding.extend() => Some(outcome),
                        _ = sleep_until(confirmed_until) => None,
                    };

                    match outcome {
                        None => {
                            error!(
                                key = %binding.name,
                                "Lease ran out while a renewal was in flight, lease considered lost"
                            );
                            lost(LeaseLost::Expired);
                            break;
                        }
                        Some(Ok(true)) => {
                            consecutive_failures = 0;
                            confirmed_until = held_until(sent_at, binding.lease);
                            binding.stats.record_renewed();
                            debug!(key = %binding.name, "Lease renewed");
                        }
                        Some(Ok(false)) => {
                            warn!(
                                key = %binding.name,
                                "Lease renewal rejected, owner token no longer matches"
                            );
                            lost(LeaseLost::NotOwner);
                            break;
                        }
                        Some(Err(e)) => {
                            consecutive_failures += 1;
                            binding.stats.record_renew_failed();
                            warn!(
                                key = %binding.name,
                                attempt = consecutive_failures,
                                error = %e,
                                "Lease renewal failed"
                            );
                            if consecutive_failures >= max_failures {
                                error!(
                                    key = %binding.name,
                                    attempts = consecutive_failures,
                                    "Giving up on lease renewal, lease considered lost"
                                );
                                lost(LeaseLost::RenewalFailures {
                                    attempts: consecutive_failures,
                                });
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Signal the loop to stop and wait until it has exited.
    ///
    /// A renewal already in flight completes first; none starts afterwards.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.try_send(());
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            error!(error = %e, "Lease renewal task panicked");
        }
    }

    /// Cancel without waiting, for contexts that cannot await.
    pub(crate) fn abort(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_allowance() {
        assert_eq!(
            drift_allowance(Duration::from_secs(10)),
            Duration::from_millis(102)
        );
        assert_eq!(drift_allowance(Duration::ZERO), DRIFT_FLOOR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_until_stays_inside_the_lease() {
        let now = Instant::now();
        assert_eq!(
            held_until(now, Duration::from_secs(9)),
            now + Duration::from_millis(8_908)
        );
        // Too short to hold any time at all
        assert_eq!(held_until(now, Duration::from_millis(1)), now);
    }
}
