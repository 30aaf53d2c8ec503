//! Hedged requests
//!
//! A hedge races a duplicate attempt against a slow primary. The primary
//! starts immediately; if it has not completed after [`Hedge::delay`], one
//! more attempt is launched and whichever finishes first is adopted.
//!
//! ```text
//! starting ──► primary_in_flight ──(delay elapsed)──► both_in_flight
//!                     │                                   │
//!                     └──(primary returns)──► primary_won ◄┤ (primary first)
//!                                                          └──► hedge_won (hedge first or tied)
//! ```
//!
//! Cancellation is advisory: the losing attempt is dropped, which aborts its
//! HTTP exchange as soon as the transport notices, and a hedge that was never
//! launched never starts. Dropping the [`Hedge::race`] future cancels both.
//! Callers must tolerate the loser having reached the server anyway.

use prometheus::IntCounter;
use std::future::Future;
use std::time::Duration;

/// Delay before a hedge attempt is launched
pub const DEFAULT_HEDGE_DELAY: Duration = Duration::from_millis(75);

/// Which attempt produced the adopted result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Primary,
    Hedge,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::Primary => "primary",
            Winner::Hedge => "hedge",
        }
    }
}

/// Result of a hedged race
#[derive(Debug)]
pub struct Raced<T> {
    /// Outcome of the adopted attempt, which may be an error
    pub result: T,
    pub winner: Winner,
    /// Whether the hedge attempt was launched at all
    pub hedged: bool,
}

/// Hedging policy with optional launch/win counters
#[derive(Debug, Clone)]
pub struct Hedge {
    delay: Duration,
    launched: Option<IntCounter>,
    won: Option<IntCounter>,
}

impl Default for Hedge {
    fn default() -> Self {
        Self::new(DEFAULT_HEDGE_DELAY)
    }
}

impl Hedge {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            launched: None,
            won: None,
        }
    }

    /// Count launched hedges in `launched` and adopted hedges in `won`
    pub fn with_counters(mut self, launched: IntCounter, won: IntCounter) -> Self {
        self.launched = Some(launched);
        self.won = Some(won);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `attempt` as a primary and, if it is slow, once more as a hedge.
    ///
    /// The first attempt to complete wins, whether it succeeded or not.
    /// `attempt` must produce independent futures that are safe to run
    /// concurrently against the same target.
    pub async fn race<F, Fut, T>(&self, mut attempt: F) -> Raced<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let primary = attempt();
        tokio::pin!(primary);

        let timer = tokio::time::sleep(self.delay);
        tokio::pin!(timer);

        tokio::select! {
            biased;
            result = &mut primary => {
                // The timer is dropped here, so the hedge never launches.
                return Raced {
                    result,
                    winner: Winner::Primary,
                    hedged: false,
                };
            }
            () = &mut timer => {}
        }

        if let Some(launched) = &self.launched {
            launched.inc();
        }
        tracing::debug!(delay = ?self.delay, "primary attempt is slow, launching hedge");

        let hedge = attempt();
        tokio::pin!(hedge);

        // Polled hedge first: when both are ready in the same poll the
        // hedge is adopted.
        let raced = tokio::select! {
            biased;
            result = &mut hedge => {
                if let Some(won) = &self.won {
                    won.inc();
                }
                Raced {
                    result,
                    winner: Winner::Hedge,
                    hedged: true,
                }
            }
            result = &mut primary => Raced {
                result,
                winner: Winner::Primary,
                hedged: true,
            },
        };

        tracing::debug!(
            winner = raced.winner.as_str(),
            "competing request succeeded, abandoning the other attempt"
        );
        raced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counters() -> (IntCounter, IntCounter) {
        (
            IntCounter::new("test_hedges_total", "launched").unwrap(),
            IntCounter::new("test_hedges_successful_total", "won").unwrap(),
        )
    }

    /// Attempt factory whose first call (the primary) takes `primary` and
    /// every later call takes `hedge`. Each result is tagged with its call index.
    fn timed_attempts(
        calls: &AtomicUsize,
        primary: Duration,
        hedge: Duration,
    ) -> impl FnMut() -> Pin<Box<dyn Future<Output = usize>>> + '_ {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let delay = if n == 0 { primary } else { hedge };
            Box::pin(async move {
                sleep(delay).await;
                n
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_primary_wins_without_hedge() {
        let (launched, won) = counters();
        let hedge = Hedge::default().with_counters(launched.clone(), won.clone());
        let calls = AtomicUsize::new(0);

        let raced = hedge
            .race(timed_attempts(
                &calls,
                Duration::from_millis(20),
                Duration::from_millis(1),
            ))
            .await;

        assert_eq!(raced.result, 0);
        assert_eq!(raced.winner, Winner::Primary);
        assert!(!raced.hedged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(launched.get(), 0);
        assert_eq!(won.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_primary_loses_to_hedge() {
        let (launched, won) = counters();
        let hedge = Hedge::default().with_counters(launched.clone(), won.clone());
        let calls = AtomicUsize::new(0);

        // primary completes at 200ms, hedge launched at 75ms completes at 100ms
        let raced = hedge
            .race(timed_attempts(
                &calls,
                Duration::from_millis(200),
                Duration::from_millis(25),
            ))
            .await;

        assert_eq!(raced.result, 1);
        assert_eq!(raced.winner, Winner::Hedge);
        assert!(raced.hedged);
        assert_eq!(launched.get(), 1);
        assert_eq!(won.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_primary_still_beats_slower_hedge() {
        let (launched, won) = counters();
        let hedge = Hedge::default().with_counters(launched.clone(), won.clone());
        let calls = AtomicUsize::new(0);

        // primary at 100ms, hedge at 75ms + 100ms
        let raced = hedge
            .race(timed_attempts(
                &calls,
                Duration::from_millis(100),
                Duration::from_millis(100),
            ))
            .await;

        assert_eq!(raced.winner, Winner::Primary);
        assert!(raced.hedged);
        assert_eq!(launched.get(), 1);
        assert_eq!(won.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_finish_adopts_hedge() {
        let (launched, won) = counters();
        let hedge = Hedge::default().with_counters(launched.clone(), won.clone());
        let calls = AtomicUsize::new(0);

        // primary at 100ms, hedge launched at 75ms also completes at 100ms
        let raced = hedge
            .race(timed_attempts(
                &calls,
                Duration::from_millis(100),
                Duration::from_millis(25),
            ))
            .await;

        assert_eq!(raced.result, 1);
        assert_eq!(raced.winner, Winner::Hedge);
        assert!(raced.hedged);
        assert_eq!(launched.get(), 1);
        assert_eq!(won.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_completion_wins_even_when_it_failed() {
        let hedge = Hedge::default();
        let calls = AtomicUsize::new(0);

        let raced = hedge
            .race(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        sleep(Duration::from_millis(500)).await;
                        Ok(())
                    } else {
                        Err("hedge failed")
                    }
                }
            })
            .await;

        assert_eq!(raced.winner, Winner::Hedge);
        assert_eq!(raced.result, Err("hedge failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_delay() {
        let (launched, won) = counters();
        let hedge =
            Hedge::new(Duration::from_millis(10)).with_counters(launched.clone(), won.clone());
        let calls = AtomicUsize::new(0);

        let raced = hedge
            .race(timed_attempts(
                &calls,
                Duration::from_millis(20),
                Duration::from_millis(20),
            ))
            .await;

        assert_eq!(hedge.delay(), Duration::from_millis(10));
        assert_eq!(raced.winner, Winner::Primary);
        assert!(raced.hedged);
        assert_eq!(launched.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_race_cancels_attempts() {
        let hedge = Hedge::default();
        let finished = AtomicUsize::new(0);

        let race = hedge.race(|| async {
            sleep(Duration::from_secs(10)).await;
            finished.fetch_add(1, Ordering::SeqCst);
        });

        let timed_out = tokio::time::timeout(Duration::from_millis(150), race).await;
        assert!(timed_out.is_err());

        sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hedges_won_never_exceeds_launched() {
        let (launched, won) = counters();
        let hedge = Hedge::default().with_counters(launched.clone(), won.clone());

        for primary_ms in [10u64, 50, 80, 150, 300] {
            let calls = AtomicUsize::new(0);
            hedge
                .race(timed_attempts(
                    &calls,
                    Duration::from_millis(primary_ms),
                    Duration::from_millis(30),
                ))
                .await;
            assert!(won.get() <= launched.get());
        }
        assert_eq!(launched.get(), 3);
        assert_eq!(won.get(), 2);
    }
}
