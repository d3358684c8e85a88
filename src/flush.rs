//! Flush-policy dispatch.
//!
//! Three triggers drive a flush: a trailing debounce armed (and re-armed)
//! by error admissions, an absorbing throttle window opened by the first
//! non-error admission, and the periodic collection tick.  All three funnel
//! into the same collect-then-flush callback, which drains the queue before
//! awaiting the POST so interleaved admissions land in the next batch.

use std::time::Duration;

use lookout_protocol::EventCategory;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    /// Trailing debounce after an error admission; re-armed per error.
    pub error_debounce: Duration,
    /// Absorbing window opened by the first non-error admission; not
    /// re-armed by later admissions inside the window.
    pub routine_throttle: Duration,
    /// Periodic collection interval.
    pub periodic: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy {
            error_debounce: Duration::from_secs(1),
            routine_throttle: Duration::from_secs(5),
            periodic: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSignal {
    Error,
    Routine,
    Immediate,
}

/// Clonable handle the capture components use to report admissible work.
#[derive(Clone)]
pub struct FlushNotifier {
    tx: mpsc::UnboundedSender<FlushSignal>,
}

impl FlushNotifier {
    pub fn event_captured(&self, category: EventCategory) {
        let signal = match category {
            EventCategory::Error => FlushSignal::Error,
            _ => FlushSignal::Routine,
        };
        let _ = self.tx.send(signal);
    }

    pub fn immediate(&self) {
        let _ = self.tx.send(FlushSignal::Immediate);
    }
}

pub fn channel() -> (FlushNotifier, mpsc::UnboundedReceiver<FlushSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FlushNotifier { tx }, rx)
}

/// Run the scheduler until the signal channel closes.
///
/// The receiver is borrowed through a lock so an aborted scheduler (on
/// `stop`) releases it for the next `start`.  `flush` is the
/// collect-then-send callback; it is never run reentrantly.
pub async fn run<F, Fut>(
    policy: FlushPolicy,
    rx: std::sync::Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FlushSignal>>>,
    mut flush: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut rx = rx.lock().await;
    let mut error_deadline: Option<Instant> = None;
    let mut routine_deadline: Option<Instant> = None;
    let mut periodic = tokio::time::interval_at(Instant::now() + policy.periodic, policy.periodic);
    periodic.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let next_deadline = match (error_deadline, routine_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        // Disabled branches still evaluate their expression; park far out.
        let sleep_target =
            next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = periodic.tick() => {
                error_deadline = None;
                routine_deadline = None;
                flush().await;
            }
            _ = tokio::time::sleep_until(sleep_target), if next_deadline.is_some() => {
                error_deadline = None;
                routine_deadline = None;
                flush().await;
            }
            signal = rx.recv() => match signal {
                None => break,
                Some(FlushSignal::Error) => {
                    error_deadline = Some(Instant::now() + policy.error_debounce);
                }
                Some(FlushSignal::Routine) => {
                    if routine_deadline.is_none() {
                        routine_deadline = Some(Instant::now() + policy.routine_throttle);
                    }
                }
                Some(FlushSignal::Immediate) => {
                    error_deadline = None;
                    routine_deadline = None;
                    flush().await;
                }
            },
        }
    }
}
