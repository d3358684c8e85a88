//! Per-kind Bernoulli sampling at queue admission.
//!
//! Decisions are taken once, when an event is admitted; an admitted event is
//! never dropped later except by queue overflow.  Two overrides bypass the
//! coin flip: errors of severity >= high, and performance events whose page
//! load time exceeds the slow-load threshold.

use std::sync::Mutex;

use lookout_protocol::{Event, EventCategory, Payload, Severity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Admission rates in `[0, 1]` per event kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingRates {
    pub performance: f64,
    pub error: f64,
    pub behavior: f64,
    pub replay: f64,
}

impl Default for SamplingRates {
    fn default() -> Self {
        SamplingRates {
            performance: 1.0,
            error: 1.0,
            behavior: 0.1,
            replay: 0.01,
        }
    }
}

impl SamplingRates {
    fn rate(&self, category: EventCategory) -> f64 {
        match category {
            EventCategory::Performance => self.performance,
            EventCategory::Error => self.error,
            EventCategory::Behavior => self.behavior,
            EventCategory::Replay => self.replay,
        }
    }
}

pub struct Sampler {
    rates: SamplingRates,
    /// Performance events slower than this (ms) always pass.
    slow_load_threshold_ms: f64,
    rng: Mutex<StdRng>,
}

impl Sampler {
    pub fn new(rates: SamplingRates, slow_load_threshold_ms: f64) -> Self {
        Sampler {
            rates,
            slow_load_threshold_ms,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sampler for tests.
    pub fn with_seed(rates: SamplingRates, slow_load_threshold_ms: f64, seed: u64) -> Self {
        Sampler {
            rates,
            slow_load_threshold_ms,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Decide admission for one event.
    pub fn admit(&self, event: &Event) -> bool {
        match &event.payload {
            Payload::Error(e) if e.severity >= Severity::High => return true,
            Payload::Performance(p)
                if self.slow_load_threshold_ms > 0.0
                    && p.metrics.page_load_time > self.slow_load_threshold_ms =>
            {
                return true;
            }
            _ => {}
        }

        let rate = self.rates.rate(event.category());
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        let roll: f64 = match self.rng.lock() {
            Ok(mut rng) => rng.random(),
            Err(_) => return true,
        };
        roll < rate
    }
}
