//! Owned single-flight guard.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A busy flag that admits one holder at a time.
///
/// The flag is set by [`SingleFlight::try_acquire`] and cleared when the
/// returned [`FlightPermit`] is dropped, which covers normal completion,
/// early return, and unwinding.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    /// Creates an idle guard.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets the flag if it is clear and returns the permit that clears it.
    ///
    /// Returns `None` without side effects when a permit is already out.
    pub fn try_acquire(self: &Arc<Self>) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                flight: Arc::clone(self),
            })
    }

    /// Whether a permit is currently held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`SingleFlight`] guard. Releases it on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases the guard immediately"]
pub struct FlightPermit {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.flight.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_while_held() {
        let flight = SingleFlight::new();

        let permit = flight.try_acquire();
        assert!(permit.is_some());
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());
        assert!(flight.try_acquire().is_none());
        assert!(flight.is_busy());

        drop(permit);
        assert!(!flight.is_busy());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn unwinding_releases_the_permit() {
        let flight = SingleFlight::new();
        let held = Arc::clone(&flight);

        let result = std::panic::catch_unwind(move || {
            let _permit = held.try_acquire().unwrap();
            panic!("run crashed");
        });

        assert!(result.is_err());
        assert!(!flight.is_busy());
    }

    #[test]
    fn concurrent_acquirers_get_one_permit() {
        let flight = SingleFlight::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Never released, so every later acquirer must lose.
                    let permit = flight.try_acquire();
                    let won = permit.is_some();
                    std::mem::forget(permit);
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
