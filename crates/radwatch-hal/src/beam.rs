//! [`BeamActuator`] – the single point of truth for "is the beam open".
//!
//! Both the heartbeat watchdog and the command listener drive the beam, so
//! every transition runs under one mutex: read the flag, drive the relay,
//! update the flag and log, all without interleaving.
//!
//! # Ordering
//!
//! - **close** drives the output off, then logs.
//! - **open** logs, then drives the output on.
//!
//! A state-change line is emitted only for an actual transition; opening an
//! open beam or closing a closed one is silent. If driving the output on
//! fails, the announcement is not repeated by further open attempts until
//! the beam opens or is closed again.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info};

use crate::relay::Relay;

struct BeamInner {
    relay: Box<dyn Relay>,
    open: bool,
    /// "Turning beam on." was logged for an open that has not landed yet.
    open_announced: bool,
    transitions: u64,
}

/// Thread-safe wrapper around the physical beam gate.
pub struct BeamActuator {
    inner: Mutex<BeamInner>,
}

impl BeamActuator {
    /// Wrap `relay`. The relay is driven off immediately so the beam always
    /// starts closed.
    pub fn new(mut relay: Box<dyn Relay>) -> Self {
        if let Err(e) = relay.set_state(false) {
            error!(relay = relay.id(), error = %e, "Could not drive beam output off at startup");
        }
        Self {
            inner: Mutex::new(BeamInner {
                relay,
                open: false,
                open_announced: false,
                transitions: 0,
            }),
        }
    }

    /// Open the beam.
    pub fn open(&self) {
        let mut inner = self.lock();
        let opening = !inner.open;
        if opening && !inner.open_announced {
            info!("Turning beam on.");
            inner.open_announced = true;
        }
        match inner.relay.set_state(true) {
            Ok(()) => {
                if opening {
                    inner.transitions += 1;
                }
                inner.open = true;
                inner.open_announced = false;
            }
            Err(e) => error!(error = %e, "Could not drive beam output on; beam stays closed"),
        }
    }

    /// Close the beam. The output is driven off on every call, whether or
    /// not the beam was considered open.
    pub fn close(&self) {
        let mut inner = self.lock();
        if let Err(e) = inner.relay.set_state(false) {
            // Physical state unknown: keep reporting open so the next close
            // retries and logs.
            error!(error = %e, "Could not drive beam output off");
            return;
        }
        if inner.open {
            info!("Turning beam off.");
            inner.transitions += 1;
        }
        inner.open = false;
        inner.open_announced = false;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of logged open/close transitions since construction.
    pub fn transition_count(&self) -> u64 {
        self.lock().transitions
    }

    fn lock(&self) -> MutexGuard<'_, BeamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Journal, SimRelay};
    use radwatch_types::RadError;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    // ------------------------------------------------------------------
    // Journal layer: records log messages into the same journal the
    // simulated relay writes to, so relative ordering can be asserted.
    // ------------------------------------------------------------------

    struct JournalLayer(Journal);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for JournalLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(format!("log:{}", visitor.0));
        }
    }

    /// Marks the start of each beam announcement, stalls, then records it.
    struct StallingLayer {
        journal: Journal,
        stall: Duration,
    }

    impl<S: Subscriber> Layer<S> for StallingLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            if !visitor.0.starts_with("Turning beam") {
                return;
            }
            self.journal.lock().unwrap().push(format!("start:{}", visitor.0));
            thread::sleep(self.stall);
            self.journal.lock().unwrap().push(format!("log:{}", visitor.0));
        }
    }

    fn index_of(journal: &[String], entry: &str) -> usize {
        journal
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {journal:?}"))
    }

    struct FailingRelay;

    /// Refuses to switch on for the first `failures` attempts.
    struct FlakyRelay {
        failures: usize,
    }

    impl Relay for FlakyRelay {
        fn id(&self) -> &str {
            "flaky"
        }
        fn set_state(&mut self, active: bool) -> Result<(), RadError> {
            if active && self.failures > 0 {
                self.failures -= 1;
                return Err(RadError::Io {
                    details: "gpio write failed".into(),
                });
            }
            Ok(())
        }
        fn state(&self) -> bool {
            false
        }
    }

    impl Relay for FailingRelay {
        fn id(&self) -> &str {
            "broken"
        }
        fn set_state(&mut self, _active: bool) -> Result<(), RadError> {
            Err(RadError::Io {
                details: "gpio write failed".into(),
            })
        }
        fn state(&self) -> bool {
            false
        }
    }

    #[test]
    fn starts_closed() {
        let beam = BeamActuator::new(SimRelay::new("beam"));
        assert!(!beam.is_open());
        assert_eq!(beam.transition_count(), 0);
    }

    #[test]
    fn redundant_calls_do_not_count_as_transitions() {
        let beam = BeamActuator::new(SimRelay::new("beam"));
        // (call, expected open afterwards)
        let script = [
            (true, true),
            (true, true),
            (false, false),
            (false, false),
            (false, false),
            (true, true),
            (false, false),
        ];
        let mut expected_changes = 0;
        let mut previous = beam.is_open();
        for (open, expect_open) in script {
            if open {
                beam.open();
            } else {
                beam.close();
            }
            assert_eq!(beam.is_open(), expect_open);
            if beam.is_open() != previous {
                expected_changes += 1;
            }
            previous = beam.is_open();
        }
        assert_eq!(beam.transition_count(), expected_changes);
        assert_eq!(expected_changes, 4);
    }

    #[test]
    fn close_drives_output_before_logging_and_open_logs_first() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let subscriber =
            tracing_subscriber::registry().with(JournalLayer(journal.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let beam = BeamActuator::new(SimRelay::with_journal("beam", journal.clone()));
            journal.lock().unwrap().clear();
            beam.open();
            beam.close();
        });

        let entries = journal.lock().unwrap().clone();
        let log_on = index_of(&entries, "log:Turning beam on.");
        let relay_on = index_of(&entries, "relay:on");
        let relay_off = index_of(&entries, "relay:off");
        let log_off = index_of(&entries, "log:Turning beam off.");

        assert!(log_on < relay_on, "open must log before driving output");
        assert!(relay_off < log_off, "close must drive output before logging");
    }

    #[test]
    fn ordering_holds_while_logging_stalls() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let beam = Arc::new(BeamActuator::new(SimRelay::with_journal("beam", journal.clone())));
        journal.lock().unwrap().clear();

        let layer = StallingLayer {
            journal: journal.clone(),
            stall: Duration::from_millis(300),
        };
        let worker = {
            let beam = Arc::clone(&beam);
            thread::spawn(move || {
                let subscriber = tracing_subscriber::registry().with(layer);
                tracing::subscriber::with_default(subscriber, || {
                    beam.open();
                    beam.close();
                });
            })
        };

        let snapshot_at = |entry: &str| -> Vec<String> {
            let deadline = Instant::now() + Duration::from_secs(3);
            loop {
                let entries = journal.lock().unwrap().clone();
                if entries.iter().any(|e| e == entry) || Instant::now() > deadline {
                    return entries;
                }
                thread::sleep(Duration::from_millis(5));
            }
        };

        // While "Turning beam on." is stuck in the logger the output stays off.
        let during_open = snapshot_at("start:Turning beam on.");
        thread::sleep(Duration::from_millis(100));
        assert!(!journal.lock().unwrap().contains(&"relay:on".to_string()));
        assert_eq!(during_open, vec!["start:Turning beam on.".to_string()]);

        // While "Turning beam off." is stuck the output is already off.
        let during_close = snapshot_at("start:Turning beam off.");
        assert_eq!(
            during_close,
            vec![
                "start:Turning beam on.".to_string(),
                "log:Turning beam on.".to_string(),
                "relay:on".to_string(),
                "relay:off".to_string(),
                "start:Turning beam off.".to_string(),
            ]
        );
        worker.join().unwrap();
        assert!(!beam.is_open());
    }

    #[test]
    fn failed_open_is_announced_once() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(JournalLayer(journal.clone()));

        let beam = BeamActuator::new(Box::new(FlakyRelay { failures: 2 }));
        tracing::subscriber::with_default(subscriber, || {
            beam.open();
            beam.open();
            assert!(!beam.is_open());
            beam.open();
            assert!(beam.is_open());
            beam.close();
            beam.open();
        });

        let entries = journal.lock().unwrap().clone();
        let count = |entry: &str| entries.iter().filter(|e| *e == entry).count();
        assert_eq!(count("log:Turning beam on."), 2);
        assert_eq!(count("log:Could not drive beam output on; beam stays closed"), 2);
        assert_eq!(count("log:Turning beam off."), 1);
        assert_eq!(beam.transition_count(), 3);
    }

    #[test]
    fn close_always_drives_output_off() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let beam = BeamActuator::new(SimRelay::with_journal("beam", journal.clone()));
        journal.lock().unwrap().clear();

        beam.close();
        beam.close();
        let entries = journal.lock().unwrap().clone();
        assert_eq!(entries, vec!["relay:off".to_string(), "relay:off".to_string()]);
        assert_eq!(beam.transition_count(), 0);
    }

    #[test]
    fn relay_failure_does_not_hold_the_lock() {
        let beam = BeamActuator::new(Box::new(FailingRelay));
        beam.open();
        assert!(!beam.is_open());
        beam.close();
        // Lock is free again.
        assert!(!beam.is_open());
        assert_eq!(beam.transition_count(), 0);
    }

    #[test]
    fn concurrent_callers_never_interleave_transitions() {
        let beam = Arc::new(BeamActuator::new(SimRelay::new("beam")));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let beam = Arc::clone(&beam);
                thread::spawn(move || {
                    for n in 0..200 {
                        if (n + i) % 2 == 0 {
                            beam.open();
                        } else {
                            beam.close();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        beam.close();
        assert!(!beam.is_open());
        // Every counted transition alternates, so the count is even once
        // the beam is back to closed.
        assert_eq!(beam.transition_count() % 2, 0);
    }
}
