//! In-process simulation drivers for running the supervisor without a beam
//! gate, a bench supply or a managed switch.
//!
//! Every driver records what it was asked to do so tests can assert on call
//! order. The recording handles are cheap clones that stay valid after the
//! driver itself has been moved into a [`BeamActuator`][crate::beam::BeamActuator]
//! or a power supervisor.
//!
//! # Example
//!
//! ```rust
//! use radwatch_hal::beam::BeamActuator;
//! use radwatch_hal::sim::SimRelay;
//!
//! let beam = BeamActuator::new(SimRelay::new("beam"));
//! beam.open();
//! assert!(beam.is_open());
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use radwatch_types::{PowerStats, RadError, SwitchStatus, SwitchTarget};
use tracing::trace;

use crate::power_supply::PowerSupply;
use crate::relay::Relay;
use crate::switch::PowerSwitch;

/// Shared, ordered record of driver activity.
pub type Journal = Arc<Mutex<Vec<String>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Stub relay
// ────────────────────────────────────────────────────────────────────────────

/// A simulated relay (discrete on/off device) that records the current state.
/// Always succeeds.
pub struct SimRelay {
    id: String,
    state: bool,
    journal: Option<Journal>,
}

impl SimRelay {
    /// Create a new simulated relay with the given identifier.
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            state: false,
            journal: None,
        })
    }

    /// Create a simulated relay that appends `relay:on` / `relay:off` to
    /// `journal` on every write.
    pub fn with_journal(id: impl Into<String>, journal: Journal) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            state: false,
            journal: Some(journal),
        })
    }
}

impl Relay for SimRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, active: bool) -> Result<(), RadError> {
        self.state = active;
        if let Some(journal) = &self.journal {
            lock(journal).push(if active { "relay:on" } else { "relay:off" }.to_string());
        }
        trace!(relay = %self.id, "Logical {}", if active { "ON" } else { "OFF" });
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub power supply
// ────────────────────────────────────────────────────────────────────────────

/// One call received by a [`SimPowerSupply`].
#[derive(Debug, Clone, PartialEq)]
pub enum PsuCall {
    SetRemote(bool),
    GetOutputOn,
    SetOutputOn(bool),
    SetVoltage(f64),
    SetCurrent(f64),
    ReadStats,
    Close,
}

#[derive(Default)]
struct SimSupplyState {
    remote: bool,
    output_on: bool,
    voltage: f64,
    current: f64,
    closed: bool,
    readings: VecDeque<PowerStats>,
    fail_reads: Option<String>,
    calls: Vec<PsuCall>,
}

/// A simulated bench supply. Readings come from a script pushed through
/// [`SimSupplyHandle::push_reading`]; once the script is exhausted the
/// supply reports its own set-points.
pub struct SimPowerSupply {
    state: Arc<Mutex<SimSupplyState>>,
}

/// Inspection handle for a [`SimPowerSupply`].
#[derive(Clone)]
pub struct SimSupplyHandle {
    state: Arc<Mutex<SimSupplyState>>,
}

impl SimPowerSupply {
    /// A supply with output off and zero set-points.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimSupplyState::default())),
        }
    }

    /// A supply whose output stage starts in `output_on`.
    pub fn with_output(output_on: bool) -> Self {
        let sim = Self::new();
        lock(&sim.state).output_on = output_on;
        sim
    }

    pub fn handle(&self) -> SimSupplyHandle {
        SimSupplyHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn with_state<T>(
        &self,
        call: PsuCall,
        f: impl FnOnce(&mut SimSupplyState) -> T,
    ) -> Result<T, RadError> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if state.closed {
            return Err(RadError::Device {
                details: "simulated supply connection is closed".into(),
            });
        }
        Ok(f(&mut state))
    }
}

impl Default for SimPowerSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerSupply for SimPowerSupply {
    fn set_remote(&mut self, remote: bool) -> Result<(), RadError> {
        self.with_state(PsuCall::SetRemote(remote), |s| s.remote = remote)
    }

    fn output_on(&mut self) -> Result<bool, RadError> {
        self.with_state(PsuCall::GetOutputOn, |s| s.output_on)
    }

    fn set_output_on(&mut self, on: bool) -> Result<(), RadError> {
        self.with_state(PsuCall::SetOutputOn(on), |s| s.output_on = on)
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), RadError> {
        self.with_state(PsuCall::SetVoltage(volts), |s| s.voltage = volts)
    }

    fn set_current(&mut self, amps: f64) -> Result<(), RadError> {
        self.with_state(PsuCall::SetCurrent(amps), |s| s.current = amps)
    }

    fn current_stats(&mut self) -> Result<PowerStats, RadError> {
        let reading = self.with_state(PsuCall::ReadStats, |s| {
            if let Some(details) = s.fail_reads.clone() {
                return Err(RadError::Device { details });
            }
            Ok(s.readings.pop_front().unwrap_or(PowerStats {
                powered: s.output_on,
                voltage: if s.output_on { s.voltage } else { 0.0 },
                current: 0.0,
                constant_current: false,
                constant_voltage: true,
                voltage_protection: false,
                current_protection: false,
                power_protection: false,
                temperature_protection: false,
                remote_control_active: s.remote,
            }))
        })?;
        reading
    }

    fn close(&mut self) -> Result<(), RadError> {
        let mut state = lock(&self.state);
        state.calls.push(PsuCall::Close);
        state.closed = true;
        Ok(())
    }
}

impl SimSupplyHandle {
    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<PsuCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &PsuCall) -> usize {
        lock(&self.state).calls.iter().filter(|c| *c == call).count()
    }

    /// Queue a reading for the next `current_stats` call.
    pub fn push_reading(&self, stats: PowerStats) {
        lock(&self.state).readings.push_back(stats);
    }

    /// Make every subsequent read fail with [`RadError::Device`].
    pub fn fail_reads(&self, details: impl Into<String>) {
        lock(&self.state).fail_reads = Some(details.into());
    }

    pub fn output_on(&self) -> bool {
        lock(&self.state).output_on
    }

    pub fn remote(&self) -> bool {
        lock(&self.state).remote
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub network switch
// ────────────────────────────────────────────────────────────────────────────

/// A simulated network switch that records every outlet command.
#[derive(Clone, Default)]
pub struct SimSwitch {
    calls: Arc<Mutex<Vec<(SwitchStatus, SwitchTarget)>>>,
}

impl SimSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(SwitchStatus, SwitchTarget)> {
        lock(&self.calls).clone()
    }
}

impl PowerSwitch for SimSwitch {
    fn set_outlet(&self, status: SwitchStatus, target: &SwitchTarget) -> Result<String, RadError> {
        lock(&self.calls).push((status, target.clone()));
        Ok(format!("simulated outlet {} on {} set {status}", target.port, target.ip))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
