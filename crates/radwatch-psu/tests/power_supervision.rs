use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use radwatch_hal::sim::{PsuCall, SimPowerSupply};
use radwatch_psu::{PowerSupervisor, PowerSupplySettings};
use radwatch_types::PowerStats;

fn over_current() -> PowerStats {
    PowerStats {
        powered: true,
        voltage: 12.0,
        current: 2.4,
        constant_current: true,
        constant_voltage: false,
        voltage_protection: false,
        current_protection: false,
        power_protection: false,
        temperature_protection: false,
        remote_control_active: true,
    }
}

#[test]
fn running_monitor_cuts_output_and_logs_every_poll() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("measurements").join("psu.log");

    let sim = SimPowerSupply::with_output(true);
    let handle = sim.handle();
    handle.push_reading(over_current());

    let settings = PowerSupplySettings {
        max_voltage: Some(14.0),
        max_current: Some(1.5),
        polling_secs: 0.005,
        log_file: Some(log_path.clone()),
        ..PowerSupplySettings::default()
    };
    let mut sup = PowerSupervisor::new(Box::new(sim), &settings).unwrap();
    let (tx, rx) = channel::unbounded();
    sup.start_monitor(tx).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.output_on() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!handle.output_on());

    sup.stop_monitor();
    sup.join_monitor(Duration::from_secs(1)).unwrap();
    let exit = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(exit.monitor, "power-monitor");
    assert!(exit.outcome.is_ok());

    let polls = handle.count(&PsuCall::ReadStats);
    let text = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(text.lines().count(), polls);
    assert!(text.lines().next().unwrap().contains("current=2.400A mode=CC"));

    drop(sup);
    assert!(handle.is_closed());
}

#[test]
fn device_loss_is_reported_on_the_exit_channel() {
    let sim = SimPowerSupply::with_output(true);
    let handle = sim.handle();
    let mut sup = PowerSupervisor::new(Box::new(sim), &PowerSupplySettings::default()).unwrap();
    let (tx, rx) = channel::unbounded();
    handle.fail_reads("usb disconnected");
    sup.start_monitor(tx).unwrap();

    let exit = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let err = exit.outcome.unwrap_err();
    assert!(err.is_unrecoverable());
    sup.join_monitor(Duration::from_secs(1)).unwrap();
}
