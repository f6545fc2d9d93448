use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use radwatch_hal::BeamActuator;
use radwatch_hal::sim::{SimPowerSupply, SimRelay, SimSupplyHandle, SimSwitch};
use radwatch_kernel::{CommandSettings, HeartbeatSettings, SupervisorSettings, TransferSettings};
use radwatch_psu::{PowerSupervisor, PowerSupplySettings};
use radwatch_runtime::{ExitReason, SupervisionContext};
use radwatch_types::{RadError, SwitchStatus, SwitchTarget};

fn settings(download: &std::path::Path) -> SupervisorSettings {
    SupervisorSettings {
        heartbeat: HeartbeatSettings {
            port: 0,
            timeout_secs: 0.2,
            log_every: 5,
            ..HeartbeatSettings::default()
        },
        command: CommandSettings {
            port: 0,
            timeout_secs: 0.05,
            ..CommandSettings::default()
        },
        transfer: TransferSettings {
            port: 0,
            timeout_secs: 0.05,
            download_path: download.to_path_buf(),
            ..TransferSettings::default()
        },
        switch_target: SwitchTarget {
            model: "default".into(),
            ip: "192.168.1.100".into(),
            port: 3,
        },
        join_timeout: Duration::from_secs(1),
    }
}

fn power() -> (PowerSupervisor, SimSupplyHandle) {
    let sim = SimPowerSupply::with_output(true);
    let handle = sim.handle();
    let settings = PowerSupplySettings {
        polling_secs: 0.005,
        max_voltage: Some(14.0),
        max_current: Some(1.5),
        ..PowerSupplySettings::default()
    };
    (PowerSupervisor::new(Box::new(sim), &settings).unwrap(), handle)
}

fn send(to: SocketAddr, payload: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(payload, to).unwrap();
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

struct Rig {
    ctx: SupervisionContext,
    beam: Arc<BeamActuator>,
    switch: SimSwitch,
    psu: SimSupplyHandle,
    _dir: tempfile::TempDir,
}

fn rig(shutdown_board_on_fatal: bool) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let beam = Arc::new(BeamActuator::new(SimRelay::new("beam")));
    let switch = SimSwitch::new();
    let (power, psu) = power();
    let ctx = SupervisionContext::start(
        settings(dir.path()),
        Arc::clone(&beam),
        Arc::new(switch.clone()),
        Some(power),
        shutdown_board_on_fatal,
    )
    .unwrap();
    Rig {
        ctx,
        beam,
        switch,
        psu,
        _dir: dir,
    }
}

#[test]
fn interrupt_closes_beam_and_releases_supply() {
    let mut rig = rig(true);
    send(rig.ctx.supervisor().command_addr(), b"OPEN_BEAM");
    assert!(wait_until(|| rig.beam.is_open()));

    let (int_tx, int_rx) = channel::bounded(1);
    int_tx.send(()).unwrap();
    let reason = rig.ctx.run(&int_rx);

    assert_eq!(reason, ExitReason::Interrupted);
    assert_eq!(reason.exit_code(), 130);
    assert!(!rig.beam.is_open());
    assert!(rig.psu.is_closed());
    assert!(!rig.psu.remote());
    // An interrupt never powers the board off.
    assert!(rig.switch.calls().is_empty());
    assert!(rig.ctx.teardown(None).is_empty());
}

#[test]
fn power_device_loss_tears_down_and_cuts_the_board() {
    let mut rig = rig(true);
    send(rig.ctx.supervisor().command_addr(), b"OPEN_BEAM");
    assert!(wait_until(|| rig.beam.is_open()));
    rig.psu.fail_reads("usb disconnected");

    let (_int_tx, int_rx) = channel::bounded::<()>(1);
    let reason = rig.ctx.run(&int_rx);

    match &reason {
        ExitReason::MonitorFailed { monitor, error } => {
            assert_eq!(monitor, "power-monitor");
            assert!(matches!(error, RadError::Device { .. }));
        }
        other => panic!("unexpected exit reason {other:?}"),
    }
    assert_eq!(reason.exit_code(), 10);
    assert!(!rig.beam.is_open());
    assert!(rig.psu.is_closed());
    let calls = rig.switch.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, SwitchStatus::Off);
}

#[test]
fn shutdown_command_powers_board_off_exactly_once() {
    let rig = rig(false);
    send(rig.ctx.supervisor().command_addr(), b"SHUTDOWN_BOARD");
    assert!(wait_until(|| !rig.switch.calls().is_empty()));
    thread::sleep(Duration::from_millis(100));

    let calls = rig.switch.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, SwitchStatus::Off);
    assert_eq!(calls[0].1.port, 3);
}

#[test]
fn heartbeat_gap_closes_beam_once_and_watchdog_rearms() {
    let rig = rig(false);
    let hb = rig.ctx.supervisor().heartbeat_addr();

    send(rig.ctx.supervisor().command_addr(), b"OPEN_BEAM");
    assert!(wait_until(|| rig.beam.is_open()));

    // Beats well inside the 0.2 s timeout keep the beam open.
    for _ in 0..12 {
        send(hb, b"HEARTBEAT");
        thread::sleep(Duration::from_millis(50));
        assert!(rig.beam.is_open());
    }

    // Silence past the timeout closes it exactly once.
    thread::sleep(Duration::from_millis(600));
    assert!(!rig.beam.is_open());
    assert_eq!(rig.beam.transition_count(), 2);

    // The watchdog is waiting for a new first beat; the beam can be reopened.
    send(rig.ctx.supervisor().command_addr(), b"OPEN_BEAM");
    assert!(wait_until(|| rig.beam.is_open()));
    send(hb, b"HEARTBEAT");
    thread::sleep(Duration::from_millis(100));
    assert!(rig.beam.is_open());
}

#[test]
fn start_failure_releases_power_supply() {
    let dir = tempfile::tempdir().unwrap();
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut clash = settings(dir.path());
    clash.heartbeat.port = taken.local_addr().unwrap().port();

    let (power, psu) = power();
    let err = SupervisionContext::start(
        clash,
        Arc::new(BeamActuator::new(SimRelay::new("beam"))),
        Arc::new(SimSwitch::new()),
        Some(power),
        false,
    )
    .err()
    .unwrap();

    assert!(matches!(err, RadError::Bind { .. }));
    assert!(psu.is_closed());
}
