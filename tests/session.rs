use ardufsm::{
    config::SessionConfig,
    dummy_device::DummyDevice,
    scheduler::SchedulerKind,
    session::Session,
    trial_matrix::{read_log_lines, Side, TrialMatrix},
    trial_speak::RELEASE_TRIAL,
};
use std::path::Path;

fn simulation_config(dir: &Path) -> SessionConfig {
    SessionConfig {
        logfile: Some(dir.join("ardulines.sim")),
        ..SessionConfig::simulation()
    }
}

#[test]
fn logfile_rebuilds_the_same_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let config = simulation_config(dir.path());
    let mut session =
        Session::with_device(DummyDevice::new(0.8, 3).with_seed(11), &config).unwrap();

    session.run_headless(15).unwrap();
    let live = session.trial_matrix().clone();
    session.close().unwrap();

    let lines = read_log_lines(dir.path().join("ardulines.sim")).unwrap();
    assert_eq!(lines.as_slice(), session.chatter().lines());
    assert_eq!(TrialMatrix::build(&lines).unwrap(), live);
}

#[test]
fn every_release_is_preceded_by_its_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let config = simulation_config(dir.path());
    let mut session =
        Session::with_device(DummyDevice::new(0.8, 2).with_seed(5), &config).unwrap();
    session.run_headless(10).unwrap();

    let received = session.chatter().device().unwrap().received();
    let releases = received.iter().filter(|l| *l == RELEASE_TRIAL).count();
    assert!(releases >= 10);
    assert!(received[0].starts_with("SET "));
    assert_eq!(received.last().map(String::as_str), Some(RELEASE_TRIAL));

    // Every trial the device ran was told which side to reward
    for trial in session.trial_matrix().iter() {
        assert!(trial.rewside().is_some());
        assert!(trial.params.contains_key("srvpos"));
    }
}

#[test]
fn auto_scheduler_leaves_warmup() {
    let dir = tempfile::tempdir().unwrap();
    let config = simulation_config(dir.path());
    let mut session =
        Session::with_device(DummyDevice::new(0.7, 1).with_seed(2), &config).unwrap();

    session.run_headless(1).unwrap();
    assert_eq!(session.trial_setter().scheduler().status(), "start");

    session.run_headless(12).unwrap();
    let status = session.trial_setter().scheduler().status();
    let code = status.trim_end_matches(|c: char| c.is_ascii_digit());
    assert!(
        ["randchk", "an_none", "antistay", "antiside", "good"].contains(&code),
        "unexpected status {}",
        status
    );
}

#[test]
fn forced_side_only_rewards_one_side() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        scheduler: SchedulerKind::ForcedSide(Side::Right),
        ..simulation_config(dir.path())
    };
    let mut session = Session::with_device(DummyDevice::new(1.0, 1), &config).unwrap();
    let perf = session.run_headless(6).unwrap().performance();

    assert!(perf.completed >= 6);
    assert_eq!(perf.fraction_correct, Some(1.0));
    assert!(session
        .trial_matrix()
        .iter()
        .all(|t| t.rewside() == Some(Side::Right)));
}
