//! Runs every bundled scenario file through the simulator.
#![cfg(feature = "scenarios")]

use std::path::PathBuf;

use udp_sr_cli::run_scenario;

fn scenario(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

#[test]
fn clean_link_needs_no_retransmission() {
    let outcome = run_scenario(&scenario("clean.toml")).expect("scenario failed");
    assert!(outcome.data_intact);
    assert_eq!(outcome.sender.rounds, 6);
    assert_eq!(outcome.receiver.bytes, 12_345);
}

#[test]
fn selective_repeat_resends_only_lost_slots() {
    let outcome = run_scenario(&scenario("selective_repeat.toml")).expect("scenario failed");
    assert_eq!(outcome.link.sent_data_seqs, vec![0, 1, 2, 3, 4, 2, 4]);
    assert_eq!(outcome.sender.retransmissions, 2);
}

#[test]
fn lost_ack_is_recovered_after_the_last_round() {
    let outcome = run_scenario(&scenario("lost_ack.toml")).expect("scenario failed");
    assert!(outcome.data_intact);
    assert_eq!(outcome.receiver.duplicate_packets, 1);
}

#[test]
fn duplicating_link_is_transparent() {
    let outcome = run_scenario(&scenario("duplicates.toml")).expect("scenario failed");
    assert!(outcome.data_intact);
    assert!(outcome.link.duplicated > 0);
}

#[test]
fn missing_scenario_file_is_an_error() {
    let err = run_scenario(&scenario("does-not-exist.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read scenario file"));
}
