use std::sync::Arc;

use serde_json::json;

use collector::core::config::Config;
use collector::model::backend::{Backend, BackendStatus};
use collector::model::couple::CoupleStatus;
use collector::model::fs::{Fs, FsStatus};
use collector::model::group::GroupStatus;
use collector::model::parser::ParsedStats;
use collector::model::stats::{BackendStat, NodeStat};
use collector::model::storage::Storage;

use common::time_utils::utc_now_secs;

fn enabled_stat(backend_id: u64, ts_sec: u64) -> BackendStat {
    BackendStat {
        backend_id,
        ts_sec,
        state: 1,
        fsid: 100 + backend_id,
        vfs_blocks: 1000,
        vfs_bavail: 800,
        vfs_bsize: 4096,
        records_total: 100,
        records_removed: 10,
        group: backend_id,
        data_path: format!("/srv/storage/{}", backend_id),
        ..BackendStat::default()
    }
}

fn pack_metadata(couple: &[u64], frozen: bool) -> Vec<u8> {
    rmp_serde::to_vec(&json!({
        "version": 2,
        "couple": couple,
        "namespace": "default",
        "frozen": frozen,
    }))
    .unwrap()
}

#[test]
fn rate_calculation_needs_a_long_enough_interval() {
    let backend = Backend::new("host1:1025:2", 1);

    let mut stat = enabled_stat(1, 1000);
    stat.read_ios = 100;
    stat.write_ios = 50;
    backend.init(stat);

    // 2.0 seconds later: rates are recomputed.
    let mut stat = enabled_stat(1, 1002);
    stat.read_ios = 300;
    stat.write_ios = 150;
    assert!(backend.update(stat, 11.0));

    let calculated = backend.calculated();
    assert_eq!(calculated.read_rps, 100);
    assert_eq!(calculated.write_rps, 50);
    // read_rps / la is far below the floor of 100
    assert_eq!(calculated.max_read_rps, 100);
    assert_eq!(calculated.max_write_rps, 100);

    // 0.5 seconds later: interval too short, rates unchanged.
    let mut stat = enabled_stat(1, 1002);
    stat.ts_usec = 500_000;
    stat.read_ios = 400;
    assert!(backend.update(stat, 11.0));
    assert_eq!(backend.calculated().read_rps, 100);
}

#[test]
fn counter_regression_keeps_previous_rates() {
    let backend = Backend::new("host1:1025:2", 1);

    let mut stat = enabled_stat(1, 1000);
    stat.read_ios = 100;
    backend.init(stat);

    let mut stat = enabled_stat(1, 1002);
    stat.read_ios = 300;
    backend.update(stat, 1.0);
    assert_eq!(backend.calculated().read_rps, 100);

    // The counter went backwards; no negative rate is written.
    let mut stat = enabled_stat(1, 1010);
    stat.read_ios = 20;
    backend.update(stat, 1.0);
    assert_eq!(backend.calculated().read_rps, 100);
}

#[test]
fn stale_snapshot_is_discarded() {
    let backend = Backend::new("host1:1025:2", 1);

    let mut stat = enabled_stat(1, 2000);
    stat.read_ios = 500;
    backend.init(stat);

    let mut stat = enabled_stat(1, 1000);
    stat.read_ios = 900;
    assert!(!backend.update(stat, 1.0));
    assert_eq!(backend.stat().read_ios, 500);
}

#[test]
fn rofs_error_drift() {
    let config = Config::default();
    let backend = Backend::new("host1:1025:2", 1);

    let now = utc_now_secs();

    let mut stat = enabled_stat(1, now);
    stat.stat_commit_rofs_errors = 10;
    stat.last_start_ts_sec = 500;
    backend.init(stat);
    backend.recalculate(&config);

    // Counter moved with no restart: the diff accumulates and the
    // backend turns read-only.
    let mut stat = enabled_stat(1, now + 10);
    stat.stat_commit_rofs_errors = 15;
    stat.last_start_ts_sec = 500;
    backend.update(stat, 1.0);
    backend.update_status();
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 5);
    assert_eq!(backend.status(), BackendStatus::Ro);

    // A restart clears the drift.
    let mut stat = enabled_stat(1, now + 20);
    stat.stat_commit_rofs_errors = 20;
    stat.last_start_ts_sec = 501;
    backend.update(stat, 1.0);
    backend.update_status();
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 0);
    assert_eq!(backend.status(), BackendStatus::Ok);
}

#[test]
fn rofs_counter_reset_clears_drift() {
    let config = Config::default();
    let backend = Backend::new("host1:1025:2", 1);

    let now = utc_now_secs();

    let mut stat = enabled_stat(1, now);
    stat.stat_commit_rofs_errors = 30;
    backend.init(stat);
    backend.recalculate(&config);

    let mut stat = enabled_stat(1, now + 10);
    stat.stat_commit_rofs_errors = 40;
    backend.update(stat, 1.0);
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 10);

    // The raw counter regressed (backend process restarted and lost it).
    let mut stat = enabled_stat(1, now + 20);
    stat.stat_commit_rofs_errors = 3;
    backend.update(stat, 1.0);
    assert_eq!(backend.calculated().stat_commit_rofs_errors_diff, 0);
}

#[test]
fn recalculate_is_idempotent() {
    let config = Config {
        reserved_space: 100_000,
        ..Config::default()
    };
    let backend = Backend::new("host1:1025:2", 1);

    let mut stat = enabled_stat(1, 1000);
    stat.blob_size_limit = 2_000_000;
    stat.base_size = 700_000;
    backend.init(stat);

    backend.recalculate(&config);
    let first = backend.calculated();
    backend.recalculate(&config);
    let second = backend.calculated();

    assert_eq!(first.total_space, second.total_space);
    assert_eq!(first.used_space, second.used_space);
    assert_eq!(first.free_space, second.free_space);
    assert_eq!(first.effective_space, second.effective_space);
    assert_eq!(first.effective_free_space, second.effective_free_space);
    assert_eq!(first.records, second.records);
    assert_eq!(first.fragmentation, second.fragmentation);

    // Space ordering holds under the blob size limit.
    assert!(first.effective_space <= first.total_space);
    assert!(first.total_space <= first.vfs_total_space);
}

#[test]
fn fs_overcommit_breaks_and_recovers() {
    let config = Config::default();
    let now = utc_now_secs();

    let fs = Arc::new(Fs::new("host1", 77));
    let b1 = Arc::new(Backend::new("host1:1025:2", 1));
    let b2 = Arc::new(Backend::new("host1:1025:2", 2));

    // Filesystem of 1000 bytes; blob limits of 600 + 500 overcommit it.
    for (backend, limit) in [(&b1, 600), (&b2, 500)] {
        let mut stat = enabled_stat(backend.id(), now);
        stat.fsid = 77;
        stat.vfs_blocks = 250;
        stat.vfs_bsize = 4;
        stat.vfs_bavail = 100;
        stat.blob_size_limit = limit;
        backend.init(stat);
        backend.set_fs(fs.clone());
        fs.add_backend(backend);
        backend.recalculate(&config);
        fs.update(backend);
        backend.update_status();
        assert_eq!(backend.status(), BackendStatus::Ok);
    }

    assert_eq!(fs.total_space(), 1000);
    fs.update_status();
    assert_eq!(fs.status(), FsStatus::Broken);

    // A stalled backend no longer counts towards the overcommit.
    let mut stat = enabled_stat(1, now);
    stat.fsid = 77;
    stat.ts_sec = now.saturating_sub(1000);
    b1.init(stat);
    b1.check_stalled(config.node_backend_stat_stale_timeout);
    b1.update_status();
    assert_eq!(b1.status(), BackendStatus::Stalled);

    fs.update_status();
    assert_eq!(fs.status(), FsStatus::Ok);

    // And the remaining backend stops reporting a broken filesystem.
    b2.update_status();
    assert_eq!(b2.status(), BackendStatus::Ok);
}

fn ingest_fleet(storage: &Storage, backend_ids: &[u64], full_backend: Option<u64>) {
    let now = utc_now_secs();
    let mut backends = Vec::new();
    for &id in backend_ids {
        let mut stat = enabled_stat(id, now);
        stat.blob_size_limit = 2048;
        if full_backend == Some(id) {
            stat.base_size = 2048;
        }
        backends.push(stat);
    }

    let parsed = ParsedStats {
        node: NodeStat {
            ts_sec: now,
            ts_usec: 0,
            la1: 4,
            tx_bytes: 0,
            rx_bytes: 0,
        },
        backends,
        rofs_errors: Default::default(),
    };

    storage.ingest("host1", 1025, 2, parsed);
}

#[test]
fn couple_of_coupled_groups_goes_full_when_one_group_is_full() {
    let storage = Storage::new(Config::default());

    ingest_fleet(&storage, &[1, 2, 3], Some(3));

    let blob = pack_metadata(&[1, 2, 3], false);
    for id in [1, 2, 3] {
        storage.save_group_metadata(id, &blob);
    }

    for id in [1, 2, 3] {
        assert_eq!(storage.group(id).unwrap().status(), GroupStatus::Coupled);
    }

    let couple = storage.couple("1:2:3").unwrap();
    assert_eq!(couple.status(), CoupleStatus::Full);

    // Refill: no group full any more, the couple recovers to OK.
    ingest_fleet(&storage, &[1, 2, 3], None);
    couple.update_status(&storage.config());
    assert_eq!(couple.status(), CoupleStatus::Ok);
}

#[test]
fn frozen_group_freezes_the_couple() {
    let storage = Storage::new(Config::default());

    ingest_fleet(&storage, &[1, 2], None);

    let blob = pack_metadata(&[1, 2], true);
    storage.save_group_metadata(1, &blob);
    storage.save_group_metadata(2, &blob);

    let couple = storage.couple("1:2").unwrap();
    assert_eq!(couple.status(), CoupleStatus::Frozen);
}

#[test]
fn metadata_conflict_turns_group_bad() {
    let storage = Storage::new(Config::default());

    ingest_fleet(&storage, &[1, 2], None);

    storage.save_group_metadata(1, &pack_metadata(&[1, 2], false));
    storage.save_group_metadata(2, &pack_metadata(&[1, 2], false));

    let group = storage.group(1).unwrap();
    assert_eq!(group.status(), GroupStatus::Coupled);

    // New metadata names a different couple than the one the group is
    // bound to.
    storage.save_group_metadata(1, &pack_metadata(&[1, 3], false));

    assert_eq!(group.status(), GroupStatus::Bad);
    let status_text = group.status_text();
    assert!(status_text.contains("[1, 3]"), "{}", status_text);
    assert!(status_text.contains("1:2"), "{}", status_text);

    // The groups now disagree on metadata, so the couple is BAD too.
    let couple = storage.couple("1:2").unwrap();
    assert_eq!(couple.status(), CoupleStatus::Bad);
}

#[test]
fn unreadable_metadata_pins_group_bad() {
    let storage = Storage::new(Config::default());

    ingest_fleet(&storage, &[7], None);
    storage.save_group_metadata(7, &[0xc1, 0xff, 0x00]);

    let group = storage.group(7).unwrap();
    assert_eq!(group.status(), GroupStatus::Bad);
    assert!(group.status_text().contains("could not unpack"));

    // Stats keep flowing; the decode failure still pins the status.
    ingest_fleet(&storage, &[7], None);
    assert_eq!(group.status(), GroupStatus::Bad);
}

#[test]
fn dht_group_is_broken_when_forbidden() {
    let storage = Storage::new(Config {
        forbidden_dht_groups: true,
        ..Config::default()
    });

    let now = utc_now_secs();
    let mut first = enabled_stat(1, now);
    first.group = 9;
    let mut second = enabled_stat(2, now);
    second.group = 9;

    let parsed = ParsedStats {
        node: NodeStat {
            ts_sec: now,
            ..NodeStat::default()
        },
        backends: vec![first, second],
        rofs_errors: Default::default(),
    };
    storage.ingest("host1", 1025, 2, parsed);

    let group = storage.group(9).unwrap();
    assert_eq!(group.status(), GroupStatus::Broken);
    assert!(group.status_text().contains("forbidden_dht_groups"));
}

#[test]
fn config_hot_swap_applies_on_next_pass() {
    let storage = Storage::new(Config::default());

    let now = utc_now_secs();
    let mut first = enabled_stat(1, now);
    first.group = 9;
    let mut second = enabled_stat(2, now);
    second.group = 9;

    let parsed = ParsedStats {
        node: NodeStat {
            ts_sec: now,
            ..NodeStat::default()
        },
        backends: vec![first.clone(), second.clone()],
        rofs_errors: Default::default(),
    };
    storage.ingest("host1", 1025, 2, parsed);
    assert_ne!(storage.group(9).unwrap().status(), GroupStatus::Broken);

    storage.swap_config(Config {
        forbidden_dht_groups: true,
        ..Config::default()
    });

    first.ts_sec = now + 5;
    second.ts_sec = now + 5;
    let parsed = ParsedStats {
        node: NodeStat {
            ts_sec: now + 5,
            ..NodeStat::default()
        },
        backends: vec![first, second],
        rofs_errors: Default::default(),
    };
    storage.ingest("host1", 1025, 2, parsed);
    assert_eq!(storage.group(9).unwrap().status(), GroupStatus::Broken);
}

#[test]
fn group_without_metadata_stays_init() {
    let storage = Storage::new(Config::default());

    ingest_fleet(&storage, &[4], None);

    let group = storage.group(4).unwrap();
    assert_eq!(group.status(), GroupStatus::Init);
    assert!(group.status_text().contains("meta key was not read"));
}

#[test]
fn couple_surfaces_worst_group_status() {
    let storage = Storage::new(Config::default());

    // Only group 1 has backends; group 2 never reported any.
    ingest_fleet(&storage, &[1], None);
    let blob = pack_metadata(&[1, 2], false);
    storage.save_group_metadata(1, &blob);
    storage.save_group_metadata(2, &blob);

    let couple = storage.couple("1:2").unwrap();
    assert_eq!(storage.group(1).unwrap().status(), GroupStatus::Coupled);
    assert_eq!(storage.group(2).unwrap().status(), GroupStatus::Init);
    assert_eq!(couple.status(), CoupleStatus::Init);
}

#[test]
fn unmatched_total_space_breaks_couple() {
    let storage = Storage::new(Config {
        forbidden_unmatched_group_total_space: true,
        ..Config::default()
    });

    let now = utc_now_secs();
    let mut first = enabled_stat(1, now);
    first.blob_size_limit = 2048;
    let mut second = enabled_stat(2, now);
    second.blob_size_limit = 1024;

    let parsed = ParsedStats {
        node: NodeStat {
            ts_sec: now,
            ..NodeStat::default()
        },
        backends: vec![first, second],
        rofs_errors: Default::default(),
    };
    storage.ingest("host1", 1025, 2, parsed);

    let blob = pack_metadata(&[1, 2], false);
    storage.save_group_metadata(1, &blob);
    storage.save_group_metadata(2, &blob);

    let couple = storage.couple("1:2").unwrap();
    assert_eq!(couple.status(), CoupleStatus::Broken);
}
