//! Integration tests for Firelet
//!
//! These tests drive a [`FireSet`] end to end: a real git repository in a
//! temporary directory and a simulated fleet of firewalls.
//!
//! Tests that need the `git` executable are skipped when it is not installed.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use firelet::core::fireset::{FireSet, StoreOptions, TableName};
use firelet::core::remote::{MockNetwork, RemoteConf};
use firelet::core::tables::{FORMAT_HEADER, Hosts};
use firelet::core::vcs::{DiffTag, Git, GitAuthor, RollbackTarget};
use firelet::{Error, Rule};
use std::path::Path;
use tempfile::TempDir;

fn git(dir: &Path) -> Option<Git> {
    let git = Git::new(dir).with_author(GitAuthor {
        name: "Test Admin".to_string(),
        email: "admin@example.com".to_string(),
    });
    if git.available() {
        Some(git)
    } else {
        eprintln!("git not installed, skipping");
        None
    }
}

fn write_table(dir: &Path, table: &str, lines: &[&str]) {
    let mut content = format!("{FORMAT_HEADER}\n");
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(dir.join(format!("{table}.csv")), content).unwrap();
}

/// Border firewall between the LAN and a DMZ with one web server
fn write_repo(dir: &Path) {
    write_table(
        dir,
        "hosts",
        &[
            "fw eth0 192.168.1.1 24 1 1 1 dmz",
            "fw eth1 10.10.0.1 24 1 1 1",
            "www eth0 10.10.0.80 24 1 0 1",
        ],
    );
    write_table(dir, "networks", &["lan 192.168.1.0 24", "dmz 10.10.0.0 24"]);
    write_table(dir, "hostgroups", &["admins lan"]);
    write_table(dir, "services", &["ssh TCP 22", "http TCP 80,443"]);
    write_table(
        dir,
        "rules",
        &[
            "1 lan_ssh lan * www:eth0 ssh ACCEPT 0 \"\"",
            "1 public_http * * www:eth0 http ACCEPT 0 \"\"",
            "1 default_drop * * * * DROP 2 \"\"",
        ],
    );
}

fn open(dir: &Path, network: &MockNetwork) -> Option<FireSet> {
    let git = git(dir)?;
    Some(
        FireSet::open(
            dir,
            Box::new(git),
            Box::new(network.clone()),
            StoreOptions::default(),
        )
        .unwrap(),
    )
}

fn sample() -> Option<(TempDir, FireSet, MockNetwork)> {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let network = MockNetwork::from_hosts(Hosts::load(dir.path()).unwrap().rows());
    let fs = open(dir.path(), &network)?;
    Some((dir, fs, network))
}

fn new_rule(name: &str) -> Rule {
    Rule {
        enabled: true,
        name: name.to_string(),
        src: "admins".to_string(),
        src_serv: "*".to_string(),
        dst: "fw:eth0".to_string(),
        dst_serv: "ssh".to_string(),
        action: "ACCEPT".to_string(),
        log_level: "0".to_string(),
        desc: "management".to_string(),
    }
}

#[test]
fn test_open_creates_git_repository() {
    let Some((dir, fs, _)) = sample() else {
        return;
    };
    assert!(dir.path().join(".git").is_dir());
    assert!(!fs.save_needed().unwrap());
    let versions = fs.version_list().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].message, vec!["Configuration database created."]);
    assert!(versions[0].author.contains("Test Admin"));
}

#[test]
fn test_open_twice_keeps_history() {
    let Some((dir, fs, network)) = sample() else {
        return;
    };
    drop(fs);
    let fs = open(dir.path(), &network).unwrap();
    assert_eq!(fs.version_list().unwrap().len(), 1);
    assert_eq!(fs.rules.len(), 3);
}

#[test]
fn test_save_rollback_and_version_diff() {
    let Some((_dir, mut fs, _)) = sample() else {
        return;
    };
    fs.rules.add_at(new_rule("fw_ssh"), 0).unwrap();
    assert!(fs.save_needed().unwrap());
    fs.save("Allow SSH to the firewall").unwrap();
    assert!(!fs.save_needed().unwrap());

    let versions = fs.version_list().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].message, vec!["Allow SSH to the firewall"]);

    let lines = fs.version_diff(&versions[0].commit).unwrap();
    assert!(lines.contains(&("rules".to_string(), DiffTag::Title)));
    assert!(
        lines
            .iter()
            .any(|(l, t)| *t == DiffTag::Add && l.starts_with("1 fw_ssh admins")),
        "{lines:?}"
    );

    fs.rollback(&RollbackTarget::Steps(1)).unwrap();
    assert_eq!(fs.rules.len(), 3);
    assert_eq!(fs.version_list().unwrap().len(), 1);
}

#[test]
fn test_reset_discards_edits() {
    let Some((_dir, mut fs, _)) = sample() else {
        return;
    };
    fs.delete(TableName::Rules, 0).unwrap();
    fs.rules.moveup(1).unwrap();
    assert!(fs.save_needed().unwrap());
    fs.reset().unwrap();
    assert!(!fs.save_needed().unwrap());
    assert_eq!(fs.rules.get(0).unwrap().name, "lan_ssh");
}

#[test]
fn test_unsaved_changes_block_deployment() {
    let Some((_dir, mut fs, network)) = sample() else {
        return;
    };
    fs.rules.disable(2).unwrap();
    let err = fs.deploy(false).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(network.events().is_empty());
}

#[test]
fn test_deploy_converges() {
    let Some((_dir, fs, network)) = sample() else {
        return;
    };
    let pending = fs.check(false).unwrap();
    assert_eq!(pending.keys().collect::<Vec<_>>(), vec!["fw", "www"]);

    let report = fs.deploy(false).unwrap();
    assert!(report.converged, "{:?}", report.diff);
    assert!(report.diff.is_empty());
    assert!(fs.check(false).unwrap().is_empty());

    let www = &network.remote_confs()["www"].iptables.filter;
    assert!(www.contains(
        &"-A INPUT -s 192.168.1.0/24 -d 10.10.0.80/32 -i eth0 -p tcp -m tcp --dport 22 -j ACCEPT"
            .to_string()
    ));
    assert!(www.contains(&"-A FORWARD -j DROP".to_string()));
    assert_eq!(network.saved_conf("www").unwrap().filter, Vec::<String>::new());
    assert!(!network.rollback_armed("fw"));
}

#[test]
fn test_drift_is_detected_after_deploy() {
    let Some((_dir, fs, network)) = sample() else {
        return;
    };
    fs.deploy(false).unwrap();
    let mut rules = network.remote_confs()["www"].iptables.filter.clone();
    rules.push("-A INPUT -s 6.6.6.6/32 -j ACCEPT".to_string());
    network.set_filter("www", rules);

    let diff = fs.check(false).unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff["www"].removed, vec!["-A INPUT -s 6.6.6.6/32 -j ACCEPT"]);
    assert!(diff["www"].added.is_empty());
}

#[test]
fn test_rollback_failure_aborts_before_apply() {
    let Some((_dir, fs, network)) = sample() else {
        return;
    };
    network.fail_rollback_on("fw");
    let err = fs.deploy(false).unwrap_err();
    assert!(err.to_string().contains("Automated rollback enabling failed on fw"));
    assert!(!network.events().contains(&"apply_remote_confs".to_string()));
    assert!(network.remote_confs()["www"].iptables.filter.is_empty());
}

#[test]
fn test_extra_interfaces_policy() {
    let Some((_dir, fs, network)) = sample() else {
        return;
    };
    let mut conf: RemoteConf = network.remote_confs()["www"].clone();
    conf.ip_a_s.insert("eth9".to_string(), Default::default());
    network.insert_host("www", conf);

    assert!(fs.check(false).is_ok());
    let err = fs.check(true).unwrap_err();
    assert_eq!(
        err.to_string(),
        "One or more firewalls have extra interfaces: www: eth9"
    );
}

#[test]
fn test_demo_state_survives_save_and_load() {
    let Some((dir, fs, network)) = sample() else {
        return;
    };
    fs.deploy(false).unwrap();
    let path = dir.path().join("fleet.json");
    network.save(&path).unwrap();

    let restored = MockNetwork::load(&path).unwrap();
    assert_eq!(restored.remote_confs(), network.remote_confs());
}
