//! Shared test utilities for core module tests
//!
//! Provides record builders and an on-disk sample configuration so that test
//! suites do not repeat table fixtures. This module is only compiled in test
//! mode.

use crate::core::error::{Error, Result};
use crate::core::model::{Host, HostGroup, Network, Rule, Service};
use crate::core::tables::FORMAT_HEADER;
use crate::core::vcs::VersionControl;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Creates a managed, locally firewalled host interface.
pub fn host(hostname: &str, iface: &str, ip: &str, masklen: u8) -> Host {
    Host {
        hostname: hostname.to_string(),
        iface: iface.to_string(),
        ip_addr: ip.parse().unwrap(),
        masklen,
        local_fw: true,
        network_fw: false,
        mng: true,
        routed: Vec::new(),
    }
}

pub fn network(name: &str, ip: &str, masklen: u8) -> Network {
    Network::new(name, ip.parse().unwrap(), masklen)
}

pub fn group(name: &str, childs: &[&str]) -> HostGroup {
    HostGroup {
        name: name.to_string(),
        childs: childs.iter().map(ToString::to_string).collect(),
    }
}

/// Creates a validated service, panicking on invalid input.
pub fn service(name: &str, protocol: &str, ports: &str) -> Service {
    Service::new(name, protocol, ports).unwrap()
}

/// Creates an enabled rule with logging off.
pub fn rule(
    name: &str,
    src: &str,
    src_serv: &str,
    dst: &str,
    dst_serv: &str,
    action: &str,
) -> Rule {
    Rule {
        enabled: true,
        name: name.to_string(),
        src: src.to_string(),
        src_serv: src_serv.to_string(),
        dst: dst.to_string(),
        dst_serv: dst_serv.to_string(),
        action: action.to_string(),
        log_level: "0".to_string(),
        desc: String::new(),
    }
}

/// Writes `<dir>/<table>.csv` with the format header followed by `lines`.
pub fn write_table(dir: &Path, table: &str, lines: &[&str]) {
    let mut content = format!("{FORMAT_HEADER}\n");
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(dir.join(format!("{table}.csv")), content).unwrap();
}

/// Writes a small two-firewall topology into `dir`.
///
/// - `gw` routes between the LAN (10.66.1.0/24) and the DMZ (172.16.2.0/24)
/// - `web` sits in the DMZ, `client` in the LAN
/// - `clients` groups the LAN client and the whole LAN network
pub fn write_sample_repo(dir: &Path) {
    write_table(
        dir,
        "hosts",
        &[
            "gw eth0 10.66.1.1 24 1 1 1 dmz",
            "gw eth1 172.16.2.1 24 1 1 1",
            "web eth0 172.16.2.10 24 1 0 1",
            "client eth0 10.66.1.20 24 0 0 0",
        ],
    );
    write_table(
        dir,
        "networks",
        &["lan 10.66.1.0 24", "dmz 172.16.2.0 24", "Internet 0.0.0.0 0"],
    );
    write_table(dir, "hostgroups", &["clients client:eth0 lan"]);
    write_table(
        dir,
        "services",
        &["ssh TCP 22", "http TCP 80,443", "icmp-echo ICMP 8", "dns UDP 53"],
    );
    write_table(
        dir,
        "rules",
        &[
            "# rules are evaluated top to bottom",
            "1 ssh_to_web clients * web:eth0 ssh ACCEPT 0 \"admin access\"",
            "1 web_public * * web:eth0 http ACCEPT 0 \"\"",
            "1 ping_gw * * gw:eth0 icmp-echo ACCEPT 2 \"\"",
            "0 draft * * * * ACCEPT 0 \"not ready\"",
            "1 drop_all * * * * DROP 1 \"default deny\"",
        ],
    );
}

/// Table file contents keyed by file name
type Snapshot = BTreeMap<String, String>;

/// In-memory version control over the `*.csv` files of a directory.
///
/// Checkpoints are full snapshots. `log` and `show` render the same text
/// layout as git so the parsers are exercised without a git binary.
#[derive(Debug)]
pub struct FakeVcs {
    repodir: PathBuf,
    initialized: Cell<bool>,
    commits: RefCell<Vec<(String, String, Snapshot)>>,
}

impl FakeVcs {
    pub fn new(repodir: impl Into<PathBuf>) -> Self {
        Self {
            repodir: repodir.into(),
            initialized: Cell::new(false),
            commits: RefCell::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Snapshot {
        let Ok(entries) = std::fs::read_dir(&self.repodir) else {
            return Snapshot::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .map(|p| {
                let name = p.file_name().unwrap().to_string_lossy().into_owned();
                (name, std::fs::read_to_string(&p).unwrap())
            })
            .collect()
    }

    fn index_of(&self, target: &str) -> Result<usize> {
        let commits = self.commits.borrow();
        let head = commits.len().checked_sub(1);
        let found = match target.strip_prefix("HEAD~") {
            Some(n) => head.zip(n.parse::<usize>().ok()).and_then(|(h, n)| h.checked_sub(n)),
            None if target == "HEAD" => head,
            None => commits.iter().position(|(id, _, _)| id == target),
        };
        found.ok_or_else(|| Error::Vcs {
            message: format!("unknown revision '{target}'"),
            stderr: None,
        })
    }
}

impl VersionControl for FakeVcs {
    fn is_repo(&self) -> Result<bool> {
        Ok(self.initialized.get())
    }

    fn init(&self) -> Result<()> {
        self.initialized.set(true);
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let mut commits = self.commits.borrow_mut();
        if commits.last().is_some_and(|(_, _, last)| *last == snapshot) {
            return Ok(());
        }
        let id = format!("{:040x}", commits.len() + 1);
        commits.push((id, message.to_string(), snapshot));
        Ok(())
    }

    fn status_dirty(&self) -> Result<bool> {
        let commits = self.commits.borrow();
        Ok(commits.last().is_none_or(|(_, _, last)| *last != self.snapshot()))
    }

    fn log(&self) -> Result<String> {
        let mut text = String::new();
        for (id, message, _) in self.commits.borrow().iter().rev() {
            writeln!(text, "commit {id}").unwrap();
            writeln!(text, "Author: Firelet <firelet@localhost>").unwrap();
            writeln!(text, "Date:   2011-03-01 08:00:00 +0000").unwrap();
            writeln!(text).unwrap();
            for line in message.lines() {
                writeln!(text, "    {line}").unwrap();
            }
            writeln!(text).unwrap();
        }
        Ok(text)
    }

    fn show(&self, commit: &str) -> Result<String> {
        let idx = self.index_of(commit)?;
        let commits = self.commits.borrow();
        let empty = Snapshot::new();
        let parent = idx.checked_sub(1).map_or(&empty, |p| &commits[p].2);
        let current = &commits[idx].2;

        let mut text = String::new();
        for (file, content) in current {
            let old = parent.get(file).map(String::as_str).unwrap_or_default();
            if old == content {
                continue;
            }
            writeln!(text, "diff --git a/{file} b/{file}").unwrap();
            writeln!(text, "--- a/{file}").unwrap();
            writeln!(text, "+++ b/{file}").unwrap();
            writeln!(text, "@@ -1 +1 @@").unwrap();
            for line in old.lines().filter(|l| !content.lines().any(|n| n == *l)) {
                writeln!(text, "-{line}").unwrap();
            }
            for line in content.lines().filter(|l| !old.lines().any(|o| o == *l)) {
                writeln!(text, "+{line}").unwrap();
            }
        }
        Ok(text)
    }

    fn reset_hard(&self, target: Option<&str>) -> Result<()> {
        let idx = self.index_of(target.unwrap_or("HEAD"))?;
        let mut commits = self.commits.borrow_mut();
        commits.truncate(idx + 1);
        for (file, content) in &commits[idx].2 {
            std::fs::write(self.repodir.join(file), content)?;
        }
        Ok(())
    }
}
