//! Remote firewall access
//!
//! The store never talks to firewalls directly. It asks a [`ConnectorFactory`]
//! for a [`RemoteConnector`] session bound to the managed hosts, and drives the
//! fetch/deliver/apply sequence through it. The SSH transport lives outside
//! this crate; [`MockNetwork`] simulates a fleet in memory and backs the demo
//! mode of the CLI and the test suites.

use crate::core::error::{Error, Result};
use crate::core::ifaces::managed_hosts;
use crate::core::model::Host;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Tables of the live `iptables-save` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IptablesState {
    /// Rule lines of the filter table, `-A <CHAIN> ...`
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(default)]
    pub nat: Vec<String>,
}

/// Addresses observed on one interface, as printed by `ip addr show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddrs {
    /// `address/masklen`
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

/// Live configuration of one firewall.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConf {
    #[serde(default)]
    pub iptables: IptablesState,
    #[serde(default)]
    pub ip_a_s: BTreeMap<String, InterfaceAddrs>,
}

/// Live configurations keyed by hostname
pub type RemoteConfs = BTreeMap<String, RemoteConf>;

/// Management addresses keyed by hostname
pub type Targets = BTreeMap<String, Vec<Ipv4Addr>>;

/// Restore text keyed by hostname
pub type Deliveries = BTreeMap<String, Vec<String>>;

/// Builds the connection targets: every interface address of each host that
/// has at least one management interface.
pub fn management_targets(hosts: &[Host]) -> Targets {
    let mut targets = Targets::new();
    for h in managed_hosts(hosts) {
        targets.entry(h.hostname.clone()).or_default().push(h.ip_addr);
    }
    targets
}

/// An open session with the managed firewalls.
///
/// Calls are blocking and cover every target of the session at once.
pub trait RemoteConnector {
    /// Fetches iptables rules and interface addresses. Unreachable hosts are
    /// missing from the result.
    fn get_confs(&mut self) -> Result<RemoteConfs>;

    /// Uploads restore text without activating it.
    fn deliver_confs(&mut self, confs: &Deliveries) -> Result<()>;

    /// Snapshots the running configuration for manual recovery.
    fn save_existing_confs(&mut self) -> Result<()>;

    /// Arms the rollback timer on every host.
    ///
    /// Returns the first host where arming failed.
    fn setup_auto_rollbacks(&mut self) -> Result<Option<String>>;

    /// Activates the delivered configurations.
    fn apply_remote_confs(&mut self) -> Result<()>;

    fn cancel_auto_rollbacks(&mut self) -> Result<()>;

    /// Checks that the hosts still answer after applying.
    fn log_ping(&mut self) -> Result<()>;

    /// Closes the connections. Later calls reconnect on demand.
    fn disconnect(&mut self) -> Result<()>;
}

/// Opens [`RemoteConnector`] sessions.
pub trait ConnectorFactory {
    fn connect(&self, targets: &Targets, username: &str) -> Result<Box<dyn RemoteConnector>>;
}

/// Extracts the filter rules from `iptables-restore` text.
pub fn filter_rules_from_restore(lines: &[String]) -> Vec<String> {
    let mut in_filter = false;
    let mut rules = Vec::new();
    for line in lines {
        let line = line.trim();
        match line {
            "*filter" => in_filter = true,
            "COMMIT" => in_filter = false,
            _ if in_filter && line.starts_with("-A ") => rules.push(line.to_string()),
            _ => {}
        }
    }
    rules
}

/// Simulated firewall
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockHost {
    conf: RemoteConf,
    #[serde(default)]
    saved: Option<IptablesState>,
    #[serde(default)]
    delivered: Option<Vec<String>>,
    #[serde(default)]
    rollback_armed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockState {
    hosts: BTreeMap<String, MockHost>,
    /// Hosts refusing to arm the rollback timer
    #[serde(default)]
    fail_rollback: BTreeSet<String>,
    /// Hosts losing their last filter rule when a configuration is applied
    #[serde(default)]
    lossy_apply: BTreeSet<String>,
    #[serde(skip)]
    events: Vec<String>,
}

/// In-memory fleet of firewalls shared by every session it opens.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<MockState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fleet matching the declared interfaces, with empty rulesets.
    pub fn from_hosts(hosts: &[Host]) -> Self {
        let network = Self::new();
        {
            let mut state = network.lock();
            for h in hosts {
                let host = state.hosts.entry(h.hostname.clone()).or_default();
                host.conf.ip_a_s.insert(
                    h.iface.clone(),
                    InterfaceAddrs {
                        ipv4: Some(format!("{}/{}", h.ip_addr, h.masklen)),
                        ipv6: None,
                    },
                );
            }
        }
        network
    }

    /// Loads a fleet saved with [`MockNetwork::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let state: MockState = serde_json::from_str(&json)?;
        debug!("Loaded {} simulated hosts from {}", state.hosts.len(), path.display());
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Saves the fleet as JSON using an atomic write.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.lock())?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_host(&self, hostname: &str, conf: RemoteConf) {
        self.lock().hosts.insert(
            hostname.to_string(),
            MockHost {
                conf,
                ..MockHost::default()
            },
        );
    }

    /// Makes the host unreachable.
    pub fn remove_host(&self, hostname: &str) {
        self.lock().hosts.remove(hostname);
    }

    /// Makes arming the rollback timer fail on `hostname`.
    pub fn fail_rollback_on(&self, hostname: &str) {
        self.lock().fail_rollback.insert(hostname.to_string());
    }

    /// Makes applying a configuration on `hostname` drop its last filter rule.
    pub fn lose_rule_on_apply(&self, hostname: &str) {
        self.lock().lossy_apply.insert(hostname.to_string());
    }

    /// Current live configuration of every host
    pub fn remote_confs(&self) -> RemoteConfs {
        self.lock()
            .hosts
            .iter()
            .map(|(name, h)| (name.clone(), h.conf.clone()))
            .collect()
    }

    /// Replaces the filter rules of a host.
    pub fn set_filter(&self, hostname: &str, rules: Vec<String>) {
        if let Some(h) = self.lock().hosts.get_mut(hostname) {
            h.conf.iptables.filter = rules;
        }
    }

    /// Operations performed so far, oldest first
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Tells if a rollback timer is still armed on `hostname`.
    pub fn rollback_armed(&self, hostname: &str) -> bool {
        self.lock()
            .hosts
            .get(hostname)
            .is_some_and(|h| h.rollback_armed)
    }

    /// Configuration saved by the last deployment, if any
    pub fn saved_conf(&self, hostname: &str) -> Option<IptablesState> {
        self.lock().hosts.get(hostname).and_then(|h| h.saved.clone())
    }
}

impl ConnectorFactory for MockNetwork {
    fn connect(&self, targets: &Targets, username: &str) -> Result<Box<dyn RemoteConnector>> {
        debug!("Connecting to {} simulated hosts as {}", targets.len(), username);
        self.lock().events.push("connect".to_string());
        Ok(Box::new(MockConnector {
            network: self.clone(),
            targets: targets.keys().cloned().collect(),
        }))
    }
}

/// Session over a [`MockNetwork`]
#[derive(Debug)]
struct MockConnector {
    network: MockNetwork,
    targets: Vec<String>,
}

impl MockConnector {
    fn each_reachable(&self, event: &str, mut f: impl FnMut(&str, &mut MockHost)) {
        let mut state = self.network.lock();
        state.events.push(event.to_string());
        for name in &self.targets {
            if let Some(host) = state.hosts.get_mut(name) {
                f(name, host);
            }
        }
    }
}

impl RemoteConnector for MockConnector {
    fn get_confs(&mut self) -> Result<RemoteConfs> {
        let mut confs = RemoteConfs::new();
        self.each_reachable("get_confs", |name, host| {
            confs.insert(name.to_string(), host.conf.clone());
        });
        for name in self.targets.iter().filter(|n| !confs.contains_key(*n)) {
            warn!("Host {} unreachable", name);
        }
        Ok(confs)
    }

    fn deliver_confs(&mut self, confs: &Deliveries) -> Result<()> {
        let mut state = self.network.lock();
        state.events.push("deliver_confs".to_string());
        for (name, lines) in confs {
            let host = state.hosts.get_mut(name).ok_or_else(|| {
                Error::Remote(format!("Unable to deliver configuration to {name}"))
            })?;
            host.delivered = Some(lines.clone());
        }
        Ok(())
    }

    fn save_existing_confs(&mut self) -> Result<()> {
        self.each_reachable("save_existing_confs", |_, host| {
            host.saved = Some(host.conf.iptables.clone());
        });
        Ok(())
    }

    fn setup_auto_rollbacks(&mut self) -> Result<Option<String>> {
        let failing = {
            let state = self.network.lock();
            self.targets
                .iter()
                .find(|t| state.fail_rollback.contains(*t))
                .cloned()
        };
        if let Some(name) = failing {
            self.network.lock().events.push("setup_auto_rollbacks".to_string());
            return Ok(Some(name));
        }
        self.each_reachable("setup_auto_rollbacks", |_, host| host.rollback_armed = true);
        Ok(None)
    }

    fn apply_remote_confs(&mut self) -> Result<()> {
        let lossy = self.network.lock().lossy_apply.clone();
        self.each_reachable("apply_remote_confs", |name, host| {
            if let Some(lines) = host.delivered.take() {
                host.conf.iptables.filter = filter_rules_from_restore(&lines);
                if lossy.contains(name) {
                    host.conf.iptables.filter.pop();
                }
                debug!("{}: {} filter rules applied", name, host.conf.iptables.filter.len());
            }
        });
        Ok(())
    }

    fn cancel_auto_rollbacks(&mut self) -> Result<()> {
        self.each_reachable("cancel_auto_rollbacks", |_, host| host.rollback_armed = false);
        Ok(())
    }

    fn log_ping(&mut self) -> Result<()> {
        let mut answered = 0;
        self.each_reachable("log_ping", |_, _| answered += 1);
        info!("{}/{} hosts answered", answered, self.targets.len());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.network.lock().events.push("disconnect".to_string());
        Ok(())
    }
}
