//! Configuration store and deployment orchestrator
//!
//! [`FireSet`] owns the five tables of one repository, the version control
//! collaborator and the connector factory. It offers:
//!
//! - Store operations: save, reload, reset, rollback, version history
//! - Editing helpers spanning tables: fetch, delete, sibling names
//! - `compile_rules`, `check` and `deploy`, refused while edits are unsaved
//!
//! # Deployment
//!
//! 1. Compile, fetch live state and check interfaces
//! 2. Deliver restore files and snapshot the running rules
//! 3. Arm the auto-rollback timer on every host, abort if one refuses
//! 4. Apply, ping, cancel the timer
//! 5. Fetch again and diff: a residual difference is reported in
//!    [`DeployReport`], not raised

use crate::core::compiler::{self, CompileOptions, CompiledRules, ModelView};
use crate::core::diff::{RulesDiff, build_all_restores, diff_compiled_and_remote};
use crate::core::error::{Error, Result};
use crate::core::ifaces::check_ifaces;
use crate::core::model::{Host, HostGroup, Network, Rule, Service};
use crate::core::remote::{
    ConnectorFactory, Deliveries, RemoteConfs, RemoteConnector, management_targets,
};
use crate::core::tables::{HostGroups, Hosts, Networks, Row, Rules, Services, Table};
use crate::core::vcs::{
    DiffTag, EMPTY_COMMIT_MESSAGE, INITIAL_COMMIT_MESSAGE, RollbackTarget, Version,
    VersionControl, parse_diff, parse_log,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// The five configuration tables
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TableName {
    Rules,
    Hosts,
    HostGroups,
    Networks,
    Services,
}

/// A row fetched from any table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Item {
    Rule(Rule),
    Host(Host),
    HostGroup(HostGroup),
    Network(Network),
    Service(Service),
}

impl Item {
    /// Fields as stored in the table file
    pub fn fields(&self) -> Vec<String> {
        match self {
            Item::Rule(r) => r.to_fields(),
            Item::Host(h) => h.to_fields(),
            Item::HostGroup(g) => g.to_fields(),
            Item::Network(n) => n.to_fields(),
            Item::Service(s) => s.to_fields(),
        }
    }
}

/// Settings of a [`FireSet`] that do not live in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub compile: CompileOptions,
    /// User for remote sessions
    pub ssh_username: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compile: CompileOptions::default(),
            ssh_username: "firelet".to_string(),
        }
    }
}

/// Outcome of a deployment that went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    /// True when the live rules match the compiled ones after applying
    pub converged: bool,
    /// Residual differences, empty when converged
    pub diff: RulesDiff,
}

/// A configuration repository with its collaborators.
pub struct FireSet {
    repodir: PathBuf,
    pub rules: Rules,
    pub hosts: Hosts,
    pub hostgroups: HostGroups,
    pub networks: Networks,
    pub services: Services,
    vcs: Box<dyn VersionControl>,
    connector: Box<dyn ConnectorFactory>,
    options: StoreOptions,
}

impl std::fmt::Debug for FireSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireSet")
            .field("repodir", &self.repodir)
            .field("rules", &self.rules.len())
            .field("hosts", &self.hosts.len())
            .field("hostgroups", &self.hostgroups.len())
            .field("networks", &self.networks.len())
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

/// Creates the table files that do not exist yet, with the format header only.
fn create_missing_tables(repodir: &Path) -> Result<()> {
    fn create<R: Row>(repodir: &Path) -> Result<()> {
        let path = repodir.join(format!("{}.csv", R::TABLE));
        if !path.exists() {
            debug!("Creating empty table {}", path.display());
            Table::<R>::empty(path).save()?;
        }
        Ok(())
    }
    create::<Rule>(repodir)?;
    create::<Host>(repodir)?;
    create::<HostGroup>(repodir)?;
    create::<Network>(repodir)?;
    create::<Service>(repodir)
}

impl FireSet {
    /// Opens the repository at `repodir`, creating it if needed.
    ///
    /// A directory that is not yet under version control gets a repository
    /// and a first checkpoint holding the table files.
    ///
    /// # Errors
    ///
    /// Returns `Error::Vcs` if the repository cannot be created, `Error::Io`
    /// or `Error::Config` if a table cannot be loaded.
    pub fn open(
        repodir: impl Into<PathBuf>,
        vcs: Box<dyn VersionControl>,
        connector: Box<dyn ConnectorFactory>,
        options: StoreOptions,
    ) -> Result<Self> {
        let repodir = repodir.into();
        if !vcs.is_repo()? {
            info!("Creating configuration repository in {}", repodir.display());
            std::fs::create_dir_all(&repodir)?;
            create_missing_tables(&repodir)?;
            vcs.init()?;
            vcs.add_all()?;
            vcs.commit(INITIAL_COMMIT_MESSAGE)?;
        }
        let fireset = Self {
            rules: Rules::load(&repodir)?,
            hosts: Hosts::load(&repodir)?,
            hostgroups: HostGroups::load(&repodir)?,
            networks: Networks::load(&repodir)?,
            services: Services::load(&repodir)?,
            repodir,
            vcs,
            connector,
            options,
        };
        debug!("{:?} opened", fireset);
        Ok(fireset)
    }

    pub fn repodir(&self) -> &Path {
        &self.repodir
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Borrowed view of the tables for compilation
    pub fn model(&self) -> ModelView<'_> {
        ModelView {
            rules: self.rules.rows(),
            hosts: self.hosts.rows(),
            hostgroups: self.hostgroups.rows(),
            services: self.services.rows(),
            networks: self.networks.rows(),
        }
    }

    // Store operations

    /// True when table files differ from the last checkpoint.
    pub fn save_needed(&self) -> Result<bool> {
        self.vcs.status_dirty()
    }

    /// Commits every table change as one checkpoint.
    pub fn save(&self, message: &str) -> Result<()> {
        let message = if message.trim().is_empty() {
            EMPTY_COMMIT_MESSAGE
        } else {
            message
        };
        self.vcs.add_all()?;
        self.vcs.commit(message)?;
        info!("Configuration saved: {}", message);
        Ok(())
    }

    /// Discards in-memory state and reads every table again.
    pub fn reload(&mut self) -> Result<()> {
        self.rules.reload()?;
        self.hosts.reload()?;
        self.hostgroups.reload()?;
        self.networks.reload()?;
        self.services.reload()?;
        debug!(
            "{} rules, {} hosts, {} hostgroups, {} networks, {} services reloaded",
            self.rules.len(),
            self.hosts.len(),
            self.hostgroups.len(),
            self.networks.len(),
            self.services.len()
        );
        Ok(())
    }

    /// Reverts table files to the last checkpoint.
    pub fn reset(&mut self) -> Result<()> {
        self.vcs.reset_hard(None)?;
        info!("Configuration reset to the last checkpoint");
        self.reload()
    }

    /// Discards unsaved edits, then moves back to an older checkpoint.
    pub fn rollback(&mut self, target: &RollbackTarget) -> Result<()> {
        self.vcs.reset_hard(None)?;
        let revision = target.revision();
        self.vcs.reset_hard(Some(&revision))?;
        info!("Configuration rolled back to {}", revision);
        self.reload()
    }

    /// Checkpoints, newest first
    pub fn version_list(&self) -> Result<Vec<Version>> {
        parse_log(&self.vcs.log()?)
    }

    /// Tagged lines changed by a checkpoint
    pub fn version_diff(&self, commit: &str) -> Result<Vec<(String, DiffTag)>> {
        Ok(parse_diff(&self.vcs.show(commit)?))
    }

    // Editing helpers

    pub fn fetch(&self, table: TableName, rid: usize) -> Result<Item> {
        Ok(match table {
            TableName::Rules => Item::Rule(self.rules.get(rid)?.clone()),
            TableName::Hosts => Item::Host(self.hosts.get(rid)?.clone()),
            TableName::HostGroups => Item::HostGroup(self.hostgroups.get(rid)?.clone()),
            TableName::Networks => Item::Network(self.networks.get(rid)?.clone()),
            TableName::Services => Item::Service(self.services.get(rid)?.clone()),
        })
    }

    /// Concurrency token of a row, see [`Table::token`]
    pub fn token(&self, table: TableName, rid: usize) -> Result<String> {
        match table {
            TableName::Rules => self.rules.token(rid),
            TableName::Hosts => self.hosts.token(rid),
            TableName::HostGroups => self.hostgroups.token(rid),
            TableName::Networks => self.networks.token(rid),
            TableName::Services => self.services.token(rid),
        }
    }

    /// Removes a row after checking its token, if one is given.
    pub fn delete_checked(
        &mut self,
        table: TableName,
        rid: usize,
        token: Option<&str>,
    ) -> Result<Item> {
        if let Some(token) = token
            && token != self.token(table, rid)?
        {
            return Err(Error::config(
                "Unable to delete: one or more items has been modified in the meantime.",
            ));
        }
        self.delete(table, rid)
    }

    /// Every row of a table, in order
    pub fn list(&self, table: TableName) -> Vec<Item> {
        match table {
            TableName::Rules => self.rules.iter().cloned().map(Item::Rule).collect(),
            TableName::Hosts => self.hosts.iter().cloned().map(Item::Host).collect(),
            TableName::HostGroups => {
                self.hostgroups.iter().cloned().map(Item::HostGroup).collect()
            }
            TableName::Networks => self.networks.iter().cloned().map(Item::Network).collect(),
            TableName::Services => self.services.iter().cloned().map(Item::Service).collect(),
        }
    }

    /// Removes a row and writes the table back.
    pub fn delete(&mut self, table: TableName, rid: usize) -> Result<Item> {
        Ok(match table {
            TableName::Rules => Item::Rule(self.rules.pop(rid)?),
            TableName::Hosts => Item::Host(self.hosts.pop(rid)?),
            TableName::HostGroups => Item::HostGroup(self.hostgroups.pop(rid)?),
            TableName::Networks => Item::Network(self.networks.pop(rid)?),
            TableName::Services => Item::Service(self.services.pop(rid)?),
        })
    }

    /// Names a host group can contain, sorted: existing group names, their
    /// children and every host key.
    pub fn list_sibling_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for hg in self.hostgroups.iter() {
            names.insert(hg.name.clone());
            names.extend(hg.childs.iter().cloned());
        }
        names.extend(self.hosts.iter().map(Host::key));
        names.into_iter().collect()
    }

    // Deployment

    /// Compiles the saved configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` while there are unsaved edits, or if the
    /// configuration does not compile.
    pub fn compile_rules(&self) -> Result<CompiledRules> {
        if self.save_needed()? {
            return Err(Error::config("Configuration must be saved before deployment."));
        }
        compiler::compile_rules(self.model(), &self.options.compile)
    }

    fn connect(&self) -> Result<Box<dyn RemoteConnector>> {
        let targets = management_targets(self.hosts.rows());
        debug!("Connecting to {} firewalls", targets.len());
        self.connector.connect(&targets, &self.options.ssh_username)
    }

    /// Fetches the live state on a short-lived session.
    fn fetch_remote(&self) -> Result<RemoteConfs> {
        let mut session = self.connect()?;
        let confs = session.get_confs();
        session.disconnect()?;
        confs
    }

    /// Compares the saved configuration with the live firewalls.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` while there are unsaved edits, on compilation
    /// errors and on interface mismatches. Connector failures propagate.
    pub fn check(&self, stop_on_extra_interfaces: bool) -> Result<RulesDiff> {
        if self.save_needed()? {
            return Err(Error::config("Configuration must be saved before check."));
        }
        let compiled = compiler::compile_rules(self.model(), &self.options.compile)?;
        info!("Rules compiled. Getting configurations.");
        let remote = self.fetch_remote()?;
        check_ifaces(self.hosts.rows(), &remote, stop_on_extra_interfaces)?;
        debug!("Comparing...");
        Ok(diff_compiled_and_remote(&compiled, &remote))
    }

    /// Deploys the saved configuration to the managed firewalls.
    ///
    /// # Errors
    ///
    /// Fails before touching any firewall on unsaved edits, compilation errors
    /// and interface mismatches; fails before applying if a host refuses to
    /// arm the auto-rollback timer. A deployment that applies but does not
    /// converge is not an error: see [`DeployReport::converged`].
    pub fn deploy(&self, stop_on_extra_interfaces: bool) -> Result<DeployReport> {
        let compiled = self.compile_rules()?;
        debug!("Rules compiled. Fetching configurations.");

        let mut session = self.connect()?;
        if let Err(e) = self.push_rules(session.as_mut(), &compiled, stop_on_extra_interfaces) {
            if let Err(disconnect_err) = session.disconnect() {
                warn!("Disconnect after failed deployment: {}", disconnect_err);
            }
            return Err(e);
        }

        debug!("Fetching live configurations...");
        let remote = self.fetch_remote()?;
        let diff = diff_compiled_and_remote(&compiled, &remote);
        if diff.is_empty() {
            info!("Deployment completed.");
        } else {
            error!("Deployment failed! {} hosts differ from the compiled rules", diff.len());
        }
        Ok(DeployReport {
            converged: diff.is_empty(),
            diff,
        })
    }

    fn push_rules(
        &self,
        session: &mut dyn RemoteConnector,
        compiled: &CompiledRules,
        stop_on_extra_interfaces: bool,
    ) -> Result<()> {
        let remote = session.get_confs()?;
        debug!("Checking interfaces.");
        check_ifaces(self.hosts.rows(), &remote, stop_on_extra_interfaces)?;

        let targets = management_targets(self.hosts.rows());
        let deliveries: Deliveries = build_all_restores(compiled)
            .into_iter()
            .filter(|(hostname, _)| targets.contains_key(hostname))
            .collect();

        debug!("Delivering configurations...");
        session.deliver_confs(&deliveries)?;
        debug!("Saving existing configurations...");
        session.save_existing_confs()?;
        debug!("Setting up automatic rollback...");
        if let Some(hostname) = session.setup_auto_rollbacks()? {
            return Err(Error::Remote(format!(
                "Automated rollback enabling failed on {hostname}"
            )));
        }
        debug!("Applying configurations...");
        session.apply_remote_confs()?;
        session.disconnect()?;
        session.log_ping()?;
        debug!("Cancelling automatic rollback...");
        session.cancel_auto_rollbacks()
    }
}
