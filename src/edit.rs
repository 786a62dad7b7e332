//! Table editing commands
//!
//! Command line counterparts of the table edit forms. Every command goes
//! through the store, so duplicate keys, host group loops, field validation
//! and stale row tokens are rejected exactly as for any other editor. Edits
//! are written to the table files immediately and stay uncommitted until
//! `firelet save`.
//!
//! Tokens are printed by `firelet list <table> --tokens`. Passing one back
//! with `--token` makes the edit fail if the row changed in the meantime.

use crate::core::error::Result;
use crate::core::fireset::{FireSet, TableName};
use crate::core::model::{Host, HostGroup, Network, Rule, Service};
use crate::validators::sanitize_name;
use clap::{Args, Subcommand};
use std::net::Ipv4Addr;
use tracing::debug;

/// Edits of one table
#[derive(Debug, Clone, Subcommand)]
pub enum EditCommand {
    /// Edit the rules table
    #[command(subcommand)]
    Rule(RuleCommand),
    /// Edit the hosts table
    #[command(subcommand)]
    Host(HostCommand),
    /// Edit the hostgroups table
    #[command(subcommand)]
    Hostgroup(HostGroupCommand),
    /// Edit the networks table
    #[command(subcommand)]
    Network(NetworkCommand),
    /// Edit the services table
    #[command(subcommand)]
    Service(ServiceCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum RuleCommand {
    /// Insert a rule. Without fields the disabled placeholder rule is inserted.
    Add {
        /// Position in the ruleset; appended when omitted
        #[arg(long)]
        position: Option<usize>,
        #[command(flatten)]
        fields: RuleFields,
    },
    /// Change some fields of a rule
    Update {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
        #[command(flatten)]
        fields: RuleFields,
    },
    Delete {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
    },
    MoveUp {
        rid: usize,
    },
    MoveDown {
        rid: usize,
    },
    Enable {
        rid: usize,
    },
    Disable {
        rid: usize,
    },
}

/// Rule fields; the ones omitted keep their current or placeholder value
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct RuleFields {
    #[arg(long)]
    pub name: Option<String>,
    /// Host (hostname:iface), network, host group or `*`
    #[arg(long)]
    pub src: Option<String>,
    #[arg(long)]
    pub src_serv: Option<String>,
    #[arg(long)]
    pub dst: Option<String>,
    #[arg(long)]
    pub dst_serv: Option<String>,
    /// ACCEPT or DROP
    #[arg(long)]
    pub action: Option<String>,
    /// 0 disables logging
    #[arg(long)]
    pub log_level: Option<String>,
    /// Free text; quotes and control characters are stripped
    #[arg(long)]
    pub desc: Option<String>,
    #[arg(long)]
    pub enabled: Option<bool>,
}

impl RuleFields {
    fn apply_to(self, rule: &mut Rule) {
        let RuleFields {
            name,
            src,
            src_serv,
            dst,
            dst_serv,
            action,
            log_level,
            desc,
            enabled,
        } = self;
        for (value, field) in [
            (name, &mut rule.name),
            (src, &mut rule.src),
            (src_serv, &mut rule.src_serv),
            (dst, &mut rule.dst),
            (dst_serv, &mut rule.dst_serv),
            (action, &mut rule.action),
            (log_level, &mut rule.log_level),
        ] {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(desc) = desc {
            rule.desc = sanitize_name(&desc);
        }
        if let Some(enabled) = enabled {
            rule.enabled = enabled;
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum HostCommand {
    /// Add a host interface
    Add {
        #[command(flatten)]
        host: HostArgs,
    },
    /// Replace a host interface
    Update {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
        #[command(flatten)]
        host: HostArgs,
    },
    Delete {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
    },
}

/// One interface of a host
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct HostArgs {
    #[arg(long)]
    pub hostname: String,
    #[arg(long)]
    pub iface: String,
    #[arg(long = "ip")]
    pub ip_addr: Ipv4Addr,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=32))]
    pub masklen: u8,
    /// The host filters its own traffic
    #[arg(long)]
    pub local_fw: bool,
    /// The host forwards traffic between its interfaces
    #[arg(long)]
    pub network_fw: bool,
    /// Firelet manages the host through this interface
    #[arg(long)]
    pub mng: bool,
    /// Networks routed through this interface, comma separated
    #[arg(long, value_delimiter = ',')]
    pub routed: Vec<String>,
}

impl From<HostArgs> for Host {
    fn from(args: HostArgs) -> Self {
        Host {
            hostname: args.hostname,
            iface: args.iface,
            ip_addr: args.ip_addr,
            masklen: args.masklen,
            local_fw: args.local_fw,
            network_fw: args.network_fw,
            mng: args.mng,
            routed: args.routed,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum HostGroupCommand {
    /// Add a host group
    Add {
        name: String,
        /// Hosts (hostname:iface), networks and other host groups
        childs: Vec<String>,
    },
    /// Rename a host group or replace its children
    Update {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        childs: Option<Vec<String>>,
    },
    Delete {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum NetworkCommand {
    /// Add a network. Host bits of the address are cleared.
    Add {
        name: String,
        ip_addr: Ipv4Addr,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=32))]
        masklen: u8,
    },
    Update {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "ip")]
        ip_addr: Option<Ipv4Addr>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=32))]
        masklen: Option<u8>,
    },
    Delete {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ServiceCommand {
    /// Add a service
    Add {
        name: String,
        /// AH, ESP, ICMP, IP, TCP or UDP
        protocol: String,
        /// Port list (TCP/UDP) or ICMP type
        #[arg(default_value = "")]
        ports: String,
    },
    Update {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        protocol: Option<String>,
        #[arg(long)]
        ports: Option<String>,
    },
    Delete {
        rid: usize,
        #[arg(long)]
        token: Option<String>,
    },
}

fn deleted(fs: &mut FireSet, table: TableName, rid: usize, token: Option<&str>) -> Result<String> {
    let item = fs.delete_checked(table, rid, token)?;
    Ok(format!("Deleted from {table}: {}", item.fields().join(" ")))
}

impl EditCommand {
    /// Table the command edits
    pub fn table(&self) -> TableName {
        match self {
            EditCommand::Rule(_) => TableName::Rules,
            EditCommand::Host(_) => TableName::Hosts,
            EditCommand::Hostgroup(_) => TableName::HostGroups,
            EditCommand::Network(_) => TableName::Networks,
            EditCommand::Service(_) => TableName::Services,
        }
    }

    /// Applies the edit and returns a one-line summary.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the store rejects the edit. Tables are
    /// left untouched in that case.
    pub fn apply(self, fs: &mut FireSet) -> Result<String> {
        debug!("Applying {:?}", self);
        match self {
            EditCommand::Rule(cmd) => apply_rule(cmd, fs),
            EditCommand::Host(cmd) => apply_host(cmd, fs),
            EditCommand::Hostgroup(cmd) => apply_hostgroup(cmd, fs),
            EditCommand::Network(cmd) => apply_network(cmd, fs),
            EditCommand::Service(cmd) => apply_service(cmd, fs),
        }
    }
}

fn apply_rule(cmd: RuleCommand, fs: &mut FireSet) -> Result<String> {
    match cmd {
        RuleCommand::Add { position, fields } => {
            let rid = position.unwrap_or(fs.rules.len()).min(fs.rules.len());
            if fields == RuleFields::default() {
                fs.rules.add_default(rid)?;
                return Ok(format!("Placeholder rule inserted at {rid}."));
            }
            let mut rule = Rule::placeholder();
            rule.enabled = true;
            fields.apply_to(&mut rule);
            let name = rule.name.clone();
            fs.rules.add_at(rule, rid)?;
            Ok(format!("Rule {name} inserted at {rid}."))
        }
        RuleCommand::Update { rid, token, fields } => {
            let mut rule = fs.rules.get(rid)?.clone();
            fields.apply_to(&mut rule);
            let name = rule.name.clone();
            fs.rules.update(rid, rule, token.as_deref())?;
            Ok(format!("Rule {name} updated."))
        }
        RuleCommand::Delete { rid, token } => deleted(fs, TableName::Rules, rid, token.as_deref()),
        RuleCommand::MoveUp { rid } => {
            fs.rules.moveup(rid)?;
            Ok(format!("Rule {rid} moved up."))
        }
        RuleCommand::MoveDown { rid } => {
            fs.rules.movedown(rid)?;
            Ok(format!("Rule {rid} moved down."))
        }
        RuleCommand::Enable { rid } => {
            fs.rules.enable(rid)?;
            Ok(format!("Rule {rid} enabled."))
        }
        RuleCommand::Disable { rid } => {
            fs.rules.disable(rid)?;
            Ok(format!("Rule {rid} disabled."))
        }
    }
}

fn apply_host(cmd: HostCommand, fs: &mut FireSet) -> Result<String> {
    match cmd {
        HostCommand::Add { host } => {
            let host = Host::from(host);
            let key = host.key();
            fs.hosts.add(host)?;
            Ok(format!("Host {key} added."))
        }
        HostCommand::Update { rid, token, host } => {
            let host = Host::from(host);
            let key = host.key();
            fs.hosts.update(rid, host, token.as_deref())?;
            Ok(format!("Host {key} updated."))
        }
        HostCommand::Delete { rid, token } => deleted(fs, TableName::Hosts, rid, token.as_deref()),
    }
}

fn apply_hostgroup(cmd: HostGroupCommand, fs: &mut FireSet) -> Result<String> {
    match cmd {
        HostGroupCommand::Add { name, childs } => {
            fs.hostgroups.add(HostGroup {
                name: name.clone(),
                childs,
            })?;
            Ok(format!("Host group {name} added."))
        }
        HostGroupCommand::Update {
            rid,
            token,
            name,
            childs,
        } => {
            let mut group = fs.hostgroups.get(rid)?.clone();
            if let Some(name) = name {
                group.name = name;
            }
            if let Some(childs) = childs {
                group.childs = childs;
            }
            let name = group.name.clone();
            fs.hostgroups.update(rid, group, token.as_deref())?;
            Ok(format!("Host group {name} updated."))
        }
        HostGroupCommand::Delete { rid, token } => {
            deleted(fs, TableName::HostGroups, rid, token.as_deref())
        }
    }
}

fn apply_network(cmd: NetworkCommand, fs: &mut FireSet) -> Result<String> {
    match cmd {
        NetworkCommand::Add {
            name,
            ip_addr,
            masklen,
        } => {
            let net = Network::new(name, ip_addr, masklen);
            let summary = if net.ip_addr == ip_addr {
                format!("Network {} added.", net.name)
            } else {
                format!("Network {} added as {}.", net.name, net.ipt())
            };
            fs.networks.add(net)?;
            Ok(summary)
        }
        NetworkCommand::Update {
            rid,
            token,
            name,
            ip_addr,
            masklen,
        } => {
            let current = fs.networks.get(rid)?.clone();
            let name = name.unwrap_or(current.name);
            let corrected = fs.networks.update_network(
                rid,
                &name,
                ip_addr.unwrap_or(current.ip_addr),
                masklen.unwrap_or(current.masklen),
                token.as_deref(),
            )?;
            let ipt = fs.networks.get(rid)?.ipt();
            Ok(if corrected {
                format!("Network {name} updated; address corrected to {ipt}.")
            } else {
                format!("Network {name} updated.")
            })
        }
        NetworkCommand::Delete { rid, token } => {
            deleted(fs, TableName::Networks, rid, token.as_deref())
        }
    }
}

fn apply_service(cmd: ServiceCommand, fs: &mut FireSet) -> Result<String> {
    match cmd {
        ServiceCommand::Add {
            name,
            protocol,
            ports,
        } => {
            fs.services.add(Service::new(name.clone(), &protocol, &ports)?)?;
            Ok(format!("Service {name} added."))
        }
        ServiceCommand::Update {
            rid,
            token,
            name,
            protocol,
            ports,
        } => {
            let current = fs.services.get(rid)?.clone();
            let protocol = protocol.unwrap_or_else(|| current.protocol.to_string());
            let ports = ports.unwrap_or(current.ports);
            match name {
                Some(name) if name != current.name => {
                    let service = Service::new(name.clone(), &protocol, &ports)?;
                    fs.services.update(rid, service, token.as_deref())?;
                    Ok(format!("Service {name} updated."))
                }
                _ => {
                    fs.services
                        .update_service(rid, &protocol, &ports, token.as_deref())?;
                    Ok(format!("Service {} updated.", current.name))
                }
            }
        }
        ServiceCommand::Delete { rid, token } => {
            deleted(fs, TableName::Services, rid, token.as_deref())
        }
    }
}
