//! Interface consistency check
//!
//! Before rules are compared or deployed, the interfaces declared in the hosts
//! table must match what the managed firewalls actually have. Any mismatch is
//! fatal: rules targeting the wrong interface or address are worse than none.

use crate::core::error::{Error, Result};
use crate::core::model::Host;
use crate::core::remote::RemoteConfs;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Host records of every hostname with at least one management interface
pub fn managed_hosts(hosts: &[Host]) -> Vec<&Host> {
    let managed: BTreeSet<&str> = hosts
        .iter()
        .filter(|h| h.mng)
        .map(|h| h.hostname.as_str())
        .collect();
    hosts
        .iter()
        .filter(|h| managed.contains(h.hostname.as_str()))
        .collect()
}

/// Validates fetched interface data against the hosts table.
///
/// # Errors
///
/// Returns `Error::Config` when a managed host was not fetched, a declared
/// interface is missing or has no parsable IPv4 address, the declared address
/// matches neither observed address, or (with `stop_on_extra_interfaces`)
/// some firewall has interfaces the hosts table does not declare.
pub fn check_ifaces(
    hosts: &[Host],
    remote: &RemoteConfs,
    stop_on_extra_interfaces: bool,
) -> Result<()> {
    debug!("Checking interfaces...");
    let mut declared: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for h in managed_hosts(hosts) {
        let conf = remote
            .get(&h.hostname)
            .ok_or_else(|| Error::config(format!("Host {} not available.", h.hostname)))?;
        declared
            .entry(h.hostname.as_str())
            .or_default()
            .insert(h.iface.as_str());

        let addrs = conf.ip_a_s.get(&h.iface).ok_or_else(|| {
            Error::config(format!(
                "Interface {} missing on host {}",
                h.iface, h.hostname
            ))
        })?;

        let ipv4 = addrs
            .ipv4
            .as_deref()
            .and_then(|a| a.split_once('/'))
            .filter(|(_, mask)| !mask.contains('/'))
            .map(|(addr, _)| addr)
            .ok_or_else(|| {
                Error::config(format!(
                    "Unable to parse IPv4 addr from '{}' on '{}'",
                    addrs.ipv4.as_deref().unwrap_or_default(),
                    h.hostname
                ))
            })?;

        let declared_ip = h.ip_addr.to_string();
        if declared_ip != ipv4 && Some(declared_ip.as_str()) != addrs.ipv6.as_deref() {
            return Err(Error::config(format!(
                "Wrong address on {} on interface {}: {} and {} (should be {})",
                h.hostname,
                h.iface,
                addrs.ipv4.as_deref().unwrap_or_default(),
                addrs.ipv6.as_deref().unwrap_or_default(),
                h.ip_addr
            )));
        }
    }

    if stop_on_extra_interfaces {
        let extra: Vec<String> = declared
            .iter()
            .filter_map(|(hostname, known)| {
                let unknown: Vec<&str> = remote
                    .get(*hostname)?
                    .ip_a_s
                    .keys()
                    .map(String::as_str)
                    .filter(|i| !known.contains(i))
                    .collect();
                (!unknown.is_empty()).then(|| format!("{hostname}: {}", unknown.join(",")))
            })
            .collect();
        if !extra.is_empty() {
            let msg = format!(
                "One or more firewalls have extra interfaces: {}",
                extra.join(" ")
            );
            warn!("{}", msg);
            return Err(Error::config(msg));
        }
    }

    debug!("Interface check successful");
    Ok(())
}
