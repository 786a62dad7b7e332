//! Host group flattening
//!
//! Resolves nested host group membership into concrete [`Host`] and
//! [`Network`] leaves. Child names are looked up, in order, as host keys
//! (`hostname:iface`), network names and host group names.
//!
//! Two traversals are provided:
//!
//! - [`Flattener::flatten`] resolves objects and rejects loops while compiling
//! - [`reachable_names`] walks names only, and backs the loop check performed
//!   when a host group is added or edited

use crate::core::error::{Error, Result};
use crate::core::model::{Endpoint, Host, HostGroup, Network};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Name lookups over the host, network and host group tables.
pub struct Flattener<'a> {
    hosts: HashMap<String, &'a Host>,
    networks: HashMap<&'a str, &'a Network>,
    groups: HashMap<&'a str, &'a HostGroup>,
    order: Vec<&'a str>,
}

impl<'a> Flattener<'a> {
    pub fn new(
        hosts: impl IntoIterator<Item = &'a Host>,
        networks: impl IntoIterator<Item = &'a Network>,
        groups: impl IntoIterator<Item = &'a HostGroup>,
    ) -> Self {
        let groups: Vec<&HostGroup> = groups.into_iter().collect();
        Self {
            hosts: hosts.into_iter().map(|h| (h.key(), h)).collect(),
            networks: networks.into_iter().map(|n| (n.name.as_str(), n)).collect(),
            order: groups.iter().map(|g| g.name.as_str()).collect(),
            groups: groups.into_iter().map(|g| (g.name.as_str(), g)).collect(),
        }
    }

    /// Flattens a host group into its leaves, in traversal order.
    ///
    /// Duplicates are kept.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the group or one of its descendants is not
    /// defined, or if the group contains itself.
    pub fn flatten(&self, name: &str) -> Result<Vec<Endpoint>> {
        let group: &'a HostGroup = self
            .groups
            .get(name)
            .copied()
            .ok_or_else(|| Error::config(format!("Hostgroup {name} is not defined.")))?;
        let mut leaves = Vec::new();
        let mut stack = vec![group.name.as_str()];
        self.walk(group, &mut stack, &mut leaves)?;
        Ok(leaves)
    }

    /// Flattens every host group.
    ///
    /// # Errors
    ///
    /// Propagates the first [`Flattener::flatten`] failure.
    pub fn flatten_all(&self) -> Result<BTreeMap<String, Vec<Endpoint>>> {
        let mut flat = BTreeMap::new();
        for name in &self.order {
            let leaves = self.flatten(name)?;
            debug!("Hostgroup {} flattened into {} items", name, leaves.len());
            flat.insert((*name).to_string(), leaves);
        }
        Ok(flat)
    }

    fn walk(
        &self,
        group: &'a HostGroup,
        stack: &mut Vec<&'a str>,
        leaves: &mut Vec<Endpoint>,
    ) -> Result<()> {
        for child in &group.childs {
            if let Some(&host) = self.hosts.get(child.as_str()) {
                leaves.push(Endpoint::Host(host.clone()));
            } else if let Some(&net) = self.networks.get(child.as_str()) {
                leaves.push(Endpoint::Network(net.clone()));
            } else if let Some(&sub) = self.groups.get(child.as_str()) {
                if stack.contains(&sub.name.as_str()) {
                    return Err(Error::config(format!(
                        "Loop detected: hostgroup {} contains itself through {}",
                        sub.name,
                        stack.join(" -> ")
                    )));
                }
                stack.push(sub.name.as_str());
                self.walk(sub, stack, leaves)?;
                stack.pop();
            } else {
                return Err(Error::config(format!(
                    "Item {child} in hostgroup {} is not defined.",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

/// Collects every name reachable from `node` through host group membership.
///
/// Group names met along the way are included, and `node` itself is included
/// only when a loop leads back to it. Unknown names are treated as leaves.
pub fn reachable_names<'a>(
    groups: impl IntoIterator<Item = &'a HostGroup>,
    node: &str,
) -> BTreeSet<String> {
    let by_name: HashMap<&str, &HostGroup> =
        groups.into_iter().map(|g| (g.name.as_str(), g)).collect();

    let mut seen = BTreeSet::new();
    let mut pending: Vec<&str> = by_name
        .get(node)
        .map(|g| g.childs.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(name) = pending.pop() {
        if !seen.insert(name.to_string()) {
            continue;
        }
        if let Some(group) = by_name.get(name) {
            pending.extend(group.childs.iter().map(String::as_str));
        }
    }
    seen
}

/// Checks that giving `childs` to the group `name` would not create a loop.
///
/// # Errors
///
/// Returns `Error::Config` if a child is the group itself or reaches it.
pub fn check_no_loop<'a>(
    groups: impl IntoIterator<Item = &'a HostGroup> + Clone,
    name: &str,
    childs: &[String],
) -> Result<()> {
    for child in childs {
        if child == name || reachable_names(groups.clone(), child).contains(name) {
            return Err(Error::config(format!(
                "Loop detected: hostgroup {name} would contain itself through {child}"
            )));
        }
    }
    Ok(())
}
