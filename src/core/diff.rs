//! Compiled versus live rule comparison
//!
//! Compiled chains are rendered as `iptables-restore` lines and compared with
//! the filter rules fetched from each firewall. The comparison is set based:
//! reordering alone is not a change.

use crate::core::compiler::{CompiledRules, HostChains};
use crate::core::model::Chain;
use crate::core::remote::RemoteConfs;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Chain order used in restore files
pub const RESTORE_CHAIN_ORDER: [Chain; 3] = [Chain::Input, Chain::Forward, Chain::Output];

/// Changes needed on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostDiff {
    /// Compiled lines missing on the host
    pub added: Vec<String>,
    /// Live lines not in the compiled rules
    pub removed: Vec<String>,
}

impl HostDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Per-host differences; hosts without changes are absent
pub type RulesDiff = BTreeMap<String, HostDiff>;

/// Collapses runs of whitespace into single spaces and trims.
pub fn normalize(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders `-A <CHAIN> <statement>` lines for INPUT, FORWARD and OUTPUT.
pub fn build_restore_blocks(chains: &HostChains) -> Vec<String> {
    RESTORE_CHAIN_ORDER
        .iter()
        .flat_map(|&chain| {
            chains
                .chain(chain)
                .iter()
                .map(move |stmt| format!("-A {chain} {stmt}"))
        })
        .collect()
}

/// Renders a complete `iptables-restore` file for a host.
pub fn build_restore(hostname: &str, chains: &HostChains) -> Vec<String> {
    let mut lines = vec![
        format!("# Created by Firelet for host {hostname}"),
        "*filter".to_string(),
    ];
    lines.extend(build_restore_blocks(chains));
    lines.push("COMMIT".to_string());
    lines
}

/// Restore files for every compiled host
pub fn build_all_restores(compiled: &CompiledRules) -> BTreeMap<String, Vec<String>> {
    compiled
        .iter()
        .map(|(hostname, chains)| (hostname.clone(), build_restore(hostname, chains)))
        .collect()
}

/// Filter rule lines of every fetched host
pub fn extract_filter_rules(remote: &RemoteConfs) -> BTreeMap<String, Vec<String>> {
    remote
        .iter()
        .map(|(hostname, conf)| (hostname.clone(), conf.iptables.filter.clone()))
        .collect()
}

/// Compares live rule lines with compiled ones, host by host.
///
/// Hosts that are live but not compiled are skipped.
pub fn diff(
    remote: &BTreeMap<String, Vec<String>>,
    compiled: &BTreeMap<String, Vec<String>>,
) -> RulesDiff {
    let mut result = RulesDiff::new();
    for (hostname, existing) in remote {
        let Some(new) = compiled.get(hostname) else {
            debug!("{} removed?", hostname);
            continue;
        };
        let new: Vec<String> = new.iter().map(|l| normalize(l)).collect();
        let existing: Vec<String> = existing.iter().map(|l| normalize(l)).collect();
        let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();
        let existing_set: HashSet<&str> = existing.iter().map(String::as_str).collect();

        let host_diff = HostDiff {
            added: new
                .iter()
                .filter(|l| !existing_set.contains(l.as_str()))
                .cloned()
                .collect(),
            removed: existing
                .iter()
                .filter(|l| !new_set.contains(l.as_str()))
                .cloned()
                .collect(),
        };
        debug!(
            "Rules for {:<15} old: {} new: {} added: {} removed: {}",
            hostname,
            existing.len(),
            new.len(),
            host_diff.added.len(),
            host_diff.removed.len()
        );
        if !host_diff.is_empty() {
            result.insert(hostname.clone(), host_diff);
        }
    }
    result
}

/// Diffs compiled chains against fetched live state.
pub fn diff_compiled_and_remote(compiled: &CompiledRules, remote: &RemoteConfs) -> RulesDiff {
    let new_rules: BTreeMap<String, Vec<String>> = compiled
        .iter()
        .map(|(hostname, chains)| (hostname.clone(), build_restore_blocks(chains)))
        .collect();
    diff(&extract_filter_rules(remote), &new_rules)
}
