//! Rule compilation
//!
//! Turns the declarative model into iptables filter statements, one
//! [`HostChains`] per hostname. Compilation is a pure function of the tables:
//! the same input always produces the same statements in the same order.
//!
//! # Statement format
//!
//! ```text
//! -s <addr/mask> -d <addr/mask> -i|-o <iface> -p <proto> -m <module> --sport(s) <p> --dport(s) <p> -j <target>
//! ```
//!
//! Every token group is optional except the target. The `-A <CHAIN>` prefix is
//! added when building `iptables-restore` text (see [`crate::core::diff`]).

use crate::core::error::{Error, Result};
use crate::core::flatten::Flattener;
use crate::core::model::{
    ANY, Action, Chain, Endpoint, Host, HostGroup, Network, Protocol, Rule, Service,
};
use crate::validators;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// First statement of every chain that tracks connections
pub const ESTABLISHED: &str = "-m state --state RELATED,ESTABLISHED -j ACCEPT";

/// Hostnames that historically received an unconditional ACCEPT
pub const DEFAULT_ALWAYS_ACCEPT: [&str; 2] = ["BorderFW", "InternalFW"];

/// Compiled statements for the three filter chains of one host.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HostChains {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub forward: Vec<String>,
}

impl HostChains {
    /// Baseline statements every host starts from.
    ///
    /// Hosts that do not forward traffic drop everything in FORWARD.
    pub fn baseline(network_fw: bool) -> Self {
        Self {
            input: vec![ESTABLISHED.to_string(), "-i lo -j ACCEPT".to_string()],
            output: vec![ESTABLISHED.to_string(), "-o lo -j ACCEPT".to_string()],
            forward: if network_fw {
                vec![ESTABLISHED.to_string()]
            } else {
                vec!["-j DROP".to_string()]
            },
        }
    }

    pub fn chain(&self, chain: Chain) -> &[String] {
        match chain {
            Chain::Input => &self.input,
            Chain::Output => &self.output,
            Chain::Forward => &self.forward,
        }
    }

    /// Total number of statements
    pub fn len(&self) -> usize {
        self.input.len() + self.output.len() + self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compiled rules, keyed by hostname
pub type CompiledRules = BTreeMap<String, HostChains>;

/// Knobs that change compilation output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Hostnames receiving `-j ACCEPT` at the top of INPUT and FORWARD
    pub always_accept: BTreeSet<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            always_accept: DEFAULT_ALWAYS_ACCEPT.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Borrowed view over the five configuration tables.
#[derive(Debug, Clone, Copy)]
pub struct ModelView<'a> {
    pub rules: &'a [Rule],
    pub hosts: &'a [Host],
    pub hostgroups: &'a [HostGroup],
    pub services: &'a [Service],
    pub networks: &'a [Network],
}

/// One rule expanded for a single (source, destination) pair
#[derive(Debug, Clone)]
struct CompiledRule {
    proto: Option<Protocol>,
    module: Option<String>,
    sports: Option<String>,
    dports: Option<String>,
    src: Option<Endpoint>,
    dst: Option<Endpoint>,
    log_level: u8,
    name: String,
    action: Action,
}

/// What a statement jumps to
#[derive(Debug, Clone, Copy)]
enum Target {
    Verdict(Action),
    /// LOG target with the chain-specific prefix letter
    Log(char),
}

impl CompiledRule {
    fn statement(&self, direction: Option<(&str, &str)>, target: Target) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        if let Some(src) = self.src.as_ref().and_then(Endpoint::ipt_match) {
            parts.push(format!("-s {src}"));
        }
        if let Some(dst) = self.dst.as_ref().and_then(Endpoint::ipt_match) {
            parts.push(format!("-d {dst}"));
        }
        if let Some((flag, iface)) = direction {
            parts.push(format!("{flag} {iface}"));
        }
        if let Some(proto) = self.proto {
            parts.push(format!("-p {}", proto.as_iptables()));
        }
        parts.extend(self.module.iter().cloned());
        parts.extend(self.sports.iter().cloned());
        parts.extend(self.dports.iter().cloned());
        match target {
            Target::Verdict(action) => parts.push(format!("-j {action}")),
            Target::Log(prefix) => parts.push(format!(
                "-j LOG --log-prefix \"{prefix}_{}\" --log-level {}",
                self.name, self.log_level
            )),
        }
        parts.join(" ")
    }

    /// Pushes the optional LOG statement followed by the verdict.
    fn emit(&self, out: &mut Vec<String>, direction: Option<(&str, &str)>, prefix: char) {
        if self.log_level != 0 {
            out.push(self.statement(direction, Target::Log(prefix)));
        }
        out.push(self.statement(direction, Target::Verdict(self.action)));
    }
}

/// Tells if traffic from `src` to `dst` is routed through the host interface `me`.
fn forwarded(
    src: Option<&Endpoint>,
    dst: Option<&Endpoint>,
    me: &Host,
    routed_nets: &[&Network],
) -> bool {
    let Some(src) = src else {
        return true;
    };
    // input or output traffic, not to be forwarded
    if src.ip_addr() == me.ip_addr {
        return false;
    }
    let dst_in = |net: &Network| dst.is_some_and(|d| net.contains(d));

    let mynet = me.mynetwork();
    if mynet.contains(src) {
        return !dst_in(&mynet);
    }
    routed_nets
        .iter()
        .any(|rnet| rnet.contains(src) && !dst_in(rnet))
}

/// Builds the port match module and options for a protocol/ports pair.
fn port_matches(
    rule_name: &str,
    proto: Option<Protocol>,
    sports: &str,
    dports: &str,
) -> Result<(Option<String>, Option<String>, Option<String>)> {
    let non_empty = |p: &str| (!p.is_empty()).then(|| p.to_string());

    if sports.contains(',') || dports.contains(',') {
        return Ok((
            Some("-m multiport".to_string()),
            non_empty(sports).map(|p| format!("--sports {p}")),
            non_empty(dports).map(|p| format!("--dports {p}")),
        ));
    }
    if let Some(p) = proto
        && p.has_port_module()
    {
        return Ok((
            Some(format!("-m {}", p.as_iptables())),
            non_empty(sports).map(|p| format!("--sport {p}")),
            non_empty(dports).map(|p| format!("--dport {p}")),
        ));
    }
    if !sports.is_empty() || !dports.is_empty() {
        return Err(Error::config(format!(
            "Ports cannot be used without TCP, UDP or ICMP in rule \"{rule_name}\""
        )));
    }
    Ok((None, None, None))
}

/// Compiles the enabled rules into per-host chain statements.
///
/// # Errors
///
/// Returns `Error::Config` for unknown names, unknown routed networks, host
/// group loops, protocol mismatches, invalid actions, invalid rule names and
/// non-integer log levels. Nothing is modified on failure.
pub fn compile_rules(model: ModelView<'_>, options: &CompileOptions) -> Result<CompiledRules> {
    debug!("Building dictionaries...");
    let host_by_key: HashMap<String, &Host> = model.hosts.iter().map(|h| (h.key(), h)).collect();
    let net_by_name: HashMap<&str, &Network> =
        model.networks.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut proto_port: HashMap<&str, (Option<Protocol>, &str)> = model
        .services
        .iter()
        .map(|s| (s.name.as_str(), (Some(s.protocol), s.ports.as_str())))
        .collect();
    // special case for "any"
    proto_port.insert(ANY, (None, ""));

    for h in model.hosts {
        for routed in &h.routed {
            if !net_by_name.contains_key(routed.as_str()) {
                return Err(Error::config(format!(
                    "Unknown network '{routed}' routed by {}",
                    h.hostname
                )));
            }
        }
    }

    let flat_hg =
        Flattener::new(model.hosts, model.networks, model.hostgroups).flatten_all()?;

    let resolve = |name: &str| -> Result<Vec<Option<Endpoint>>> {
        if let Some(&h) = host_by_key.get(name) {
            Ok(vec![Some(Endpoint::Host(h.clone()))])
        } else if let Some(&n) = net_by_name.get(name) {
            Ok(vec![Some(Endpoint::Network(n.clone()))])
        } else if let Some(leaves) = flat_hg.get(name) {
            Ok(leaves.iter().cloned().map(Some).collect())
        } else if name == ANY {
            Ok(vec![None])
        } else {
            Err(Error::config(format!("Item {name} is not defined.")))
        }
    };
    let service = |name: &str, rule: &Rule| {
        proto_port.get(name).copied().ok_or_else(|| {
            Error::config(format!(
                "Service {name} used in rule \"{}\" is not defined.",
                rule.name
            ))
        })
    };

    debug!("Compiling ruleset...");
    let mut compiled = Vec::new();
    for rule in model.rules.iter().filter(|r| r.enabled) {
        let action = rule.parsed_action()?;
        validators::validate_rule_name(&rule.name).map_err(Error::Config)?;

        let srcs = resolve(&rule.src)?;
        let dsts = resolve(&rule.dst)?;

        let (sproto, sports) = service(&rule.src_serv, rule)?;
        let (dproto, dports) = service(&rule.dst_serv, rule)?;
        let proto = match (sproto, dproto) {
            (Some(s), Some(d)) if s != d => {
                return Err(Error::config(format!(
                    "Source and destination protocol must be the same in rule \"{}\".",
                    rule.name
                )));
            }
            (Some(s), _) => Some(s),
            (None, d) => d,
        };

        let (module, sports, dports) = port_matches(&rule.name, proto, sports, dports)?;
        let log_level = rule.parsed_log_level()?;

        for src in &srcs {
            for dst in &dsts {
                compiled.push(CompiledRule {
                    proto,
                    module: module.clone(),
                    sports: sports.clone(),
                    dports: dports.clone(),
                    src: src.clone(),
                    dst: dst.clone(),
                    log_level,
                    name: rule.name.clone(),
                    action,
                });
            }
        }
    }

    debug!("Splicing ruleset...");
    let mut rd = CompiledRules::new();
    for h in model.hosts {
        rd.entry(h.hostname.clone())
            .or_insert_with(|| HostChains::baseline(h.network_fw));
    }

    for cr in &compiled {
        if let (Some(src), Some(dst)) = (&cr.src, &cr.dst)
            && src.ipt() == dst.ipt()
        {
            continue;
        }
        for h in model.hosts {
            let Some(chains) = rd.get_mut(&h.hostname) else {
                continue;
            };

            // INPUT: the host is in the destination
            if cr.dst.as_ref().is_none_or(|d| d.contains_host(h)) {
                cr.emit(&mut chains.input, Some(("-i", h.iface.as_str())), 'i');
            }

            // OUTPUT: the host is in the source
            if cr.src.as_ref().is_none_or(|s| s.contains_host(h)) {
                cr.emit(&mut chains.output, Some(("-o", h.iface.as_str())), 'o');
            }

            // FORWARD: source and destination on different sides of the host
            if !h.network_fw {
                continue;
            }
            let routed_nets: Vec<&Network> = h
                .routed
                .iter()
                .filter_map(|r| net_by_name.get(r.as_str()).copied())
                .collect();
            if forwarded(cr.src.as_ref(), cr.dst.as_ref(), h, &routed_nets) {
                cr.emit(&mut chains.forward, None, 'f');
            }
        }
    }

    for (hostname, chains) in &mut rd {
        if options.always_accept.contains(hostname) {
            debug!("Prepending unconditional ACCEPT for {}", hostname);
            chains.input.insert(0, "-j ACCEPT".to_string());
            chains.forward.insert(0, "-j ACCEPT".to_string());
        }
    }

    info!(
        "Compiled {} rule expansions into {} statements for {} hosts",
        compiled.len(),
        rd.values().map(HostChains::len).sum::<usize>(),
        rd.len()
    );
    Ok(rd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{group, host, network, rule, service};

    fn view<'a>(
        rules: &'a [Rule],
        hosts: &'a [Host],
        hostgroups: &'a [HostGroup],
        services: &'a [Service],
        networks: &'a [Network],
    ) -> ModelView<'a> {
        ModelView {
            rules,
            hosts,
            hostgroups,
            services,
            networks,
        }
    }

    #[test]
    fn test_baseline_without_rules() {
        let mut fw = host("fw", "eth0", "10.0.0.1", 24);
        fw.network_fw = true;
        let hosts = vec![fw, host("web", "eth0", "10.0.0.2", 24)];
        let out = compile_rules(view(&[], &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();

        assert_eq!(out["fw"], HostChains::baseline(true));
        assert_eq!(out["web"].forward, vec!["-j DROP"]);
        assert_eq!(out["web"].input[1], "-i lo -j ACCEPT");
        assert_eq!(out["web"].output[1], "-o lo -j ACCEPT");
    }

    #[test]
    fn test_wildcard_rule_has_no_addresses() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let rules = vec![rule("any", "*", "*", "*", "*", "ACCEPT")];
        let out = compile_rules(view(&rules, &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();

        let web = &out["web"];
        assert_eq!(web.input.last().unwrap(), "-i eth0 -j ACCEPT");
        assert_eq!(web.output.last().unwrap(), "-o eth0 -j ACCEPT");
        for stmt in web.input.iter().chain(&web.output) {
            assert!(!stmt.contains("-s "));
            assert!(!stmt.contains("-d "));
        }
    }

    #[test]
    fn test_multiport_for_port_lists() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let services = vec![service("https", "TCP", "80,443")];
        let rules = vec![rule("web", "*", "*", "web:eth0", "https", "ACCEPT")];
        let out = compile_rules(
            view(&rules, &hosts, &[], &services, &[]),
            &CompileOptions::default(),
        )
        .unwrap();

        let last = out["web"].input.last().unwrap();
        assert_eq!(
            last,
            "-d 10.0.0.2/32 -i eth0 -p tcp -m multiport --dports 80,443 -j ACCEPT"
        );
        assert!(!last.contains("--dport "));
    }

    #[test]
    fn test_icmp_uses_module_with_dport() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let services = vec![service("icmp-echo", "ICMP", "8")];
        let rules = vec![rule("ping", "*", "*", "web:eth0", "icmp-echo", "ACCEPT")];
        let out = compile_rules(
            view(&rules, &hosts, &[], &services, &[]),
            &CompileOptions::default(),
        )
        .unwrap();

        assert_eq!(
            out["web"].input.last().unwrap(),
            "-d 10.0.0.2/32 -i eth0 -p icmp -m icmp --dport 8 -j ACCEPT"
        );
    }

    #[test]
    fn test_log_line_precedes_action() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let mut r = rule("logged", "*", "*", "web:eth0", "*", "DROP");
        r.log_level = "3".to_string();
        let out = compile_rules(view(&[r], &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();

        let input = &out["web"].input;
        assert_eq!(
            input[input.len() - 2],
            "-d 10.0.0.2/32 -i eth0 -j LOG --log-prefix \"i_logged\" --log-level 3"
        );
        assert_eq!(input[input.len() - 1], "-d 10.0.0.2/32 -i eth0 -j DROP");
    }

    #[test]
    fn test_disabled_rules_are_skipped_even_if_invalid() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let mut r = rule("draft", "nowhere", "*", "*", "*", "MAYBE");
        r.enabled = false;
        let out = compile_rules(view(&[r], &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();
        assert_eq!(out["web"], HostChains::baseline(false));
    }

    #[test]
    fn test_fatal_conditions() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let services = vec![service("ssh", "TCP", "22"), service("dns", "UDP", "53")];
        let opts = CompileOptions::default();

        let cases = [
            (rule("r", "ghost", "*", "*", "*", "ACCEPT"), "not defined"),
            (rule("r", "*", "ssh", "*", "dns", "ACCEPT"), "protocol must be the same"),
            (rule("r", "*", "*", "*", "*", "REJECT"), "ACCEPT"),
            (rule("r", "*", "nosuch", "*", "*", "ACCEPT"), "not defined"),
            (rule("bad<name>", "*", "*", "*", "*", "ACCEPT"), "Invalid character"),
        ];
        for (r, expected) in cases {
            let err = compile_rules(view(&[r], &hosts, &[], &services, &[]), &opts).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{err} should mention {expected}"
            );
        }

        let mut r = rule("r", "*", "*", "*", "*", "ACCEPT");
        r.log_level = "high".to_string();
        let err = compile_rules(view(&[r], &hosts, &[], &services, &[]), &opts).unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn test_unknown_routed_network_is_fatal() {
        let mut fw = host("fw", "eth0", "10.0.0.1", 24);
        fw.routed = vec!["dmz".to_string()];
        let err = compile_rules(view(&[], &[fw], &[], &[], &[]), &CompileOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown network 'dmz'"));
    }

    #[test]
    fn test_self_rules_are_skipped() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let rules = vec![rule("loop", "web:eth0", "*", "web:eth0", "*", "ACCEPT")];
        let out = compile_rules(view(&rules, &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();
        assert_eq!(out["web"], HostChains::baseline(false));
    }

    #[test]
    fn test_forwarding_through_router() {
        let mut fw = host("fw", "eth0", "10.0.0.1", 24);
        fw.network_fw = true;
        fw.routed = vec!["dmz".to_string()];
        let hosts = vec![
            fw,
            host("lan1", "eth0", "10.0.0.10", 24),
            host("dmz1", "eth0", "172.16.0.10", 24),
        ];
        let nets = vec![network("dmz", "172.16.0.0", 24)];
        let rules = vec![
            rule("lan-to-dmz", "lan1:eth0", "*", "dmz1:eth0", "*", "ACCEPT"),
            rule("dmz-to-lan", "dmz1:eth0", "*", "lan1:eth0", "*", "ACCEPT"),
            rule("lan-local", "lan1:eth0", "*", "fw:eth0", "*", "ACCEPT"),
        ];
        let out = compile_rules(
            view(&rules, &hosts, &[], &[], &nets),
            &CompileOptions::default(),
        )
        .unwrap();

        let forward = &out["fw"].forward;
        assert!(forward.contains(&"-s 10.0.0.10/32 -d 172.16.0.10/32 -j ACCEPT".to_string()));
        assert!(forward.contains(&"-s 172.16.0.10/32 -d 10.0.0.10/32 -j ACCEPT".to_string()));
        // traffic addressed to the firewall itself stays out of FORWARD
        assert!(!forward.iter().any(|s| s.contains("-d 10.0.0.1/32")));
        assert!(out["fw"]
            .input
            .contains(&"-s 10.0.0.10/32 -d 10.0.0.1/32 -i eth0 -j ACCEPT".to_string()));
    }

    #[test]
    fn test_hostgroup_expansion_is_cartesian() {
        let hosts = vec![
            host("a", "eth0", "10.0.0.1", 24),
            host("b", "eth0", "10.0.0.2", 24),
            host("c", "eth0", "10.0.0.3", 24),
        ];
        let groups = vec![group("clients", &["a:eth0", "b:eth0"])];
        let rules = vec![rule("to-c", "clients", "*", "c:eth0", "*", "ACCEPT")];
        let out = compile_rules(
            view(&rules, &hosts, &groups, &[], &[]),
            &CompileOptions::default(),
        )
        .unwrap();

        let input = &out["c"].input;
        assert!(input.contains(&"-s 10.0.0.1/32 -d 10.0.0.3/32 -i eth0 -j ACCEPT".to_string()));
        assert!(input.contains(&"-s 10.0.0.2/32 -d 10.0.0.3/32 -i eth0 -j ACCEPT".to_string()));
        assert_eq!(out["a"].output.len(), 3);
    }

    #[test]
    fn test_always_accept_hook() {
        let hosts = vec![
            host("BorderFW", "eth0", "10.0.0.1", 24),
            host("x", "eth0", "10.0.0.2", 24),
        ];
        let out = compile_rules(view(&[], &hosts, &[], &[], &[]), &CompileOptions::default())
            .unwrap();
        assert_eq!(out["BorderFW"].input[0], "-j ACCEPT");
        assert_eq!(out["BorderFW"].forward[0], "-j ACCEPT");
        assert_eq!(out["x"].input[0], ESTABLISHED);

        let custom = CompileOptions {
            always_accept: ["x".to_string()].into_iter().collect(),
        };
        let out = compile_rules(view(&[], &hosts, &[], &[], &[]), &custom).unwrap();
        assert_eq!(out["BorderFW"].input[0], ESTABLISHED);
        assert_eq!(out["x"].input[0], "-j ACCEPT");
    }

    #[test]
    fn test_internet_never_contains_hosts() {
        let hosts = vec![host("web", "eth0", "10.0.0.2", 24)];
        let nets = vec![network("Internet", "0.0.0.0", 0)];
        let groups = vec![group("outside", &["Internet"])];
        let rules = vec![rule("in", "outside", "*", "web:eth0", "*", "ACCEPT")];
        let out = compile_rules(
            view(&rules, &hosts, &groups, &[], &nets),
            &CompileOptions::default(),
        )
        .unwrap();

        // "-s 0.0.0.0/0" is omitted, and web is not inside the source
        assert_eq!(out["web"].input.last().unwrap(), "-d 10.0.0.2/32 -i eth0 -j ACCEPT");
        assert_eq!(out["web"].output.len(), 2);
    }
}
