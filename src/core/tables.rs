//! Configuration tables
//!
//! Each table is a space-delimited CSV file in the repository directory:
//!
//! | File | Columns |
//! |------|---------|
//! | `rules.csv` | enabled name src src_serv dst dst_serv action log_level desc |
//! | `hosts.csv` | hostname iface ip_addr masklen local_fw network_fw mng routed... |
//! | `hostgroups.csv` | name childs... |
//! | `networks.csv` | name ip_addr masklen |
//! | `services.csv` | name protocol ports |
//!
//! The first line of every file must be [`FORMAT_HEADER`]. Other lines
//! starting with `#` are comments and survive rewrites. Every mutation is
//! written back immediately using an atomic temp file and rename.
//!
//! Rows are addressed by position (`rid`). Concurrent editors are detected with
//! row tokens: a SHA-256 fingerprint of the row taken when it was read and
//! compared again before an update is applied.

use crate::core::error::{Error, Result};
use crate::core::flatten::check_no_loop;
use crate::core::model::{Host, HostGroup, Network, Rule, Service};
use crate::validators;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Mandatory first line of every table file
pub const FORMAT_HEADER: &str = "# Format 0.1 - Do not edit this line";

const NOT_FOUND_MESSAGE: &str =
    "Item to be updated not found: one or more items has been modified in the meantime.";

/// Names of the table files, without extension
pub const TABLE_NAMES: [&str; 5] = ["rules", "hosts", "hostgroups", "networks", "services"];

/// A record stored as one CSV line.
pub trait Row: Clone + Serialize {
    /// File name without extension
    const TABLE: &'static str;

    /// Parses the fields of one CSV line.
    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String>;

    fn to_fields(&self) -> Vec<String>;

    /// Unique key within the table
    fn key(&self) -> String;

    fn duplicate_message(key: &str) -> String;

    /// Checks the row against the rest of the table before it is stored.
    fn check(&self, _rows: &[Self]) -> Result<()> {
        Ok(())
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn field<'a>(fields: &[&'a str], idx: usize, name: &str) -> std::result::Result<&'a str, String> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| format!("missing field '{name}'"))
}

fn parse_ip(value: &str) -> std::result::Result<Ipv4Addr, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid IPv4 address '{value}'"))
}

impl Row for Rule {
    const TABLE: &'static str = "rules";

    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        Ok(Self {
            enabled: validators::parse_flag(field(fields, 0, "enabled")?)?,
            name: field(fields, 1, "name")?.to_string(),
            src: field(fields, 2, "src")?.to_string(),
            src_serv: field(fields, 3, "src_serv")?.to_string(),
            dst: field(fields, 4, "dst")?.to_string(),
            dst_serv: field(fields, 5, "dst_serv")?.to_string(),
            action: field(fields, 6, "action")?.to_string(),
            log_level: field(fields, 7, "log_level")?.to_string(),
            desc: fields.get(8).map(ToString::to_string).unwrap_or_default(),
        })
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            flag(self.enabled),
            self.name.clone(),
            self.src.clone(),
            self.src_serv.clone(),
            self.dst.clone(),
            self.dst_serv.clone(),
            self.action.clone(),
            self.log_level.clone(),
            self.desc.clone(),
        ]
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn duplicate_message(key: &str) -> String {
        format!("Another rule with the same name '{key}' exists.")
    }

    fn check(&self, _rows: &[Self]) -> Result<()> {
        validators::validate_rule_name(&self.name).map_err(Error::Config)
    }
}

impl Row for Host {
    const TABLE: &'static str = "hosts";

    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        Ok(Self {
            hostname: field(fields, 0, "hostname")?.to_string(),
            iface: field(fields, 1, "iface")?.to_string(),
            ip_addr: parse_ip(field(fields, 2, "ip_addr")?)?,
            masklen: validators::parse_masklen(field(fields, 3, "masklen")?)?,
            local_fw: validators::parse_flag(field(fields, 4, "local_fw")?)?,
            network_fw: validators::parse_flag(field(fields, 5, "network_fw")?)?,
            mng: validators::parse_flag(field(fields, 6, "mng")?)?,
            routed: fields
                .iter()
                .skip(7)
                .filter(|n| !n.is_empty())
                .map(ToString::to_string)
                .collect(),
        })
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.hostname.clone(),
            self.iface.clone(),
            self.ip_addr.to_string(),
            self.masklen.to_string(),
            flag(self.local_fw),
            flag(self.network_fw),
            flag(self.mng),
        ];
        fields.extend(self.routed.iter().cloned());
        fields
    }

    fn key(&self) -> String {
        Host::key(self)
    }

    fn duplicate_message(key: &str) -> String {
        format!("Host '{key}' already defined")
    }

    fn check(&self, _rows: &[Self]) -> Result<()> {
        self.validate()
    }
}

impl Row for HostGroup {
    const TABLE: &'static str = "hostgroups";

    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        Ok(Self {
            name: field(fields, 0, "name")?.to_string(),
            childs: fields
                .iter()
                .skip(1)
                .filter(|n| !n.is_empty())
                .map(ToString::to_string)
                .collect(),
        })
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.name.clone()];
        fields.extend(self.childs.iter().cloned());
        fields
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn duplicate_message(key: &str) -> String {
        format!("Hostgroup '{key}' already defined")
    }

    fn check(&self, rows: &[Self]) -> Result<()> {
        check_no_loop(rows, &self.name, &self.childs)
    }
}

impl Row for Network {
    const TABLE: &'static str = "networks";

    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        Ok(Network::new(
            field(fields, 0, "name")?,
            parse_ip(field(fields, 1, "ip_addr")?)?,
            validators::parse_masklen(field(fields, 2, "masklen")?)?,
        ))
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.ip_addr.to_string(),
            self.masklen.to_string(),
        ]
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn duplicate_message(key: &str) -> String {
        format!("Network '{key}' already defined")
    }

    fn check(&self, _rows: &[Self]) -> Result<()> {
        self.validate()
    }
}

impl Row for Service {
    const TABLE: &'static str = "services";

    fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        let name = field(fields, 0, "name")?;
        let protocol = field(fields, 1, "protocol")?;
        let ports = fields.get(2).copied().unwrap_or_default();
        Service::new(name, protocol, ports).map_err(|e| e.to_string())
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.protocol.to_string(),
            self.ports.clone(),
        ]
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn duplicate_message(key: &str) -> String {
        format!("Service '{key}' already defined")
    }
}

/// Rejects field values spanning several lines.
fn single_line(fields: &[String]) -> std::result::Result<(), String> {
    match fields.iter().find(|f| f.contains(['\n', '\r'])) {
        Some(f) => Err(format!("Line breaks are not allowed in '{}'", f.escape_default())),
        None => Ok(()),
    }
}

/// Reads the rows of a table file.
fn read_rows<R: Row>(path: &Path) -> Result<Vec<R>> {
    let content = fs::read_to_string(path)?;
    if content.lines().next().map(str::trim_end) != Some(FORMAT_HEADER) {
        return Err(Error::config(format!(
            "Data format not supported in {}",
            path.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let n = rows.len() + 1;
        let row = R::from_fields(&fields)
            .and_then(|row| single_line(&row.to_fields()).map(|()| row))
            .map_err(|e| {
                Error::config(format!("Invalid row {n} in {}: {e}", path.display()))
            })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Writes the rows of a table file, keeping the existing comment lines.
fn write_rows<R: Row>(path: &Path, rows: &[R]) -> Result<()> {
    debug!("Saving {} rows in {}", rows.len(), path.display());
    let mut comments: Vec<String> = match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .filter(|l| l.starts_with('#'))
            .map(|l| l.trim_end().to_string())
            .collect(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not existing", path.display());
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    if comments.first().map(String::as_str) != Some(FORMAT_HEADER) {
        comments.insert(0, FORMAT_HEADER.to_string());
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for line in &comments {
        writeln!(temp, "{line}")?;
    }
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut temp);
        for row in rows {
            writer.write_record(row.to_fields())?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Computes the concurrency token of a row.
pub fn row_token<R: Row>(row: &R) -> Result<String> {
    let json = serde_json::to_string(row)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// An in-memory table backed by its CSV file.
#[derive(Debug, Clone)]
pub struct Table<R: Row> {
    path: PathBuf,
    rows: Vec<R>,
}

pub type Rules = Table<Rule>;
pub type Hosts = Table<Host>;
pub type HostGroups = Table<HostGroup>;
pub type Networks = Table<Network>;
pub type Services = Table<Service>;

impl<R: Row> Table<R> {
    /// Loads `<repodir>/<table>.csv`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file is unreadable, `Error::Config` for a
    /// bad header or an invalid row.
    pub fn load(repodir: &Path) -> Result<Self> {
        let path = repodir.join(format!("{}.csv", R::TABLE));
        let rows = read_rows(&path)?;
        debug!("Loaded {} rows from {}", rows.len(), path.display());
        Ok(Self { path, rows })
    }

    /// Creates a table with no rows, to be saved at `path`.
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            rows: Vec::new(),
        }
    }

    /// Discards in-memory rows and reads the file again.
    pub fn reload(&mut self) -> Result<()> {
        self.rows = read_rows(&self.path)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        write_rows(&self.path, &self.rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &'static str {
        R::TABLE
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Returns the row at `rid`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if there is no such row.
    pub fn get(&self, rid: usize) -> Result<&R> {
        self.rows.get(rid).ok_or_else(|| {
            Error::config(format!(
                "The element n. {rid} is not present in table '{}'",
                R::TABLE
            ))
        })
    }

    /// Fingerprint of the row at `rid`.
    pub fn token(&self, rid: usize) -> Result<String> {
        row_token(self.get(rid)?)
    }

    /// Removes the row at `rid` and saves the table.
    pub fn pop(&mut self, rid: usize) -> Result<R> {
        self.get(rid)?;
        let row = self.rows.remove(rid);
        self.save()?;
        Ok(row)
    }

    /// Replaces the row at `rid` and saves the table.
    ///
    /// When `token` is given it must match the current row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the row is gone, the token is stale, the key
    /// collides with another row or the row fails its table checks. The table
    /// is untouched in that case.
    pub fn update(&mut self, rid: usize, row: R, token: Option<&str>) -> Result<()> {
        let Some(current) = self.rows.get(rid) else {
            return Err(Error::config(NOT_FOUND_MESSAGE));
        };
        if let Some(token) = token
            && token != row_token(current)?
        {
            return Err(Error::config(
                "Unable to update: one or more items has been modified in the meantime.",
            ));
        }
        let key = row.key();
        if self
            .rows
            .iter()
            .enumerate()
            .any(|(i, r)| i != rid && r.key() == key)
        {
            return Err(Error::config(R::duplicate_message(&key)));
        }
        single_line(&row.to_fields()).map_err(Error::Config)?;
        row.check(&self.rows)?;
        self.rows[rid] = row;
        self.save()
    }

    /// Inserts a row at `rid` (appending past the end) and saves the table.
    fn insert(&mut self, rid: usize, row: R) -> Result<()> {
        let key = row.key();
        if self.rows.iter().any(|r| r.key() == key) {
            return Err(Error::config(R::duplicate_message(&key)));
        }
        single_line(&row.to_fields()).map_err(Error::Config)?;
        row.check(&self.rows)?;
        let rid = rid.min(self.rows.len());
        self.rows.insert(rid, row);
        self.save()
    }

    /// Appends a row, rejecting duplicate keys.
    pub fn add(&mut self, row: R) -> Result<()> {
        self.insert(self.rows.len(), row)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.rows.iter().any(|r| r.key() == key)
    }
}

impl Table<Rule> {
    /// Inserts a rule at position `rid`.
    pub fn add_at(&mut self, rule: Rule, rid: usize) -> Result<()> {
        self.insert(rid, rule)
    }

    /// Inserts the disabled placeholder rule at position `rid`.
    pub fn add_default(&mut self, rid: usize) -> Result<()> {
        self.insert(rid, Rule::placeholder())
    }

    pub fn moveup(&mut self, rid: usize) -> Result<()> {
        if rid == 0 || rid >= self.rows.len() {
            return Err(Error::config(format!("Cannot move rule {rid} up.")));
        }
        self.rows.swap(rid - 1, rid);
        self.save()
    }

    pub fn movedown(&mut self, rid: usize) -> Result<()> {
        if rid + 1 >= self.rows.len() {
            return Err(Error::config(format!("Cannot move rule {rid} down.")));
        }
        self.rows.swap(rid, rid + 1);
        self.save()
    }

    pub fn enable(&mut self, rid: usize) -> Result<()> {
        self.set_enabled(rid, true)
    }

    pub fn disable(&mut self, rid: usize) -> Result<()> {
        self.set_enabled(rid, false)
    }

    pub fn is_enabled(&self, rid: usize) -> Result<bool> {
        Ok(self.get(rid)?.enabled)
    }

    fn set_enabled(&mut self, rid: usize, enabled: bool) -> Result<()> {
        self.get(rid)?;
        self.rows[rid].enabled = enabled;
        self.save()
    }
}

impl Table<Network> {
    /// Changes name, address and mask of a network.
    ///
    /// Returns `true` when the address had host bits set and was corrected.
    pub fn update_network(
        &mut self,
        rid: usize,
        name: &str,
        ip_addr: Ipv4Addr,
        masklen: u8,
        token: Option<&str>,
    ) -> Result<bool> {
        let mut net = self
            .rows
            .get(rid)
            .cloned()
            .ok_or_else(|| Error::config(NOT_FOUND_MESSAGE))?;
        name.clone_into(&mut net.name);
        let corrected = net.update(ip_addr, masklen);
        self.update(rid, net, token)?;
        Ok(corrected)
    }
}

impl Table<Service> {
    /// Replaces protocol and ports of a service after validation.
    pub fn update_service(
        &mut self,
        rid: usize,
        protocol: &str,
        ports: &str,
        token: Option<&str>,
    ) -> Result<()> {
        let mut svc = self.get(rid)?.clone();
        svc.update(protocol, ports)?;
        self.update(rid, svc, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Protocol;
    use crate::core::test_helpers::{group, host, network, rule, write_sample_repo, write_table};
    use tempfile::TempDir;

    fn sample() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_sample_repo(dir.path());
        dir
    }

    #[test]
    fn test_load_sample_tables() {
        let dir = sample();
        let rules = Rules::load(dir.path()).unwrap();
        assert_eq!(rules.len(), 5);
        assert_eq!(rules.get(0).unwrap().desc, "admin access");
        assert!(!rules.get(3).unwrap().enabled);

        let hosts = Hosts::load(dir.path()).unwrap();
        assert_eq!(hosts.get(0).unwrap().routed, vec!["dmz"]);
        assert!(hosts.get(1).unwrap().routed.is_empty());

        let groups = HostGroups::load(dir.path()).unwrap();
        assert_eq!(groups.get(0).unwrap().childs, vec!["client:eth0", "lan"]);
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("networks.csv"), "lan 10.0.0.0 8\n").unwrap();
        let err = Networks::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Data format not supported"));
    }

    #[test]
    fn test_invalid_row_reports_position() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), "services", &["ssh TCP 22", "bad GRE"]);
        let err = Services::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid row 2"));
    }

    #[test]
    fn test_networks_are_canonicalized_on_load() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), "networks", &["lan 10.0.0.99 24"]);
        let nets = Networks::load(dir.path()).unwrap();
        assert_eq!(nets.get(0).unwrap().ipt(), "10.0.0.0/24");
    }

    #[test]
    fn test_comments_survive_rewrite() {
        let dir = sample();
        let mut rules = Rules::load(dir.path()).unwrap();
        rules.disable(0).unwrap();

        let content = fs::read_to_string(dir.path().join("rules.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(FORMAT_HEADER));
        assert_eq!(lines.next(), Some("# rules are evaluated top to bottom"));
        assert!(content.contains("0 ssh_to_web clients"));
    }

    #[test]
    fn test_save_reload_round_trip() {
        let dir = sample();
        let hosts = Hosts::load(dir.path()).unwrap();
        let before = hosts.rows().to_vec();
        hosts.save().unwrap();

        let mut reloaded = Hosts::load(dir.path()).unwrap();
        reloaded.reload().unwrap();
        assert_eq!(reloaded.rows(), before.as_slice());

        let rules = Rules::load(dir.path()).unwrap();
        let before = rules.rows().to_vec();
        rules.save().unwrap();
        assert_eq!(Rules::load(dir.path()).unwrap().rows(), before.as_slice());
    }

    #[test]
    fn test_token_changes_with_row() {
        let dir = sample();
        let mut rules = Rules::load(dir.path()).unwrap();
        let token = rules.token(0).unwrap();
        assert_eq!(token, rules.token(0).unwrap());

        rules.disable(0).unwrap();
        assert_ne!(token, rules.token(0).unwrap());
    }

    #[test]
    fn test_update_with_stale_token_is_rejected() {
        let dir = sample();
        let mut rules = Rules::load(dir.path()).unwrap();
        let token = rules.token(1).unwrap();
        rules.disable(1).unwrap();

        let mut edited = rules.get(1).unwrap().clone();
        edited.desc = "edited".to_string();
        let err = rules.update(1, edited.clone(), Some(&token)).unwrap_err();
        assert!(err.to_string().contains("modified in the meantime"));
        assert_eq!(rules.get(1).unwrap().desc, "");

        let fresh = rules.token(1).unwrap();
        rules.update(1, edited, Some(&fresh)).unwrap();
        assert_eq!(rules.get(1).unwrap().desc, "edited");

        let err = rules.update(99, Rule::placeholder(), None).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_rule_add_and_move() {
        let dir = sample();
        let mut rules = Rules::load(dir.path()).unwrap();

        let err = rules
            .add_at(rule("web_public", "*", "*", "*", "*", "ACCEPT"), 0)
            .unwrap_err();
        assert!(err.to_string().contains("Another rule with the same name"));

        rules.add_default(0).unwrap();
        assert_eq!(rules.get(0).unwrap().name, "new");
        assert!(!rules.is_enabled(0).unwrap());

        rules.movedown(0).unwrap();
        assert_eq!(rules.get(1).unwrap().name, "new");
        rules.moveup(1).unwrap();
        assert_eq!(rules.get(0).unwrap().name, "new");

        assert!(rules.moveup(0).unwrap_err().to_string().contains("Cannot move rule 0 up."));
        let last = rules.len() - 1;
        assert!(rules.movedown(last).is_err());

        rules.enable(0).unwrap();
        assert!(Rules::load(dir.path()).unwrap().is_enabled(0).unwrap());
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let dir = sample();
        let mut hosts = Hosts::load(dir.path()).unwrap();
        let err = hosts.add(host("gw", "eth0", "10.9.9.9", 24)).unwrap_err();
        assert!(err.to_string().contains("already defined"));
        hosts.add(host("gw", "eth2", "10.9.9.9", 24)).unwrap();
        assert_eq!(Hosts::load(dir.path()).unwrap().len(), 5);

        let mut nets = Networks::load(dir.path()).unwrap();
        assert!(nets.add(network("lan", "10.0.0.0", 8)).is_err());
    }

    #[test]
    fn test_hostgroup_loop_rejected_before_mutation() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), "hostgroups", &["HG1 HG2", "HG2 HG1"]);
        let mut groups = HostGroups::load(dir.path()).unwrap();

        let err = groups
            .update(1, group("HG2", &["HG1"]), None)
            .unwrap_err();
        assert!(err.to_string().contains("Loop"));

        let err = groups.add(group("HG3", &["HG3"])).unwrap_err();
        assert!(err.to_string().contains("Loop"));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_network_update_reports_correction() {
        let dir = sample();
        let mut nets = Networks::load(dir.path()).unwrap();
        let corrected = nets
            .update_network(0, "lan", "10.66.1.7".parse().unwrap(), 24, None)
            .unwrap();
        assert!(corrected);
        assert_eq!(nets.get(0).unwrap().ipt(), "10.66.1.0/24");
        assert!(
            !nets
                .update_network(0, "lan2", "10.66.0.0".parse().unwrap(), 16, None)
                .unwrap()
        );
        assert_eq!(nets.get(0).unwrap().name, "lan2");
    }

    #[test]
    fn test_network_mask_length_above_32_is_rejected() {
        let dir = sample();
        let mut nets = Networks::load(dir.path()).unwrap();
        let before = nets.rows().to_vec();

        let err = nets
            .update_network(0, "lan", "10.0.0.0".parse().unwrap(), 40, None)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid netmask length '40'"));
        let err = nets.add(network("bad", "10.9.0.0", 33)).unwrap_err();
        assert!(err.to_string().contains("Invalid netmask length '33'"));

        assert_eq!(nets.rows(), before.as_slice());
        assert_eq!(Networks::load(dir.path()).unwrap().rows(), before.as_slice());
    }

    #[test]
    fn test_multiline_fields_are_rejected() {
        let dir = sample();
        let mut rules = Rules::load(dir.path()).unwrap();
        let before = rules.rows().to_vec();

        let mut edited = rules.get(0).unwrap().clone();
        edited.desc = "line one\n\n# not a comment".to_string();
        let err = rules.update(0, edited.clone(), None).unwrap_err();
        assert!(err.to_string().contains("Line breaks are not allowed"));
        edited.name = "other".to_string();
        edited.desc = "carriage\rreturn".to_string();
        assert!(rules.add(edited).is_err());

        assert_eq!(rules.rows(), before.as_slice());
        assert_eq!(Rules::load(dir.path()).unwrap().rows(), before.as_slice());
    }

    #[test]
    fn test_quoted_line_break_in_file_is_an_invalid_row() {
        let dir = TempDir::new().unwrap();
        write_table(
            dir.path(),
            "rules",
            &[
                "1 first * * * * ACCEPT 0 \"line one",
                "# inside the quotes\"",
                "1 second * * * * DROP 0 \"\"",
            ],
        );
        let err = Rules::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid row 1"), "{err}");
        assert!(err.to_string().contains("Line breaks are not allowed"), "{err}");
    }

    #[test]
    fn test_comments_and_blank_lines_between_rows() {
        let dir = TempDir::new().unwrap();
        write_table(
            dir.path(),
            "services",
            &["ssh TCP 22", "", "# web", "http TCP 80,443 ", "   "],
        );
        let services = Services::load(dir.path()).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services.get(1).unwrap().ports, "80,443");
    }

    #[test]
    fn test_service_update_validates() {
        let dir = sample();
        let mut services = Services::load(dir.path()).unwrap();
        assert!(services.update_service(0, "TCP", "99999", None).is_err());
        services.update_service(0, "UDP", "22", None).unwrap();
        let reloaded = Services::load(dir.path()).unwrap();
        assert_eq!(reloaded.get(0).unwrap().protocol, Protocol::Udp);
    }

    #[test]
    fn test_pop_removes_and_saves() {
        let dir = sample();
        let mut services = Services::load(dir.path()).unwrap();
        let removed = services.pop(0).unwrap();
        assert_eq!(removed.name, "ssh");
        assert_eq!(Services::load(dir.path()).unwrap().len(), 3);
        let err = services.pop(10).unwrap_err();
        assert!(err.to_string().contains("is not present in table 'services'"));
    }
}
