//! Firelet - distributed firewall management
//!
//! Command line front end over a configuration repository.
//!
//! # Usage
//!
//! ```bash
//! firelet status                        # Repository summary
//! firelet list rules --tokens           # Show a table with row tokens
//! firelet rule add --name ssh_gw --src admins --dst gw:eth0 --dst-serv ssh
//! firelet hostgroup update 0 --childs lan,admins
//! firelet network add dmz 172.16.2.0 24
//! firelet compile                       # Print the iptables-restore file of every host
//! firelet save -m "Open SSH to web"     # Commit table edits
//! firelet check                         # Compare with the live firewalls
//! firelet deploy                        # Push the rules, with auto-rollback
//! firelet versions                      # Checkpoint history
//! firelet version-diff <commit>         # Changes of a checkpoint
//! firelet rollback --steps 1            # Go back one checkpoint
//! firelet --demo fleet.json deploy      # Work against a simulated fleet
//! firelet config --write                # Save the effective settings
//! ```

use clap::{Parser, Subcommand};
use firelet::audit;
use firelet::config::{self, AppConfig};
use firelet::core::diff::{RulesDiff, build_all_restores};
use firelet::core::error::{Error, ErrorPattern, Result};
use firelet::core::fireset::{FireSet, TableName};
use firelet::core::remote::{ConnectorFactory, MockNetwork, RemoteConnector, Targets};
use firelet::core::tables::Hosts;
use firelet::core::vcs::{DiffTag, Git, RollbackTarget};
use firelet::edit::EditCommand;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "firelet")]
#[command(about = "Firelet - distributed iptables firewall management", long_about = None)]
struct Cli {
    /// Configuration repository (overrides the settings file)
    #[arg(short, long, global = true, value_name = "DIR")]
    repodir: Option<PathBuf>,

    /// Settings file to use instead of the default one
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Simulated fleet state file; created from the hosts table if missing
    #[arg(long, global = true, value_name = "FILE")]
    demo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective settings
    Config {
        /// Save them to the settings file
        #[arg(long)]
        write: bool,
    },
    #[command(flatten)]
    Repo(RepoCommand),
}

/// Commands working on the configuration repository
#[derive(Subcommand)]
enum RepoCommand {
    /// Print the compiled iptables-restore file of each host
    Compile {
        /// Only this host
        #[arg(long)]
        host: Option<String>,
    },
    /// Compare the compiled rules with the live firewalls
    Check,
    /// Deploy the compiled rules to the managed firewalls
    Deploy,
    /// Commit the table changes
    Save {
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Discard uncommitted table changes
    Reset,
    /// Go back to an older checkpoint
    Rollback {
        /// Number of checkpoints to go back
        #[arg(long, conflicts_with = "commit", required_unless_present = "commit")]
        steps: Option<usize>,
        /// Checkpoint identifier
        #[arg(long)]
        commit: Option<String>,
    },
    /// List the checkpoints, newest first
    Versions,
    /// Show the changes of a checkpoint
    VersionDiff { commit: String },
    /// Print the rows of a table
    List {
        /// rules, hosts, hostgroups, networks or services
        table: TableName,
        /// Also print the row tokens used by `--token`
        #[arg(long)]
        tokens: bool,
    },
    #[command(flatten)]
    Edit(EditCommand),
    /// Show the repository state
    Status,
}

/// Connector factory used when no SSH transport is available.
struct NoTransport;

impl ConnectorFactory for NoTransport {
    fn connect(&self, _targets: &Targets, _username: &str) -> Result<Box<dyn RemoteConnector>> {
        Err(Error::Remote(
            "No remote transport configured. Set demo_state in the settings or pass --demo."
                .to_string(),
        ))
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FIRELET_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Set up logging to file
    if let Some(mut log_path) = firelet::utils::get_state_dir() {
        log_path.push("firelet.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let _ = firelet::utils::ensure_dirs();
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            let translation = ErrorPattern::match_error(&e.to_string());
            eprintln!("Error: {}", translation.user_message);
            eprintln!("  {e}");
            for suggestion in translation.suggestions {
                eprintln!("  - {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> Result<AppConfig> {
    let mut settings = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };
    if let Some(repodir) = &cli.repodir {
        settings.repodir.clone_from(repodir);
    }
    if let Some(demo) = &cli.demo {
        settings.demo_state = Some(demo.clone());
    }
    Ok(settings)
}

/// Loads the simulated fleet, or builds one matching the hosts table.
fn load_demo(path: &Path, repodir: &Path) -> Result<MockNetwork> {
    if path.exists() {
        return MockNetwork::load(path);
    }
    info!("Creating simulated fleet {}", path.display());
    Ok(Hosts::load(repodir)
        .map(|hosts| MockNetwork::from_hosts(hosts.rows()))
        .unwrap_or_default())
}

fn show_config(settings: &AppConfig, path: Option<&Path>, write: bool) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if write {
        match path {
            Some(path) => config::save_config_to(settings, path)?,
            None => config::save_config(settings)?,
        }
        println!("✓ Settings saved.");
    }
    Ok(ExitCode::SUCCESS)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli)?;
    debug!("Settings: {:?}", settings);
    let command = match cli.command {
        Commands::Config { write } => {
            return show_config(&settings, cli.config.as_deref(), write);
        }
        Commands::Repo(command) => command,
    };

    let mut git = Git::new(&settings.repodir);
    if let Some(author) = settings.git_author.clone() {
        git = git.with_author(author);
    }
    if !git.available() {
        return Err(Error::Vcs {
            message: "git executable not found".to_string(),
            stderr: None,
        });
    }

    let demo = match &settings.demo_state {
        Some(path) => Some((path.clone(), load_demo(path, &settings.repodir)?)),
        None => None,
    };
    let connector: Box<dyn ConnectorFactory> = match &demo {
        Some((_, network)) => Box::new(network.clone()),
        None => Box::new(NoTransport),
    };

    let mut fs = FireSet::open(
        &settings.repodir,
        Box::new(git),
        connector,
        settings.store_options(),
    )?;

    let code = execute(command, &mut fs, &settings)?;

    if let Some((path, network)) = demo {
        network.save(&path)?;
    }
    Ok(code)
}

fn print_diff(diff: &RulesDiff) {
    for (hostname, host_diff) in diff {
        println!("{hostname}:");
        for line in &host_diff.added {
            println!("  + {line}");
        }
        for line in &host_diff.removed {
            println!("  - {line}");
        }
    }
}

fn execute(command: RepoCommand, fs: &mut FireSet, settings: &AppConfig) -> Result<ExitCode> {
    match command {
        RepoCommand::Compile { host } => {
            let compiled = fs.compile_rules()?;
            let restores = build_all_restores(&compiled);
            if let Some(host) = &host
                && !restores.contains_key(host)
            {
                return Err(Error::config(format!("Host {host} has no compiled rules.")));
            }
            for (hostname, lines) in &restores {
                if host.as_ref().is_none_or(|h| h == hostname) {
                    println!("{}", lines.join("\n"));
                }
            }
        }
        RepoCommand::Check => {
            let result = fs.check(settings.stop_on_extra_interfaces);
            match &result {
                Ok(diff) => audit::log_check(diff.len(), true, None),
                Err(e) => audit::log_check(0, false, Some(e.to_string())),
            }
            let diff = result?;
            if diff.is_empty() {
                println!("✓ Firewalls are up to date.");
            } else {
                println!("{} host(s) differ from the compiled rules:", diff.len());
                print_diff(&diff);
            }
        }
        RepoCommand::Deploy => {
            let result = fs.deploy(settings.stop_on_extra_interfaces);
            match &result {
                Ok(report) => audit::log_deploy(report.converged, true, None),
                Err(e) => audit::log_deploy(false, false, Some(e.to_string())),
            }
            let report = result?;
            if report.converged {
                println!("✓ Deployment completed.");
            } else {
                eprintln!("✗ Deployment failed: live rules differ from the compiled ones.");
                print_diff(&report.diff);
                return Ok(ExitCode::FAILURE);
            }
        }
        RepoCommand::Save { message } => {
            let result = fs.save(&message);
            audit::log_save(
                &message,
                result.is_ok(),
                result.as_ref().err().map(ToString::to_string),
            );
            result?;
            println!("✓ Configuration saved.");
        }
        RepoCommand::Reset => {
            let result = fs.reset();
            audit::log_reset(result.is_ok(), result.as_ref().err().map(ToString::to_string));
            result?;
            println!("✓ Uncommitted changes discarded.");
        }
        RepoCommand::Rollback { steps, commit } => {
            let target = match (steps, commit) {
                (_, Some(commit)) => RollbackTarget::Commit(commit),
                (Some(n), None) => RollbackTarget::Steps(n),
                (None, None) => return Err(Error::config("Specify --steps or --commit.")),
            };
            let result = fs.rollback(&target);
            audit::log_rollback(
                &target.revision(),
                result.is_ok(),
                result.as_ref().err().map(ToString::to_string),
            );
            result?;
            println!("✓ Rolled back to {}.", target.revision());
        }
        RepoCommand::Versions => {
            for v in fs.version_list()? {
                println!(
                    "{} {} {} {}",
                    &v.commit[..v.commit.len().min(8)],
                    v.date.format("%Y-%m-%d %H:%M"),
                    v.author,
                    v.message.first().map_or("", String::as_str)
                );
            }
        }
        RepoCommand::VersionDiff { commit } => {
            for (line, tag) in fs.version_diff(&commit)? {
                match tag {
                    DiffTag::Title => println!("== {line}"),
                    DiffTag::Add => println!("+ {line}"),
                    DiffTag::Del => println!("- {line}"),
                    DiffTag::Context => println!("  {line}"),
                }
            }
        }
        RepoCommand::List { table, tokens } => {
            for (rid, item) in fs.list(table).iter().enumerate() {
                if tokens {
                    println!("{rid:>3}  {}  {}", fs.token(table, rid)?, item.fields().join(" "));
                } else {
                    println!("{rid:>3}  {}", item.fields().join(" "));
                }
            }
        }
        RepoCommand::Edit(edit) => {
            let table = edit.table();
            let result = edit.apply(fs);
            audit::log_edit(
                table.as_ref(),
                result.as_deref().ok(),
                result.is_ok(),
                result.as_ref().err().map(ToString::to_string),
            );
            println!("✓ {}", result?);
            println!("  Run `firelet save` to create a checkpoint.");
        }
        RepoCommand::Status => {
            println!("Repository: {}", fs.repodir().display());
            println!(
                "Tables: {} rules, {} hosts, {} hostgroups, {} networks, {} services",
                fs.rules.len(),
                fs.hosts.len(),
                fs.hostgroups.len(),
                fs.networks.len(),
                fs.services.len()
            );
            println!(
                "Uncommitted changes: {}",
                if fs.save_needed()? { "yes" } else { "no" }
            );
            if let Some(last) = fs.version_list()?.first() {
                println!(
                    "Last checkpoint: {} ({})",
                    last.message.first().map_or("", String::as_str),
                    last.date.format("%Y-%m-%d %H:%M")
                );
            }
            if let Some(demo) = &settings.demo_state {
                println!("Simulated fleet: {}", demo.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
