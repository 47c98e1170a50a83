//! cvg - converge a remote target with a policy bundle.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cvg::action::compose_run_command;
use cvg::notify::{JsonLinesNotifier, LogNotifier, MultiNotifier};
use cvg::target::normalize_path_for;
use cvg::{CcrFailureMapper, ConvergeOutcome, ConvergeRequest, ConvergeTarget, SshTarget};
use cvg_common::config::{ConfigSource, ConfigValueSource};
use cvg_common::{ConfigError, CvgConfig, ErrorEntry, LogConfig, TargetOs, init_logging};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "cvg")]
#[command(author, version, about = "Converge a remote target with a policy bundle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.config/cvg/config.toml)
    #[arg(short, long, global = true, env = "CVG_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage a policy bundle on the target and run chef-client against it
    Converge {
        /// Local policy archive
        policy: PathBuf,

        /// Target host (overrides target.host)
        #[arg(long)]
        host: Option<String>,

        /// SSH user
        #[arg(long)]
        user: Option<String>,

        /// SSH port
        #[arg(long)]
        port: Option<u16>,

        /// SSH private key
        #[arg(long)]
        identity_file: Option<PathBuf>,

        /// Target OS family (windows, linux, macos, other)
        #[arg(long)]
        os: Option<TargetOs>,

        /// Log level for chef-client on the target
        #[arg(long)]
        target_log_level: Option<String>,

        /// Stream lifecycle events to stdout as JSON lines. With --json the
        /// result object is always the last line.
        #[arg(long)]
        events: bool,
    },

    /// Print the remote chef-client command without contacting a target
    ShowCommand {
        /// Target OS family
        #[arg(long)]
        os: TargetOs,

        /// Remote workspace directory
        #[arg(long)]
        dir: String,

        /// Config script file name
        #[arg(long, default_value = "workstation.rb")]
        config_file: String,

        /// Policy archive file name
        #[arg(long)]
        policy_file: String,
    },

    /// Show the effective configuration and where overrides came from
    Config,
}

struct ConvergeArgs {
    policy: PathBuf,
    host: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    os: Option<TargetOs>,
    target_log_level: Option<String>,
    events: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ShowCommand {
        os,
        dir,
        config_file,
        policy_file,
    } = &cli.command
    {
        let dir = normalize_path_for(*os, dir);
        println!("{}", compose_run_command(*os, &dir, config_file, policy_file));
        return Ok(());
    }

    let (mut config, mut sources) = load_config(cli.config.as_deref(), cli.json);

    let mut log_config = LogConfig::from_env(&config.general.log_level).with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Converge {
            policy,
            host,
            user,
            port,
            identity_file,
            os,
            target_log_level,
            events,
        } => {
            let args = ConvergeArgs {
                policy,
                host,
                user,
                port,
                identity_file,
                os,
                target_log_level,
                events,
            };
            apply_cli_overrides(&mut config, &args, &mut sources);
            converge(&config, &args, cli.json)
        }
        Commands::Config => show_config(&config, &sources, cli.json),
        Commands::ShowCommand { .. } => Ok(()),
    }
}

/// Load file and environment configuration, exiting with the catalog entry
/// on failure.
fn load_config(path: Option<&Path>, json: bool) -> (CvgConfig, Vec<ConfigValueSource>) {
    let mut config = match CvgConfig::load_or_default(path) {
        Ok(config) => config,
        Err(err) => exit_with(&config_entry(&err), json),
    };
    match config.apply_env_overrides() {
        Ok(sources) => (config, sources),
        Err(err) => exit_with(&config_entry(&err), json),
    }
}

fn apply_cli_overrides(
    config: &mut CvgConfig,
    args: &ConvergeArgs,
    sources: &mut Vec<ConfigValueSource>,
) {
    let mut record = |key: &str, flag: &str| {
        sources.retain(|s| s.key != key);
        sources.push(ConfigValueSource {
            key: key.to_string(),
            source: ConfigSource::CommandLine,
            origin: Some(flag.to_string()),
        });
    };

    if let Some(host) = &args.host {
        config.target.host = Some(host.clone());
        record("target.host", "--host");
    }
    if let Some(user) = &args.user {
        config.target.user = Some(user.clone());
        record("target.user", "--user");
    }
    if let Some(port) = args.port {
        config.target.port = port;
        record("target.port", "--port");
    }
    if let Some(identity) = &args.identity_file {
        config.target.identity_file = Some(identity.clone());
        record("target.identity_file", "--identity-file");
    }
    if let Some(os) = args.os {
        config.target.os = os;
        record("target.os", "--os");
    }
    if let Some(level) = &args.target_log_level {
        config.converge.target_log_level = Some(level.to_lowercase());
        record("converge.target_log_level", "--target-log-level");
    }
}

fn converge(config: &CvgConfig, args: &ConvergeArgs, json: bool) -> Result<()> {
    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                warn!("{}: {}", warning.key, warning.message);
            }
        }
        Err(err) => exit_with(&config_entry(&err), json),
    }

    if !args.policy.is_file() {
        bail!("Policy archive not found: {}", args.policy.display());
    }

    let target = match SshTarget::from_config(&config.target) {
        Ok(target) => target,
        Err(err) => exit_with(&err.code().entry(), json),
    };
    let host = config.target.host.clone().unwrap_or_default();
    let request = ConvergeRequest::from_settings(&args.policy, &config.converge);
    debug!("{:?}", request);

    let mapper = CcrFailureMapper::new().context("Failed to compile failure patterns")?;
    let log_notifier = LogNotifier;
    let event_stream = JsonLinesNotifier::new(host.clone(), std::io::stdout());
    let mut notifier = MultiNotifier::new().with(&log_notifier);
    if args.events {
        notifier = notifier.with(&event_stream);
    }

    let convergence = ConvergeTarget::new(&target, &notifier, &mapper, request);
    match convergence.perform() {
        Ok(outcome) => {
            if json {
                println!("{}", success_line(&host, outcome));
            } else {
                match outcome {
                    ConvergeOutcome::RebootRequired => {
                        println!("Converged {}. The target requires a reboot.", host)
                    }
                    _ => println!("Converged {}.", host),
                }
            }
            Ok(())
        }
        Err(err) => exit_with(&err.entry(), json),
    }
}

fn show_config(config: &CvgConfig, sources: &[ConfigValueSource], json: bool) -> Result<()> {
    let mut redacted = config.clone();
    if redacted.converge.data_collector.token.is_some() {
        redacted.converge.data_collector.token = Some("***".to_string());
    }
    let warnings = config.validate().unwrap_or_default();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "config": redacted,
                "overrides": sources,
                "warnings": warnings,
            }))?
        );
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&redacted)?);
    if !sources.is_empty() {
        println!("\nOverrides:");
        for source in sources {
            println!(
                "  {} <- {} ({})",
                source.key,
                source.source,
                source.origin.as_deref().unwrap_or("-")
            );
        }
    }
    for warning in warnings {
        println!("warning: {}: {}", warning.key, warning.message);
    }
    Ok(())
}

fn config_entry(err: &ConfigError) -> ErrorEntry {
    let mut entry = err.code().entry();
    entry.message = err.to_string();
    entry
}

/// `--json` results are single lines keyed by `status`, so they close an
/// `--events` stream whose lines are keyed by `event`.
fn success_line(host: &str, outcome: ConvergeOutcome) -> String {
    json!({ "status": "ok", "target": host, "outcome": outcome }).to_string()
}

fn error_line(entry: &ErrorEntry) -> String {
    json!({ "status": "error", "error": entry }).to_string()
}

fn exit_with(entry: &ErrorEntry, json: bool) -> ! {
    if json {
        println!("{}", error_line(entry));
    } else {
        eprint!("{}", entry.format_full());
    }
    std::process::exit(1)
}
