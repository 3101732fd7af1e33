//! streamform - declarative Kafka topology from the command line
//!
//! ```text
//! streamform validate --dir topology
//! streamform deploy --dir topology --dry-run --brokers kafka:9092 --registry-url http://registry:8081
//! streamform restore --dir restored --domain orders --brokers kafka:9092 --registry-url http://registry:8081
//! ```
//!
//! Exit codes: 0 success, 1 validation violations, 2 failed operations.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use streamform_core::memory::{MemoryCluster, MemoryRegistry};
use streamform_core::{
    DeployOptions, EngineConfig, Orchestrator, RunReport, StreamformError, Violation,
};
use streamform_kafka::{parse_brokers, KafkaAdmin, KafkaAdminConfig};
use streamform_registry::{HttpSchemaRegistry, RegistryClientConfig};
use streamform_store::{render_unit, FsTopologyStore};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const EXIT_VIOLATIONS: u8 = 1;
const EXIT_FAILURES: u8 = 2;

/// Declarative Kafka topology: validate, deploy and restore
#[derive(Parser, Debug)]
#[command(name = "streamform")]
#[command(about = "Reconcile Kafka topics, ACLs and schemas with a declared topology")]
#[command(version)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true, env = "STREAMFORM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "STREAMFORM_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, global = true, env = "STREAMFORM_LOG_JSON")]
    log_json: bool,

    /// Format of reports printed to stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Write run metrics in Prometheus text format to this file
    #[arg(long, global = true, env = "STREAMFORM_METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the declared topology against the policy rules (offline)
    Validate {
        /// Topology directory
        #[arg(long, default_value = "topology")]
        dir: PathBuf,

        /// Only report violations involving this domain
        #[arg(long)]
        domain: Option<String>,
    },

    /// Converge the cluster and registry towards the declared topology
    Deploy {
        /// Topology directory
        #[arg(long, default_value = "topology")]
        dir: PathBuf,

        /// Restrict the run to one domain (disables orphan deletion)
        #[arg(long)]
        domain: Option<String>,

        /// Plan and report without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Delete topics that are no longer declared
        #[arg(long)]
        allow_delete_topics: bool,

        /// Delete ACLs that are no longer derived
        #[arg(long)]
        allow_delete_acls: bool,

        /// Delete subjects that are no longer declared
        #[arg(long)]
        allow_delete_subjects: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Write topology units reconstructed from the cluster and registry
    Restore {
        /// Directory to write units to
        #[arg(long, default_value = "topology")]
        dir: PathBuf,

        /// Restore only this domain
        #[arg(long)]
        domain: Option<String>,

        /// Print the units instead of writing them
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Comma separated bootstrap brokers
    #[arg(long, env = "STREAMFORM_BROKERS")]
    brokers: String,

    /// SASL PLAIN user
    #[arg(long, env = "STREAMFORM_SASL_USERNAME")]
    sasl_username: Option<String>,

    /// SASL PLAIN password
    #[arg(long, env = "STREAMFORM_SASL_PASSWORD", hide_env_values = true)]
    sasl_password: Option<String>,

    /// Schema registry base URL
    #[arg(long, env = "STREAMFORM_REGISTRY_URL")]
    registry_url: String,

    /// Schema registry basic auth user
    #[arg(long, env = "STREAMFORM_REGISTRY_USERNAME")]
    registry_username: Option<String>,

    /// Schema registry basic auth password
    #[arg(long, env = "STREAMFORM_REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,
}

impl ConnectionArgs {
    fn kafka_config(&self) -> Result<KafkaAdminConfig> {
        let config = KafkaAdminConfig::new(parse_brokers(&self.brokers));
        match (&self.sasl_username, &self.sasl_password) {
            (Some(username), Some(password)) => Ok(config.with_sasl_plain(username, password)),
            (None, None) => Ok(config),
            _ => anyhow::bail!("--sasl-username and --sasl-password must be given together"),
        }
    }

    fn registry_config(&self) -> RegistryClientConfig {
        let config = RegistryClientConfig::new(&self.registry_url);
        match (&self.registry_username, &self.registry_password) {
            (Some(username), Some(password)) => config.with_basic_auth(username, password),
            _ => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    let metrics = match &cli.metrics_file {
        Some(_) => Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install metrics recorder")?,
        ),
        None => None,
    };

    let config = load_config(cli.config.as_deref()).await?;
    let code = run(&cli, config).await?;

    if let (Some(path), Some(handle)) = (&cli.metrics_file, &metrics) {
        write_metrics(path, handle).await?;
    }
    Ok(code)
}

/// Initialize logging subsystem
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(false);

    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    EngineConfig::from_yaml_str(&yaml)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

async fn write_metrics(path: &Path, handle: &PrometheusHandle) -> Result<()> {
    tokio::fs::write(path, handle.render())
        .await
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

async fn connect(connection: &ConnectionArgs, config: EngineConfig) -> Result<Orchestrator> {
    let cluster = KafkaAdmin::connect(connection.kafka_config()?)
        .await
        .context("Failed to connect to Kafka")?;
    let registry = HttpSchemaRegistry::new(connection.registry_config())
        .context("Invalid schema registry settings")?;
    let orchestrator = Orchestrator::new(
        Arc::new(cluster),
        Arc::new(registry),
        Arc::new(FsTopologyStore::new()),
        config,
    )?;
    Ok(orchestrator.with_metrics())
}

/// Orchestrator for commands that never reach the cluster
fn offline(config: EngineConfig) -> Result<Orchestrator> {
    Ok(Orchestrator::new(
        Arc::new(MemoryCluster::new("offline")),
        Arc::new(MemoryRegistry::new()),
        Arc::new(FsTopologyStore::new()),
        config,
    )?)
}

async fn run(cli: &Cli, config: EngineConfig) -> Result<ExitCode> {
    match &cli.command {
        Commands::Validate { dir, domain } => {
            let violations = offline(config)?
                .validate_only(dir, domain.as_deref())
                .await
                .context("Validation could not run")?;
            print_violations(&violations, cli.output)?;
            Ok(exit_code_for_violations(&violations))
        }

        Commands::Deploy {
            dir,
            domain,
            dry_run,
            allow_delete_topics,
            allow_delete_acls,
            allow_delete_subjects,
            connection,
        } => {
            let mut options = DeployOptions::new()
                .dry_run(*dry_run)
                .allow_delete_topics(*allow_delete_topics)
                .allow_delete_acls(*allow_delete_acls)
                .allow_delete_subjects(*allow_delete_subjects);
            if let Some(domain) = domain {
                options = options.domain(domain);
            }

            let orchestrator = connect(connection, config).await?;
            match orchestrator.deploy(dir, &options).await {
                Ok(report) => {
                    print_report(&report, cli.output)?;
                    Ok(exit_code_for_report(&report))
                }
                Err(StreamformError::Validation(violations)) => {
                    print_violations(&violations, cli.output)?;
                    Ok(ExitCode::from(EXIT_VIOLATIONS))
                }
                Err(e) => Err(e).context("Deploy failed"),
            }
        }

        Commands::Restore {
            dir,
            domain,
            dry_run,
            connection,
        } => {
            let orchestrator = connect(connection, config).await?;
            let units = orchestrator
                .restore(dir, domain.as_deref(), *dry_run)
                .await
                .context("Restore failed")?;

            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&units)?),
                OutputFormat::Text if *dry_run => {
                    for unit in &units {
                        println!("# {}.yaml", unit.source);
                        print!("{}", render_unit(unit)?);
                    }
                }
                OutputFormat::Text => {
                    for unit in &units {
                        let topics: usize =
                            unit.domain.visibilities.iter().map(|v| v.topics.len()).sum();
                        println!("✓ Restored {} ({} topics)", unit.source, topics);
                    }
                }
            }
            info!(units = units.len(), directory = %dir.display(), "Restore finished");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code_for_violations(violations: &[Violation]) -> ExitCode {
    if violations.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_VIOLATIONS)
    }
}

fn exit_code_for_report(report: &RunReport) -> ExitCode {
    if report.has_failures() {
        ExitCode::from(EXIT_FAILURES)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_violations(violations: &[Violation], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(violations)?),
        OutputFormat::Text if violations.is_empty() => println!("✓ No violations"),
        OutputFormat::Text => {
            for violation in violations {
                println!("✗ {}", violation);
            }
            println!("{} violation(s)", violations.len());
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => println!("{}", report),
    }
    Ok(())
}
