//! Arch Guardian CLI - Command-line interface for architecture validation
//!
//! Architecture: Application Layer - CLI coordinates user interactions with domain services
//! - Translates user commands to facade operations
//! - Handles external concerns like config discovery, process exit codes and terminal output
//! - Library errors are typed; `anyhow` only adds context at this outermost layer

use anyhow::{bail, Context};
use arch_guardian::rules::RuleOrigin;
use arch_guardian::{
    ArchGuardian, GuardianConfig, OutputFormat, ReportFormatter, ReportOptions, SessionEvent, Severity,
    UpdateStatus,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Configuration files looked up in the working directory when `--config` is absent
const DEFAULT_CONFIG_FILES: &[&str] =
    &["arch-guardian.yaml", "arch-guardian.yml", ".arch-guardian.yaml", "arch-guardian.json"];

/// Arch Guardian - Dependency graph and architecture rule enforcement
#[derive(Parser)]
#[command(name = "arch-guardian")]
#[command(version)]
#[command(about = "Dependency graph analysis and architecture rule enforcement")]
#[command(long_about = "Arch Guardian builds a dependency graph of a multi-language source tree and validates it against layer, cycle and plugin-provided rules. Watch mode revalidates incrementally as files change.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the project and validate it once
    Check {
        /// Project root (overrides the configured root)
        path: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormatArg,

        /// Minimum severity level to report
        #[arg(short, long, value_enum)]
        severity: Option<SeverityArg>,

        /// Maximum number of violations to report
        #[arg(long)]
        max_violations: Option<usize>,

        /// Only run these rules
        #[arg(short, long = "rule", action = clap::ArgAction::Append)]
        rules: Vec<String>,

        /// Run rules one after another
        #[arg(long)]
        no_parallel: bool,
    },

    /// Validate once, then revalidate changed files until Ctrl-C
    Watch {
        /// Project root (overrides the configured root)
        path: Option<PathBuf>,

        /// Debounce delay in milliseconds (overrides the configured delay)
        #[arg(long)]
        delay: Option<u64>,

        /// Only run these rules
        #[arg(short, long = "rule", action = clap::ArgAction::Append)]
        rules: Vec<String>,
    },

    /// List registered rules, including plugin rules
    Rules {
        /// Show only enabled rules
        #[arg(long)]
        enabled_only: bool,

        /// Filter by category
        #[arg(long)]
        category: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormatArg,
    },

    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config_file: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, ValueEnum, PartialEq)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SeverityArg {
    Info,
    Warning,
    Error,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Info => Severity::Info,
            SeverityArg::Warning => Severity::Warning,
            SeverityArg::Error => Severity::Error,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    match run_command(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<i32> {
    let use_colors = !cli.no_color;
    match cli.command {
        Commands::Check { path, format, severity, max_violations, rules, no_parallel } => {
            let options = ReportOptions {
                use_colors,
                max_violations,
                min_severity: severity.map(Into::into),
                ..Default::default()
            };
            run_check(cli.config, path, format, options, rules, no_parallel)
        }
        Commands::Watch { path, delay, rules } => run_watch(cli.config, path, delay, rules, use_colors).await,
        Commands::Rules { enabled_only, category, format } => {
            run_list_rules(cli.config, enabled_only, category, format)
        }
        Commands::ValidateConfig { config_file } => run_validate_config(config_file.or(cli.config)),
    }
}

/// Load the explicit config, else the first default file found, else built-in defaults
fn load_config(config_path: Option<PathBuf>, root: Option<PathBuf>) -> anyhow::Result<GuardianConfig> {
    let discovered = config_path.or_else(|| {
        DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).find(|candidate| candidate.exists())
    });

    let mut config = match discovered {
        Some(path) => GuardianConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => GuardianConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

fn build_guardian(config: GuardianConfig, rules: &[String]) -> anyhow::Result<ArchGuardian> {
    let mut guardian = ArchGuardian::new(config).context("Failed to initialize")?;
    for plugin in guardian.plugins().failed() {
        let reason = plugin.error.as_deref().unwrap_or("unknown error");
        eprintln!("warning: plugin '{}' was not loaded: {}", plugin.name, reason);
    }
    if !rules.is_empty() {
        guardian.filter_rules(rules)?;
    }
    Ok(guardian)
}

fn run_check(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    format: OutputFormatArg,
    options: ReportOptions,
    rules: Vec<String>,
    no_parallel: bool,
) -> anyhow::Result<i32> {
    let config = load_config(config_path, root)?;
    let mut guardian = build_guardian(config, &rules)?;
    if no_parallel {
        guardian.set_parallel(false)?;
    }

    let report = guardian.check().context("Validation failed")?;
    let formatter = ReportFormatter::new(options);
    println!("{}", formatter.format_report(&report, format.into())?);

    let fixable = guardian.auto_fix(&report);
    if fixable > 0 && format == OutputFormatArg::Human {
        eprintln!("{fixable} violations carry a suggested fix");
    }

    Ok(if report.has_errors() { 1 } else { 0 })
}

async fn run_watch(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    delay: Option<u64>,
    rules: Vec<String>,
    use_colors: bool,
) -> anyhow::Result<i32> {
    let mut config = load_config(config_path, root)?;
    if let Some(delay) = delay {
        config.watch.debounce_ms = delay;
    }
    let mut guardian = build_guardian(config, &rules)?;
    let formatter = ReportFormatter::new(ReportOptions { use_colors, ..Default::default() });

    println!("Watching {} (debounce {}ms)", guardian.config().root.display(), guardian.config().watch.debounce_ms);
    println!("Press Ctrl+C to stop watching\n");

    let initial = guardian.check().context("Initial validation failed")?;
    println!("{}", formatter.format_report(&initial, OutputFormat::Human)?);

    let mut handle = guardian.watch().await?;
    let mut updates = 0usize;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            event = handle.events.recv() => match event {
                Some(event) => {
                    updates += 1;
                    print_event(&formatter, &event);
                }
                None => break,
            },
        }
    }
    handle.stop().await;

    let last = guardian.validate()?;
    guardian.shutdown();
    println!("\nStopped after {updates} updates");
    print!("{}", formatter.format_summary(&last));
    Ok(if last.has_errors() { 1 } else { 0 })
}

fn print_event(formatter: &ReportFormatter, event: &SessionEvent) {
    match &event.status {
        UpdateStatus::Unchanged => tracing::debug!("{} {} unchanged", event.kind, event.path),
        UpdateStatus::Failed(reason) => eprintln!("{} {}: update failed: {}", event.kind, event.path, reason),
        UpdateStatus::Validated if event.violations.is_empty() => println!("{} {}: clean", event.kind, event.path),
        UpdateStatus::Validated => {
            println!("{} {}: {} violations", event.kind, event.path, event.violations.len());
            for violation in &event.violations {
                println!("  {}", formatter.format_violation(violation));
            }
        }
    }
}

fn run_list_rules(
    config_path: Option<PathBuf>,
    enabled_only: bool,
    category: Option<String>,
    format: OutputFormatArg,
) -> anyhow::Result<i32> {
    let guardian = build_guardian(load_config(config_path, None)?, &[])?;
    let rules: Vec<_> = guardian
        .engine()
        .rules()
        .into_iter()
        .filter(|rule| !enabled_only || rule.enabled)
        .filter(|rule| category.as_deref().map_or(true, |c| rule.category.to_string() == c))
        .collect();

    if format == OutputFormatArg::Json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(0);
    }

    println!("Available rules\n");
    for rule in &rules {
        let status = if rule.enabled { "on " } else { "off" };
        let origin = match &rule.origin {
            RuleOrigin::Builtin => "builtin".to_string(),
            RuleOrigin::Plugin(name) => format!("plugin {name}"),
        };
        println!("  [{status}] {} ({}) [{}] - {}", rule.id, rule.category, rule.level.as_str(), rule.name);
        if !rule.description.is_empty() {
            println!("        {}", rule.description);
        }
        println!("        {origin}{}", if rule.supports_incremental { ", incremental" } else { "" });
    }
    Ok(0)
}

fn run_validate_config(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let Some(config_path) = config_path.or_else(|| {
        DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).find(|candidate| candidate.exists())
    }) else {
        bail!("No configuration file given and none of {} found", DEFAULT_CONFIG_FILES.join(", "));
    };

    println!("Validating configuration: {}", config_path.display());
    match GuardianConfig::load_from_file(&config_path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  Root: {}", display_root(&config.root));
            println!("  Layers: {}", config.layers.len());
            println!(
                "  Rule levels: {} builtin, {} plugin",
                config.rules.builtin.len(),
                config.rules.plugin.len()
            );
            println!("  Plugins: {} ({} enabled)", config.plugins.len(), config.enabled_plugins().count());
            println!("  Fingerprint: {}", config.fingerprint());
            Ok(0)
        }
        Err(e) => {
            eprintln!("Configuration validation failed: {e}");
            Ok(1)
        }
    }
}

fn display_root(root: &Path) -> String {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()).display().to_string()
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
