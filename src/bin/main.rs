//! Archive Verifier CLI
//!
//! Verifies a sealed message archive against the previous archive's chain
//! digest and prints the new final digest. Trust material comes from the
//! configuration file and/or command-line flags.

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use openssl::x509::X509;
use std::path::{Path, PathBuf};

use archive_verifier::{
    config::{ConfigManager, ExportFormat, VerifierConfiguration},
    ArchiveVerifier, PrevDigest, TrustContext, VerifierOptions, VerifyError,
};

#[derive(Parser)]
#[command(name = "archive-verifier")]
#[command(about = "Integrity verifier for chained, signed message archives")]
#[command(long_about = "
Archive Verifier - checks the chain of custody of sealed message archives

Each archive continues the digest chain of its predecessor. Verification
recomputes the chain, compares it with the archive's linking info and
validates every container's signature, certificate, OCSP response and
timestamp. On success the final chain digest is printed; pass it as the
previous digest when verifying the next archive.

EXAMPLES:
    # First archive of a chain
    archive-verifier verify arch-001.zip --first --ca ca.pem --tsa tsa.pem

    # Continue the chain
    archive-verifier verify arch-002.zip 3f2a... --ca ca.pem --tsa tsa.pem

    # Write a default configuration file
    archive-verifier config init

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify one archive and print its final chain digest
    Verify {
        /// Archive to verify
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Final digest of the previous archive (hex), or `-` for the first
        #[arg(value_name = "PREV_DIGEST", required_unless_present = "first")]
        prev_digest: Option<String>,

        /// The archive starts a new chain
        #[arg(long, conflicts_with = "prev_digest")]
        first: bool,

        /// Trusted CA certificates (PEM), in addition to the configuration
        #[arg(long, value_name = "PEM")]
        ca: Vec<PathBuf>,

        /// Trusted OCSP responder certificates (PEM)
        #[arg(long, value_name = "PEM")]
        ocsp_responder: Vec<PathBuf>,

        /// Trusted TSA certificates (PEM)
        #[arg(long, value_name = "PEM")]
        tsa: Vec<PathBuf>,

        /// Expected signer (subject CN or serialNumber)
        #[arg(long, value_name = "HINT")]
        signer: Option<String>,

        /// Validation worker threads
        #[arg(long, value_name = "N")]
        threads: Option<usize>,

        /// Abort verification after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Write a JSON verification report
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone)]
enum ExportFormatArg {
    Toml,
    Json,
    Yaml,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Yaml => ExportFormat::Yaml,
        }
    }
}

/// Parameters for the verify command
struct VerifyCommandArgs {
    archive: PathBuf,
    prev: PrevDigest,
    ca: Vec<PathBuf>,
    ocsp_responder: Vec<PathBuf>,
    tsa: Vec<PathBuf>,
    signer: Option<String>,
    threads: Option<usize>,
    timeout: Option<u64>,
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the digest.
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };

    match cli.command {
        Commands::Verify {
            archive,
            prev_digest,
            first,
            ca,
            ocsp_responder,
            tsa,
            signer,
            threads,
            timeout,
            report,
        } => {
            let prev = match (first, prev_digest) {
                (true, _) => PrevDigest::First,
                (false, Some(value)) => value.parse::<PrevDigest>()?,
                (false, None) => {
                    return Err(VerifyError::Configuration(
                        "previous digest required unless --first is given".to_string(),
                    )
                    .into())
                }
            };
            let args = VerifyCommandArgs {
                archive,
                prev,
                ca,
                ocsp_responder,
                tsa,
                signer,
                threads,
                timeout,
                report,
            };
            handle_verify_command(&config_manager, args)?;
        }

        Commands::Config(config_cmd) => {
            handle_config_command(&config_manager, config_cmd)?;
        }
    }

    Ok(())
}

fn handle_verify_command(config_manager: &ConfigManager, args: VerifyCommandArgs) -> Result<()> {
    let mut config = config_manager.load_or_default()?;
    apply_overrides(&mut config, &args);
    ConfigManager::validate_config(&config)?;

    let mut trust = config.load_trust_context()?;
    trust = add_certificates(trust, &args.ca, TrustContext::with_ca)?;
    trust = add_certificates(trust, &args.ocsp_responder, TrustContext::with_ocsp_responder)?;
    trust = add_certificates(trust, &args.tsa, TrustContext::with_tsa)?;
    log::debug!("Trust context: {trust:?}");

    let verifier = ArchiveVerifier::with_options(trust, VerifierOptions::from_config(&config));
    let verdict = verifier.verify_path(&args.archive, &args.prev)?;

    if let Some(report_path) = &args.report {
        let json = serde_json::to_string_pretty(&verdict).into_diagnostic()?;
        std::fs::write(report_path, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write report {}", report_path.display()))?;
        log::info!("Report written to {}", report_path.display());
    }

    println!("{}", verdict.final_digest);
    Ok(())
}

fn apply_overrides(config: &mut VerifierConfiguration, args: &VerifyCommandArgs) {
    if let Some(threads) = args.threads {
        config.worker_threads = threads;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_seconds = Some(timeout);
    }
    if args.signer.is_some() {
        config.expected_signer.clone_from(&args.signer);
    }
}

fn add_certificates(
    mut trust: TrustContext,
    paths: &[PathBuf],
    add: fn(TrustContext, X509) -> TrustContext,
) -> Result<TrustContext> {
    for path in paths {
        for cert in TrustContext::load_pem(path)? {
            trust = add(trust, cert);
        }
    }
    Ok(trust)
}

fn handle_config_command(config_manager: &ConfigManager, config_cmd: ConfigCommands) -> Result<()> {
    match config_cmd {
        ConfigCommands::Show => {
            if config_manager.config_path().exists() {
                let config = config_manager.load()?;
                print_config(&config, config_manager.config_path());
            } else {
                println!("No configuration file found. Use 'config init' to create one.");
            }
        }

        ConfigCommands::Init => {
            if config_manager.config_path().exists() {
                println!(
                    "Configuration already exists: {}",
                    config_manager.config_path().display()
                );
            } else {
                config_manager.save(&VerifierConfiguration::default())?;
                println!(
                    "Configuration initialized: {}",
                    config_manager.config_path().display()
                );
                println!("   Edit the file to add trust material, or use 'config set' commands.");
            }
        }

        ConfigCommands::Set { key, value } => {
            config_manager.update_value(&key, &value)?;
            println!("Configuration updated: {key} = {value}");
        }

        ConfigCommands::Export { format } => {
            let content = config_manager.export_config(format.into())?;
            println!("{content}");
        }
    }

    Ok(())
}

fn print_config(config: &VerifierConfiguration, path: &Path) {
    println!("Current Configuration:");
    println!("  OCSP freshness: {}s", config.ocsp_freshness_seconds);
    println!("  Verify OCSP nextUpdate: {}", config.verify_ocsp_next_update);
    println!("  Worker threads: {}", config.worker_threads);
    println!("  Spool threshold: {} bytes", config.spool_threshold_bytes);
    match config.timeout_seconds {
        Some(secs) => println!("  Timeout: {secs}s"),
        None => println!("  Timeout: none"),
    }
    println!(
        "  Expected signer: {}",
        config.expected_signer.as_deref().unwrap_or("any")
    );
    println!("  CA certificates: {}", config.trust.ca_certificates.len());
    println!("  OCSP responders: {}", config.trust.ocsp_responders.len());
    println!("  TSA certificates: {}", config.trust.tsa_certificates.len());
    println!("  Configuration file: {}", path.display());
}
