//! Landing Zone CLI
//!
//! Commands: fragments, order, validate, synth
//! Outputs JSON to stdout, logs to stderr
//! Exit codes: 1 on bad input or configuration, 2 on synthesis failure

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use landingzone_core::{
    compute_run_key,
    config::read_flat,
    fragments::FragmentCatalog,
    landing_zone::landing_zone_catalog,
    SynthesisConfig, SynthesisError, SynthesisPipeline,
};

#[derive(Parser)]
#[command(name = "landingzone-cli", version)]
#[command(about = "Landing Zone CLI - compliance-checked infrastructure synthesis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of JSON catalog files (default: built-in landing zone)
    #[arg(short, long, global = true)]
    catalog_dir: Option<PathBuf>,

    /// Compliance exception as FRAGMENT:CONTROL=JUSTIFICATION
    #[arg(short, long = "except", global = true)]
    exceptions: Vec<String>,
}

/// Configuration for one run: a flat JSON file and/or individual entries.
#[derive(Args)]
struct ConfigArgs {
    /// Flat JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration entry as KEY=VALUE (e.g. prefix=workload, param:VpcCidr=10.1.0.0/16)
    #[arg(short, long = "set")]
    settings: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog fragments
    Fragments,

    /// Print the dependency order
    Order,

    /// Print the compliance report for a configuration
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Synthesize the resolved document
    Synth {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also print the provisioning idempotency key
        #[arg(long)]
        run_key: bool,
    },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn failure(error: &SynthesisError) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": error.to_string(),
        "fragment": error.fragment_id(),
        "control": error.control_id(),
    })
}

fn load_catalog(dir: Option<&PathBuf>) -> Result<FragmentCatalog, SynthesisError> {
    match dir {
        Some(dir) => FragmentCatalog::load_from_dir(dir),
        None => landing_zone_catalog(),
    }
}

fn parse_exception(raw: &str) -> Option<(&str, &str, &str)> {
    let (target, justification) = raw.split_once('=')?;
    let (fragment, control) = target.split_once(':')?;
    Some((fragment.trim(), control.trim(), justification))
}

fn build_config(args: &ConfigArgs) -> Result<SynthesisConfig, String> {
    let mut flat = match args.config.as_ref() {
        Some(p) => read_flat(p).map_err(|e| e.to_string())?,
        None => BTreeMap::new(),
    };
    for setting in &args.settings {
        let (key, value) = setting
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", setting))?;
        flat.insert(key.trim().to_string(), value.to_string());
    }
    SynthesisConfig::from_flat(&flat).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let catalog = match load_catalog(cli.catalog_dir.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            print_json(&failure(&e));
            return ExitCode::FAILURE;
        }
    };

    let mut pipeline = SynthesisPipeline::new(catalog);

    for raw in &cli.exceptions {
        let Some((fragment, control, justification)) = parse_exception(raw) else {
            print_json(&serde_json::json!({
                "success": false,
                "error": format!("expected FRAGMENT:CONTROL=JUSTIFICATION, got {:?}", raw),
            }));
            return ExitCode::FAILURE;
        };
        if let Err(e) = pipeline.record_exception(fragment, control, justification) {
            print_json(&failure(&e));
            return ExitCode::FAILURE;
        }
    }

    match cli.command {
        Commands::Fragments => {
            let fragments: Vec<_> = pipeline
                .list_fragments()
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "id": f.id,
                        "type": f.resource_type,
                        "dependsOn": f.dependencies(),
                        "exceptions": f.exceptions.len(),
                    })
                })
                .collect();
            print_json(&fragments);
            ExitCode::SUCCESS
        }

        Commands::Order => match pipeline.resolve_order() {
            Ok(order) => {
                let ids: Vec<_> = order.iter().map(|f| f.id.as_str()).collect();
                print_json(&ids);
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_json(&failure(&e));
                ExitCode::from(2)
            }
        },

        Commands::Validate { config } => {
            let config = match build_config(&config) {
                Ok(c) => c,
                Err(e) => {
                    print_json(&serde_json::json!({"success": false, "error": e}));
                    return ExitCode::FAILURE;
                }
            };

            match pipeline.validation_report(&config) {
                Ok(report) => {
                    print_json(&report);
                    if report.has_errors() {
                        ExitCode::from(2)
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => {
                    print_json(&failure(&e));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Synth { config, run_key } => {
            let config = match build_config(&config) {
                Ok(c) => c,
                Err(e) => {
                    print_json(&serde_json::json!({"success": false, "error": e}));
                    return ExitCode::FAILURE;
                }
            };

            match pipeline.synthesize(&config) {
                Ok(document) if run_key => {
                    let key = compute_run_key(
                        &config.prefix,
                        &config.account_id,
                        &config.region,
                        &document.document_hash,
                        &document.engine_version,
                    );
                    print_json(&serde_json::json!({"runKey": key, "document": document}));
                    ExitCode::SUCCESS
                }
                Ok(document) => {
                    print_json(&document);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    print_json(&failure(&e));
                    ExitCode::from(2)
                }
            }
        }
    }
}
