use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use sublink_core::output::{ConfigDeployer, FileDeployer, StdoutDeployer};
use sublink_core::params::{
    parse_base_config, parse_custom_rules, parse_excluded_protocols, parse_rule_selection,
};
use sublink_core::rules::{catalog_names, preset, PRESETS};
use sublink_core::storage::{AppPaths, ConfigStore};
use sublink_core::subscription::DEFAULT_USER_AGENT;
use sublink_core::{
    build_document, build_link_bundle, BuildError, BuildParams, HttpFetcher, Target,
};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sublink",
    author,
    version,
    about = "Share-link to proxy config converter",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert share links and subscriptions into a client config.
    Build(BuildArgs),
    /// Re-export the input as a filtered base64 link bundle.
    Links(LinksArgs),
    /// Store a base config and print its id.
    SaveConfig(SaveConfigArgs),
    /// List rule presets and categories.
    Rules,
}

#[derive(Args)]
struct FilterArgs {
    /// Protocols to drop, as a JSON array or comma-separated list.
    #[arg(long)]
    exclude_protocols: Option<String>,

    /// Shadowsocks ciphers to drop, comma-separated.
    #[arg(long, default_value = "")]
    exclude_ciphers: String,

    /// Name patterns to drop, comma-separated regular expressions.
    #[arg(long, default_value = "")]
    name_filter: String,

    /// User-Agent sent when fetching subscriptions.
    #[arg(long, env = "SUBLINK_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

#[derive(Args)]
struct BuildArgs {
    /// Output format: singbox, clash or surge.
    #[arg(long, short = 't')]
    target: Target,

    /// File holding links or subscription URLs. Reads stdin when omitted or "-".
    input: Option<PathBuf>,

    /// Preset name, or JSON list/object of rule categories.
    #[arg(long)]
    rules: Option<String>,

    /// JSON array of custom rules.
    #[arg(long)]
    custom_rules: Option<String>,

    #[command(flatten)]
    filter: FilterArgs,

    /// Base config file (JSON, or YAML) merged over the defaults.
    #[arg(long, conflicts_with = "base_id")]
    base: Option<PathBuf>,

    /// Id of a base config saved with save-config.
    #[arg(long)]
    base_id: Option<String>,

    /// Subscription URL announced in the Surge managed-config header.
    #[arg(long)]
    managed_url: Option<String>,

    /// Output file path. Defaults to the config directory if omitted.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the config to stdout instead of a file.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,
}

#[derive(Args)]
struct LinksArgs {
    /// File holding links or subscription URLs. Reads stdin when omitted or "-".
    input: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct SaveConfigArgs {
    /// Target the base config is meant for.
    #[arg(long, short = 't')]
    target: Target,

    /// Base config file.
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let client_error = err
                .downcast_ref::<BuildError>()
                .is_some_and(BuildError::is_client_error);
            if client_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => run_build(args).await,
        Commands::Links(args) => run_links(args).await,
        Commands::SaveConfig(args) => run_save_config(args).await,
        Commands::Rules => print_rules(),
    }
}

async fn run_build(args: BuildArgs) -> anyhow::Result<()> {
    let paths = AppPaths::new()?;
    let input = read_input(args.input.as_deref()).await?;

    let base_config = match (&args.base, &args.base_id) {
        (Some(path), _) => {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read base config from {}", path.display()))?;
            Some(parse_base_config(&raw)?)
        }
        (None, Some(id)) => {
            let store = ConfigStore::new(paths.clone());
            let loaded = store.load(id).await?;
            Some(loaded.ok_or_else(|| anyhow!("no saved base config with id {id}"))?)
        }
        (None, None) => None,
    };

    let params = BuildParams {
        selection: parse_rule_selection(args.rules.as_deref())?,
        custom_rules: parse_custom_rules(args.custom_rules.as_deref())?,
        excluded_protocols: parse_excluded_protocols(args.filter.exclude_protocols.as_deref())?,
        excluded_ciphers: args.filter.exclude_ciphers,
        name_filter: args.filter.name_filter,
        base_config,
        user_agent: args.filter.user_agent,
        managed_url: args.managed_url,
    };

    let fetcher = HttpFetcher::new(reqwest::Client::builder().build()?);
    let document = build_document(args.target, &input, &params, &fetcher).await?;
    let text = document.to_text()?;

    if args.stdout {
        StdoutDeployer.deploy(&text).await?;
    } else {
        let output_path = args
            .output
            .unwrap_or_else(|| paths.output_config_path(args.target));
        let deployer = FileDeployer {
            path: output_path.clone(),
        };
        deployer
            .deploy(&text)
            .await
            .with_context(|| format!("failed to write config to {}", output_path.display()))?;
        println!("{} config written to {}", args.target, output_path.display());
    }

    Ok(())
}

async fn run_links(args: LinksArgs) -> anyhow::Result<()> {
    let input = read_input(args.input.as_deref()).await?;
    let excluded = parse_excluded_protocols(args.filter.exclude_protocols.as_deref())?;
    let filter = sublink_core::ExclusionFilter::new(
        &excluded,
        &args.filter.exclude_ciphers,
        &args.filter.name_filter,
    );

    let fetcher = HttpFetcher::new(reqwest::Client::builder().build()?);
    let bundle = build_link_bundle(&input, &filter, &args.filter.user_agent, &fetcher).await?;
    StdoutDeployer.deploy(&bundle).await
}

async fn run_save_config(args: SaveConfigArgs) -> anyhow::Result<()> {
    let paths = AppPaths::new()?;
    paths.ensure_runtime_dirs().await?;

    let content = fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let id = ConfigStore::new(paths).save(args.target, &content).await?;
    info!(id = %id, target = %args.target, "base config stored");
    println!("{id}");
    Ok(())
}

fn print_rules() -> anyhow::Result<()> {
    let presets: serde_json::Map<String, serde_json::Value> = PRESETS
        .iter()
        .filter_map(|name| preset(name).map(|members| (name.to_string(), members.into())))
        .collect();
    let listing = serde_json::json!({
        "presets": presets,
        "categories": catalog_names().collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

async fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read input from {}", path.display())),
        _ => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            Ok(buffer)
        }
    }
}
