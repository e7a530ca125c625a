use anyhow::Context;
use clap::{Parser, Subcommand};
use cohort_core::constants::{DEFAULT_MIN_HITS, DEFAULT_ROUNDING_BUCKET, DEFAULT_STORE_TIMEOUT_MS};
use cohort_core::{
    list_leaf_queries, Cohort, CohortService, CoreConfig, NonEmptyText, RecordStore,
    RoundingMode, StaticRecordStore,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cohort")]
#[command(about = "Cohort definition and evaluation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a cohort and print the matching record ids
    Evaluate {
        /// Cohort definition (YAML)
        cohort: PathBuf,
        /// Record store fixture (YAML)
        #[arg(long)]
        store: PathBuf,
        /// Skip consent restriction
        #[arg(long)]
        consent_override: bool,
        /// Print JSON instead of one id per line
        #[arg(long)]
        json: bool,
    },
    /// Report the disclosed size of a cohort
    Report {
        /// Cohort definition (YAML)
        cohort: PathBuf,
        /// Record store fixture (YAML)
        #[arg(long)]
        store: PathBuf,
        /// Minimum size that may be disclosed (defaults to COHORT_MIN_HITS)
        #[arg(long)]
        min_hits: Option<usize>,
        /// Skip consent restriction
        #[arg(long)]
        consent_override: bool,
    },
    /// List the raw text of every leaf query
    ListQueries {
        /// Cohort definition (YAML)
        cohort: PathBuf,
    },
    /// Show the rewritten text each leaf would send to the store
    Explain {
        /// Cohort definition (YAML)
        cohort: PathBuf,
        /// Skip consent restriction
        #[arg(long)]
        consent_override: bool,
    },
    /// Break a cohort down by template
    TemplateSizes {
        /// Cohort definition (YAML)
        cohort: PathBuf,
        /// Record store fixture (YAML)
        #[arg(long)]
        store: PathBuf,
        /// Template ids to count
        #[arg(required = true)]
        templates: Vec<String>,
        /// Skip consent restriction
        #[arg(long)]
        consent_override: bool,
    },
}

/// Entry point for the cohort CLI.
///
/// # Environment Variables
/// - `COHORT_CONSENT_CODE`: consent code enforced unless `--consent-override` is given
/// - `COHORT_TEMPLATES`: comma separated template ids every query is restricted to
/// - `COHORT_MIN_HITS`: privacy threshold (default: 50)
/// - `COHORT_ROUNDING_BUCKET`: rounding granularity for breakdowns (default: 10)
/// - `COHORT_ROUNDING_MODE`: `nearest`, `down` or `up` (default: `nearest`)
/// - `COHORT_STORE_TIMEOUT_MS`: per-call record store timeout (default: 30000)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cohort=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(config_from_env()?);
    tracing::info!(
        consent_enforced = cfg.consent_code().is_some(),
        templates = cfg.templates().len(),
        min_hits = cfg.min_hits(),
        rounding_bucket = cfg.rounding().bucket(),
        rounding_mode = %cfg.rounding().mode(),
        store_timeout = ?cfg.store_timeout(),
        "configuration resolved"
    );

    match cli.command {
        Some(Commands::Evaluate {
            cohort,
            store,
            consent_override,
            json,
        }) => {
            let cohort = load_cohort(&cohort)?;
            tracing::info!(cohort_id = %cohort.id, consent_override, "evaluating cohort");
            let service = CohortService::new(cfg, load_store(&store)?);
            let ids = service.evaluate(Some(&cohort), consent_override).await?;
            if json {
                let output = serde_json::json!({
                    "cohort_id": cohort.id,
                    "cohort_name": cohort.name.as_str(),
                    "ehr_ids": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for id in &ids {
                    println!("{id}");
                }
            }
        }
        Some(Commands::Report {
            cohort,
            store,
            min_hits,
            consent_override,
        }) => {
            let cohort = load_cohort(&cohort)?;
            let min_hits = min_hits.unwrap_or(cfg.min_hits());
            tracing::info!(cohort_id = %cohort.id, min_hits, consent_override, "reporting cohort size");
            let service = CohortService::new(cfg, load_store(&store)?);
            let report = service
                .size_report(&cohort, consent_override, min_hits)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Commands::ListQueries { cohort }) => {
            let cohort = load_cohort(&cohort)?;
            tracing::info!(cohort_id = %cohort.id, "listing leaf queries");
            for query in list_leaf_queries(&cohort) {
                println!("{query}");
            }
        }
        Some(Commands::Explain {
            cohort,
            consent_override,
        }) => {
            let cohort = load_cohort(&cohort)?;
            tracing::info!(cohort_id = %cohort.id, consent_override, "explaining cohort");
            let service = CohortService::new(cfg, Arc::new(StaticRecordStore::default()));
            for leaf in service.explain(&cohort, consent_override)? {
                match leaf.query {
                    Some(query) => println!("{}: {}", leaf.name, query),
                    None => println!("{}: <no query text>", leaf.name),
                }
            }
        }
        Some(Commands::TemplateSizes {
            cohort,
            store,
            templates,
            consent_override,
        }) => {
            let cohort = load_cohort(&cohort)?;
            let templates = templates
                .iter()
                .map(NonEmptyText::new)
                .collect::<Result<Vec<_>, _>>()
                .context("template ids must not be empty")?;
            tracing::info!(
                cohort_id = %cohort.id,
                templates = templates.len(),
                consent_override,
                "sizing cohort per template"
            );
            let service = CohortService::new(cfg, load_store(&store)?);
            let distribution = service
                .size_per_template(Some(&cohort), &templates, consent_override)
                .await?;
            println!("total: {}", distribution.total);
            for (template, size) in &distribution.parts {
                println!("{template}: {size}");
            }
        }
        None => {
            println!("Use 'cohort --help' for commands");
        }
    }

    Ok(())
}

fn load_cohort(path: &Path) -> anyhow::Result<Cohort> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cohort definition {}", path.display()))?;
    Ok(Cohort::from_yaml_str(&text)?)
}

fn load_store(path: &Path) -> anyhow::Result<Arc<dyn RecordStore>> {
    Ok(Arc::new(StaticRecordStore::from_path(path)?))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_number<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got '{raw}'")),
        None => Ok(default),
    }
}

fn parse_templates(raw: &str) -> anyhow::Result<BTreeSet<NonEmptyText>> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| NonEmptyText::new(part).map_err(anyhow::Error::from))
        .collect()
}

fn config_from_env() -> anyhow::Result<CoreConfig> {
    let consent_code = env_var("COHORT_CONSENT_CODE")
        .map(NonEmptyText::new)
        .transpose()?;
    let templates = match env_var("COHORT_TEMPLATES") {
        Some(raw) => parse_templates(&raw)?,
        None => BTreeSet::new(),
    };
    let rounding_mode = match env_var("COHORT_ROUNDING_MODE") {
        Some(raw) => raw.parse::<RoundingMode>()?,
        None => RoundingMode::default(),
    };

    let cfg = CoreConfig::new(
        consent_code,
        templates,
        env_number("COHORT_MIN_HITS", DEFAULT_MIN_HITS)?,
        env_number("COHORT_ROUNDING_BUCKET", DEFAULT_ROUNDING_BUCKET)?,
        rounding_mode,
        Duration::from_millis(env_number(
            "COHORT_STORE_TIMEOUT_MS",
            DEFAULT_STORE_TIMEOUT_MS,
        )?),
    )?;
    Ok(cfg)
}
