//! CLI command definitions for patent-report.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classify::{LlmTechFieldClassifier, LocalTechFieldClassifier, TechFieldClassifier};
use crate::generation::CancelToken;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    OutcomeStatus, PipelineConfig, PipelineCoordinator, PipelineOutcome, ReportRequest,
};
use crate::report::{parse_report, ReportKind, StructuredReport};
use crate::storage::{self, Database, ReportStore};

/// Patent report generator.
#[derive(Parser)]
#[command(name = "patent-report")]
#[command(about = "Generate, parse and store market and business reports for patents")]
#[command(version)]
#[command(
    long_about = "patent-report turns a patent bibliographic record into a structured market or business report.\n\nThe record may be any JSON shape the registry proxy returns; it is normalized before prompting.\n\nExample usage:\n  patent-report generate --input patent.json --kind market --user-id user-1 --database-url sqlite://reports.db"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate a report from a patent record.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Parse raw generation output into sections without calling the model.
    Parse(ParseArgs),

    /// Print a stored report.
    Show(ShowArgs),

    /// Create or upgrade the report tables.
    Migrate(MigrateArgs),
}

/// Arguments for `patent-report generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// JSON file holding the patent record, or `-` for stdin.
    #[arg(short, long)]
    pub input: String,

    /// Report kind (market, business).
    #[arg(short, long)]
    pub kind: String,

    /// Requester id; omit to run without saving.
    #[arg(short, long)]
    pub user_id: Option<String>,

    /// Budget tier (constrained, full). Overrides REPORT_TIER.
    #[arg(short, long)]
    pub tier: Option<String>,

    /// Store URL (sqlite:... or postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Replace an existing report instead of rejecting the request.
    #[arg(long)]
    pub allow_replace: bool,

    /// Model passed to the generation service. Overrides REPORT_MODEL.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Classify technology fields locally instead of asking the model.
    #[arg(long)]
    pub local_classifier: bool,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `patent-report parse`.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Text file with raw generation output, or `-` for stdin.
    #[arg(short, long)]
    pub input: String,

    /// Report kind (market, business).
    #[arg(short, long)]
    pub kind: String,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `patent-report show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Report id.
    #[arg(long)]
    pub id: Uuid,

    /// Store URL (sqlite:... or postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `patent-report migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// Store URL (sqlite:... or postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Parse(args) => run_parse_command(args),
        Commands::Show(args) => run_show_command(args).await,
        Commands::Migrate(args) => run_migrate_command(args).await,
    }
}

// ============================================================================
// Generate Command Implementation
// ============================================================================

/// Environment keys the generate flags override.
fn config_overrides(args: &GenerateArgs) -> HashMap<&'static str, String> {
    let mut overrides = HashMap::new();
    if let Some(tier) = &args.tier {
        overrides.insert("REPORT_TIER", tier.clone());
    }
    if let Some(model) = &args.model {
        overrides.insert("REPORT_MODEL", model.clone());
    }
    if let Some(url) = &args.database_url {
        overrides.insert("DATABASE_URL", url.clone());
    }
    if args.allow_replace {
        overrides.insert("REPORT_ALLOW_REPLACE", "true".to_string());
    }
    overrides
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let overrides = config_overrides(&args);
    let config = PipelineConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;

    let record: serde_json::Value = serde_json::from_str(&read_input(&args.input)?)
        .with_context(|| format!("{} is not valid JSON", args.input))?;

    let provider: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Set LLM_API_BASE (and LLM_API_KEY if required).",
            e
        )
    })?);

    let database_url = config.database_url.clone();
    let mut coordinator = PipelineCoordinator::new(config, provider.clone())?;

    if args.user_id.is_some() {
        let url = database_url
            .context("--user-id needs a store; pass --database-url or set DATABASE_URL")?;
        let store = storage::connect(&url).await?;
        let classifier: Arc<dyn TechFieldClassifier> = if args.local_classifier {
            Arc::new(LocalTechFieldClassifier)
        } else {
            Arc::new(LlmTechFieldClassifier::new(provider))
        };
        coordinator = coordinator.with_store(store, classifier);
    }

    let mut request = ReportRequest::new(record, args.kind.clone());
    if let Some(user_id) = &args.user_id {
        request = request.with_requester(user_id.clone());
    }

    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling generation");
            on_ctrl_c.cancel();
        }
    });

    info!(kind = %args.kind, tier = %coordinator.config().tier(), "Generating report");

    match coordinator.run(&request, &cancel).await {
        Ok(outcome) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            Ok(())
        }
        Err(failure) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&failure.to_response())?);
            }
            Err(failure.into())
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    let response = &outcome.response;
    let marker = match outcome.status {
        OutcomeStatus::Saved | OutcomeStatus::Stateless | OutcomeStatus::Cached => "✓",
        _ => "!",
    };

    println!("{} {} ({})", marker, response.report_name, outcome.status);
    println!(
        "  Patent:   {} {}",
        response.patent_info.application_number, response.patent_info.title
    );
    if let Some(id) = response.report_id {
        println!("  Report:   {}", id);
    }
    if let Some(technology) = &response.technology {
        println!(
            "  Field:    {} ({:.2})",
            technology.field, technology.confidence
        );
    }
    println!(
        "  Sections: {} ({} chars, {} attempt(s))",
        response.quality_metrics.total_sections,
        response.quality_metrics.total_content_length,
        response.attempts
    );
    if let Some(warning) = &outcome.warning {
        println!("  Warning:  {} {}", warning.error_kind, warning.message);
    }
    println!();
    for section in &response.sections {
        println!("## {}\n{}\n", section.title, section.content);
    }
}

// ============================================================================
// Parse / Show / Migrate Implementation
// ============================================================================

fn run_parse_command(args: ParseArgs) -> anyhow::Result<()> {
    let kind: ReportKind = args.kind.parse()?;
    let report = parse_report(kind, &read_input(&args.input)?);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StructuredReport) {
    println!(
        "{}: {} section(s) via {:?}",
        report.report_name, report.quality_metrics.total_sections, report.parse_tier
    );
    for (column, content) in report.schema_fields() {
        println!("  {:<30} {} chars", column, content.chars().count());
    }
    println!();
    for section in &report.sections {
        println!("## {} ({} words)\n{}\n", section.title, section.word_count, section.content);
    }
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let store = storage::connect(&args.database_url).await?;
    let stored = store
        .get_report(args.id)
        .await?
        .with_context(|| format!("report {} not found", args.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    println!("{} [{}]", stored.name, stored.status);
    println!("  Id:       {}", stored.id);
    println!("  Patent:   {}", stored.application_number);
    println!("  Owner:    {}", stored.user_id);
    println!(
        "  Field:    {} ({:.2})",
        stored.technology_field, stored.technology_confidence
    );
    println!("  Created:  {}", stored.created_at.to_rfc3339());
    if stored.is_fallback {
        println!(
            "  Fallback: {}",
            stored.fallback_reason.as_deref().unwrap_or("unknown")
        );
    }
    println!();
    print_report(&stored.report);
    Ok(())
}

async fn run_migrate_command(args: MigrateArgs) -> anyhow::Result<()> {
    if args.database_url.starts_with("sqlite:") {
        storage::connect(&args.database_url).await?;
        println!("✓ SQLite schema ready at {}", args.database_url);
        return Ok(());
    }

    let db = Database::connect(&args.database_url).await?;
    let applied = db.run_migrations().await?;
    println!("✓ {} migration(s) recorded", applied.len());
    for migration in applied {
        println!("  {} at {}", migration.name, migration.applied_at.to_rfc3339());
    }
    Ok(())
}

/// Read a file, or stdin when `path` is `-`.
fn read_input(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_command_defaults() {
        let args = vec![
            "patent-report",
            "generate",
            "--input",
            "patent.json",
            "--kind",
            "market",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.input, "patent.json");
                assert_eq!(args.kind, "market");
                assert!(args.user_id.is_none());
                assert!(args.tier.is_none());
                assert!(!args.allow_replace);
                assert!(!args.json);
            }
            _ => panic!("Expected Generate command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_generate_command_with_all_options() {
        let args = vec![
            "patent-report",
            "gen",
            "-i",
            "-",
            "-k",
            "business",
            "-u",
            "user-1",
            "-t",
            "constrained",
            "--database-url",
            "sqlite://reports.db",
            "--allow-replace",
            "-m",
            "openai/gpt-4o-mini",
            "--local-classifier",
            "-j",
            "--log-level",
            "debug",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert_eq!(cli.log_level, "debug");

        let Commands::Generate(args) = cli.command else {
            panic!("Expected Generate command");
        };
        let overrides = config_overrides(&args);
        assert_eq!(overrides["REPORT_TIER"], "constrained");
        assert_eq!(overrides["REPORT_MODEL"], "openai/gpt-4o-mini");
        assert_eq!(overrides["DATABASE_URL"], "sqlite://reports.db");
        assert_eq!(overrides["REPORT_ALLOW_REPLACE"], "true");
        assert!(args.local_classifier);
        assert!(args.json);
    }

    #[test]
    fn test_generate_requires_kind() {
        let result = Cli::try_parse_from(["patent-report", "generate", "--input", "x.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_show_parses_uuid() {
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "patent-report",
            "show",
            "--id",
            &id,
            "--database-url",
            "sqlite://reports.db",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Show(args) => assert_eq!(args.id.to_string(), id),
            _ => panic!("Expected Show command"),
        }

        let bad = Cli::try_parse_from([
            "patent-report",
            "show",
            "--id",
            "not-a-uuid",
            "--database-url",
            "sqlite://reports.db",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.txt");
        std::fs::write(&path, "## Risk Factors\nSupply").unwrap();
        let text = read_input(path.to_str().unwrap()).unwrap();
        assert!(text.starts_with("## Risk Factors"));

        assert!(read_input("/nonexistent/raw.txt").is_err());
    }
}
