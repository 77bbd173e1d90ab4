use std::path::PathBuf;

use anyhow::{Result, bail};
use catalogtool_core::audit::{AuditReport, audit_invariants, load_catalog_stats, snapshot_digest};
use catalogtool_core::config::{FailurePolicy, load_config};
use catalogtool_core::migrate::{latest_version, pending_migration_count, run_migrations};
use catalogtool_core::reconcile::{ReconcileOptions, ReconcileReport, reconcile};
use catalogtool_core::repository::{SqliteRepository, TranslationFilter};
use catalogtool_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "catalogtool",
    version,
    about = "Reconcile channel ownership and status of catalog translations"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Db(DbArgs),
    #[command(about = "Attach legacy translations to their owning channel and fix statuses")]
    Reconcile(ReconcileArgs),
    #[command(about = "Check ownership and status invariants without changing anything")]
    Audit(AuditArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .catalogtool/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[arg(long, value_name = "ID", help = "Only visit translations of this item")]
    item_id: Option<i64>,
    #[arg(long, value_name = "CODE", help = "Only visit translations in this language")]
    language: Option<String>,
    #[arg(long, help = "Plan actions without writing to the store")]
    dry_run: bool,
    #[arg(long, value_name = "N", help = "Records fetched per page")]
    page_size: Option<usize>,
    #[arg(long, help = "Stop at the first failed unit of work")]
    abort_on_error: bool,
    #[arg(short, long, help = "Print applied actions for a real run")]
    verbose: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(long, value_name = "ID")]
    item_id: Option<i64>,
    #[arg(long, value_name = "CODE")]
    language: Option<String>,
    #[arg(long, help = "Report violations without failing")]
    allow_violations: bool,
    #[arg(long, help = "Print the SHA-256 digest of all translation rows")]
    digest: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Reconcile(args)) => run_reconcile(&runtime, args),
        Some(Commands::Audit(args)) => run_audit(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized catalogtool runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    } else {
        for migration in &report.applied {
            println!("applied: v{:03} {}", migration.version, migration.name);
        }
    }
    println!("schema_version: {}", report.current_version);
    println!("latest_version: {}", latest_version());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if !status.db_exists {
        for warning in &status.warnings {
            println!("warning: {warning}");
        }
        println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
        print_diagnostics(runtime, &paths);
        return Ok(());
    }

    println!("migrations.pending: {}", pending_migration_count(&paths)?);
    println!("migrations.latest: {}", latest_version());

    let repository = SqliteRepository::open(&paths)?;
    let stats = load_catalog_stats(repository.connection())?;
    println!("channels: {}", stats.channels);
    println!("channels.primary: {}", stats.primary_channels);
    println!("items: {}", stats.items);
    println!("translations: {}", stats.translations);
    if stats.by_status.is_empty() {
        println!("translations.by_status: <empty>");
    } else {
        for (status, count) in &stats.by_status {
            println!("translations.status.{status}: {count}");
        }
    }
    println!("translations.legacy_unassigned: {}", stats.legacy_unassigned);
    println!("translations.orphaned: {}", stats.orphaned);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_reconcile(runtime: &RuntimeOptions, args: ReconcileArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let page_size = match args.page_size {
        Some(0) => bail!("--page-size must be at least 1"),
        Some(size) => size,
        None => config.page_size()?,
    };
    let failure_policy = if args.abort_on_error {
        FailurePolicy::Abort
    } else {
        config.failure_policy()?
    };
    let options = ReconcileOptions {
        filter: build_filter(args.item_id, args.language.as_deref())?,
        dry_run: args.dry_run,
        page_size,
        failure_policy,
        trace: args.verbose,
    };

    let mut repository = SqliteRepository::open(&paths)?;
    let report = reconcile(&mut repository, &options)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            print_reconcile_report(&report, failure_policy);
            print_diagnostics(runtime, &paths);
        }
    }

    if report.aborted {
        bail!(
            "reconciliation aborted after {} failed unit(s); rerun to resume",
            report.failures.len()
        );
    }
    Ok(())
}

fn print_reconcile_report(report: &ReconcileReport, failure_policy: FailurePolicy) {
    println!("reconcile");
    println!("mode: {}", if report.dry_run { "dry-run" } else { "apply" });
    println!(
        "filters.item_id: {}",
        report
            .item_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<all>".to_string())
    );
    println!(
        "filters.language: {}",
        report.language.as_deref().unwrap_or("<all>")
    );
    println!("page_size: {}", report.page_size);
    println!("on_error: {}", failure_policy.as_str());
    println!("visited: {}", report.visited);
    println!("skipped: {}", report.skipped);
    println!("unchanged: {}", report.unchanged);
    println!("updated: {}", report.counters.updated);
    println!("merged: {}", report.counters.merged);
    println!("deleted: {}", report.counters.deleted);
    println!("failed: {}", report.failures.len());
    if report.aborted {
        println!("aborted: yes");
    }
    for action in &report.actions {
        println!("action: {action}");
    }
    for failure in &report.failures {
        println!(
            "failure: record={} item={} lang={} action={}: {}",
            failure.record_id,
            failure.item_id,
            failure.language,
            failure.action.as_str(),
            failure.message
        );
    }
}

fn run_audit(runtime: &RuntimeOptions, args: AuditArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let filter = build_filter(args.item_id, args.language.as_deref())?;
    let repository = SqliteRepository::open(&paths)?;
    let report = audit_invariants(repository.connection(), &filter)?;
    let digest = if args.digest {
        Some(snapshot_digest(repository.connection())?)
    } else {
        None
    };

    match args.format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "filters": {
                    "item_id": filter.item_id,
                    "language": filter.language,
                },
                "violations": report.violation_count(),
                "report": &report,
                "digest": digest,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            print_audit_report(&report, &filter);
            if let Some(digest) = &digest {
                println!("digest.sha256: {digest}");
            }
            print_diagnostics(runtime, &paths);
        }
    }

    if !report.is_clean() && !args.allow_violations {
        bail!(
            "audit found {} violation(s); pass --allow-violations to report only",
            report.violation_count()
        );
    }
    Ok(())
}

fn print_audit_report(report: &AuditReport, filter: &TranslationFilter) {
    println!("audit");
    println!(
        "filters.item_id: {}",
        filter
            .item_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<all>".to_string())
    );
    println!(
        "filters.language: {}",
        filter.language.as_deref().unwrap_or("<all>")
    );
    println!("duplicate_triples: {}", report.duplicate_triples.len());
    for triple in &report.duplicate_triples {
        let ids = triple
            .record_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "duplicate: item={} channel={} lang={} records={ids}",
            triple.item_id, triple.channel_id, triple.language
        );
    }
    println!(
        "unsynced_primary_reference: {}",
        report.unsynced_primary_reference.len()
    );
    for violation in &report.unsynced_primary_reference {
        println!(
            "unsynced: item={} channel={} lang={} record={}",
            violation.item_id, violation.channel_id, violation.language, violation.record_id
        );
    }
    println!("synced_non_primary: {}", report.synced_non_primary.len());
    for violation in &report.synced_non_primary {
        println!(
            "synced: item={} channel={} lang={} record={}",
            violation.item_id, violation.channel_id, violation.language, violation.record_id
        );
    }
    println!("legacy_unassigned: {}", report.legacy_unassigned);
    println!("violations: {}", report.violation_count());
}

fn build_filter(item_id: Option<i64>, language: Option<&str>) -> Result<TranslationFilter> {
    let language = match language.map(str::trim) {
        Some("") => bail!("--language requires a non-empty language code"),
        Some(code) => Some(code.to_string()),
        None => None,
    };
    Ok(TranslationFilter { item_id, language })
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    debug!(
        project_root = %normalize_for_display(&paths.project_root),
        root_source = paths.root_source.as_str(),
        db_path = %normalize_for_display(&paths.db_path),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reconcile_flags_parse() {
        let cli = Cli::try_parse_from([
            "catalogtool",
            "reconcile",
            "--item-id",
            "7",
            "--language",
            "cs",
            "--dry-run",
            "--page-size",
            "25",
            "--format",
            "json",
        ])
        .expect("parse");
        let Some(Commands::Reconcile(args)) = cli.command else {
            panic!("expected reconcile command");
        };
        assert_eq!(args.item_id, Some(7));
        assert_eq!(args.language.as_deref(), Some("cs"));
        assert!(args.dry_run);
        assert_eq!(args.page_size, Some(25));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(!args.abort_on_error);
    }

    #[test]
    fn blank_language_filter_is_rejected() {
        assert!(build_filter(None, Some("  ")).is_err());
        let filter = build_filter(Some(3), Some(" de ")).expect("filter");
        assert_eq!(filter.item_id, Some(3));
        assert_eq!(filter.language.as_deref(), Some("de"));
    }
}
