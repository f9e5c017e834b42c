use std::path::{Path, PathBuf};

use altsync::mangled::{group_reports, scan_site};
use altsync::store::{append_jsonl, write_jsonl};
use altsync::{
    reconcile_sites, survey_sites, BatchReport, ContentStore, ControlArgs, DryRunStore,
    JsonlStore, ReconcileControls, SiteScope,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Change ledger inside the report directory; appended across runs.
const CHANGE_LEDGER_FILE: &str = "change_ledger.jsonl";

#[derive(Parser, Debug)]
#[command(
    name = "altsync",
    version,
    about = "Reconcile embedded image alt text with the media library"
)]
struct Cli {
    /// Directory holding the JSONL export (sites, content, media, journal).
    #[arg(long, env = "ALTSYNC_STORE", default_value = "data/store")]
    store: PathBuf,

    /// Directory receiving report and ledger files.
    #[arg(long, env = "ALTSYNC_REPORT_DIR", default_value = "data/reports")]
    report_dir: PathBuf,

    #[command(flatten)]
    controls: ControlArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sites with their published record counts.
    Sites,
    /// Copy media-library alt text into embedded images.
    Fix {
        /// A site id, `small` or `all`.
        scope: SiteScope,

        /// Reconcile without persisting bodies or appending to the ledger.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Count images and missing alt text without changing anything.
    Survey,
    /// Report records whose bodies carry leaked document artifacts.
    Mangled,
}

#[derive(Debug, Serialize)]
struct FixSummary<'a> {
    scope: String,
    dry_run: bool,
    sites: Vec<SiteLine<'a>>,
    skipped: &'a [altsync::report::SkippedSite],
    totals: altsync::AltCounters,
}

#[derive(Debug, Serialize)]
struct SiteLine<'a> {
    site_id: altsync::SiteId,
    site_name: &'a str,
    records: usize,
    failed_records: usize,
    counters: altsync::AltCounters,
    errors: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let controls = cli
        .controls
        .build_controls()
        .map_err(|err| anyhow!(err))
        .context("invalid controls")?;
    let mut store = JsonlStore::open(&cli.store)
        .with_context(|| format!("failed to open store {:?}", cli.store))?;

    match cli.command {
        Command::Sites => print_sites(&store),
        Command::Fix { scope, dry_run } => {
            run_fix(&mut store, scope, dry_run, &controls, &cli.report_dir)
        }
        Command::Survey => run_survey(&store, &controls),
        Command::Mangled => run_mangled(&store, &controls, &cli.report_dir),
    }
}

fn print_sites(store: &JsonlStore) -> Result<()> {
    let sites = store.list_sites().context("failed to list sites")?;
    println!("{:>6}  {:<32}  {:<32}  {:>9}", "id", "path", "name", "published");
    for site in &sites {
        println!(
            "{:>6}  {:<32}  {:<32}  {:>9}",
            site.id, site.path, site.name, site.published_count
        );
    }
    println!("{} sites", sites.len());
    Ok(())
}

fn run_fix(
    store: &mut JsonlStore,
    scope: SiteScope,
    dry_run: bool,
    controls: &ReconcileControls,
    report_dir: &Path,
) -> Result<()> {
    info!(%scope, dry_run, store = ?store.dir(), "starting reconciliation");
    let batch = if dry_run {
        let mut dry = DryRunStore::new(&*store);
        reconcile_sites(&mut dry, scope, controls)?
    } else {
        reconcile_sites(store, scope, controls)?
    };

    let summary = FixSummary {
        scope: scope.to_string(),
        dry_run,
        sites: batch
            .sites
            .iter()
            .map(|site| SiteLine {
                site_id: site.site_id,
                site_name: &site.site_name,
                records: site.records,
                failed_records: site.failed_records,
                counters: site.counters,
                errors: site.errors.len(),
            })
            .collect(),
        skipped: &batch.skipped,
        totals: batch.totals,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    write_fix_reports(&batch, scope, dry_run, report_dir)
}

fn write_fix_reports(
    batch: &BatchReport,
    scope: SiteScope,
    dry_run: bool,
    report_dir: &Path,
) -> Result<()> {
    let unresolved: Vec<_> = batch.unresolved().cloned().collect();
    let unresolved_path = report_dir.join(format!("unresolved-{scope}.jsonl"));
    write_jsonl(&unresolved_path, &unresolved)
        .with_context(|| format!("failed to write {:?}", unresolved_path))?;
    println!(
        "wrote {} images without alt text to {:?}",
        unresolved.len(),
        unresolved_path
    );

    let record_errors: usize = batch.sites.iter().map(|site| site.errors.len()).sum();
    if record_errors > 0 {
        warn!(record_errors, "some records reported errors; see the site summaries");
    }

    if dry_run {
        println!("dry run enabled; skipping ledger append");
        return Ok(());
    }
    let changes: Vec<_> = batch.changes().cloned().collect();
    let ledger_path = report_dir.join(CHANGE_LEDGER_FILE);
    append_jsonl(&ledger_path, &changes)
        .with_context(|| format!("failed to append ledger {:?}", ledger_path))?;
    println!(
        "appended {} changes to ledger {:?}",
        changes.len(),
        ledger_path
    );
    Ok(())
}

fn run_survey(store: &JsonlStore, controls: &ReconcileControls) -> Result<()> {
    let report = survey_sites(store, controls)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_mangled(store: &JsonlStore, controls: &ReconcileControls, report_dir: &Path) -> Result<()> {
    let sites = store.list_sites().context("failed to list sites")?;
    let mut per_site = Vec::with_capacity(sites.len());
    for site in sites {
        let rows = scan_site(store, &site, controls.query())
            .with_context(|| format!("failed to scan site {}", site.id))?;
        println!("{:>6}  {:<32}  {:>6} mangled", site.id, site.name, rows.len());
        per_site.push((site, rows));
    }

    let out_dir = report_dir.join("mangled");
    for (stem, rows) in group_reports(per_site) {
        let path = out_dir.join(format!("{stem}.jsonl"));
        write_jsonl(&path, &rows).with_context(|| format!("failed to write {:?}", path))?;
        println!("wrote {} records to {:?}", rows.len(), path);
    }
    Ok(())
}
