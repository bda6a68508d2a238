use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{apply_flags, batch_id, scan_report_path, write_text};
use logger::LogFormat;
use orchestrator::Orchestrator;
use settings_loader::resolve_settings;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "analyze-batch",
    about = "Classify independent MRI scans and write one report per scan plus a batch summary."
)]
struct Args {
    /// Scan files; each one is analysed on its own
    #[arg(required = true)]
    scans: Vec<PathBuf>,

    /// Output directory; defaults to report.output_dir from settings
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Path to settings.json (defaults to ./settings.json if present)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    no_heatmap: bool,

    #[arg(long)]
    no_narrative: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init("info", LogFormat::from_env());

    let mut settings = resolve_settings(args.settings.as_ref())?;
    apply_flags(&mut settings, args.no_heatmap, args.no_narrative);
    if let Some(dir) = args.out_dir {
        settings.report.output_dir = dir;
    }
    let out_dir = settings.report.output_dir.clone();

    let orchestrator = Orchestrator::from_settings(&settings)?;
    let results = orchestrator.analyze_batch(&args.scans);

    for result in results.iter().filter(|r| !r.views.is_empty()) {
        let path = scan_report_path(&out_dir, result);
        orchestrator
            .render_report(result, &settings.report, Some(&path))
            .with_context(|| format!("Failed to generate report {}", path.display()))?;
    }

    let id = batch_id(&results);
    let summary = report::batch_report(&results, &settings.report.system_name);
    println!("{summary}");
    write_text(&out_dir.join(format!("{id}.txt")), &summary)?;

    let batch_pdf = out_dir.join(format!("{id}.pdf"));
    let bytes = report::render_pdf(&report::batch_document(&results, &settings.report))
        .context("Failed to generate batch PDF")?;
    report::write_pdf(&bytes, &batch_pdf).context("Failed to write batch PDF")?;
    println!("Batch report: {}", batch_pdf.display());

    let failed = results.iter().filter(|r| r.views.is_empty()).count();
    if failed == results.len() {
        bail!("none of the {} scan(s) could be classified", results.len());
    }
    if failed > 0 {
        warn!("{} of {} scan(s) failed", failed, results.len());
    }
    Ok(())
}
