use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{apply_flags, parse_view, write_text};
use logger::LogFormat;
use models::{AnalysisRequest, ViewInput};
use orchestrator::Orchestrator;
use settings_loader::resolve_settings;

#[derive(Parser, Debug)]
#[command(
    name = "analyze-case",
    about = "Classify every MRI view of one patient and write a case report."
)]
struct Args {
    /// Patient identifier printed on the report
    #[arg(short, long)]
    patient_id: Option<String>,

    /// View as LABEL=PATH (repeatable); a bare PATH is labelled by file name
    #[arg(short, long = "view", value_parser = parse_view, required = true)]
    views: Vec<ViewInput>,

    /// Path to settings.json (defaults to ./settings.json if present)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// PDF output path; defaults to <report.output_dir>/<case>.pdf
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Also write the plain-text report here
    #[arg(long)]
    text_out: Option<PathBuf>,

    /// Print the aggregate result as JSON instead of the text report
    #[arg(long)]
    json: bool,

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

    let orchestrator = Orchestrator::from_settings(&settings)?;
    let request = AnalysisRequest {
        patient_id: args.patient_id,
        views: args.views,
    };
    let result = orchestrator.analyze(&request);

    let text = report::case_report(&result, &settings.report.system_name);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{text}");
    }
    if let Some(path) = &args.text_out {
        write_text(path, &text)?;
    }

    let pdf = orchestrator
        .render_report(&result, &settings.report, args.out.as_deref())
        .context("Failed to generate PDF report")?;
    println!("PDF report: {}", pdf.display());

    if result.views.is_empty() {
        bail!("none of the {} view(s) could be classified", request.views.len());
    }
    Ok(())
}
