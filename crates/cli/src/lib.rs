//! Helpers shared by the `analyze-case` and `analyze-batch` binaries.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use models::{AggregateResult, Settings, ViewInput};

/// Parses `LABEL=PATH`. A bare path is labelled with its file name.
pub fn parse_view(raw: &str) -> Result<ViewInput, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty view".to_string());
    }
    match raw.split_once('=') {
        Some((label, path)) => {
            let (label, path) = (label.trim(), path.trim());
            if label.is_empty() || path.is_empty() {
                return Err(format!("expected LABEL=PATH, got '{raw}'"));
            }
            Ok(ViewInput::new(label, path))
        }
        None => {
            let path = PathBuf::from(raw);
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| raw.to_string());
            Ok(ViewInput::new(label, path))
        }
    }
}

/// Applies the `--no-heatmap` / `--no-narrative` switches.
pub fn apply_flags(settings: &mut Settings, no_heatmap: bool, no_narrative: bool) {
    if no_heatmap {
        settings.pipeline.generate_heatmap = false;
    }
    if no_narrative {
        settings.pipeline.generate_narrative = false;
    }
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// `{out_dir}/{scan stem}_{case id}.pdf` for one scan of a batch.
pub fn scan_report_path(out_dir: &Path, result: &AggregateResult) -> PathBuf {
    let stem = result
        .views
        .first()
        .map(|v| v.source.as_path())
        .or_else(|| result.failures.first().map(|f| f.source.as_path()))
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "scan".to_string());
    out_dir.join(format!("{}_{}.pdf", stem, result.case_id))
}

pub fn batch_id(results: &[AggregateResult]) -> String {
    let at = results
        .iter()
        .map(|r| r.generated_at)
        .min()
        .unwrap_or_default();
    format!("BATCH_{}", at.format("%Y%m%d_%H%M%S"))
}
