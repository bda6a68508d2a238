//! Device-independent document model. Built purely from aggregates, then
//! handed to a renderer.

use image::RgbImage;
use models::{AggregateResult, Interpretation, NarrativeSource, ReportSettings, TumorClass, ViewResult};

use crate::{
    conflict_description, patient_label, timestamp, MEDICAL_DISCLAIMER, SUPPRESSION_NOTICE,
    SUPPRESSION_SUMMARY,
};

#[derive(Debug, Clone)]
pub struct Figure {
    pub caption: String,
    pub image: RgbImage,
}

#[derive(Debug, Clone)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    Warning(String),
    KeyValue(Vec<(String, String)>),
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Figures(Vec<Figure>),
    Spacer(f32),
}

#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub title: String,
    /// Document metadata; also used as the creation date.
    pub created: chrono::DateTime<chrono::Utc>,
    pub blocks: Vec<Block>,
}

impl ReportDocument {
    fn new(title: impl Into<String>, created: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            title: title.into(),
            created,
            blocks: Vec::new(),
        }
    }

    fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn headings(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Heading(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.blocks.iter().any(|b| match b {
            Block::Heading(t) | Block::Paragraph(t) | Block::Warning(t) => t.contains(needle),
            Block::KeyValue(pairs) => pairs
                .iter()
                .any(|(k, v)| k.contains(needle) || v.contains(needle)),
            Block::Table { header, rows } => header
                .iter()
                .chain(rows.iter().flatten())
                .any(|cell| cell.contains(needle)),
            Block::Figures(figures) => figures.iter().any(|f| f.caption.contains(needle)),
            Block::Spacer(_) => false,
        })
    }
}

fn kv(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

fn probability_table(view: &ViewResult) -> Block {
    let rows = TumorClass::ALL
        .iter()
        .map(|class| {
            let marker = if *class == view.prediction.class { " <" } else { "" };
            vec![
                format!("{}{}", class.as_str().to_uppercase(), marker),
                format!("{:.2}%", view.prediction.probability(*class) * 100.0),
            ]
        })
        .collect();
    Block::Table {
        header: vec!["Tumor Type".to_string(), "Probability".to_string()],
        rows,
    }
}

fn view_blocks(doc: &mut ReportDocument, index: usize, view: &ViewResult) {
    doc.push(Block::Heading(format!(
        "View #{}: {} ({})",
        index + 1,
        view.label,
        view.source.display()
    )));
    doc.push(Block::KeyValue(vec![
        kv("Predicted Class", view.prediction.class.as_str().to_uppercase()),
        kv("Confidence", format!("{:.2}%", view.prediction.confidence)),
    ]));
    doc.push(probability_table(view));

    let mut figures = vec![Figure {
        caption: "Original MRI Scan".to_string(),
        image: view.image.clone(),
    }];
    if let Some(heatmap) = &view.heatmap {
        figures.push(Figure {
            caption: "Grad-CAM Heatmap".to_string(),
            image: heatmap.overlay.clone(),
        });
    }
    doc.push(Block::Figures(figures));
    if let Some(error) = &view.heatmap_error {
        doc.push(Block::Paragraph(format!("Heatmap unavailable: {error}")));
    }

    if let Some(narrative) = &view.narrative {
        doc.push(Block::Paragraph(narrative.text.clone()));
    }
    doc.push(Block::Spacer(8.0));
}

/// Layout of a (possibly multi-view) case report.
pub fn case_document(result: &AggregateResult, settings: &ReportSettings) -> ReportDocument {
    let title = if result.views.len() + result.failures.len() > 1 {
        "PATIENT CASE REPORT (MULTI-VIEW ANALYSIS)"
    } else {
        "BRAIN MRI CLASSIFICATION REPORT"
    };
    let mut doc = ReportDocument::new(title, result.generated_at);

    doc.push(Block::KeyValue(vec![
        kv("Report Date", timestamp(result)),
        kv("Patient ID", patient_label(result)),
        kv("Case ID", result.case_id.clone()),
        kv("System", settings.system_name.clone()),
        kv("Views Analyzed", result.views.len().to_string()),
    ]));
    doc.push(Block::Spacer(10.0));

    doc.push(Block::Heading("SUMMARY OF FINDINGS".to_string()));
    if let Some(reason) = conflict_description(result) {
        doc.push(Block::Warning(format!("DIAGNOSTIC CONFLICT DETECTED. {reason}")));
        let rows = result
            .tally()
            .iter()
            .map(|(class, count)| vec![class.as_str().to_uppercase(), count.to_string()])
            .collect();
        doc.push(Block::Table {
            header: vec!["Predicted Type".to_string(), "Views".to_string()],
            rows,
        });
    } else if let Some(dominant) = result.dominant() {
        doc.push(Block::KeyValue(vec![
            kv("Primary Impression", dominant.class.as_str().to_uppercase()),
            kv(
                "Average Confidence",
                format!("{:.1}%", dominant.average_confidence),
            ),
            kv("Consensus", format!("{}/{} views", dominant.count, dominant.total)),
        ]));
    } else {
        doc.push(Block::Warning("No view could be classified.".to_string()));
    }
    doc.push(Block::Spacer(10.0));

    doc.push(Block::Heading("DETAILED VIEW RESULTS".to_string()));
    for (idx, view) in result.views.iter().enumerate() {
        view_blocks(&mut doc, idx, view);
    }

    doc.push(Block::Heading("INTERPRETATION".to_string()));
    match &result.interpretation {
        Interpretation::Synthesized(narrative) => {
            doc.push(Block::Paragraph(narrative.text.clone()));
            if narrative.source == NarrativeSource::Fallback {
                doc.push(Block::Paragraph(
                    "(Generated from a template; no language model was used.)".to_string(),
                ));
            }
        }
        Interpretation::Suppressed => {
            doc.push(Block::Warning(SUPPRESSION_SUMMARY.to_string()));
            doc.push(Block::Paragraph(SUPPRESSION_NOTICE.to_string()));
        }
        Interpretation::Unavailable => {
            doc.push(Block::Paragraph(
                "Automated interpretation was not generated for this case.".to_string(),
            ));
        }
    }

    if !result.failures.is_empty() {
        doc.push(Block::Heading("EXCLUDED VIEWS".to_string()));
        doc.push(Block::Table {
            header: vec!["View".to_string(), "File".to_string(), "Reason".to_string()],
            rows: result
                .failures
                .iter()
                .map(|f| {
                    vec![
                        f.label.clone(),
                        f.source.display().to_string(),
                        f.error.clone(),
                    ]
                })
                .collect(),
        });
    }

    doc.push(Block::Spacer(10.0));
    doc.push(Block::Heading("MEDICAL DISCLAIMER".to_string()));
    doc.push(Block::Warning(MEDICAL_DISCLAIMER.to_string()));
    doc
}

/// Layout of a batch of independent scans.
pub fn batch_document(results: &[AggregateResult], settings: &ReportSettings) -> ReportDocument {
    let created = results
        .iter()
        .map(|r| r.generated_at)
        .min()
        .unwrap_or_default();
    let mut doc = ReportDocument::new("BATCH ANALYSIS SUMMARY REPORT", created);

    let total: usize = results.iter().map(|r| r.views.len()).sum();
    doc.push(Block::KeyValue(vec![
        kv("Report Date", created.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        kv("Batch ID", format!("BATCH_{}", created.format("%Y%m%d_%H%M%S"))),
        kv("System", settings.system_name.clone()),
        kv("Total Scans", total.to_string()),
    ]));

    let mut counts = models::ClassTally::new();
    for view in results.iter().flat_map(|r| r.views.iter()) {
        *counts.entry(view.prediction.class).or_insert(0) += 1;
    }
    doc.push(Block::Heading("SUMMARY OF FINDINGS".to_string()));
    doc.push(Block::Table {
        header: vec!["Predicted Type".to_string(), "Scans".to_string()],
        rows: counts
            .iter()
            .map(|(class, count)| vec![class.as_str().to_uppercase(), count.to_string()])
            .collect(),
    });

    doc.push(Block::Heading("DETAILED SCAN RESULTS".to_string()));
    let mut index = 0;
    for result in results {
        for view in &result.views {
            view_blocks(&mut doc, index, view);
            index += 1;
        }
        for failure in &result.failures {
            doc.push(Block::Warning(format!(
                "Scan {} failed: {}",
                failure.source.display(),
                failure.error
            )));
        }
    }

    doc.push(Block::Heading("MEDICAL DISCLAIMER".to_string()));
    doc.push(Block::Warning(MEDICAL_DISCLAIMER.to_string()));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_consistent_case_layout() {
        let doc = case_document(&fixtures::consistent(), &ReportSettings::default());

        assert_eq!(doc.title, "PATIENT CASE REPORT (MULTI-VIEW ANALYSIS)");
        assert!(doc.contains_text("Both views consistently show a glioma."));
        assert!(doc.contains_text("2/2 views"));
        assert!(!doc.contains_text(SUPPRESSION_SUMMARY));

        let figures: usize = doc
            .blocks
            .iter()
            .map(|b| match b {
                Block::Figures(f) => f.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(figures, 4);
    }

    #[test]
    fn test_conflict_layout_shows_raw_predictions_only() {
        let doc = case_document(&fixtures::conflicting(), &ReportSettings::default());

        assert!(doc.contains_text("DIAGNOSTIC CONFLICT DETECTED"));
        assert!(doc.contains_text(SUPPRESSION_SUMMARY));
        assert!(doc.contains_text("PITUITARY <"));
        assert!(!doc.contains_text("Primary Impression"));
        assert!(doc.headings().any(|h| h == "EXCLUDED VIEWS"));
    }

    #[test]
    fn test_single_view_title() {
        let mut result = fixtures::consistent();
        result.views.truncate(1);
        let doc = case_document(&result, &ReportSettings::default());
        assert_eq!(doc.title, "BRAIN MRI CLASSIFICATION REPORT");
    }

    #[test]
    fn test_batch_layout() {
        let doc = batch_document(
            &[fixtures::consistent(), fixtures::conflicting()],
            &ReportSettings::default(),
        );
        assert!(doc.contains_text("BATCH_20250102_030405"));
        assert!(doc.contains_text("coronal.gif"));
        assert!(doc.headings().any(|h| h.starts_with("View #4")));
    }
}
