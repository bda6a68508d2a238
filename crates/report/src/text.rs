//! Plain-text reports.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use models::{AggregateResult, ClassTally, Interpretation, Narrative, Prediction, TumorClass, ViewResult};

use crate::{
    conflict_description, patient_label, timestamp, MEDICAL_DISCLAIMER, SUPPRESSION_NOTICE,
    SUPPRESSION_SUMMARY,
};

const RULE: &str = "======================================================================";

fn section(out: &mut String, title: &str) {
    let _ = write!(out, "\n{RULE}\n{title}\n{RULE}\n\n");
}

fn probability_table(out: &mut String, prediction: &Prediction) {
    for class in TumorClass::ALL {
        let p = prediction.probability(class);
        let marker = if class == prediction.class { "→" } else { " " };
        let bar = "█".repeat((p * 50.0) as usize);
        let _ = writeln!(
            out,
            "{marker} {:15}: {:6.2}% {bar}",
            class.as_str().to_uppercase(),
            p * 100.0
        );
    }
}

fn narrative_text(narrative: Option<&Narrative>) -> &str {
    narrative
        .map(|n| n.text.as_str())
        .unwrap_or("No explanation available.")
}

/// Full report for a single view.
pub fn view_report(view: &ViewResult, generated_at: DateTime<Utc>, system_name: &str) -> String {
    let prediction = &view.prediction;
    let mut out = String::new();

    let _ = write!(
        out,
        "{RULE}\n                   BRAIN MRI CLASSIFICATION REPORT\n                      (AI-GENERATED - FOR DEMO ONLY)\n{RULE}\n\n"
    );
    let _ = writeln!(out, "Report Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "System: {system_name}");
    let _ = writeln!(out, "View: {} ({})", view.label, view.source.display());

    section(&mut out, "CLASSIFICATION RESULTS");
    let _ = writeln!(out, "PRIMARY FINDING:      {}", prediction.class.as_str().to_uppercase());
    let _ = writeln!(out, "CONFIDENCE SCORE:     {:.2}%", prediction.confidence);

    section(&mut out, "PROBABILITY DISTRIBUTION");
    probability_table(&mut out, prediction);

    section(&mut out, "INTERPRETATION");
    let _ = writeln!(out, "{}", narrative_text(view.narrative.as_ref()));

    section(&mut out, "TECHNICAL DETAILS");
    let _ = writeln!(out, "Model Architecture:   ResNet-18");
    let _ = writeln!(out, "Preprocessing:        Resize to 224x224, ImageNet normalization");
    let classes: Vec<&str> = TumorClass::ALL.iter().map(|c| c.as_str()).collect();
    let _ = writeln!(out, "Classes:              {}", classes.join(", "));
    match (&view.heatmap, &view.heatmap_error) {
        (Some(_), _) => {
            let _ = writeln!(out, "Grad-CAM:             generated");
        }
        (None, Some(error)) => {
            let _ = writeln!(out, "Grad-CAM:             failed ({error})");
        }
        (None, None) => {
            let _ = writeln!(out, "Grad-CAM:             not requested");
        }
    }

    let _ = write!(out, "\n{RULE}\n\nEND OF REPORT\n");
    out
}

/// Multi-view case report for one patient encounter.
pub fn case_report(result: &AggregateResult, system_name: &str) -> String {
    let mut out = String::new();
    let tally = result.tally();

    let _ = writeln!(out, "PATIENT CASE REPORT (MULTI-VIEW ANALYSIS)");
    let _ = writeln!(out, "-----------------------------------------");
    let _ = writeln!(out, "Date: {}", timestamp(result));
    let _ = writeln!(out, "Patient ID: {}", patient_label(result));
    let _ = writeln!(out, "Case ID: {}", result.case_id);
    let _ = writeln!(out, "System: {system_name}");

    let _ = write!(out, "\nCLINICAL SUMMARY\n----------------\n");
    let _ = writeln!(out, "Patient underwent multi-view MRI analysis for tumor classification.");
    let _ = writeln!(out, "Total Views Analyzed: {}", result.views.len());
    if !result.failures.is_empty() {
        let _ = writeln!(out, "Views Excluded: {}", result.failures.len());
    }

    if let Some(reason) = conflict_description(result) {
        let _ = write!(
            out,
            "\n!! DIAGNOSTIC CONFLICT DETECTED !!\n-----------------------------------\n{reason}\nThis indicates potential inconsistency in the analysis.\n\nRECOMMENDATION: Manual review by a radiologist is STRONGLY recommended.\n\nDistribution of predictions:\n"
        );
        for (class, count) in &tally {
            let _ = writeln!(out, "- {}: {}", class.as_str().to_uppercase(), count);
        }
    } else if let Some(dominant) = result.dominant() {
        let _ = write!(out, "\nPRIMARY DIAGNOSTIC IMPRESSION\n------------------------------\n");
        let _ = writeln!(out, "--> {}", dominant.class.as_str().to_uppercase());
        let _ = writeln!(out, "    Average Confidence: {:.1}%", dominant.average_confidence);
        let _ = writeln!(out, "    Consensus: {}/{} views", dominant.count, dominant.total);
    } else {
        let _ = write!(out, "\nNo view could be classified.\n");
    }

    let _ = write!(out, "\nDETAILED VIEW-BY-VIEW FINDINGS\n===============================\n");
    for (idx, view) in result.views.iter().enumerate() {
        let prediction = &view.prediction;
        let probabilities: Vec<String> = TumorClass::ALL
            .iter()
            .map(|c| format!("{}: {:.1}%", c, prediction.probability(*c) * 100.0))
            .collect();
        let _ = write!(
            out,
            "\nView #{}: {} ({})\n  Prediction: {}\n  Confidence: {:.1}%\n  Probabilities: {}\n",
            idx + 1,
            view.label,
            view.source.display(),
            prediction.class.as_str().to_uppercase(),
            prediction.confidence,
            probabilities.join(", ")
        );
        if let Some(error) = &view.heatmap_error {
            let _ = writeln!(out, "  Heatmap: unavailable ({error})");
        }
        if let Some(narrative) = &view.narrative {
            let _ = writeln!(out, "  Explanation:");
            for line in narrative.text.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
    }

    let _ = write!(out, "\nCASE INTERPRETATION\n-------------------\n");
    match &result.interpretation {
        Interpretation::Synthesized(narrative) => {
            let _ = writeln!(out, "{}", narrative.text);
        }
        Interpretation::Suppressed => {
            let _ = writeln!(out, "{SUPPRESSION_SUMMARY}");
            let _ = writeln!(out, "{SUPPRESSION_NOTICE}");
        }
        Interpretation::Unavailable => {
            let _ = writeln!(out, "Automated interpretation was not generated for this case.");
        }
    }

    if !result.failures.is_empty() {
        let _ = write!(out, "\nEXCLUDED VIEWS\n--------------\n");
        for failure in &result.failures {
            let _ = writeln!(
                out,
                "- {} ({}): {}",
                failure.label,
                failure.source.display(),
                failure.error
            );
        }
    }

    let _ = write!(out, "\nMEDICAL DISCLAIMER\n------------------\n{MEDICAL_DISCLAIMER}\n");
    out
}

/// Short result with the two most likely classes.
pub fn quick_summary(prediction: &Prediction) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Quick Summary");
    let _ = writeln!(out, "- Result: {}", prediction.class.as_str().to_uppercase());
    let _ = writeln!(out, "- Confidence: {:.1}%", prediction.confidence);
    let _ = writeln!(out, "- Top 2 Predictions:");
    for (rank, (class, p)) in prediction.ranked().into_iter().take(2).enumerate() {
        let _ = writeln!(out, "  {}. {} ({:.1}%)", rank + 1, class, p * 100.0);
    }
    out
}

/// Summary over independent scans, each analysed as its own case.
pub fn batch_report(results: &[AggregateResult], system_name: &str) -> String {
    let mut out = String::new();
    let batch_time = results.iter().map(|r| r.generated_at).min();

    let _ = writeln!(out, "BATCH ANALYSIS SUMMARY REPORT");
    let _ = writeln!(out, "-----------------------------");
    if let Some(at) = batch_time {
        let _ = writeln!(out, "Date: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Batch ID: BATCH_{}", at.format("%Y%m%d_%H%M%S"));
    }

    let views: Vec<(&AggregateResult, &ViewResult)> = results
        .iter()
        .flat_map(|r| r.views.iter().map(move |v| (r, v)))
        .collect();
    let failures: usize = results.iter().map(|r| r.failures.len()).sum();
    let mut tally = ClassTally::new();
    for (_, view) in &views {
        *tally.entry(view.prediction.class).or_insert(0) += 1;
    }

    let _ = write!(out, "\nOVERVIEW\n--------\n");
    let _ = writeln!(out, "Total Scans Processed: {}", views.len());
    if failures > 0 {
        let _ = writeln!(out, "Scans Failed: {failures}");
    }
    let _ = write!(out, "\nDistribution of Findings:\n");
    for (class, count) in &tally {
        let _ = writeln!(out, "- {}: {}", class.as_str().to_uppercase(), count);
    }

    let _ = write!(out, "\nINDIVIDUAL SCAN RESULTS\n=======================");
    for (idx, (result, view)) in views.iter().enumerate() {
        let _ = write!(out, "\n\nScan #{} : {}\n{}\n", idx + 1, view.source.display(), "-".repeat(40));
        out.push_str(&view_report(view, result.generated_at, system_name));
        let _ = write!(out, "\n{}", "=".repeat(40));
    }

    for result in results {
        for failure in &result.failures {
            let _ = write!(
                out,
                "\n\nFailed scan: {} ({})",
                failure.source.display(),
                failure.error
            );
        }
    }
    out.push('\n');
    out
}
