//! # Models
//!
//! Shared data model for the MRI analysis workspace: tumor classes, per-view
//! predictions, aggregate case results and the settings file layout.
//!
//! Everything here lives for the duration of one analysis request.

pub mod settings;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use settings::{
    ConsistencyPolicy, LlmProvider, LlmSettings, ModelServerSettings, PipelineOptions,
    ReportSettings, Settings,
};

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Unknown tumor class: {0}")]
    UnknownClass(String),

    #[error("Expected {expected} class probabilities, got {actual}")]
    ProbabilityCount { expected: usize, actual: usize },

    #[error("Probability vector contains a non-finite value")]
    NonFiniteProbability,

    #[error("Activation map is {width}x{height} but holds {len} values")]
    ActivationShape { width: u32, height: u32, len: usize },
}

/// The classifier's output classes, in the model's output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TumorClass {
    Glioma,
    Meningioma,
    #[serde(rename = "notumor")]
    NoTumor,
    Pituitary,
}

impl TumorClass {
    pub const ALL: [TumorClass; 4] = [
        TumorClass::Glioma,
        TumorClass::Meningioma,
        TumorClass::NoTumor,
        TumorClass::Pituitary,
    ];

    pub fn index(self) -> usize {
        match self {
            TumorClass::Glioma => 0,
            TumorClass::Meningioma => 1,
            TumorClass::NoTumor => 2,
            TumorClass::Pituitary => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TumorClass::Glioma => "glioma",
            TumorClass::Meningioma => "meningioma",
            TumorClass::NoTumor => "notumor",
            TumorClass::Pituitary => "pituitary",
        }
    }

    /// Short lay description used by the fallback narratives.
    pub fn description(self) -> &'static str {
        match self {
            TumorClass::Glioma => "Gliomas are tumors that originate from glial cells in the brain.",
            TumorClass::Meningioma => {
                "Meningiomas are tumors that arise from the meninges (membranes covering the brain)."
            }
            TumorClass::NoTumor => "No tumor detected - the scan appears normal.",
            TumorClass::Pituitary => {
                "Pituitary tumors develop in the pituitary gland at the base of the skull."
            }
        }
    }
}

impl fmt::Display for TumorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TumorClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "glioma" => Ok(TumorClass::Glioma),
            "meningioma" => Ok(TumorClass::Meningioma),
            "notumor" | "no_tumor" | "no tumor" | "no-tumor" => Ok(TumorClass::NoTumor),
            "pituitary" => Ok(TumorClass::Pituitary),
            _ => Err(ModelError::UnknownClass(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
}

impl ConfidenceLevel {
    pub fn from_percent(confidence: f32) -> Self {
        if confidence >= 80.0 {
            ConfidenceLevel::High
        } else if confidence >= 60.0 {
            ConfidenceLevel::Moderate
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Output of the vision classifier for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: TumorClass,
    /// Probability of `class`, in percent.
    pub confidence: f32,
    /// Probabilities in [0, 1], aligned with `TumorClass::ALL`.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Builds a prediction by argmax over a probability vector.
    /// The first maximum wins on ties.
    pub fn from_probabilities(probabilities: Vec<f32>) -> Result<Self, ModelError> {
        if probabilities.len() != TumorClass::ALL.len() {
            return Err(ModelError::ProbabilityCount {
                expected: TumorClass::ALL.len(),
                actual: probabilities.len(),
            });
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFiniteProbability);
        }

        let mut best = 0;
        for (idx, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = idx;
            }
        }

        let class = TumorClass::from_index(best).ok_or(ModelError::ProbabilityCount {
            expected: TumorClass::ALL.len(),
            actual: probabilities.len(),
        })?;

        Ok(Self {
            class,
            confidence: probabilities[best] * 100.0,
            probabilities,
        })
    }

    pub fn probability(&self, class: TumorClass) -> f32 {
        self.probabilities.get(class.index()).copied().unwrap_or(0.0)
    }

    /// Classes ordered by descending probability (stable for equal values).
    pub fn ranked(&self) -> Vec<(TumorClass, f32)> {
        let mut ranked: Vec<(TumorClass, f32)> = TumorClass::ALL
            .iter()
            .map(|c| (*c, self.probability(*c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn runner_up(&self) -> Option<(TumorClass, f32)> {
        self.ranked().into_iter().find(|(c, _)| *c != self.class)
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_percent(self.confidence)
    }
}

/// One (view label, image) pair of an analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewInput {
    pub label: String,
    pub path: PathBuf,
}

impl ViewInput {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// All views of a single patient encounter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub patient_id: Option<String>,
    pub views: Vec<ViewInput>,
}

/// Grayscale class-activation map, row-major, values nominally in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ActivationMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self, ModelError> {
        if width == 0 || height == 0 || values.len() != (width as usize) * (height as usize) {
            return Err(ModelError::ActivationShape {
                width,
                height,
                len: values.len(),
            });
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Coordinates of the strongest activation.
    pub fn peak(&self) -> (u32, u32) {
        let mut best = 0;
        for (idx, v) in self.values.iter().enumerate() {
            if *v > self.values[best] {
                best = idx;
            }
        }
        ((best as u32) % self.width, (best as u32) / self.width)
    }
}

#[derive(Debug, Clone)]
pub struct Heatmap {
    pub activation: ActivationMap,
    pub overlay: RgbImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeSource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Narrative {
    pub text: String,
    pub source: NarrativeSource,
}

impl Narrative {
    pub fn remote(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: NarrativeSource::Remote,
        }
    }

    pub fn fallback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: NarrativeSource::Fallback,
        }
    }
}

/// A view that made it through classification.
#[derive(Debug, Clone, Serialize)]
pub struct ViewResult {
    pub label: String,
    pub source: PathBuf,
    pub prediction: Prediction,
    #[serde(skip)]
    pub image: RgbImage,
    #[serde(skip)]
    pub heatmap: Option<Heatmap>,
    pub heatmap_error: Option<String>,
    pub narrative: Option<Narrative>,
}

/// A view excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewFailure {
    pub label: String,
    pub source: PathBuf,
    pub error: String,
}

pub type ClassTally = BTreeMap<TumorClass, usize>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    ClassDisagreement,
    ConfidenceSpread { spread: f32, limit: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Consistency {
    NoViews,
    Consistent {
        class: TumorClass,
    },
    Conflict {
        reason: ConflictReason,
        tally: ClassTally,
    },
}

impl Consistency {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Consistency::Conflict { .. })
    }
}

/// Case-level interpretation. A suppressed case carries no narrative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "narrative", rename_all = "snake_case")]
pub enum Interpretation {
    Synthesized(Narrative),
    Suppressed,
    Unavailable,
}

/// Dominant diagnosis across views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dominant {
    pub class: TumorClass,
    pub count: usize,
    pub total: usize,
    pub average_confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub case_id: String,
    pub patient_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub views: Vec<ViewResult>,
    pub failures: Vec<ViewFailure>,
    pub consistency: Consistency,
    pub interpretation: Interpretation,
}

impl AggregateResult {
    pub fn is_suppressed(&self) -> bool {
        matches!(self.interpretation, Interpretation::Suppressed)
    }

    pub fn synthesized_narrative(&self) -> Option<&Narrative> {
        match &self.interpretation {
            Interpretation::Synthesized(narrative) => Some(narrative),
            _ => None,
        }
    }

    pub fn tally(&self) -> ClassTally {
        tally(&self.views)
    }

    /// Most frequent class; ties go to the class seen first in view order.
    pub fn dominant(&self) -> Option<Dominant> {
        let counts = self.tally();
        let mut best: Option<(TumorClass, usize)> = None;
        for view in &self.views {
            let class = view.prediction.class;
            let count = counts.get(&class).copied().unwrap_or(0);
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((class, count)),
            }
        }

        let (class, count) = best?;
        let confidences: Vec<f32> = self
            .views
            .iter()
            .filter(|v| v.prediction.class == class)
            .map(|v| v.prediction.confidence)
            .collect();
        let average_confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;

        Some(Dominant {
            class,
            count,
            total: self.views.len(),
            average_confidence,
        })
    }
}

/// Counts predicted classes across views.
pub fn tally(views: &[ViewResult]) -> ClassTally {
    let mut counts = ClassTally::new();
    for view in views {
        *counts.entry(view.prediction.class).or_insert(0) += 1;
    }
    counts
}
