use models::{tally, ConflictReason, Consistency, ConsistencyPolicy, ViewResult};

/// Decides whether the views of one patient agree well enough for an
/// automated interpretation.
pub fn assess(views: &[ViewResult], policy: &ConsistencyPolicy) -> Consistency {
    let Some(first) = views.first() else {
        return Consistency::NoViews;
    };

    let counts = tally(views);
    if counts.len() > 1 {
        return Consistency::Conflict {
            reason: ConflictReason::ClassDisagreement,
            tally: counts,
        };
    }

    // A single view has no spread to measure.
    if let Some(limit) = policy.spread_limit().filter(|_| views.len() > 1) {
        let (min, max) = views.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            (lo.min(v.prediction.confidence), hi.max(v.prediction.confidence))
        });
        let spread = max - min;
        if spread > limit {
            return Consistency::Conflict {
                reason: ConflictReason::ConfidenceSpread { spread, limit },
                tally: counts,
            };
        }
    }

    Consistency::Consistent {
        class: first.prediction.class,
    }
}
