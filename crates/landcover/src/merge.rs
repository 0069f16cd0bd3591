use crate::classify::FeatureSet;
use crate::error::PipelineError;

/// Concatenate per-file classified sets into one collection, preserving
/// (file order, record order) — the contract the rasterizer's painter's
/// algorithm depends on. The merged spatial reference is that of the first
/// non-empty input; any later non-empty input declaring a different one is
/// a fatal mismatch. Inputs that declare no reference pass through.
pub fn merge(sets: Vec<FeatureSet>) -> Result<FeatureSet, PipelineError> {
    let mut merged = FeatureSet::default();

    for set in sets {
        if set.features.is_empty() {
            continue;
        }

        if let (Some(expected), Some(found)) = (merged.srs.as_deref(), set.srs.as_deref()) {
            if expected != found {
                return Err(PipelineError::CrsMismatch {
                    expected: expected.to_owned(),
                    found: found.to_owned(),
                });
            }
        }

        if merged.srs.is_none() {
            merged.srs = set.srs.clone();
        }

        merged.features.extend(set.features);
    }

    Ok(merged)
}
