use geo_types::MultiPolygon;
use log::warn;
use serde_json::{Map, Value};

use crate::vector::RawLayer;

/// BDOT10k source codes to process, in configured order. The order is the
/// tie-break for filename matching and, through discovery, the raster paint
/// order.
pub const SOURCE_CODES: [&str; 11] = [
    "OT_PTTR_A",
    "OT_PTRK_A",
    "OT_PTPL_A",
    "OT_PTNZ_A",
    "OT_PTLZ_A",
    "OT_PTKM_A",
    "OT_PTGN_A",
    "OT_PTZB_A",
    "OT_PTWZ_A",
    "OT_PTWP_A",
    "OT_PTUT_A",
];

/// The forest layer; the only code classified by attribute instead of a
/// constant class.
pub const FOREST_CODE: &str = "OT_PTLZ_A";

/// Attribute column holding the forest category.
pub const FOREST_ATTRIBUTE: &str = "KATEGORIA";

// Category value -> (class_id, class_name). Mixed stands count as deciduous.
const FOREST_SPLIT: [(&str, u8, &str); 3] = [
    ("iglasty", 3, "Evergreen Trees"),
    ("liściasty", 4, "Deciduous Trees"),
    ("mieszany", 4, "Deciduous Trees"),
];

/// Classification rule for one source code. Selected once per file;
/// the split variant is the only attribute-conditioned path.
#[derive(Debug, Clone, Copy)]
pub enum LayerRule {
    Constant {
        class_id: u8,
        class_name: &'static str,
    },
    AttributeSplit {
        attribute: &'static str,
        /// (attribute value, class_id, class_name). Values matching none of
        /// the cases mean the record is dropped.
        cases: &'static [(&'static str, u8, &'static str)],
    },
}

/// Static classification table. Class ids become raster pixel values;
/// several codes may share one class.
pub fn rule_for(code: &str) -> Option<LayerRule> {
    let constant = |class_id, class_name| LayerRule::Constant {
        class_id,
        class_name,
    };

    match code {
        // Class 1: paved surfaces
        "OT_PTRK_A" | "OT_PTPL_A" | "OT_PTUT_A" => Some(constant(1, "Paved")),
        // Class 2: built-up areas
        "OT_PTZB_A" => Some(constant(2, "Buildings")),
        // Classes 3/4 assigned per record from the category attribute
        FOREST_CODE => Some(LayerRule::AttributeSplit {
            attribute: FOREST_ATTRIBUTE,
            cases: &FOREST_SPLIT,
        }),
        // Class 5: grassland and green areas
        "OT_PTTR_A" | "OT_PTGN_A" => Some(constant(5, "Grass")),
        // Class 6: barren and stony ground
        "OT_PTNZ_A" | "OT_PTKM_A" => Some(constant(6, "Bare soil")),
        // Class 7: flowing and standing water
        "OT_PTWP_A" | "OT_PTWZ_A" => Some(constant(7, "Water")),
        _ => None,
    }
}

/// One classified feature. Immutable once built; moved into the merger.
#[derive(Debug, Clone)]
pub struct ClassifiedFeature {
    pub geometry: MultiPolygon<f64>,
    pub source_code: String,
    pub class_id: u8,
    pub class_name: &'static str,
    /// Original attributes, preserved into the merged vector output.
    pub properties: Map<String, Value>,
}

/// Ordered classified features sharing one spatial reference. Used both for
/// a single file's output and for the merged collection; sequence order is
/// the raster paint order.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub srs: Option<String>,
    pub features: Vec<ClassifiedFeature>,
}

/// Result of classifying one layer file.
#[derive(Debug)]
pub struct LayerOutcome {
    pub set: FeatureSet,
    /// Records excluded for an unrecognized categorical value.
    pub dropped: usize,
}

/// Apply a rule to a whole layer. Returns `None` when the file must be
/// skipped (split rule with the attribute column absent from the file);
/// that is a recoverable condition, logged here. `label` names the file in
/// warnings.
pub fn apply_rule(rule: &LayerRule, code: &str, layer: RawLayer, label: &str) -> Option<LayerOutcome> {
    let srs = layer.srs;

    match *rule {
        LayerRule::Constant {
            class_id,
            class_name,
        } => {
            let features = layer
                .features
                .into_iter()
                .map(|raw| ClassifiedFeature {
                    geometry: raw.geometry,
                    source_code: code.to_owned(),
                    class_id,
                    class_name,
                    properties: raw.properties,
                })
                .collect();

            Some(LayerOutcome {
                set: FeatureSet { srs, features },
                dropped: 0,
            })
        }

        LayerRule::AttributeSplit { attribute, cases } => {
            // A populated file where no record carries the attribute has the
            // column missing from its schema entirely; skip the whole file.
            let column_present = layer
                .features
                .iter()
                .any(|f| f.properties.contains_key(attribute));

            if !column_present && !layer.features.is_empty() {
                warn!(
                    "skipping {}: required attribute column '{}' is missing",
                    label, attribute
                );
                return None;
            }

            let mut features = Vec::with_capacity(layer.features.len());
            let mut dropped = 0usize;

            for raw in layer.features {
                let case = raw
                    .properties
                    .get(attribute)
                    .and_then(Value::as_str)
                    .and_then(|value| cases.iter().find(|(v, _, _)| *v == value));

                match case {
                    Some(&(_, class_id, class_name)) => features.push(ClassifiedFeature {
                        geometry: raw.geometry,
                        source_code: code.to_owned(),
                        class_id,
                        class_name,
                        properties: raw.properties,
                    }),
                    None => dropped += 1,
                }
            }

            if dropped > 0 {
                warn!(
                    "{}: dropped {} record(s) with unrecognized '{}' value",
                    label, dropped, attribute
                );
            }

            Some(LayerOutcome {
                set: FeatureSet { srs, features },
                dropped,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::RawFeature;
    use geo_types::polygon;

    fn raw_feature(props: &[(&str, &str)]) -> RawFeature {
        let mut properties = Map::new();
        for (k, v) in props {
            properties.insert((*k).to_owned(), Value::String((*v).to_owned()));
        }
        RawFeature {
            geometry: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 2.0, y: 0.0),
                (x: 2.0, y: 2.0),
                (x: 0.0, y: 2.0),
                (x: 0.0, y: 0.0),
            ]]),
            properties,
        }
    }

    fn layer(features: Vec<RawFeature>) -> RawLayer {
        RawLayer {
            srs: Some("EPSG:2180".to_owned()),
            features,
        }
    }

    #[test]
    fn test_every_configured_code_has_a_rule() {
        for code in SOURCE_CODES {
            assert!(rule_for(code).is_some(), "no rule for {code}");
        }
        assert!(rule_for("OT_BUBD_A").is_none());
    }

    #[test]
    fn test_constant_rule_is_uniform() {
        let rule = rule_for("OT_PTZB_A").unwrap();
        let layer = layer(vec![
            raw_feature(&[("X_KOD", "PTZB01")]),
            raw_feature(&[]),
        ]);

        let outcome = apply_rule(&rule, "OT_PTZB_A", layer, "zb.geojson").unwrap();
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.set.features.len(), 2);
        for f in &outcome.set.features {
            assert_eq!(f.class_id, 2);
            assert_eq!(f.class_name, "Buildings");
            assert_eq!(f.source_code, "OT_PTZB_A");
        }
    }

    #[test]
    fn test_forest_split_mapping() {
        let rule = rule_for(FOREST_CODE).unwrap();
        let layer = layer(vec![
            raw_feature(&[(FOREST_ATTRIBUTE, "iglasty")]),
            raw_feature(&[(FOREST_ATTRIBUTE, "liściasty")]),
            raw_feature(&[(FOREST_ATTRIBUTE, "mieszany")]),
        ]);

        let outcome = apply_rule(&rule, FOREST_CODE, layer, "lz.geojson").unwrap();
        let ids: Vec<u8> = outcome.set.features.iter().map(|f| f.class_id).collect();
        assert_eq!(ids, vec![3, 4, 4]);
        assert_eq!(outcome.set.features[0].class_name, "Evergreen Trees");
        assert_eq!(outcome.set.features[2].class_name, "Deciduous Trees");
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn test_forest_drop_accounting() {
        let rule = rule_for(FOREST_CODE).unwrap();
        let layer = layer(vec![
            raw_feature(&[(FOREST_ATTRIBUTE, "iglasty")]),
            raw_feature(&[(FOREST_ATTRIBUTE, "xyz")]),
            raw_feature(&[("INNA", "iglasty")]),
        ]);

        let outcome = apply_rule(&rule, FOREST_CODE, layer, "lz.geojson").unwrap();
        assert_eq!(outcome.set.features.len(), 1);
        assert_eq!(outcome.dropped, 2);
        // Retained forest features are always class 3 or 4, never 0.
        for f in &outcome.set.features {
            assert!(f.class_id == 3 || f.class_id == 4);
        }
    }

    #[test]
    fn test_forest_missing_column_skips_file() {
        let rule = rule_for(FOREST_CODE).unwrap();
        let layer = layer(vec![
            raw_feature(&[("X_KOD", "PTLZ01")]),
            raw_feature(&[("X_KOD", "PTLZ02")]),
        ]);

        assert!(apply_rule(&rule, FOREST_CODE, layer, "lz.geojson").is_none());
    }

    #[test]
    fn test_forest_empty_file_is_not_skipped() {
        let rule = rule_for(FOREST_CODE).unwrap();
        let outcome = apply_rule(&rule, FOREST_CODE, layer(vec![]), "lz.geojson").unwrap();
        assert!(outcome.set.features.is_empty());
        assert_eq!(outcome.dropped, 0);
    }
}
