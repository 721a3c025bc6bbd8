//! Intent × artifact-type preference table

use ahash::{HashMap, HashMapExt};
use std::collections::HashMap as StdHashMap;

use super::intent::QueryIntent;
use crate::config::TypePreferenceOverride;

#[derive(Debug, Clone)]
struct PreferenceRow {
    default: f64,
    types: HashMap<String, f64>,
}

impl PreferenceRow {
    fn new(default: f64, types: &[(&str, f64)]) -> Self {
        Self {
            default,
            types: types
                .iter()
                .map(|(name, score)| (name.to_string(), *score))
                .collect(),
        }
    }
}

/// Preference in [0, 1] for an artifact type given the query intent.
/// Artifact types are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct TypePreferenceTable {
    rows: HashMap<QueryIntent, PreferenceRow>,
}

impl Default for TypePreferenceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TypePreferenceTable {
    pub fn builtin() -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            QueryIntent::Medication,
            PreferenceRow::new(
                0.3,
                &[
                    ("medication", 1.0),
                    ("prescription", 1.0),
                    ("allergy", 0.6),
                    ("note", 0.5),
                    ("encounter", 0.4),
                ],
            ),
        );
        rows.insert(
            QueryIntent::LabResult,
            PreferenceRow::new(
                0.3,
                &[
                    ("lab_result", 1.0),
                    ("observation", 0.9),
                    ("vital_sign", 0.7),
                    ("note", 0.5),
                ],
            ),
        );
        rows.insert(
            QueryIntent::Diagnosis,
            PreferenceRow::new(
                0.3,
                &[
                    ("diagnosis", 1.0),
                    ("condition", 1.0),
                    ("problem", 0.9),
                    ("note", 0.7),
                    ("encounter", 0.6),
                ],
            ),
        );
        rows.insert(
            QueryIntent::Procedure,
            PreferenceRow::new(
                0.3,
                &[
                    ("procedure", 1.0),
                    ("surgery", 1.0),
                    ("note", 0.6),
                    ("encounter", 0.5),
                    ("imaging", 0.4),
                ],
            ),
        );
        rows.insert(
            QueryIntent::Imaging,
            PreferenceRow::new(
                0.3,
                &[
                    ("imaging", 1.0),
                    ("radiology", 1.0),
                    ("procedure", 0.5),
                    ("note", 0.5),
                ],
            ),
        );
        rows.insert(
            QueryIntent::Allergy,
            PreferenceRow::new(0.2, &[("allergy", 1.0), ("medication", 0.6), ("note", 0.4)]),
        );
        rows.insert(
            QueryIntent::General,
            PreferenceRow::new(
                0.5,
                &[("note", 0.7), ("encounter", 0.7), ("diagnosis", 0.6)],
            ),
        );

        Self { rows }
    }

    /// Built-in table with configured rows merged on top.
    ///
    /// Unknown intent names are skipped with a warning; values are clamped
    /// to [0, 1].
    pub fn with_overrides(overrides: &StdHashMap<String, TypePreferenceOverride>) -> Self {
        let mut table = Self::builtin();

        for (name, row_override) in overrides {
            let Some(intent) = QueryIntent::from_name(name) else {
                tracing::warn!(intent = %name, "Ignoring type preferences for unknown intent");
                continue;
            };

            let row = table
                .rows
                .entry(intent)
                .or_insert_with(|| PreferenceRow::new(0.0, &[]));
            if let Some(default) = row_override.default {
                row.default = default.clamp(0.0, 1.0);
            }
            for (artifact_type, score) in &row_override.types {
                row.types
                    .insert(artifact_type.to_lowercase(), score.clamp(0.0, 1.0));
            }
        }

        table
    }

    pub fn preference(&self, intent: QueryIntent, artifact_type: &str) -> f64 {
        let Some(row) = self.rows.get(&intent) else {
            return 0.0;
        };
        row.types
            .get(artifact_type.to_lowercase().as_str())
            .copied()
            .unwrap_or(row.default)
    }
}
