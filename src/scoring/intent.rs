//! Query intent classification

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What kind of record a query is after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Medication,
    LabResult,
    Diagnosis,
    Procedure,
    Imaging,
    Allergy,
    General,
}

/// Keyword patterns per intent. Order is the tie-break priority: when two
/// intents match the same number of keywords the earlier one wins.
const INTENT_PATTERNS: &[(QueryIntent, &str)] = &[
    (
        QueryIntent::Allergy,
        r"(?i)\b(allerg\w*|anaphyla\w*|hives|intoleran\w*|adverse reactions?)\b",
    ),
    (
        QueryIntent::Medication,
        r"(?i)\b(medications?|medicines?|meds|drugs?|prescri\w*|doses?|dosage|dosing|mg|tablets?|pills?|pharmac\w*|refills?|insulin|metformin|statins?|antibiotics?)\b",
    ),
    (
        QueryIntent::LabResult,
        r"(?i)\b(labs?|tests?|results?|levels?|a1c|hba1c|glucose|cholesterol|ldl|hdl|creatinine|hemoglobin|cbc|panel|blood work|urinalysis)\b",
    ),
    (
        QueryIntent::Imaging,
        r"(?i)\b(x-?rays?|mri|ct|scans?|ultrasound|imaging|radiolog\w*|mammogra\w*|echocardiogra\w*)\b",
    ),
    (
        QueryIntent::Procedure,
        r"(?i)\b(procedures?|surger(y|ies)|operations?|biops(y|ies)|colonoscop\w*|endoscop\w*|surgical|implant\w*)\b",
    ),
    (
        QueryIntent::Diagnosis,
        r"(?i)\b(diagnos\w*|conditions?|diseases?|disorders?|problems?|history of|chronic|diabetes|hypertension|asthma|copd|cancer)\b",
    ),
];

fn patterns() -> &'static [(QueryIntent, Regex)] {
    static PATTERNS: OnceLock<Vec<(QueryIntent, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .filter_map(|(intent, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((*intent, regex)),
                Err(e) => {
                    tracing::warn!(?intent, "Skipping invalid intent pattern: {}", e);
                    None
                }
            })
            .collect()
    })
}

impl QueryIntent {
    pub const ALL: [QueryIntent; 7] = [
        QueryIntent::Medication,
        QueryIntent::LabResult,
        QueryIntent::Diagnosis,
        QueryIntent::Procedure,
        QueryIntent::Imaging,
        QueryIntent::Allergy,
        QueryIntent::General,
    ];

    /// Classify a query by counting keyword hits per intent
    pub fn detect(query: &str) -> Self {
        let mut best = (QueryIntent::General, 0usize);
        for (intent, regex) in patterns() {
            let hits = regex.find_iter(query).count();
            if hits > best.1 {
                best = (*intent, hits);
            }
        }
        best.0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Medication => "medication",
            QueryIntent::LabResult => "lab_result",
            QueryIntent::Diagnosis => "diagnosis",
            QueryIntent::Procedure => "procedure",
            QueryIntent::Imaging => "imaging",
            QueryIntent::Allergy => "allergy",
            QueryIntent::General => "general",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
