//! Integration tests: multi-signal scoring and diversity re-rank

use chrono::{DateTime, TimeZone, Utc};

use medrecall::config::Config;
use medrecall::scoring::{
    QueryIntent, RetrievalScorer, ScorerConfig, ScoringCandidate, SignalWeights,
};
use medrecall::store::ChunkMetadata;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn candidate(
    id: &str,
    text: &str,
    artifact: &str,
    kind: &str,
    occurred_at: &str,
    similarity: f64,
) -> ScoringCandidate {
    ScoringCandidate {
        chunk_id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata::new(artifact, "patient-42", kind, occurred_at),
        similarity,
    }
}

#[test]
fn test_medication_query_prefers_recent_medication_record() {
    let scorer = RetrievalScorer::default();
    assert_eq!(QueryIntent::detect("current metformin dose"), QueryIntent::Medication);

    let ranked = scorer.rank_candidates_at(
        "current metformin dose",
        vec![
            candidate(
                "note",
                "Discussed diet. Metformin tolerated.",
                "visit-2023",
                "note",
                "2023-06-01",
                0.8,
            ),
            candidate("lab", "Hemoglobin A1c 7.2", "panel-7", "lab_result", "2024-05-25", 0.3),
            candidate(
                "med",
                "Metformin 500mg twice daily, dose increased to 1000mg",
                "rx-19",
                "medication",
                "2024-05-20",
                0.8,
            ),
        ],
        None,
        now(),
    );

    let order: Vec<&str> = ranked.iter().map(|r| r.candidate.chunk_id.as_str()).collect();
    assert_eq!(order, vec!["med", "note", "lab"]);

    let med = &ranked[0];
    assert_eq!(med.signals.type_preference, 1.0);
    assert_eq!(med.signals.semantic, 0.8);
    assert!(med.signals.keyword > ranked[1].signals.keyword);
    assert!((med.signals.recency - (-0.12f64).exp()).abs() < 1e-9);
    assert_eq!(med.diversity_penalty, 0.0);
    assert_eq!(med.score, med.relevance);

    assert_eq!(ranked[1].signals.type_preference, 0.5);
    assert!(ranked[1].signals.recency < 0.03);
}

#[test]
fn test_diversity_spreads_results_across_artifacts() {
    let scorer = RetrievalScorer::new(ScorerConfig {
        weights: SignalWeights {
            semantic: 1.0,
            keyword: 0.0,
            recency: 0.0,
            type_preference: 0.0,
        },
        ..Default::default()
    });

    let candidates = vec![
        candidate("a1", "discharge summary part one", "dc-1", "note", "2024-05-01", 0.90),
        candidate("a2", "discharge summary part two", "dc-1", "note", "2024-05-01", 0.85),
        candidate("b1", "potassium 4.1", "bmp-3", "lab_result", "2024-05-02", 0.80),
        candidate("a3", "discharge summary part three", "dc-1", "note", "2024-05-01", 0.70),
    ];

    let plain = scorer.rank_candidates_at("summary", candidates.clone(), Some(3), now());
    let plain_order: Vec<&str> = plain.iter().map(|r| r.candidate.chunk_id.as_str()).collect();
    assert_eq!(plain_order, vec!["a1", "a2", "b1"]);

    let diverse = scorer.diversity_rank_at("summary", candidates, Some(3), now());
    let diverse_order: Vec<&str> = diverse.iter().map(|r| r.candidate.chunk_id.as_str()).collect();
    assert_eq!(diverse_order, vec!["a1", "b1", "a2"]);

    // a2 is penalised for one prior note and one prior chunk of dc-1
    assert!((diverse[2].diversity_penalty - 0.3 * 1.5).abs() < 1e-9);
    for result in &diverse {
        assert!((result.score - (result.relevance - result.diversity_penalty)).abs() < 1e-12);
    }
}

#[test]
fn test_unnormalised_weights_still_score() {
    let scorer = RetrievalScorer::new(ScorerConfig {
        weights: SignalWeights {
            semantic: 1.0,
            keyword: 1.0,
            recency: 1.0,
            type_preference: 1.0,
        },
        ..Default::default()
    });

    let ranked = scorer.rank_candidates_at(
        "insulin",
        vec![candidate(
            "c1",
            "insulin glargine 20 units nightly",
            "rx-1",
            "medication",
            "not a date",
            0.5,
        )],
        None,
        now(),
    );

    let scored = &ranked[0];
    let signals = scored.signals;
    assert_eq!(signals.recency, 1.0);
    assert!(
        (scored.relevance
            - (signals.semantic + signals.keyword + signals.recency + signals.type_preference))
            .abs()
            < 1e-12
    );
}

#[test]
fn test_type_preferences_from_config_file() {
    let config = Config::from_toml(
        r#"
[_meta]
schema_version = "1.0.0"

[scorer]
diversity_weight = 0.5

[scorer.type_preferences.lab_result]
default = 0.2

[scorer.type_preferences.lab_result.types]
pathology = 0.95
"#,
    )
    .unwrap();

    let scorer = RetrievalScorer::new(config.scorer);
    assert_eq!(scorer.config().diversity_weight, 0.5);
    assert_eq!(scorer.type_preference(QueryIntent::LabResult, "Pathology"), 0.95);
    assert_eq!(scorer.type_preference(QueryIntent::LabResult, "billing"), 0.2);
    assert_eq!(scorer.type_preference(QueryIntent::LabResult, "lab_result"), 1.0);
}
