use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{RecallError, Result, ValidationError};
use crate::scoring::QueryIntent;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_scorer(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RecallError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency limit must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        for (key, value) in [
            ("indexing.vector_dim", indexing.vector_dim),
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
            ("indexing.max_elements", indexing.max_elements),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(key, "Value must be greater than 0"));
            }
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if search.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "search.candidate_multiplier",
                "Candidate multiplier must be at least 1",
            ));
        }

        if search.default_snippet_length == 0 {
            errors.push(ValidationError::new(
                "search.default_snippet_length",
                "Snippet length must be greater than 0",
            ));
        }

        if !(search.half_life_days.is_finite() && search.half_life_days > 0.0) {
            errors.push(ValidationError::new(
                "search.half_life_days",
                format!(
                    "Half-life must be a positive number of days, got {}",
                    search.half_life_days
                ),
            ));
        }
    }

    fn validate_scorer(config: &Config, errors: &mut Vec<ValidationError>) {
        let scorer = &config.scorer;

        for (name, weight) in scorer.weights.values() {
            if !(weight.is_finite() && weight >= 0.0) {
                errors.push(ValidationError::new(
                    format!("scorer.weights.{}", name),
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }

        if !(scorer.assumed_avg_doc_length.is_finite() && scorer.assumed_avg_doc_length > 0.0) {
            errors.push(ValidationError::new(
                "scorer.assumed_avg_doc_length",
                "Assumed average document length must be greater than 0",
            ));
        }

        if !(scorer.recency_decay_rate.is_finite() && scorer.recency_decay_rate >= 0.0) {
            errors.push(ValidationError::new(
                "scorer.recency_decay_rate",
                "Recency decay rate must be a non-negative number",
            ));
        }

        if !(scorer.diversity_weight.is_finite() && scorer.diversity_weight >= 0.0) {
            errors.push(ValidationError::new(
                "scorer.diversity_weight",
                "Diversity weight must be a non-negative number",
            ));
        }

        for (intent, overrides) in &scorer.type_preferences {
            if QueryIntent::from_name(intent).is_none() {
                errors.push(ValidationError::new(
                    format!("scorer.type_preferences.{}", intent),
                    format!("Unknown query intent '{}'", intent),
                ));
            }

            let values = overrides
                .default
                .iter()
                .map(|v| ("default".to_string(), *v))
                .chain(overrides.types.iter().map(|(k, v)| (format!("types.{}", k), *v)));
            for (key, value) in values {
                if !(0.0..=1.0).contains(&value) {
                    errors.push(ValidationError::new(
                        format!("scorer.type_preferences.{}.{}", intent, key),
                        format!("Preference must be within [0, 1], got {}", value),
                    ));
                }
            }
        }
    }

    fn validate_logging(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::new(
                "logging.level",
                format!("Invalid log filter '{}': {}", config.logging.level, e),
            ));
        }
    }
}
