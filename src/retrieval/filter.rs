//! Metadata pre-filter
//!
//! Turns caller filters into a candidate id set before any scoring. The
//! predicate itself runs in the metadata store; this layer owns the
//! contract around it.

use std::collections::HashSet;

use super::{SearchError, SearchFilters};
use crate::store::{FilterCriteria, MetadataStore};

#[derive(Debug, Clone, Copy)]
pub struct MetadataFilter {
    require_patient_id: bool,
}

impl Default for MetadataFilter {
    fn default() -> Self {
        Self {
            require_patient_id: true,
        }
    }
}

impl MetadataFilter {
    pub fn new(require_patient_id: bool) -> Self {
        Self { require_patient_id }
    }

    /// Check the filters and build store criteria.
    ///
    /// A missing or blank patient id is rejected when scoping is required;
    /// an inverted date range is always rejected.
    pub fn criteria(&self, filters: &SearchFilters) -> Result<FilterCriteria, SearchError> {
        let patient_id = filters
            .patient_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if self.require_patient_id && patient_id.is_none() {
            return Err(SearchError::MissingPatientScope);
        }

        if let (Some(from), Some(to)) = (filters.date_from, filters.date_to) {
            if from > to {
                return Err(SearchError::InvalidRequest(format!(
                    "date_from {} is after date_to {}",
                    from.to_rfc3339(),
                    to.to_rfc3339()
                )));
            }
        }

        Ok(FilterCriteria {
            patient_id: patient_id.map(str::to_string),
            date_from: filters.date_from,
            date_to: filters.date_to,
            artifact_types: filters.artifact_types.clone().unwrap_or_default(),
        })
    }

    /// Resolve `filters` to the set of chunk ids that may be scored
    pub async fn apply(
        &self,
        store: &dyn MetadataStore,
        filters: &SearchFilters,
    ) -> Result<HashSet<String>, SearchError> {
        let criteria = self.criteria(filters)?;
        let ids = store
            .filter_chunks(&criteria)
            .await
            .map_err(SearchError::MetadataStore)?;

        tracing::debug!(candidates = ids.len(), "Metadata pre-filter applied");
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkMetadata, ChunkRecord, InMemoryMetadataStore};
    use chrono::{TimeZone, Utc};

    async fn seeded_store() -> InMemoryMetadataStore {
        let store = InMemoryMetadataStore::new();
        let records = [
            ("c1", "p1", "lab_result", "2024-01-05"),
            ("c2", "p1", "medication", "2024-03-01"),
            ("c3", "p2", "lab_result", "2024-01-05"),
        ]
        .into_iter()
        .map(|(id, patient, kind, at)| ChunkRecord {
            chunk_id: id.to_string(),
            text: String::new(),
            metadata: ChunkMetadata::new("art", patient, kind, at),
        })
        .collect::<Vec<_>>();
        store.insert_chunks(&records).await.unwrap();
        store
    }

    #[test]
    fn test_missing_patient_rejected_when_required() {
        let filter = MetadataFilter::new(true);
        let err = filter.criteria(&SearchFilters::default()).unwrap_err();
        assert!(matches!(err, SearchError::MissingPatientScope));

        let blank = SearchFilters::for_patient("   ");
        assert!(matches!(
            filter.criteria(&blank),
            Err(SearchError::MissingPatientScope)
        ));
    }

    #[test]
    fn test_patient_optional_when_not_required() {
        let filter = MetadataFilter::new(false);
        let criteria = filter
            .criteria(&SearchFilters::default().with_types(["note"]))
            .unwrap();
        assert_eq!(criteria.patient_id, None);
        assert_eq!(criteria.artifact_types, vec!["note"]);
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let filter = MetadataFilter::default();
        let from = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filters = SearchFilters::for_patient("p1").between(from, to);
        assert!(matches!(
            filter.criteria(&filters),
            Err(SearchError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_composes_constraints() {
        let store = seeded_store().await;
        let filter = MetadataFilter::default();

        let ids = filter
            .apply(&store, &SearchFilters::for_patient("p1").with_types(["lab_result"]))
            .await
            .unwrap();
        assert_eq!(ids, HashSet::from(["c1".to_string()]));

        let from = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let ids = filter
            .apply(&store, &SearchFilters::for_patient("p1").since(from))
            .await
            .unwrap();
        assert_eq!(ids, HashSet::from(["c2".to_string()]));

        let ids = filter
            .apply(&store, &SearchFilters::for_patient("nobody"))
            .await
            .unwrap();
        assert!(ids.is_empty());
    }
}
