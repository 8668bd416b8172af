use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use freightdesk_core::{external_id, map_record, FieldMapping, RunCounters, SyncEntityType};
use freightdesk_db::repositories::{NewConflict, RecordRepository, RecordWrite, RepositoryError};

/// What one page's reconciliation produced. A record lands in exactly one of
/// the four buckets; `conflicted` records are stored (local values kept) with
/// their divergences parked as pending conflicts.
#[derive(Debug, Default)]
pub struct PageOutcome {
    pub created: i64,
    pub updated: i64,
    pub conflicted: i64,
    pub failed: i64,
    pub errors: Vec<String>,
}

impl PageOutcome {
    /// Records that landed locally, which is what the progress cursor counts.
    pub fn imported(&self) -> i64 {
        self.created + self.updated + self.conflicted
    }

    pub fn counters(&self) -> RunCounters {
        RunCounters {
            processed: self.created + self.updated + self.conflicted + self.failed,
            success: self.created + self.updated,
            failed: self.failed,
        }
    }
}

/// Reconciles one fetched page against local storage and writes the result
/// in a single transaction.
///
/// Merge rules per mapped field: an empty local value is gap-filled from the
/// external side; a non-empty local value that differs from a non-empty
/// external value is kept and recorded as a pending conflict; equal values
/// are left alone. External records never blank out local data.
pub async fn reconcile_page(
    records: &RecordRepository,
    user_id: &str,
    entity: SyncEntityType,
    mappings: &[FieldMapping],
    raw_records: &[Value],
) -> Result<PageOutcome, RepositoryError> {
    let mut outcome = PageOutcome::default();

    let mut mapped = Vec::with_capacity(raw_records.len());
    for (index, raw) in raw_records.iter().enumerate() {
        match map_record(entity, mappings, raw) {
            Ok(record) => mapped.push(record),
            Err(error) => {
                outcome.failed += 1;
                let label = external_id(raw).unwrap_or_else(|| format!("#{}", index + 1));
                outcome.errors.push(format!("{entity} {label}: {error}"));
            }
        }
    }

    let external_ids: Vec<String> = mapped.iter().map(|r| r.external_id.clone()).collect();
    let existing = records.load_by_external_ids(user_id, entity, &external_ids).await?;

    let mut writes = Vec::with_capacity(mapped.len());
    let mut conflicts = Vec::new();

    for record in mapped {
        let incoming: BTreeMap<String, String> = record
            .fields
            .iter()
            .map(|(field, value)| (field.as_str().to_string(), value.clone()))
            .collect();

        match existing.get(&record.external_id) {
            None => {
                outcome.created += 1;
                writes.push(RecordWrite {
                    external_id: record.external_id,
                    display_name: record.display_name,
                    fields: incoming,
                });
            }
            Some(stored) => {
                let mut merged = stored.fields.clone();
                let mut record_conflicts = 0;

                for (field, external_value) in &record.fields {
                    if external_value.is_empty() {
                        continue;
                    }
                    let key = field.as_str();
                    match merged.get(key).filter(|local| !local.is_empty()) {
                        None => {
                            merged.insert(key.to_string(), external_value.clone());
                        }
                        Some(local) if local == external_value => {}
                        Some(local) => {
                            record_conflicts += 1;
                            conflicts.push(NewConflict {
                                record_type: entity,
                                record_id: stored.id.clone(),
                                field: *field,
                                local_value: local.clone(),
                                external_value: external_value.clone(),
                            });
                        }
                    }
                }

                if record_conflicts > 0 {
                    outcome.conflicted += 1;
                } else {
                    outcome.updated += 1;
                }

                let display_name = merged
                    .get("name")
                    .filter(|name| !name.is_empty())
                    .cloned()
                    .unwrap_or_else(|| stored.display_name.clone());
                writes.push(RecordWrite {
                    external_id: record.external_id,
                    display_name,
                    fields: merged,
                });
            }
        }
    }

    records.apply_page(user_id, entity, &writes, &conflicts).await?;
    debug!(
        user_id,
        entity = %entity,
        created = outcome.created,
        updated = outcome.updated,
        conflicted = outcome.conflicted,
        failed = outcome.failed,
        "reconciled page"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::PageOutcome;

    #[test]
    fn counters_split_success_from_conflicts() {
        let outcome = PageOutcome {
            created: 3,
            updated: 2,
            conflicted: 1,
            failed: 1,
            errors: vec!["contact ext-1: contact record has no external id".to_string()],
        };
        let counters = outcome.counters();
        assert_eq!(counters.processed, 7);
        assert_eq!(counters.success, 5);
        assert_eq!(counters.failed, 1);
        assert_eq!(outcome.imported(), 6);
    }
}
