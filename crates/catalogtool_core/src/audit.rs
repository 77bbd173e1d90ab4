use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{ChannelId, ItemId, RecordId};
use crate::repository::TranslationFilter;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogStats {
    pub channels: usize,
    pub primary_channels: usize,
    pub items: usize,
    pub translations: usize,
    pub by_status: BTreeMap<String, usize>,
    pub legacy_unassigned: usize,
    pub orphaned: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DuplicateTriple {
    pub item_id: ItemId,
    pub channel_id: ChannelId,
    pub language: String,
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusViolation {
    pub record_id: RecordId,
    pub item_id: ItemId,
    pub channel_id: ChannelId,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct AuditReport {
    pub duplicate_triples: Vec<DuplicateTriple>,
    pub unsynced_primary_reference: Vec<StatusViolation>,
    pub synced_non_primary: Vec<StatusViolation>,
    pub legacy_unassigned: usize,
}

impl AuditReport {
    pub fn violation_count(&self) -> usize {
        self.duplicate_triples.len()
            + self.unsynced_primary_reference.len()
            + self.synced_non_primary.len()
    }

    pub fn is_clean(&self) -> bool {
        self.violation_count() == 0
    }
}

pub fn load_catalog_stats(connection: &Connection) -> Result<CatalogStats> {
    let channels = count_query(connection, "SELECT COUNT(*) FROM channels")?;
    let primary_channels =
        count_query(connection, "SELECT COUNT(*) FROM channels WHERE is_primary != 0")?;
    let items = count_query(connection, "SELECT COUNT(*) FROM catalog_items")?;
    let translations = count_query(connection, "SELECT COUNT(*) FROM translations")?;
    let legacy_unassigned = count_query(
        connection,
        "SELECT COUNT(*) FROM translations WHERE channel_id IS NULL",
    )?;
    let orphaned = count_query(
        connection,
        "SELECT COUNT(*) FROM translations t
         LEFT JOIN catalog_items i ON i.id = t.item_id
         WHERE i.id IS NULL",
    )?;

    let mut statement = connection
        .prepare(
            "SELECT status, COUNT(*) FROM translations
             GROUP BY status
             ORDER BY status ASC",
        )
        .context("failed to prepare status aggregation query")?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .context("failed to run status aggregation query")?;
    let mut by_status = BTreeMap::new();
    for row in rows {
        let (status, count) = row.context("failed to decode status aggregation row")?;
        by_status.insert(
            status,
            usize::try_from(count).context("count does not fit into usize")?,
        );
    }

    Ok(CatalogStats {
        channels,
        primary_channels,
        items,
        translations,
        by_status,
        legacy_unassigned,
        orphaned,
    })
}

/// Check the ownership invariants over the records matching `filter`.
///
/// Status checks only cover records whose item and owning channel resolve,
/// the same records a reconciliation run is able to repair.
pub fn audit_invariants(connection: &Connection, filter: &TranslationFilter) -> Result<AuditReport> {
    let (clause, values) = filter_clause(filter);

    let mut statement = connection
        .prepare(&format!(
            "SELECT t.item_id, t.channel_id, t.language, GROUP_CONCAT(t.id)
             FROM translations t
             WHERE t.channel_id IS NOT NULL{clause}
             GROUP BY t.item_id, t.channel_id, t.language
             HAVING COUNT(*) > 1
             ORDER BY t.item_id, t.channel_id, t.language"
        ))
        .context("failed to prepare duplicate triple query")?;
    let rows = statement
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, ItemId>(0)?,
                row.get::<_, ChannelId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("failed to run duplicate triple query")?;
    let mut duplicate_triples = Vec::new();
    for row in rows {
        let (item_id, channel_id, language, ids) =
            row.context("failed to decode duplicate triple row")?;
        let mut record_ids = ids
            .split(',')
            .map(|id| id.trim().parse::<RecordId>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("unexpected id list `{ids}`"))?;
        record_ids.sort_unstable();
        duplicate_triples.push(DuplicateTriple {
            item_id,
            channel_id,
            language,
            record_ids,
        });
    }

    let unsynced_primary_reference = status_violations(
        connection,
        "c.is_primary != 0 AND t.language = i.reference_language AND t.status != 'synced'",
        &clause,
        &values,
    )?;
    let synced_non_primary = status_violations(
        connection,
        "c.is_primary = 0 AND t.status = 'synced'",
        &clause,
        &values,
    )?;

    let legacy_unassigned: i64 = connection
        .query_row(
            &format!("SELECT COUNT(*) FROM translations t WHERE t.channel_id IS NULL{clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .context("failed to count legacy translations")?;

    Ok(AuditReport {
        duplicate_triples,
        unsynced_primary_reference,
        synced_non_primary,
        legacy_unassigned: usize::try_from(legacy_unassigned)
            .context("count does not fit into usize")?,
    })
}

/// SHA-256 over every translation row in id order, hex encoded.
pub fn snapshot_digest(connection: &Connection) -> Result<String> {
    let mut statement = connection
        .prepare(
            "SELECT id, item_id, channel_id, language, status, title, short_summary, body,
                    attributes, search_metadata, updated_at_unix
             FROM translations
             ORDER BY id",
        )
        .context("failed to prepare snapshot query")?;
    let column_count = statement.column_count();
    let mut rows = statement.query([]).context("failed to run snapshot query")?;

    let mut hasher = Sha256::new();
    while let Some(row) = rows.next().context("failed to read snapshot row")? {
        for index in 0..column_count {
            let value = row
                .get_ref(index)
                .with_context(|| format!("failed to read snapshot column {index}"))?;
            match value {
                ValueRef::Null => hasher.update(b"N"),
                ValueRef::Integer(number) => {
                    hasher.update(b"I");
                    hasher.update(number.to_le_bytes());
                }
                ValueRef::Real(number) => {
                    hasher.update(b"R");
                    hasher.update(number.to_le_bytes());
                }
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    hasher.update(b"T");
                    hasher.update((bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
            }
        }
        hasher.update(b"\n");
    }

    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    Ok(output)
}

fn status_violations(
    connection: &Connection,
    condition: &str,
    clause: &str,
    values: &[SqlValue],
) -> Result<Vec<StatusViolation>> {
    let mut statement = connection
        .prepare(&format!(
            "SELECT t.id, t.item_id, t.channel_id, t.language
             FROM translations t
             JOIN catalog_items i ON i.id = t.item_id
             JOIN channels owner ON owner.id = i.channel_id
             JOIN channels c ON c.id = t.channel_id
             WHERE {condition}{clause}
             ORDER BY t.item_id, t.id"
        ))
        .context("failed to prepare status violation query")?;
    let rows = statement
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(StatusViolation {
                record_id: row.get(0)?,
                item_id: row.get(1)?,
                channel_id: row.get(2)?,
                language: row.get(3)?,
            })
        })
        .context("failed to run status violation query")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to decode status violation row")?);
    }
    Ok(out)
}

fn filter_clause(filter: &TranslationFilter) -> (String, Vec<SqlValue>) {
    let mut clause = String::new();
    let mut values = Vec::new();
    if let Some(item_id) = filter.item_id {
        values.push(SqlValue::Integer(item_id));
        clause.push_str(&format!(" AND t.item_id = ?{}", values.len()));
    }
    if let Some(language) = &filter.language {
        values.push(SqlValue::Text(language.clone()));
        clause.push_str(&format!(" AND t.language = ?{}", values.len()));
    }
    (clause, values)
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed query: {sql}"))?;
    usize::try_from(count).context("count does not fit into usize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{
        NewTranslation, insert_channel, insert_item, insert_translation, migrated_connection,
    };

    fn drifted() -> Connection {
        let connection = migrated_connection();
        insert_channel(&connection, 1, true);
        insert_channel(&connection, 2, false);
        insert_item(&connection, 10, Some(1), "cs");
        insert_item(&connection, 20, Some(2), "en");
        let rows = [
            (1, 10, Some(1), "cs", false),
            (2, 10, Some(1), "en", false),
            (3, 10, Some(1), "en", true),
            (4, 20, Some(2), "en", true),
            (5, 20, None, "de", false),
            (6, 99, Some(2), "en", true),
        ];
        for (id, item_id, channel_id, language, synced) in rows {
            insert_translation(
                &connection,
                NewTranslation {
                    id,
                    item_id,
                    channel_id,
                    language,
                    synced,
                    ..NewTranslation::default()
                },
            );
        }
        connection
    }

    #[test]
    fn audit_lists_each_invariant_violation() {
        let connection = drifted();
        let report = audit_invariants(&connection, &TranslationFilter::default()).expect("audit");

        assert_eq!(
            report.duplicate_triples,
            vec![DuplicateTriple {
                item_id: 10,
                channel_id: 1,
                language: "en".to_string(),
                record_ids: vec![2, 3],
            }]
        );
        assert_eq!(
            report
                .unsynced_primary_reference
                .iter()
                .map(|violation| violation.record_id)
                .collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(
            report
                .synced_non_primary
                .iter()
                .map(|violation| violation.record_id)
                .collect::<Vec<_>>(),
            vec![4]
        );
        assert_eq!(report.legacy_unassigned, 1);
        assert_eq!(report.violation_count(), 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn audit_respects_filters() {
        let connection = drifted();
        let report = audit_invariants(
            &connection,
            &TranslationFilter {
                item_id: Some(20),
                language: Some("en".to_string()),
            },
        )
        .expect("audit");
        assert!(report.duplicate_triples.is_empty());
        assert!(report.unsynced_primary_reference.is_empty());
        assert_eq!(report.synced_non_primary.len(), 1);
        assert_eq!(report.legacy_unassigned, 0);
    }

    #[test]
    fn stats_count_status_legacy_and_orphans() {
        let connection = drifted();
        let stats = load_catalog_stats(&connection).expect("stats");
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.primary_channels, 1);
        assert_eq!(stats.items, 2);
        assert_eq!(stats.translations, 6);
        assert_eq!(stats.by_status.get("draft"), Some(&3));
        assert_eq!(stats.by_status.get("synced"), Some(&3));
        assert_eq!(stats.legacy_unassigned, 1);
        assert_eq!(stats.orphaned, 1);
    }

    #[test]
    fn digest_changes_with_content() {
        let connection = drifted();
        let before = snapshot_digest(&connection).expect("digest");
        assert_eq!(before.len(), 64);
        assert_eq!(before, snapshot_digest(&connection).expect("digest again"));

        connection
            .execute("UPDATE translations SET title = 'x' WHERE id = 5", [])
            .expect("update");
        assert_ne!(before, snapshot_digest(&connection).expect("digest after"));
    }
}
