use std::fmt;

use anyhow::{Context, Result, bail};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::migrate::{ensure_schema_current, open_connection};
use crate::model::{
    CatalogItem, Channel, ChannelId, ItemId, RecordId, TranslationRecord, TranslationStatus,
};
use crate::runtime::{MIGRATIONS_POLICY_MESSAGE, ResolvedPaths, normalize_for_display};

const TRANSLATION_COLUMNS: &str = "id, item_id, channel_id, language, status, title, short_summary, body, attributes, search_metadata, updated_at_unix";

/// Narrows which translation records a traversal visits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationFilter {
    pub item_id: Option<ItemId>,
    pub language: Option<String>,
}

/// Identity of a listed translation, enough to report on it without decoding the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationKey {
    pub record_id: RecordId,
    pub item_id: ItemId,
    pub language: String,
}

/// Keyset position in the `(item_id, id)` traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub item_id: ItemId,
    pub record_id: RecordId,
}

impl PageCursor {
    pub fn after(key: &TranslationKey) -> Self {
        Self {
            item_id: key.item_id,
            record_id: key.record_id,
        }
    }
}

/// A stored row that cannot be turned into a [`TranslationRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub record_id: RecordId,
    pub reason: String,
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "translation {} {}", self.record_id, self.reason)
    }
}

impl std::error::Error for MalformedRecord {}

impl MalformedRecord {
    /// Finds a malformed row anywhere in the error's context chain.
    pub fn find_in(error: &anyhow::Error) -> Option<&MalformedRecord> {
        error.chain().find_map(|cause| cause.downcast_ref::<MalformedRecord>())
    }
}

/// One atomic mutation against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOfWork {
    Save(TranslationRecord),
    Merge {
        canonical: TranslationRecord,
        duplicate_id: RecordId,
    },
}

pub trait TranslationRepository {
    /// Keys of the next page strictly after `after`, ordered by `(item_id, id)`.
    ///
    /// Rows are not decoded here; callers load each record with
    /// [`load_translation`](Self::load_translation) when they visit it.
    fn find_translations(
        &mut self,
        filter: &TranslationFilter,
        after: Option<PageCursor>,
        page_size: usize,
    ) -> Result<Vec<TranslationKey>>;

    /// Current state of one record, `None` once it has been deleted.
    fn load_translation(&mut self, record_id: RecordId) -> Result<Option<TranslationRecord>>;

    /// All records for a channel-scoped triple, ordered by id.
    fn find_records(
        &mut self,
        item_id: ItemId,
        channel_id: ChannelId,
        language: &str,
    ) -> Result<Vec<TranslationRecord>>;

    fn resolve_item(&mut self, item_id: ItemId) -> Result<Option<CatalogItem>>;

    fn resolve_channel(&mut self, channel_id: ChannelId) -> Result<Option<Channel>>;

    fn commit(&mut self, unit: &UnitOfWork) -> Result<()>;

    /// Lowest-id record for the triple other than `exclude_id`.
    fn find_record(
        &mut self,
        item_id: ItemId,
        channel_id: ChannelId,
        language: &str,
        exclude_id: RecordId,
    ) -> Result<Option<TranslationRecord>> {
        Ok(self
            .find_records(item_id, channel_id, language)?
            .into_iter()
            .find(|record| record.id != exclude_id))
    }

    fn resolve_owning_channel(&mut self, item_id: ItemId) -> Result<Option<Channel>> {
        match self.resolve_item(item_id)? {
            Some(CatalogItem {
                channel_id: Some(channel_id),
                ..
            }) => self.resolve_channel(channel_id),
            _ => Ok(None),
        }
    }
}

pub struct SqliteRepository {
    connection: Connection,
}

impl SqliteRepository {
    /// Open the catalog database; the schema must already be migrated.
    pub fn open(paths: &ResolvedPaths) -> Result<Self> {
        if !paths.db_path.exists() {
            bail!(
                "catalog database not found at {}. {MIGRATIONS_POLICY_MESSAGE}",
                normalize_for_display(&paths.db_path)
            );
        }
        Self::new(open_connection(&paths.db_path)?)
    }

    pub fn new(connection: Connection) -> Result<Self> {
        ensure_schema_current(&connection)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl TranslationRepository for SqliteRepository {
    fn find_translations(
        &mut self,
        filter: &TranslationFilter,
        after: Option<PageCursor>,
        page_size: usize,
    ) -> Result<Vec<TranslationKey>> {
        let mut sql = "SELECT id, item_id, language FROM translations WHERE 1=1".to_string();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(item_id) = filter.item_id {
            values.push(SqlValue::Integer(item_id));
            sql.push_str(&format!(" AND item_id = ?{}", values.len()));
        }
        if let Some(language) = &filter.language {
            values.push(SqlValue::Text(language.clone()));
            sql.push_str(&format!(" AND language = ?{}", values.len()));
        }
        if let Some(cursor) = after {
            values.push(SqlValue::Integer(cursor.item_id));
            let item_param = values.len();
            values.push(SqlValue::Integer(cursor.record_id));
            let id_param = values.len();
            sql.push_str(&format!(
                " AND (item_id > ?{item_param} OR (item_id = ?{item_param} AND id > ?{id_param}))"
            ));
        }
        values.push(SqlValue::Integer(
            i64::try_from(page_size).context("page size does not fit into i64")?,
        ));
        sql.push_str(&format!(" ORDER BY item_id, id LIMIT ?{}", values.len()));

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare translation page query")?;
        let rows = statement
            .query_map(params_from_iter(values), |row| {
                Ok(TranslationKey {
                    record_id: row.get(0)?,
                    item_id: row.get(1)?,
                    language: row.get(2)?,
                })
            })
            .context("failed to run translation page query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read translation key")?);
        }
        Ok(out)
    }

    fn load_translation(&mut self, record_id: RecordId) -> Result<Option<TranslationRecord>> {
        let row = self
            .connection
            .query_row(
                &format!("SELECT {TRANSLATION_COLUMNS} FROM translations WHERE id = ?1"),
                [record_id],
                TranslationRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load translation {record_id}"))?;
        row.map(TranslationRow::into_record).transpose()
    }

    fn find_records(
        &mut self,
        item_id: ItemId,
        channel_id: ChannelId,
        language: &str,
    ) -> Result<Vec<TranslationRecord>> {
        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT {TRANSLATION_COLUMNS} FROM translations
                 WHERE item_id = ?1 AND channel_id = ?2 AND language = ?3
                 ORDER BY id"
            ))
            .context("failed to prepare translation triple query")?;
        let rows = statement
            .query_map(params![item_id, channel_id, language], TranslationRow::from_row)
            .with_context(|| {
                format!("failed to query translations for item {item_id} channel {channel_id} language {language}")
            })?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.context("failed to decode translation row")?;
            out.push(row.into_record()?);
        }
        Ok(out)
    }

    fn resolve_item(&mut self, item_id: ItemId) -> Result<Option<CatalogItem>> {
        self.connection
            .query_row(
                "SELECT id, channel_id, reference_language FROM catalog_items WHERE id = ?1",
                [item_id],
                |row| {
                    Ok(CatalogItem {
                        id: row.get(0)?,
                        channel_id: row.get(1)?,
                        reference_language: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load catalog item {item_id}"))
    }

    fn resolve_channel(&mut self, channel_id: ChannelId) -> Result<Option<Channel>> {
        self.connection
            .query_row(
                "SELECT id, code, is_primary FROM channels WHERE id = ?1",
                [channel_id],
                |row| {
                    Ok(Channel {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        is_primary: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load channel {channel_id}"))
    }

    fn resolve_owning_channel(&mut self, item_id: ItemId) -> Result<Option<Channel>> {
        self.connection
            .query_row(
                "SELECT c.id, c.code, c.is_primary
                 FROM catalog_items i
                 JOIN channels c ON c.id = i.channel_id
                 WHERE i.id = ?1",
                [item_id],
                |row| {
                    Ok(Channel {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        is_primary: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load owning channel of item {item_id}"))
    }

    fn commit(&mut self, unit: &UnitOfWork) -> Result<()> {
        let transaction = self
            .connection
            .transaction()
            .context("failed to start translation transaction")?;
        match unit {
            UnitOfWork::Save(record) => save_record(&transaction, record)?,
            UnitOfWork::Merge {
                canonical,
                duplicate_id,
            } => {
                save_record(&transaction, canonical)?;
                delete_record(&transaction, *duplicate_id)?;
            }
        }
        transaction
            .commit()
            .context("failed to commit translation transaction")
    }
}

fn save_record(connection: &Connection, record: &TranslationRecord) -> Result<()> {
    let attributes = encode_structured(record.attributes.as_ref())?;
    let search_metadata = encode_structured(record.search_metadata.as_ref())?;
    let changed = connection
        .execute(
            "UPDATE translations SET
                channel_id = ?2,
                status = ?3,
                title = ?4,
                short_summary = ?5,
                body = ?6,
                attributes = ?7,
                search_metadata = ?8,
                updated_at_unix = ?9
             WHERE id = ?1",
            params![
                record.id,
                record.channel_id,
                record.status.as_str(),
                record.title,
                record.short_summary,
                record.body,
                attributes,
                search_metadata,
                record.updated_at,
            ],
        )
        .with_context(|| format!("failed to update translation {}", record.id))?;
    if changed != 1 {
        bail!("translation {} no longer exists", record.id);
    }
    Ok(())
}

fn delete_record(connection: &Connection, record_id: RecordId) -> Result<()> {
    let deleted = connection
        .execute("DELETE FROM translations WHERE id = ?1", [record_id])
        .with_context(|| format!("failed to delete translation {record_id}"))?;
    if deleted != 1 {
        bail!("translation {record_id} no longer exists");
    }
    Ok(())
}

fn encode_structured(value: Option<&serde_json::Value>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .context("failed to encode structured translation field")
}

fn decode_structured(
    record_id: RecordId,
    column: &str,
    raw: Option<String>,
) -> Result<Option<serde_json::Value>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|error| {
            MalformedRecord {
                record_id,
                reason: format!("has malformed JSON in {column}: {error}"),
            }
            .into()
        })
}

struct TranslationRow {
    id: RecordId,
    item_id: ItemId,
    channel_id: Option<ChannelId>,
    language: String,
    status: String,
    title: Option<String>,
    short_summary: Option<String>,
    body: Option<String>,
    attributes: Option<String>,
    search_metadata: Option<String>,
    updated_at: i64,
}

impl TranslationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            item_id: row.get(1)?,
            channel_id: row.get(2)?,
            language: row.get(3)?,
            status: row.get(4)?,
            title: row.get(5)?,
            short_summary: row.get(6)?,
            body: row.get(7)?,
            attributes: row.get(8)?,
            search_metadata: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<TranslationRecord> {
        let status = TranslationStatus::parse(&self.status).map_err(|error| MalformedRecord {
            record_id: self.id,
            reason: format!("has an invalid status: {error}"),
        })?;
        Ok(TranslationRecord {
            attributes: decode_structured(self.id, "attributes", self.attributes)?,
            search_metadata: decode_structured(self.id, "search_metadata", self.search_metadata)?,
            id: self.id,
            item_id: self.item_id,
            channel_id: self.channel_id,
            language: self.language,
            status,
            title: self.title,
            short_summary: self.short_summary,
            body: self.body,
            updated_at: self.updated_at,
        })
    }
}
