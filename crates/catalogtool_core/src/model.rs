use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

pub type ItemId = i64;
pub type ChannelId = i64;
pub type RecordId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub id: ItemId,
    /// Channel the item itself is registered under.
    pub channel_id: Option<ChannelId>,
    pub reference_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: ChannelId,
    pub code: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Draft,
    Synced,
}

impl TranslationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "draft" => Ok(Self::Draft),
            "synced" => Ok(Self::Synced),
            other => bail!("unknown translation status `{other}`"),
        }
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Title,
    ShortSummary,
    Body,
}

impl ScalarField {
    pub const ALL: [ScalarField; 3] = [Self::Title, Self::ShortSummary, Self::Body];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::ShortSummary => "short_summary",
            Self::Body => "body",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredField {
    Attributes,
    SearchMetadata,
}

impl StructuredField {
    pub const ALL: [StructuredField; 2] = [Self::Attributes, Self::SearchMetadata];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attributes => "attributes",
            Self::SearchMetadata => "search_metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationRecord {
    pub id: RecordId,
    pub item_id: ItemId,
    /// `None` marks a legacy record written before translations were channel scoped.
    pub channel_id: Option<ChannelId>,
    pub language: String,
    pub status: TranslationStatus,
    pub title: Option<String>,
    pub short_summary: Option<String>,
    pub body: Option<String>,
    pub attributes: Option<Value>,
    pub search_metadata: Option<Value>,
    pub updated_at: i64,
}

impl TranslationRecord {
    pub fn scalar(&self, field: ScalarField) -> Option<&str> {
        match field {
            ScalarField::Title => self.title.as_deref(),
            ScalarField::ShortSummary => self.short_summary.as_deref(),
            ScalarField::Body => self.body.as_deref(),
        }
    }

    pub fn scalar_mut(&mut self, field: ScalarField) -> &mut Option<String> {
        match field {
            ScalarField::Title => &mut self.title,
            ScalarField::ShortSummary => &mut self.short_summary,
            ScalarField::Body => &mut self.body,
        }
    }

    pub fn structured(&self, field: StructuredField) -> Option<&Value> {
        match field {
            StructuredField::Attributes => self.attributes.as_ref(),
            StructuredField::SearchMetadata => self.search_metadata.as_ref(),
        }
    }

    pub fn structured_mut(&mut self, field: StructuredField) -> &mut Option<Value> {
        match field {
            StructuredField::Attributes => &mut self.attributes,
            StructuredField::SearchMetadata => &mut self.search_metadata,
        }
    }

    /// Move `updated_at` forward, strictly past its previous value.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at.saturating_add(1));
    }
}

pub fn scalar_is_empty(value: Option<&str>) -> bool {
    value.is_none_or(str::is_empty)
}

/// Null, JSON null, `[]` and `{}` count as empty.
pub fn structured_is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

pub fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> TranslationRecord {
        TranslationRecord {
            id: 1,
            item_id: 10,
            channel_id: None,
            language: "en".to_string(),
            status: TranslationStatus::Draft,
            title: Some("Title".to_string()),
            short_summary: None,
            body: Some(String::new()),
            attributes: None,
            search_metadata: Some(json!({"keywords": ["a"]})),
            updated_at: 500,
        }
    }

    #[test]
    fn scalar_accessors_cover_every_field() {
        let mut record = record();
        assert_eq!(record.scalar(ScalarField::Title), Some("Title"));
        assert_eq!(record.scalar(ScalarField::ShortSummary), None);
        assert_eq!(record.scalar(ScalarField::Body), Some(""));

        *record.scalar_mut(ScalarField::ShortSummary) = Some("short".to_string());
        assert_eq!(record.short_summary.as_deref(), Some("short"));
    }

    #[test]
    fn emptiness_rules() {
        assert!(scalar_is_empty(None));
        assert!(scalar_is_empty(Some("")));
        assert!(!scalar_is_empty(Some(" ")));

        assert!(structured_is_empty(None));
        assert!(structured_is_empty(Some(&Value::Null)));
        assert!(structured_is_empty(Some(&json!([]))));
        assert!(structured_is_empty(Some(&json!({}))));
        assert!(!structured_is_empty(Some(&json!([0]))));
        assert!(!structured_is_empty(Some(&json!({"k": null}))));
        assert!(!structured_is_empty(Some(&json!("text"))));
    }

    #[test]
    fn touch_always_advances() {
        let mut record = record();
        record.touch(1_000);
        assert_eq!(record.updated_at, 1_000);
        record.touch(1_000);
        assert_eq!(record.updated_at, 1_001);
        record.touch(10);
        assert_eq!(record.updated_at, 1_002);
    }

    #[test]
    fn status_parses_stored_values() {
        assert_eq!(
            TranslationStatus::parse("synced").expect("parse"),
            TranslationStatus::Synced
        );
        assert_eq!(TranslationStatus::Draft.to_string(), "draft");
        assert!(TranslationStatus::parse("SYNCED").is_err());
    }
}
