use serde::Serialize;

use crate::model::{
    ScalarField, StructuredField, TranslationRecord, scalar_is_empty, structured_is_empty,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilledField {
    Scalar(ScalarField),
    Structured(StructuredField),
}

impl FilledField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalar(field) => field.as_str(),
            Self::Structured(field) => field.as_str(),
        }
    }
}

/// Copy content from `duplicate` into the empty fields of `canonical`.
///
/// Non-empty canonical values always win. Returns the fields that were filled.
pub fn fill_empty_fields(
    canonical: &mut TranslationRecord,
    duplicate: &TranslationRecord,
) -> Vec<FilledField> {
    let mut filled = Vec::new();

    for field in ScalarField::ALL {
        if scalar_is_empty(canonical.scalar(field)) && !scalar_is_empty(duplicate.scalar(field)) {
            *canonical.scalar_mut(field) = duplicate.scalar(field).map(str::to_string);
            filled.push(FilledField::Scalar(field));
        }
    }

    for field in StructuredField::ALL {
        if structured_is_empty(canonical.structured(field))
            && !structured_is_empty(duplicate.structured(field))
        {
            *canonical.structured_mut(field) = duplicate.structured(field).cloned();
            filled.push(FilledField::Structured(field));
        }
    }

    filled
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::TranslationStatus;

    fn blank(id: i64) -> TranslationRecord {
        TranslationRecord {
            id,
            item_id: 1,
            channel_id: Some(10),
            language: "en".to_string(),
            status: TranslationStatus::Draft,
            title: None,
            short_summary: None,
            body: None,
            attributes: None,
            search_metadata: None,
            updated_at: 0,
        }
    }

    #[test]
    fn empty_canonical_fields_are_filled() {
        let mut canonical = blank(2);
        canonical.body = Some("Long text".to_string());
        let mut duplicate = blank(1);
        duplicate.title = Some("A".to_string());

        let filled = fill_empty_fields(&mut canonical, &duplicate);

        assert_eq!(filled, vec![FilledField::Scalar(ScalarField::Title)]);
        assert_eq!(canonical.title.as_deref(), Some("A"));
        assert_eq!(canonical.body.as_deref(), Some("Long text"));
    }

    #[test]
    fn non_empty_canonical_values_are_never_replaced() {
        let mut canonical = blank(2);
        canonical.title = Some("kept".to_string());
        canonical.attributes = Some(json!({"color": "red"}));
        let mut duplicate = blank(1);
        duplicate.title = Some("other".to_string());
        duplicate.attributes = Some(json!({"color": "blue"}));

        let filled = fill_empty_fields(&mut canonical, &duplicate);

        assert!(filled.is_empty());
        assert_eq!(canonical.title.as_deref(), Some("kept"));
        assert_eq!(canonical.attributes, Some(json!({"color": "red"})));
    }

    #[test]
    fn empty_string_and_empty_collections_count_as_empty() {
        let mut canonical = blank(2);
        canonical.short_summary = Some(String::new());
        canonical.attributes = Some(json!([]));
        canonical.search_metadata = Some(json!({}));
        let mut duplicate = blank(1);
        duplicate.short_summary = Some("summary".to_string());
        duplicate.attributes = Some(json!([{"k": "v"}]));
        duplicate.search_metadata = Some(json!({"keywords": ["x"]}));

        let filled = fill_empty_fields(&mut canonical, &duplicate);

        assert_eq!(
            filled,
            vec![
                FilledField::Scalar(ScalarField::ShortSummary),
                FilledField::Structured(StructuredField::Attributes),
                FilledField::Structured(StructuredField::SearchMetadata),
            ]
        );
        assert_eq!(canonical.short_summary.as_deref(), Some("summary"));
        assert_eq!(canonical.attributes, Some(json!([{"k": "v"}])));
    }

    #[test]
    fn empty_duplicate_values_do_not_clobber() {
        let mut canonical = blank(2);
        let mut duplicate = blank(1);
        duplicate.body = Some(String::new());
        duplicate.search_metadata = Some(json!({}));

        let filled = fill_empty_fields(&mut canonical, &duplicate);

        assert!(filled.is_empty());
        assert_eq!(canonical.body, None);
        assert_eq!(canonical.search_metadata, None);
    }
}
