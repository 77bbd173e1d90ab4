use crate::model::TranslationStatus;

/// Status a record must hold given where it lives.
///
/// Non-primary channels never keep `synced`; primary channels always sync the
/// reference language. Every other combination keeps whatever status it had.
pub fn required_status(
    is_primary: bool,
    language: &str,
    reference_language: &str,
    current: TranslationStatus,
) -> TranslationStatus {
    if !is_primary && current == TranslationStatus::Synced {
        TranslationStatus::Draft
    } else if is_primary && language == reference_language {
        TranslationStatus::Synced
    } else {
        current
    }
}
