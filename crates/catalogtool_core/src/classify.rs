use serde::Serialize;

use crate::model::{CatalogItem, Channel, ChannelId, TranslationRecord, TranslationStatus};

/// Resolved relations for one translation record. Any `None` means the lookup failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordContext<'a> {
    pub item: Option<&'a CatalogItem>,
    pub owning_channel: Option<&'a Channel>,
    pub record_channel: Option<&'a Channel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingItem,
    MissingOwningChannel,
    MissingRecordChannel,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingItem => "missing item",
            Self::MissingOwningChannel => "missing owning channel",
            Self::MissingRecordChannel => "missing record channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip(SkipReason),
    AssignChannel { target: ChannelId },
    PromoteToSynced,
    DemoteToDraft,
    NoOp,
}

pub fn classify(record: &TranslationRecord, context: &RecordContext<'_>) -> Action {
    let Some(item) = context.item else {
        return Action::Skip(SkipReason::MissingItem);
    };
    let Some(owning_channel) = context.owning_channel else {
        return Action::Skip(SkipReason::MissingOwningChannel);
    };

    let Some(channel_id) = record.channel_id else {
        return Action::AssignChannel {
            target: owning_channel.id,
        };
    };

    let channel = match context.record_channel {
        Some(channel) if channel.id == channel_id => channel,
        _ => return Action::Skip(SkipReason::MissingRecordChannel),
    };

    if channel.is_primary
        && record.language == item.reference_language
        && record.status != TranslationStatus::Synced
    {
        Action::PromoteToSynced
    } else if !channel.is_primary && record.status == TranslationStatus::Synced {
        Action::DemoteToDraft
    } else {
        Action::NoOp
    }
}
