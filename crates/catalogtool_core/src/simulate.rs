use std::collections::BTreeMap;

use anyhow::Result;

use crate::model::{CatalogItem, Channel, ChannelId, ItemId, RecordId, TranslationRecord};
use crate::repository::{
    PageCursor, TranslationFilter, TranslationKey, TranslationRepository, UnitOfWork,
};

/// Read-through view over a repository that keeps committed units in memory.
///
/// Dry runs drive the regular reconciliation code against this wrapper, so a
/// later record sees the effects of earlier planned merges and assignments
/// while the underlying store stays untouched. Planned changes are dropped once
/// a page starts past their item, since lookups never leave the visited item.
pub struct SimulatedRepository<'a, R: TranslationRepository> {
    base: &'a mut R,
    overlay: BTreeMap<RecordId, Planned>,
}

struct Planned {
    item_id: ItemId,
    /// `None` marks a record deleted by a planned merge.
    record: Option<TranslationRecord>,
}

impl<'a, R: TranslationRepository> SimulatedRepository<'a, R> {
    pub fn new(base: &'a mut R) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
        }
    }

    /// Planned changes still held in memory.
    pub fn pending_changes(&self) -> usize {
        self.overlay.len()
    }

    fn plan(&mut self, item_id: ItemId, record_id: RecordId, record: Option<TranslationRecord>) {
        self.overlay.insert(record_id, Planned { item_id, record });
    }
}

impl<R: TranslationRepository> TranslationRepository for SimulatedRepository<'_, R> {
    fn find_translations(
        &mut self,
        filter: &TranslationFilter,
        after: Option<PageCursor>,
        page_size: usize,
    ) -> Result<Vec<TranslationKey>> {
        let page = self.base.find_translations(filter, after, page_size)?;
        if let Some(first) = page.first() {
            self.overlay
                .retain(|_, planned| planned.item_id >= first.item_id);
        }
        Ok(page)
    }

    fn load_translation(&mut self, record_id: RecordId) -> Result<Option<TranslationRecord>> {
        match self.overlay.get(&record_id) {
            Some(planned) => Ok(planned.record.clone()),
            None => self.base.load_translation(record_id),
        }
    }

    fn find_records(
        &mut self,
        item_id: ItemId,
        channel_id: ChannelId,
        language: &str,
    ) -> Result<Vec<TranslationRecord>> {
        let mut found: BTreeMap<RecordId, TranslationRecord> = BTreeMap::new();
        for record in self.base.find_records(item_id, channel_id, language)? {
            match self.overlay.get(&record.id) {
                Some(planned) => {
                    if let Some(record) = &planned.record {
                        found.insert(record.id, record.clone());
                    }
                }
                None => {
                    found.insert(record.id, record);
                }
            }
        }
        found.retain(|_, record| record.channel_id == Some(channel_id));

        for record in self.overlay.values().filter_map(|planned| planned.record.as_ref()) {
            if record.item_id == item_id
                && record.channel_id == Some(channel_id)
                && record.language == language
            {
                found.insert(record.id, record.clone());
            }
        }
        Ok(found.into_values().collect())
    }

    fn resolve_item(&mut self, item_id: ItemId) -> Result<Option<CatalogItem>> {
        self.base.resolve_item(item_id)
    }

    fn resolve_channel(&mut self, channel_id: ChannelId) -> Result<Option<Channel>> {
        self.base.resolve_channel(channel_id)
    }

    fn resolve_owning_channel(&mut self, item_id: ItemId) -> Result<Option<Channel>> {
        self.base.resolve_owning_channel(item_id)
    }

    fn commit(&mut self, unit: &UnitOfWork) -> Result<()> {
        match unit {
            UnitOfWork::Save(record) => {
                self.plan(record.item_id, record.id, Some(record.clone()));
            }
            UnitOfWork::Merge {
                canonical,
                duplicate_id,
            } => {
                self.plan(canonical.item_id, canonical.id, Some(canonical.clone()));
                self.plan(canonical.item_id, *duplicate_id, None);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TranslationStatus;
    use crate::repository::SqliteRepository;
    use crate::repository::fixtures::{
        NewTranslation, insert_translation, migrated_connection,
    };

    fn repository() -> SqliteRepository {
        let connection = migrated_connection();
        for (id, channel_id) in [(1, None), (2, Some(5)), (3, None)] {
            insert_translation(
                &connection,
                NewTranslation {
                    id,
                    item_id: 10,
                    channel_id,
                    language: "en",
                    ..NewTranslation::default()
                },
            );
        }
        SqliteRepository::new(connection).expect("repository")
    }

    #[test]
    fn planned_assignment_is_visible_to_triple_lookup() {
        let mut base = repository();
        let mut simulated = SimulatedRepository::new(&mut base);
        let mut first = simulated
            .load_translation(1)
            .expect("load")
            .expect("record 1");
        first.channel_id = Some(7);
        simulated
            .commit(&UnitOfWork::Save(first))
            .expect("commit");

        let found = simulated.find_record(10, 7, "en", 3).expect("find");
        assert_eq!(found.map(|record| record.id), Some(1));
        assert!(base.find_records(10, 7, "en").expect("base").is_empty());
    }

    #[test]
    fn planned_merge_hides_duplicate_and_updates_canonical() {
        let mut base = repository();
        let mut simulated = SimulatedRepository::new(&mut base);
        let mut canonical = simulated.find_records(10, 5, "en").expect("find").remove(0);
        canonical.status = TranslationStatus::Synced;
        simulated
            .commit(&UnitOfWork::Merge {
                canonical,
                duplicate_id: 1,
            })
            .expect("commit");
        assert_eq!(simulated.pending_changes(), 2);

        assert_eq!(simulated.load_translation(1).expect("load"), None);
        let planned = simulated
            .load_translation(2)
            .expect("load")
            .expect("canonical");
        assert_eq!(planned.status, TranslationStatus::Synced);

        let stored = base.load_translation(2).expect("load").expect("stored");
        assert_eq!(stored.status, TranslationStatus::Draft);
        assert!(base.load_translation(1).expect("load").is_some());
    }

    #[test]
    fn planned_changes_are_dropped_once_traversal_leaves_the_item() {
        let connection = migrated_connection();
        for (id, item_id) in [(1, 10), (2, 10), (3, 20)] {
            insert_translation(
                &connection,
                NewTranslation {
                    id,
                    item_id,
                    language: "en",
                    ..NewTranslation::default()
                },
            );
        }
        let mut base = SqliteRepository::new(connection).expect("repository");
        let mut simulated = SimulatedRepository::new(&mut base);
        let filter = TranslationFilter::default();

        let first = simulated.find_translations(&filter, None, 1).expect("page 1");
        let mut record = simulated
            .load_translation(first[0].record_id)
            .expect("load")
            .expect("record 1");
        record.channel_id = Some(5);
        simulated.commit(&UnitOfWork::Save(record)).expect("commit");
        assert_eq!(simulated.pending_changes(), 1);

        let second = simulated
            .find_translations(&filter, first.last().map(PageCursor::after), 1)
            .expect("page 2");
        assert_eq!(second[0].record_id, 2);
        assert_eq!(simulated.pending_changes(), 1);
        assert_eq!(
            simulated.find_records(10, 5, "en").expect("find").len(),
            1
        );

        let third = simulated
            .find_translations(&filter, second.last().map(PageCursor::after), 1)
            .expect("page 3");
        assert_eq!(third[0].item_id, 20);
        assert_eq!(simulated.pending_changes(), 0);
    }
}
