use crate::Result;
use crate::mapper::MutationMapper;
use crate::message::Record;
use crate::mutation::{Durability, Mutation};
use crate::store::WriteClient;

/// Records received since the last flush and the mutations derived from them. Both sequences keep
/// append order and are only ever emptied together.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    mutations: Vec<Mutation>,
    records: Vec<Record>,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Maps the record and appends it with its mutations. A record whose mapping or mutation
    /// construction fails is still appended (without mutations) so the caller can fail it along
    /// with the rest of the batch, and the error is returned.
    pub(crate) fn append<M, C>(
        &mut self,
        record: Record,
        mapper: &M,
        client: &C,
        durability: Durability,
    ) -> Result<()>
    where
        M: MutationMapper,
        C: WriteClient,
    {
        let mutations = Self::derive(&record, mapper, client, durability);
        self.records.push(record);
        self.mutations.extend(mutations?);
        Ok(())
    }

    fn derive<M, C>(
        record: &Record,
        mapper: &M,
        client: &C,
        durability: Durability,
    ) -> Result<Vec<Mutation>>
    where
        M: MutationMapper,
        C: WriteClient,
    {
        let (row_key, cols) = mapper.map(record)?;
        client.construct_mutations(&row_key, &cols, durability)
    }

    /// Number of records appended since the last clear.
    pub(crate) fn size(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub(crate) fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn clear(&mut self) {
        self.mutations.clear();
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::test_utils::{RowPerRecordMapper, record};

    #[test]
    fn test_append_keeps_order() {
        let mut batch = Batch::new();
        let store = MemoryStore::new("t");
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            batch
                .append(record(i as u64, name), &RowPerRecordMapper, &store, Durability::SyncWal)
                .unwrap();
        }

        assert_eq!(batch.size(), 3);
        let rows: Vec<_> = batch.mutations().iter().map(|m| m.row().clone()).collect();
        assert_eq!(rows, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        let ids: Vec<_> = batch.records().iter().map(|r| r.id.offset).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_append_failure_keeps_record() {
        let mut batch = Batch::new();
        let store = MemoryStore::new("t");
        batch
            .append(record(0, "a"), &RowPerRecordMapper, &store, Durability::SyncWal)
            .unwrap();

        // empty payload cannot be mapped
        let err = batch
            .append(record(1, ""), &RowPerRecordMapper, &store, Durability::SyncWal)
            .unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        assert_eq!(batch.size(), 2);
        assert_eq!(batch.mutations().len(), 1);

        store.error_injector().fail_constructs(1);
        let err = batch
            .append(record(2, "c"), &RowPerRecordMapper, &store, Durability::SyncWal)
            .unwrap_err();
        assert!(matches!(err, Error::Mutation(_)));
        assert_eq!(batch.size(), 3);
        assert_eq!(batch.mutations().len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut batch = Batch::new();
        let store = MemoryStore::new("t");
        batch
            .append(record(0, "a"), &RowPerRecordMapper, &store, Durability::SkipWal)
            .unwrap();
        assert_eq!(batch.mutations()[0].durability(), Durability::SkipWal);

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.mutations().is_empty());
        assert!(batch.records().is_empty());
    }
}
