use std::sync::Arc;

use crate::Result;
use crate::mutation::Mutation;
use crate::store::WriteClient;

/// Store that never persists anything, every committed mutation is written to the log.
#[derive(Debug, Clone)]
pub struct LogStore {
    table: Arc<str>,
}

impl LogStore {
    pub fn new(table: &str) -> Self {
        Self {
            table: Arc::from(table),
        }
    }
}

impl WriteClient for LogStore {
    async fn batch_mutate(&mut self, mutations: &[Mutation]) -> Result<()> {
        for mutation in mutations {
            let cells = match mutation {
                Mutation::Put { columns, .. } => columns
                    .iter()
                    .map(|c| {
                        format!(
                            "{}:{}={}",
                            String::from_utf8_lossy(&c.family),
                            String::from_utf8_lossy(&c.qualifier),
                            String::from_utf8_lossy(&c.value)
                        )
                    })
                    .collect::<Vec<_>>(),
                Mutation::Increment { counters, .. } => counters
                    .iter()
                    .map(|c| {
                        format!(
                            "{}:{}+={}",
                            String::from_utf8_lossy(&c.family),
                            String::from_utf8_lossy(&c.qualifier),
                            c.increment
                        )
                    })
                    .collect(),
                Mutation::Delete { columns, .. } => columns
                    .iter()
                    .map(|c| {
                        format!(
                            "{}:{}",
                            String::from_utf8_lossy(&c.family),
                            String::from_utf8_lossy(&c.qualifier)
                        )
                    })
                    .collect(),
            };
            tracing::info!(
                table = %self.table,
                kind = mutation.kind(),
                row = %String::from_utf8_lossy(mutation.row()),
                durability = %mutation.durability(),
                cells = cells.join(","),
                "Mutation"
            );
        }
        Ok(())
    }
}
