use std::collections::HashMap;
use std::io;

use tdship_api::Event;
use tdship_engine::{Batch, BatchId, BatchWriter};

/// Open chunks, one per tag.
///
/// A chunk is cut as soon as its encoded size reaches `limit`, so it can
/// exceed the limit by at most one record.
#[derive(Debug)]
pub struct ChunkBuffer {
    limit: u64,
    open: HashMap<String, Batch>,
}

impl ChunkBuffer {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            open: HashMap::new(),
        }
    }

    /// Encode `event` into the chunk for `tag`. Returns the chunk once it is
    /// full.
    pub fn push(&mut self, writer: &mut BatchWriter<'_>, tag: &str, event: &Event) -> io::Result<Option<Batch>> {
        let batch = self
            .open
            .entry(tag.to_string())
            .or_insert_with(|| Batch::new(BatchId::generate(), tag));
        writer.write_event(batch, event)?;

        if batch.len()? >= self.limit {
            return Ok(self.open.remove(tag));
        }
        Ok(None)
    }

    /// Take every chunk that holds at least one record.
    pub fn drain(&mut self) -> Vec<Batch> {
        self.open
            .drain()
            .map(|(_, batch)| batch)
            .filter(|batch| batch.records() > 0)
            .collect()
    }

    #[cfg(test)]
    fn open_chunks(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use tdship_api::Value;
    use tdship_engine::{LogErrorSink, RecordEncoder};

    use super::*;

    fn event(i: i64) -> Event {
        Event::new(1, Value::map([("n", Value::from(i))]))
    }

    #[test]
    fn chunk_is_cut_at_limit() {
        let encoder = RecordEncoder::default();
        let sink = LogErrorSink;
        let mut writer = BatchWriter::new(&encoder, &sink);
        let one = encoder.encode(&event(1).record, 1).unwrap().len() as u64;
        let mut buffer = ChunkBuffer::new(one * 3);

        assert!(buffer.push(&mut writer, "db.a", &event(1)).unwrap().is_none());
        assert!(buffer.push(&mut writer, "db.b", &event(2)).unwrap().is_none());
        assert!(buffer.push(&mut writer, "db.a", &event(3)).unwrap().is_none());
        let full = buffer.push(&mut writer, "db.a", &event(4)).unwrap().unwrap();

        assert_eq!(full.tag(), "db.a");
        assert_eq!(full.records(), 3);
        assert_eq!(buffer.open_chunks(), 1);

        // the next event for the same tag starts a new chunk with a new id
        buffer.push(&mut writer, "db.a", &event(5)).unwrap();
        let rest = buffer.drain();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|b| b.id() != full.id()));
        assert_eq!(buffer.open_chunks(), 0);
    }

    #[test]
    fn chunks_with_only_rejected_records_are_dropped() {
        let encoder = RecordEncoder::default();
        let sink = LogErrorSink;
        let mut writer = BatchWriter::new(&encoder, &sink);
        let mut buffer = ChunkBuffer::new(1024);

        buffer
            .push(&mut writer, "db.tbl", &Event::new(1, Value::from("not a map")))
            .unwrap();
        assert_eq!(buffer.open_chunks(), 1);
        assert!(buffer.drain().is_empty());
    }
}
