use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Append-only record of skipped entities. One record is the entity's stanza
/// header followed by a tab-indented reason line. Records are flushed as they
/// are written; write failures are logged and never abort the migration.
pub struct Journal {
    out: Box<dyn Write>,
    records: usize,
}

impl Journal {
    pub fn create(path: &Path) -> Result<Self, io::Error> {
        let file = File::create(path)?;
        Ok(Journal {
            out: Box::new(file),
            records: 0,
        })
    }

    /// Journal that drops everything, for tests and dry runs.
    pub fn discard() -> Self {
        Journal {
            out: Box::new(io::sink()),
            records: 0,
        }
    }

    pub fn record(&mut self, entity: &str, reason: &str) {
        self.records += 1;
        tracing::warn!(entity = %entity, reason = %reason, "skipping");
        let written = writeln!(self.out, "{entity}\n\t- Reason: {reason}");
        if let Err(e) = written.and_then(|_| self.out.flush()) {
            tracing::error!(error = %e, "failed writing journal record");
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::Journal;
    use std::fs;

    #[test]
    fn test_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unprocessed_objects.txt");
        let mut journal = Journal::create(&path).unwrap();
        journal.record("address-object ipv4 \"A\"", "No valid host or network line");
        journal.record("address-group ipv4 G", "\"G\" contains no valid entries");
        drop(journal);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "address-object ipv4 \"A\"\n\t- Reason: No valid host or network line\n\
             address-group ipv4 G\n\t- Reason: \"G\" contains no valid entries\n"
        );
    }

    #[test]
    fn test_discard_counts_records() {
        let mut journal = Journal::discard();
        journal.record("x", "y");
        assert_eq!(journal.records(), 1);
    }
}
