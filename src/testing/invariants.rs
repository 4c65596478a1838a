//! Invariant checking framework for segment verification
//!
//! Each `SegmentCheck` walks an open segment and reports the first
//! violation it finds. `check_segment` runs the default set; it reads every
//! term, posting and stored document, so it is meant for tests and offline
//! verification, not for the query path.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LucentError;
use crate::segment::{DocId, SegmentReader, SegmentSet, Term, TermMeta, NO_MORE_DOCS};

/// A violation of a segment invariant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub invariant: String,
    pub segment: String,
    pub description: String,
    pub context: HashMap<String, String>,
}

impl Violation {
    fn new(check: &dyn SegmentCheck, reader: &SegmentReader, description: impl Into<String>) -> Self {
        Self {
            invariant: check.name().to_string(),
            segment: reader.id().to_string(),
            description: description.into(),
            context: HashMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    fn from_error(check: &dyn SegmentCheck, reader: &SegmentReader, err: LucentError) -> Self {
        Self::new(check, reader, format!("read failed: {}", err))
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "INVARIANT VIOLATION: {} in {}", self.invariant, self.segment)?;
        writeln!(f, "  Description: {}", self.description)?;
        if !self.context.is_empty() {
            writeln!(f, "  Context:")?;
            let mut keys: Vec<&String> = self.context.keys().collect();
            keys.sort();
            for key in keys {
                writeln!(f, "    {}: {}", key, self.context[key])?;
            }
        }
        Ok(())
    }
}

/// A structural property every valid segment has
pub trait SegmentCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation>;

    fn description(&self) -> &str {
        "No description provided"
    }
}

/// Run `checks` against one segment
pub fn check_all(reader: &SegmentReader, checks: &[Box<dyn SegmentCheck>]) -> Vec<Violation> {
    checks.iter().filter_map(|c| c.check(reader).err()).collect()
}

/// Run the default checks against one segment
pub fn check_segment(reader: &SegmentReader) -> Vec<Violation> {
    check_all(reader, &default_checks())
}

/// Run the default checks against every segment of a snapshot
pub fn check_segments(set: &SegmentSet) -> Vec<Violation> {
    let checks = default_checks();
    set.readers()
        .iter()
        .flat_map(|r| check_all(r, &checks))
        .collect()
}

pub fn default_checks() -> Vec<Box<dyn SegmentCheck>> {
    vec![
        Box::new(TermsStrictlyIncreasing),
        Box::new(PostingsWellFormed),
        Box::new(AdvanceMatchesNextDoc),
        Box::new(LiveDocsConsistent),
        Box::new(StoredFieldsReadable),
    ]
}

fn all_terms(
    check: &dyn SegmentCheck,
    reader: &SegmentReader,
) -> Result<Vec<(Term, TermMeta)>, Violation> {
    reader
        .terms()
        .collect::<crate::Result<Vec<_>>>()
        .map_err(|e| Violation::from_error(check, reader, e))
}

/// Dictionary order is strictly increasing and matches the term count
pub struct TermsStrictlyIncreasing;

impl SegmentCheck for TermsStrictlyIncreasing {
    fn name(&self) -> &str {
        "TermsStrictlyIncreasing"
    }

    fn description(&self) -> &str {
        "Terms are unique, sorted bytewise, and each one can be found again"
    }

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation> {
        let terms = all_terms(self, reader)?;
        if terms.len() as u64 != reader.term_count() {
            return Err(Violation::new(self, reader, "term count differs from dictionary header")
                .with("iterated", terms.len())
                .with("header", reader.term_count()));
        }
        for pair in terms.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(Violation::new(self, reader, "terms out of order")
                    .with("previous", &pair[0].0)
                    .with("term", &pair[1].0));
            }
        }
        for (term, meta) in &terms {
            let found = reader
                .lookup_term(term.as_bytes())
                .map_err(|e| Violation::from_error(self, reader, e))?;
            if found != Some(*meta) {
                return Err(Violation::new(self, reader, "lookup disagrees with iteration")
                    .with("term", term));
            }
        }
        Ok(())
    }
}

/// Every posting list is sorted, in range and agrees with its metadata
pub struct PostingsWellFormed;

impl PostingsWellFormed {
    fn check_term(
        &self,
        reader: &SegmentReader,
        term: &Term,
        meta: &TermMeta,
    ) -> Result<(), Violation> {
        let violation = |description: &str| Violation::new(self, reader, description).with("term", term);
        let read_err = |e: LucentError| Violation::from_error(self, reader, e);

        let format = reader.format();
        let mut iter = reader.open_raw_postings(meta).map_err(read_err)?;
        let mut count = 0u32;
        let mut total_freq = 0u64;
        let mut last_doc: Option<DocId> = None;
        loop {
            let doc = iter.next_doc().map_err(read_err)?;
            if doc == NO_MORE_DOCS {
                break;
            }
            if last_doc.map_or(false, |last| doc <= last) {
                return Err(violation("doc ids not strictly increasing").with("doc", doc));
            }
            if doc.as_u32() >= reader.max_doc() {
                return Err(violation("doc id beyond segment").with("doc", doc));
            }
            let freq = iter.freq();
            if freq == 0 {
                return Err(violation("zero frequency").with("doc", doc));
            }

            if format.positions {
                let occurrences = iter.occurrences().map_err(read_err)?;
                if occurrences.len() as u32 != freq {
                    return Err(violation("position count differs from freq").with("doc", doc));
                }
                for pair in occurrences.windows(2) {
                    if pair[1].position < pair[0].position {
                        return Err(violation("positions decrease").with("doc", doc));
                    }
                    if format.offsets && pair[1].start_offset < pair[0].start_offset {
                        return Err(violation("offsets decrease").with("doc", doc));
                    }
                }
                if format.offsets && occurrences.iter().any(|o| o.end_offset < o.start_offset) {
                    return Err(violation("end offset before start offset").with("doc", doc));
                }
            }

            last_doc = Some(doc);
            count += 1;
            total_freq += freq as u64;
        }

        if count != meta.doc_freq {
            return Err(violation("doc freq differs from postings")
                .with("meta", meta.doc_freq)
                .with("actual", count));
        }
        if total_freq != meta.total_term_freq {
            return Err(violation("total term freq differs from postings")
                .with("meta", meta.total_term_freq)
                .with("actual", total_freq));
        }
        Ok(())
    }
}

impl SegmentCheck for PostingsWellFormed {
    fn name(&self) -> &str {
        "PostingsWellFormed"
    }

    fn description(&self) -> &str {
        "Doc ids strictly increase within range; freqs, positions and offsets are consistent"
    }

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation> {
        for (term, meta) in all_terms(self, reader)? {
            self.check_term(reader, &term, &meta)?;
        }
        Ok(())
    }
}

/// `advance(t)` lands where repeated `next_doc` would
pub struct AdvanceMatchesNextDoc;

impl SegmentCheck for AdvanceMatchesNextDoc {
    fn name(&self) -> &str {
        "AdvanceMatchesNextDoc"
    }

    fn description(&self) -> &str {
        "Skipping with advance yields the first doc at or beyond the target"
    }

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation> {
        let read_err = |e: LucentError| Violation::from_error(self, reader, e);
        for (term, meta) in all_terms(self, reader)? {
            let docs: Vec<DocId> = reader
                .open_postings(&meta)
                .map_err(read_err)?
                .map(|r| r.map(|(doc, _)| doc))
                .collect::<crate::Result<_>>()
                .map_err(read_err)?;

            // Jump to every other doc plus one, then past the end
            let mut iter = reader.open_postings(&meta).map_err(read_err)?;
            let mut target = 0u32;
            loop {
                let expected = docs
                    .iter()
                    .copied()
                    .find(|d| d.as_u32() >= target)
                    .unwrap_or(NO_MORE_DOCS);
                let got = iter.advance(DocId(target)).map_err(read_err)?;
                if got != expected {
                    return Err(Violation::new(self, reader, "advance skipped to the wrong doc")
                        .with("term", &term)
                        .with("target", target)
                        .with("expected", expected)
                        .with("got", got));
                }
                if got == NO_MORE_DOCS {
                    break;
                }
                target = got.as_u32().saturating_add(2);
            }
        }
        Ok(())
    }
}

/// Live docs cover the segment and match the committed counts
pub struct LiveDocsConsistent;

impl SegmentCheck for LiveDocsConsistent {
    fn name(&self) -> &str {
        "LiveDocsConsistent"
    }

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation> {
        let live = reader.live_docs();
        let info = reader.info();
        if live.max_doc() != reader.max_doc() {
            return Err(Violation::new(self, reader, "live docs sized for another segment")
                .with("live_max_doc", live.max_doc())
                .with("max_doc", reader.max_doc()));
        }
        if live.num_deleted() < info.del_count {
            return Err(Violation::new(self, reader, "fewer deletions than committed")
                .with("deleted", live.num_deleted())
                .with("committed", info.del_count));
        }
        if live.deleted().max().map_or(false, |d| d >= reader.max_doc()) {
            return Err(Violation::new(self, reader, "deleted doc beyond segment"));
        }
        Ok(())
    }
}

/// Every doc's stored fields decode
pub struct StoredFieldsReadable;

impl SegmentCheck for StoredFieldsReadable {
    fn name(&self) -> &str {
        "StoredFieldsReadable"
    }

    fn check(&self, reader: &SegmentReader) -> Result<(), Violation> {
        for doc in 0..reader.max_doc() {
            if let Err(e) = reader.document(DocId(doc)) {
                return Err(Violation::from_error(self, reader, e).with("doc", doc));
            }
        }
        Ok(())
    }
}
