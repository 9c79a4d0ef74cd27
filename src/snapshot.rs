//! Point-in-time view of a buffer's content.
//!
//! A [`Snapshot`] eagerly materializes the document as an owned list of
//! string chunks (one per piece, in order) at the moment it's taken. This
//! costs an O(N) copy up front but sidesteps the alternative of holding
//! live references into the piece tree: the tree's arena slots are never
//! recycled (see [`crate::rb_tree`]), but they can still be mutated by
//! later edits (CRLF fix-up rewrites pieces in place, a split shrinks one
//! and creates another), so a reference-based snapshot would silently
//! drift. Copying guarantees a snapshot always reads back exactly what it
//! saw when created, with no unsafe code and no lifetime coupling to the
//! tree that produced it (§4.9, §7).

#[derive(Debug, Clone)]
pub struct Snapshot {
    bom: Option<String>,
    chunks: Vec<String>,
    next_chunk: usize,
}

impl Snapshot {
    pub(crate) fn new(bom: Option<String>, chunks: Vec<String>) -> Self {
        Snapshot {
            bom,
            chunks,
            next_chunk: 0,
        }
    }

    /// Returns the next chunk of text, or `None` once every chunk (and the
    /// BOM, if any) has been consumed. Mirrors a streaming-reader API
    /// rather than handing back the whole string at once, since the whole
    /// point of chunking is to avoid forcing a single giant allocation on
    /// the reader.
    pub fn read(&mut self) -> Option<String> {
        if let Some(bom) = self.bom.take() {
            if !bom.is_empty() {
                return Some(bom);
            }
        }
        if self.next_chunk >= self.chunks.len() {
            return None;
        }
        let chunk = self.chunks[self.next_chunk].clone();
        self.next_chunk += 1;
        Some(chunk)
    }

    /// Collects every remaining chunk into a single `String`. Convenience
    /// wrapper over [`Snapshot::read`] for callers that don't care about
    /// streaming.
    pub fn collect_to_string(mut self) -> String {
        let mut out = String::new();
        while let Some(chunk) = self.read() {
            out.push_str(&chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_reads_nothing() {
        let mut snap = Snapshot::new(None, vec![]);
        assert_eq!(snap.read(), None);
    }

    #[test]
    fn reads_bom_then_chunks_then_none() {
        let mut snap = Snapshot::new(
            Some("\u{feff}".to_string()),
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(snap.read(), Some("\u{feff}".to_string()));
        assert_eq!(snap.read(), Some("a".to_string()));
        assert_eq!(snap.read(), Some("b".to_string()));
        assert_eq!(snap.read(), None);
    }

    #[test]
    fn collect_to_string_joins_chunks() {
        let snap = Snapshot::new(None, vec!["hello ".to_string(), "world".to_string()]);
        assert_eq!(snap.collect_to_string(), "hello world");
    }

    #[test]
    fn empty_bom_is_skipped() {
        let mut snap = Snapshot::new(Some(String::new()), vec!["x".to_string()]);
        assert_eq!(snap.read(), Some("x".to_string()));
        assert_eq!(snap.read(), None);
    }
}
