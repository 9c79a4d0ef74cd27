//! The orchestrator: owns the buffer store, the augmented red-black tree,
//! EOL settings, and the search cache, and drives every public read and
//! write the buffer exposes.
//!
//! All mutation enters through [`PieceTree::insert`] / [`PieceTree::delete`],
//! which locate the affected node(s) via a root-to-leaf descent over
//! [`crate::rb_tree::Tree`]'s `size_left`/`lf_left` aggregates, edit or split
//! the node(s)' [`crate::piece::Piece`]s, run the CRLF boundary fix-up, and
//! refresh the cached `total_length`/`total_lines`. All reads descend the
//! same way. See the module docs on `rb_tree`, `buffer_store`, and
//! `search_cache` for how each collaborator is built.

use crate::buffer_store::{BufferStore, APPEND_BUFFER_INDEX};
use crate::eol::Eol;
use crate::error::BufferError;
use crate::piece::{BufferCursor, Piece};
use crate::rb_tree::{NodeId, Tree, NIL};
use crate::search_cache::{CacheEntry, SearchCache};
use crate::snapshot::Snapshot;

/// A 1-based line/column position in the public API (§6: "Positions are
/// 1-based for line and column in the public API; offsets are 0-based
/// bytes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

/// Target chunk size used by [`PieceTree::set_eol`] when coalescing the
/// document before rewriting every terminator (§4.8: "between 2/3 and 4/3
/// of a 64 KiB target").
const EOL_REWRITE_CHUNK_TARGET: usize = 64 * 1024;

/// The piece-tree text buffer.
pub struct PieceTree {
    tree: Tree,
    buffers: BufferStore,
    eol: Eol,
    eol_normalized: bool,
    total_length: u32,
    total_lines: u32,
    search_cache: SearchCache,
}

impl PieceTree {
    /// Builds a buffer from an ordered sequence of immutable chunks (§6:
    /// "Required from clients"). Each non-empty chunk becomes one original
    /// buffer; chunk boundaries are run through the same CRLF fix-up as a
    /// live edit, since a caller-supplied chunk split can itself straddle a
    /// `\r\n` pair.
    pub fn new(chunks: Vec<String>, eol: Eol, already_normalized: bool) -> Self {
        let mut pt = PieceTree {
            tree: Tree::new(),
            buffers: BufferStore::new(),
            eol,
            eol_normalized: already_normalized,
            total_length: 0,
            total_lines: 1,
            search_cache: SearchCache::new(),
        };

        let mut prev_node: Option<NodeId> = None;
        let mut chunk_count = 0u32;
        for chunk in chunks {
            if chunk.is_empty() {
                continue;
            }
            chunk_count += 1;
            let buf_idx = pt.buffers.add_original(chunk);
            let (end, length) = {
                let buf = pt.buffers.buffer(buf_idx);
                (buf.end_cursor(), buf.content.len() as u32)
            };
            let start = BufferCursor::new(0, 0);
            let piece = Piece {
                buffer_index: buf_idx,
                start,
                end,
                length,
                line_feed_count: end.line - start.line,
            };
            let node = match prev_node {
                None => pt.tree.insert_as_root(piece),
                Some(p) => pt.tree.insert_right(p, piece),
            };
            pt.validate_with_prev(node);
            prev_node = Some(node);
        }
        pt.recompute_totals();
        pt.debug_check_invariants();
        tracing::debug!(
            chunk_count,
            total_length = pt.total_length,
            total_lines = pt.total_lines,
            "constructed piece tree"
        );
        pt
    }

    /// Builds an empty buffer.
    pub fn empty(eol: Eol) -> Self {
        PieceTree::new(Vec::new(), eol, true)
    }

    // ---- length / line count -------------------------------------------

    pub fn get_length(&self) -> u32 {
        self.total_length
    }

    pub fn get_line_count(&self) -> u32 {
        self.total_lines
    }

    // ---- node location (§4.4) ------------------------------------------

    /// Total bytes currently in the tree, derived from the rightmost
    /// node's start offset plus its length. Used internally by `delete`
    /// before `total_length` has been refreshed for the in-progress edit.
    fn tree_total_bytes(&self) -> u32 {
        if self.tree.is_empty() {
            return 0;
        }
        let rm = self.tree.rightmost(self.tree.root());
        self.node_start_offset(rm) + self.tree.piece(rm).length
    }

    fn node_start_offset(&self, node: NodeId) -> u32 {
        if node == NIL {
            return 0;
        }
        let mut offset = self.tree.size_left(node);
        let mut x = node;
        loop {
            let p = self.tree.parent(x);
            if p == NIL {
                break;
            }
            if self.tree.right(p) == x {
                offset += self.tree.size_left(p) + self.tree.piece(p).length;
            }
            x = p;
        }
        offset
    }

    fn node_start_line(&self, node: NodeId) -> u32 {
        if node == NIL {
            return 0;
        }
        let mut lf = self.tree.lf_left(node);
        let mut x = node;
        loop {
            let p = self.tree.parent(x);
            if p == NIL {
                break;
            }
            if self.tree.right(p) == x {
                lf += self.tree.lf_left(p) + self.tree.piece(p).line_feed_count;
            }
            x = p;
        }
        lf
    }

    /// Descends from the root using `size_left` to find the node whose
    /// piece covers `offset`. Consults the search cache first (§4.10).
    /// Returns `(node, remainder_within_piece, node_start_offset)`.
    fn find_node_at_offset(&mut self, offset: u32) -> (NodeId, u32, u32) {
        if let Some(entry) = self
            .search_cache
            .get(offset, |n| self.tree.piece(n).length)
        {
            tracing::trace!(offset, "search cache hit (offset)");
            return (entry.node, offset - entry.node_start_offset, entry.node_start_offset);
        }
        tracing::trace!(offset, "search cache miss (offset)");

        let mut x = self.tree.root();
        let mut rem = offset;
        let mut node_start_offset = 0u32;
        loop {
            let size_left = self.tree.size_left(x);
            if rem < size_left {
                x = self.tree.left(x);
                continue;
            }
            let len = self.tree.piece(x).length;
            if rem <= size_left + len {
                node_start_offset += size_left;
                let remainder = rem - size_left;
                let node_start_line = self.node_start_line(x);
                self.search_cache.set(CacheEntry {
                    node: x,
                    node_start_offset,
                    node_start_line,
                });
                return (x, remainder, node_start_offset);
            }
            rem -= size_left + len;
            node_start_offset += size_left + len;
            x = self.tree.right(x);
        }
    }

    /// Descends using `lf_left` to find the node spanning 0-based document
    /// line `target_line`. Returns `(node, node_start_line)`.
    fn find_node_at_line(&mut self, target_line: u32) -> (NodeId, u32) {
        if let Some(entry) = self
            .search_cache
            .get2(target_line + 1, |n| self.tree.piece(n).line_feed_count)
        {
            tracing::trace!(target_line, "search cache hit (line)");
            return (entry.node, entry.node_start_line);
        }
        tracing::trace!(target_line, "search cache miss (line)");

        let mut x = self.tree.root();
        let mut rem = target_line;
        let mut node_start_line = 0u32;
        loop {
            let lf_left = self.tree.lf_left(x);
            if rem < lf_left {
                x = self.tree.left(x);
                continue;
            }
            let lf = self.tree.piece(x).line_feed_count;
            if rem <= lf_left + lf {
                node_start_line += lf_left;
                let node_start_offset = self.node_start_offset(x);
                self.search_cache.set(CacheEntry {
                    node: x,
                    node_start_offset,
                    node_start_line,
                });
                return (x, node_start_line);
            }
            rem -= lf_left + lf;
            node_start_line += lf_left + lf;
            x = self.tree.right(x);
        }
    }

    fn offset_in_buffer(&self, piece: &Piece, cursor: BufferCursor) -> u32 {
        self.buffers.buffer(piece.buffer_index).cursor_to_offset(cursor)
    }

    fn cursor_for_buffer_offset(&self, buf_idx: usize, buf_offset: u32) -> BufferCursor {
        let buf = self.buffers.buffer(buf_idx);
        let line = match buf.line_starts.binary_search(&buf_offset) {
            Ok(i) => i as u32,
            Err(i) => (i - 1) as u32,
        };
        BufferCursor::new(line, buf_offset - buf.line_starts[line as usize])
    }

    // ---- offset / position duality (§4.4) -------------------------------

    pub fn get_offset_at(&mut self, line: u32, column: u32) -> u32 {
        if self.tree.is_empty() {
            return 0;
        }
        let line_count = self.total_lines;
        let line = line.clamp(1, line_count);
        let target_line0 = line - 1;
        let (node, node_start_line) = self.find_node_at_line(target_line0);
        let piece = self.tree.piece(node).clone();
        let buf = self.buffers.buffer(piece.buffer_index);
        let line_in_piece = target_line0 - node_start_line;

        let line_start_in_buf = if line_in_piece == 0 {
            buf.cursor_to_offset(piece.start)
        } else {
            buf.line_starts[(piece.start.line + line_in_piece) as usize]
        };
        let line_end_in_buf = if line_in_piece == piece.line_feed_count {
            buf.cursor_to_offset(piece.end)
        } else {
            buf.line_starts[(piece.start.line + line_in_piece + 1) as usize]
        };

        let node_start_offset = self.node_start_offset(node);
        let piece_start_off = buf.cursor_to_offset(piece.start);
        let col0 = (column.saturating_sub(1)).min(line_end_in_buf - line_start_in_buf);
        node_start_offset + (line_start_in_buf - piece_start_off) + col0
    }

    pub fn get_position_at(&mut self, offset: u32) -> Position {
        if self.tree.is_empty() {
            return Position::new(1, 1);
        }
        let offset = offset.min(self.total_length);
        let (node, remainder, _node_start_offset) = self.find_node_at_offset(offset);
        let piece = self.tree.piece(node).clone();
        let buf = self.buffers.buffer(piece.buffer_index);
        let target_off = buf.cursor_to_offset(piece.start) + remainder;
        let target_line = match buf.line_starts.binary_search(&target_off) {
            Ok(i) => i as u32,
            Err(i) => (i - 1) as u32,
        };
        let target_col = target_off - buf.line_starts[target_line as usize];

        let node_start_line = self.node_start_line(node);
        let line_in_piece = target_line - piece.start.line;
        let doc_line = node_start_line + line_in_piece + 1;
        let doc_column = if line_in_piece == 0 {
            target_col - piece.start.column + 1
        } else {
            target_col + 1
        };
        Position::new(doc_line, doc_column)
    }

    // ---- range / line content (§4.4) ------------------------------------

    fn get_value_in_range_by_offset(&mut self, start: u32, end: u32) -> String {
        let total = self.total_length;
        let start = start.min(total);
        let end = end.clamp(start, total);
        if start == end || self.tree.is_empty() {
            return String::new();
        }
        let (start_node, start_remainder, _) = self.find_node_at_offset(start);
        let (end_node, end_remainder, _) = self.find_node_at_offset(end);

        if start_node == end_node {
            let piece = self.tree.piece(start_node).clone();
            let buf = self.buffers.buffer(piece.buffer_index);
            let base = buf.cursor_to_offset(piece.start) as usize;
            return buf.content[base + start_remainder as usize..base + end_remainder as usize]
                .to_string();
        }

        let mut out = String::new();
        {
            let piece = self.tree.piece(start_node).clone();
            let buf = self.buffers.buffer(piece.buffer_index);
            let base = buf.cursor_to_offset(piece.start) as usize;
            out.push_str(&buf.content[base + start_remainder as usize..base + piece.length as usize]);
        }
        let mut x = self.tree.next(start_node);
        while x != end_node && x != NIL {
            let piece = self.tree.piece(x).clone();
            let buf = self.buffers.buffer(piece.buffer_index);
            out.push_str(buf.slice(piece.start, piece.end));
            x = self.tree.next(x);
        }
        {
            let piece = self.tree.piece(end_node).clone();
            let buf = self.buffers.buffer(piece.buffer_index);
            let base = buf.cursor_to_offset(piece.start) as usize;
            out.push_str(&buf.content[base..base + end_remainder as usize]);
        }
        out
    }

    pub fn get_value_in_range(&mut self, start: Position, end: Position) -> String {
        let start_off = self.get_offset_at(start.line, start.column);
        let end_off = self.get_offset_at(end.line, end.column);
        let (lo, hi) = if start_off <= end_off {
            (start_off, end_off)
        } else {
            (end_off, start_off)
        };
        self.get_value_in_range_by_offset(lo, hi)
    }

    /// Raw line content: from the start of `line` to the start of the
    /// next line (or end of document), with the trailing terminator
    /// stripped. A single line's raw span can contain at most one
    /// terminator, so a greedy trim of trailing CR/LF bytes is exact
    /// regardless of whether the buffer is EOL-normalized (§4.4).
    pub fn get_line_content(&mut self, line: u32) -> String {
        let line_count = self.total_lines;
        let line = line.clamp(1, line_count);
        let start = self.get_offset_at(line, 1);
        let end = if line == line_count {
            self.total_length
        } else {
            self.get_offset_at(line + 1, 1)
        };
        let raw = self.get_value_in_range_by_offset(start, end);
        raw.trim_end_matches(['\r', '\n']).to_string()
    }

    pub fn get_line_length(&mut self, line: u32) -> u32 {
        self.get_line_content(line).len() as u32
    }

    pub fn get_line_char_code_at(&mut self, line: u32, column_index: u32) -> u8 {
        let content = self.get_line_content(line);
        content.as_bytes().get(column_index as usize).copied().unwrap_or(0)
    }

    pub fn get_lines_content(&mut self) -> Vec<String> {
        (1..=self.total_lines).map(|l| self.get_line_content(l)).collect()
    }

    // ---- mutation: insert (§4.5) -----------------------------------------

    fn create_piece(&mut self, text: &str) -> Piece {
        let (start, end, lf) = self.buffers.append_for_insert(text);
        Piece {
            buffer_index: APPEND_BUFFER_INDEX,
            start,
            end,
            length: text.len() as u32,
            line_feed_count: lf,
        }
    }

    fn is_append_tail_fast_path(&self, node: NodeId, node_start_offset: u32, offset: u32) -> bool {
        let piece = self.tree.piece(node);
        piece.buffer_index == APPEND_BUFFER_INDEX
            && piece.end == self.buffers.append_buffer_end_cursor()
            && node_start_offset + piece.length == offset
    }

    fn extend_piece_in_place(&mut self, node: NodeId, text: &str) {
        let (end, lf_delta) = self.buffers.append_for_extend(text);
        let mut piece = self.tree.piece(node).clone();
        piece.end = end;
        piece.length += text.len() as u32;
        piece.line_feed_count += lf_delta;
        self.tree.set_piece(node, piece);
        self.tree
            .update_aggregates(node, text.len() as i64, lf_delta as i64);
    }

    fn insert_mid_piece(&mut self, node: NodeId, remainder: u32, text: &str, skip_crlf_fixup: bool) {
        let piece = self.tree.piece(node).clone();
        let piece_start_off = self.offset_in_buffer(&piece, piece.start);
        let split_cursor = self.cursor_for_buffer_offset(piece.buffer_index, piece_start_off + remainder);

        let left_piece = Piece {
            buffer_index: piece.buffer_index,
            start: piece.start,
            end: split_cursor,
            length: remainder,
            line_feed_count: split_cursor.line - piece.start.line,
        };
        let right_piece = Piece {
            buffer_index: piece.buffer_index,
            start: split_cursor,
            end: piece.end,
            length: piece.length - remainder,
            line_feed_count: piece.end.line - split_cursor.line,
        };

        let delta_bytes = left_piece.length as i64 - piece.length as i64;
        let delta_lfs = left_piece.line_feed_count as i64 - piece.line_feed_count as i64;
        self.tree.set_piece(node, left_piece);
        self.tree.update_aggregates(node, delta_bytes, delta_lfs);

        let new_text_piece = self.create_piece(text);
        let text_node = self.tree.insert_right(node, new_text_piece);
        let right_node = self.tree.insert_right(text_node, right_piece);

        if !skip_crlf_fixup {
            self.validate_with_prev(text_node);
            self.validate_with_next(text_node);
        }
    }

    /// Inserts `text` at `offset`. `already_eol_normalized` tells the
    /// buffer the caller already rewrote `text`'s terminators to match
    /// `self.eol`, letting it skip the CRLF boundary scan (§6, §10.5). The
    /// scan is also skipped whenever the buffer as a whole is normalized
    /// to LF, since no CR can then be present to straddle a boundary
    /// (§4.6: fix-ups are "needed whenever eol_normalized is false or
    /// when eol = CRLF").
    pub fn insert(&mut self, offset: u32, text: &str, already_eol_normalized: bool) {
        if text.is_empty() {
            return;
        }
        let offset = offset.min(self.total_length);
        tracing::trace!(offset, len = text.len(), "insert");
        let skip_fixup =
            already_eol_normalized || (self.eol_normalized && self.eol == Eol::Lf);

        if self.tree.is_empty() {
            let piece = self.create_piece(text);
            self.tree.insert_as_root(piece);
        } else {
            let (node, remainder, node_start_offset) = self.find_node_at_offset(offset);
            if self.is_append_tail_fast_path(node, node_start_offset, offset) {
                self.extend_piece_in_place(node, text);
                if !skip_fixup {
                    self.validate_with_next(node);
                }
            } else if node_start_offset == offset {
                let piece = self.create_piece(text);
                let new_node = self.tree.insert_left(node, piece);
                if !skip_fixup {
                    self.validate_with_prev(new_node);
                    self.validate_with_next(new_node);
                }
            } else if node_start_offset + self.tree.piece(node).length == offset {
                let piece = self.create_piece(text);
                let new_node = self.tree.insert_right(node, piece);
                if !skip_fixup {
                    self.validate_with_prev(new_node);
                    self.validate_with_next(new_node);
                }
            } else {
                self.insert_mid_piece(node, remainder, text, skip_fixup);
            }
        }
        self.eol_normalized = self.eol_normalized && already_eol_normalized;
        self.recompute_totals();
        self.search_cache.invalidate();
        self.debug_check_invariants();
    }

    // ---- mutation: delete (§4.5) ------------------------------------------

    fn advance_piece_start(&mut self, node: NodeId, remainder: u32) {
        let piece = self.tree.piece(node).clone();
        let piece_start_off = self.offset_in_buffer(&piece, piece.start);
        let new_start = self.cursor_for_buffer_offset(piece.buffer_index, piece_start_off + remainder);
        let mut new_piece = piece.clone();
        new_piece.start = new_start;
        new_piece.length = piece.length - remainder;
        new_piece.line_feed_count = piece.end.line - new_start.line;
        let delta_bytes = new_piece.length as i64 - piece.length as i64;
        let delta_lfs = new_piece.line_feed_count as i64 - piece.line_feed_count as i64;
        self.tree.set_piece(node, new_piece);
        self.tree.update_aggregates(node, delta_bytes, delta_lfs);
    }

    fn retract_piece_end(&mut self, node: NodeId, new_length: u32) {
        let piece = self.tree.piece(node).clone();
        let piece_start_off = self.offset_in_buffer(&piece, piece.start);
        let new_end = self.cursor_for_buffer_offset(piece.buffer_index, piece_start_off + new_length);
        let mut new_piece = piece.clone();
        new_piece.end = new_end;
        new_piece.length = new_length;
        new_piece.line_feed_count = new_end.line - piece.start.line;
        let delta_bytes = new_piece.length as i64 - piece.length as i64;
        let delta_lfs = new_piece.line_feed_count as i64 - piece.line_feed_count as i64;
        self.tree.set_piece(node, new_piece);
        self.tree.update_aggregates(node, delta_bytes, delta_lfs);
    }

    fn split_delete_middle(&mut self, node: NodeId, start_remainder: u32, end_remainder: u32) {
        let piece = self.tree.piece(node).clone();
        let piece_start_off = self.offset_in_buffer(&piece, piece.start);
        let left_end = self.cursor_for_buffer_offset(piece.buffer_index, piece_start_off + start_remainder);
        let right_start = self.cursor_for_buffer_offset(piece.buffer_index, piece_start_off + end_remainder);

        let left_piece = Piece {
            buffer_index: piece.buffer_index,
            start: piece.start,
            end: left_end,
            length: start_remainder,
            line_feed_count: left_end.line - piece.start.line,
        };
        let right_piece = Piece {
            buffer_index: piece.buffer_index,
            start: right_start,
            end: piece.end,
            length: piece.length - end_remainder,
            line_feed_count: piece.end.line - right_start.line,
        };

        let delta_bytes = left_piece.length as i64 - piece.length as i64;
        let delta_lfs = left_piece.line_feed_count as i64 - piece.line_feed_count as i64;
        self.tree.set_piece(node, left_piece);
        self.tree.update_aggregates(node, delta_bytes, delta_lfs);
        self.tree.insert_right(node, right_piece);
    }

    /// Deletes `count` bytes starting at `offset`. A zero-length deletion,
    /// or one on an empty tree, is a silent no-op (§7).
    pub fn delete(&mut self, offset: u32, count: u32) {
        if count == 0 || self.tree.is_empty() {
            return;
        }
        let offset = offset.min(self.total_length);
        let count = count.min(self.total_length - offset);
        if count == 0 {
            return;
        }
        let end_offset = offset + count;
        tracing::trace!(offset, count, "delete");

        let (start_node, start_remainder, _) = self.find_node_at_offset(offset);
        let (end_node, end_remainder, _) = self.find_node_at_offset(end_offset);

        if start_node == end_node {
            let piece_len = self.tree.piece(start_node).length;
            if start_remainder == 0 && end_remainder == piece_len {
                self.tree.delete(start_node);
            } else if start_remainder == 0 {
                self.advance_piece_start(start_node, end_remainder);
            } else if end_remainder == piece_len {
                self.retract_piece_end(start_node, start_remainder);
            } else {
                self.split_delete_middle(start_node, start_remainder, end_remainder);
            }
        } else {
            let start_now_empty = start_remainder == 0;
            if !start_now_empty {
                self.retract_piece_end(start_node, start_remainder);
            }
            let end_piece_len = self.tree.piece(end_node).length;
            let end_now_empty = end_remainder == end_piece_len;
            if !end_now_empty {
                self.advance_piece_start(end_node, end_remainder);
            }

            let mut between = Vec::new();
            let mut x = self.tree.next(start_node);
            while x != end_node && x != NIL {
                between.push(x);
                x = self.tree.next(x);
            }
            for n in between {
                self.tree.delete(n);
            }
            if start_now_empty {
                self.tree.delete(start_node);
            }
            if end_now_empty {
                self.tree.delete(end_node);
            }
        }

        let skip_fixup = self.eol_normalized && self.eol == Eol::Lf;
        if !skip_fixup && !self.tree.is_empty() {
            let probe = offset.min(self.tree_total_bytes());
            let (node, remainder, _) = self.find_node_at_offset(probe);
            if remainder == 0 {
                self.validate_with_prev(node);
            }
        }

        self.recompute_totals();
        self.search_cache.invalidate();
        self.debug_check_invariants();
    }

    /// Walks the whole tree checking the red-black and aggregate
    /// invariants. Only compiled into debug builds and tests (§8 invariants
    /// 3-4; §10.1): a failure here means a bug in this module, not bad
    /// input, so it is treated as unrecoverable rather than surfaced as a
    /// normal `Result`.
    #[cfg(debug_assertions)]
    fn debug_check_invariants(&self) {
        if let Err(msg) = self.tree.check_invariants() {
            let err = BufferError::InvariantViolation(msg);
            panic!("{err}");
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_check_invariants(&self) {}

    // ---- CRLF boundary fix-up (§4.6) --------------------------------------

    fn piece_first_byte(&self, node: NodeId) -> Option<u8> {
        let piece = self.tree.piece(node);
        if piece.length == 0 {
            return None;
        }
        let buf = self.buffers.buffer(piece.buffer_index);
        let off = buf.cursor_to_offset(piece.start);
        buf.content.as_bytes().get(off as usize).copied()
    }

    fn piece_last_byte(&self, node: NodeId) -> Option<u8> {
        let piece = self.tree.piece(node);
        if piece.length == 0 {
            return None;
        }
        let buf = self.buffers.buffer(piece.buffer_index);
        let off = buf.cursor_to_offset(piece.end);
        buf.content.as_bytes().get(off as usize - 1).copied()
    }

    fn validate_with_prev(&mut self, node: NodeId) {
        if node == NIL || self.piece_first_byte(node) != Some(b'\n') {
            return;
        }
        let prev = self.tree.prev(node);
        if prev != NIL && self.piece_last_byte(prev) == Some(b'\r') {
            self.fix_crlf(prev, node);
        }
    }

    fn validate_with_next(&mut self, node: NodeId) {
        if node == NIL || self.piece_last_byte(node) != Some(b'\r') {
            return;
        }
        let next = self.tree.next(node);
        if next != NIL && self.piece_first_byte(next) == Some(b'\n') {
            self.fix_crlf(node, next);
        }
    }

    /// Shrinks `prev` by its trailing CR, `next` by its leading LF, and
    /// inserts a fresh `"\r\n"` piece between them — so a line break is
    /// never split `\r | \n` across two pieces (§4.6). The replacement
    /// piece is always inserted before either neighbor is (possibly)
    /// deleted, so there's never a moment with no valid anchor node.
    fn fix_crlf(&mut self, prev: NodeId, next: NodeId) {
        let prev_piece = self.tree.piece(prev).clone();
        let prev_end_off = self.offset_in_buffer(&prev_piece, prev_piece.end);
        let new_prev_end = self.cursor_for_buffer_offset(prev_piece.buffer_index, prev_end_off - 1);
        let mut shrunk_prev = prev_piece.clone();
        shrunk_prev.end = new_prev_end;
        shrunk_prev.length -= 1;
        shrunk_prev.line_feed_count = new_prev_end.line - prev_piece.start.line;
        let prev_now_empty = shrunk_prev.length == 0;
        self.tree.set_piece(prev, shrunk_prev.clone());
        self.tree.update_aggregates(
            prev,
            shrunk_prev.length as i64 - prev_piece.length as i64,
            shrunk_prev.line_feed_count as i64 - prev_piece.line_feed_count as i64,
        );

        let next_piece = self.tree.piece(next).clone();
        let next_start_off = self.offset_in_buffer(&next_piece, next_piece.start);
        let new_next_start = self.cursor_for_buffer_offset(next_piece.buffer_index, next_start_off + 1);
        let mut shrunk_next = next_piece.clone();
        shrunk_next.start = new_next_start;
        shrunk_next.length -= 1;
        shrunk_next.line_feed_count = next_piece.end.line - new_next_start.line;
        let next_now_empty = shrunk_next.length == 0;
        self.tree.set_piece(next, shrunk_next.clone());
        self.tree.update_aggregates(
            next,
            shrunk_next.length as i64 - next_piece.length as i64,
            shrunk_next.line_feed_count as i64 - next_piece.line_feed_count as i64,
        );

        let crlf_piece = self.create_piece("\r\n");
        self.tree.insert_right(prev, crlf_piece);

        if prev_now_empty {
            self.tree.delete(prev);
        }
        if next_now_empty {
            self.tree.delete(next);
        }
    }

    // ---- totals, EOL, snapshot, equality -----------------------------------

    /// Recomputes `total_length`/`total_lines` with a single in-order walk
    /// (§4.5). A CRLF fix-up can change the total line-break count (a bare
    /// CR plus a bare LF, two breaks, merge into one `\r\n`), so these
    /// cannot be tracked purely as running counters of a single edit's
    /// input; folding the whole tree after every edit is the simplest
    /// implementation that is obviously correct.
    fn recompute_totals(&mut self) {
        let mut length = 0u32;
        let mut lf = 0u32;
        if !self.tree.is_empty() {
            let mut x = self.tree.leftmost(self.tree.root());
            while x != NIL {
                let piece = self.tree.piece(x);
                length += piece.length;
                lf += piece.line_feed_count;
                x = self.tree.next(x);
            }
        }
        self.total_length = length;
        self.total_lines = 1 + lf;
    }

    pub fn set_eol(&mut self, new_eol: Eol) {
        tracing::debug!(?new_eol, nodes = self.tree.arena_len(), "set_eol");
        let whole = self.get_value_in_range_by_offset(0, self.total_length);
        let rewritten = rewrite_eol(&whole, new_eol);
        let chunks = chunk_text(&rewritten, EOL_REWRITE_CHUNK_TARGET);
        *self = PieceTree::new(chunks, new_eol, true);
    }

    pub fn create_snapshot(&self, bom: String) -> Snapshot {
        let mut chunks = Vec::new();
        if !self.tree.is_empty() {
            let mut x = self.tree.leftmost(self.tree.root());
            while x != NIL {
                let piece = self.tree.piece(x);
                let buf = self.buffers.buffer(piece.buffer_index);
                chunks.push(buf.slice(piece.start, piece.end).to_string());
                x = self.tree.next(x);
            }
        }
        let bom = if bom.is_empty() { None } else { Some(bom) };
        Snapshot::new(bom, chunks)
    }

    /// Streaming content comparison: equal length, equal line count, and
    /// byte-identical content compared in bounded windows regardless of
    /// how each tree's pieces happen to be laid out. Two trees with
    /// identical content but different piece structure therefore always
    /// compare equal (§9's open question).
    pub fn equal(&mut self, other: &mut PieceTree) -> bool {
        if self.total_length != other.total_length || self.total_lines != other.total_lines {
            return false;
        }
        const WINDOW: u32 = 64 * 1024;
        let mut pos = 0u32;
        while pos < self.total_length {
            let end = (pos + WINDOW).min(self.total_length);
            if self.get_value_in_range_by_offset(pos, end) != other.get_value_in_range_by_offset(pos, end) {
                return false;
            }
            pos = end;
        }
        true
    }
}

/// Rewrites every CR, LF, and CRLF terminator in `text` to `new_eol`,
/// copying multi-byte UTF-8 sequences whole.
fn rewrite_eol(text: &str, new_eol: Eol) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                i += if i + 1 < bytes.len() && bytes[i + 1] == b'\n' { 2 } else { 1 };
                out.push_str(new_eol.as_str());
            }
            b'\n' => {
                i += 1;
                out.push_str(new_eol.as_str());
            }
            _ => {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i] & 0xC0) == 0x80 {
                    i += 1;
                }
                out.push_str(&text[start..i]);
            }
        }
    }
    out
}

/// Splits `text` into chunks near `target` bytes, snapped to UTF-8 char
/// boundaries, for `set_eol`'s tree rebuild (§4.8).
fn chunk_text(text: &str, target: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let bytes = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < bytes {
        let mut end = (start + target).min(bytes);
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = (start + target).min(bytes);
            while end < bytes && !text.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_build_and_query() {
        let mut pt = PieceTree::new(vec!["hello\nworld".to_string()], Eol::Lf, true);
        assert_eq!(pt.get_length(), 11);
        assert_eq!(pt.get_line_count(), 2);
        assert_eq!(pt.get_line_content(1), "hello");
        assert_eq!(pt.get_line_content(2), "world");
        assert_eq!(pt.get_offset_at(2, 1), 6);
        assert_eq!(pt.get_position_at(6), Position::new(2, 1));
    }

    #[test]
    fn s2_two_inserts_from_empty() {
        let mut pt = PieceTree::empty(Eol::Lf);
        pt.insert(0, "ab", false);
        pt.insert(1, "X", false);
        assert_eq!(pt.get_lines_content(), vec!["aXb".to_string()]);
        assert_eq!(pt.get_length(), 3);
    }

    #[test]
    fn s3_insert_into_crlf_buffer() {
        let mut pt = PieceTree::new(vec!["line1\r\nline2\r\n".to_string()], Eol::CrLf, true);
        pt.insert(7, "INSERT", false);
        assert_eq!(pt.get_line_content(2), "INSERTline2");
        assert_eq!(pt.get_line_count(), 3);
    }

    #[test]
    fn s4_crlf_fixup_on_insert() {
        let mut pt = PieceTree::new(vec!["a\r".to_string()], Eol::CrLf, false);
        pt.insert(2, "\nb", false);
        assert_eq!(pt.get_lines_content(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(pt.get_line_count(), 2);
    }

    #[test]
    fn s5_delete_then_range() {
        let mut pt = PieceTree::new(vec!["abcdefghij".to_string()], Eol::Lf, true);
        pt.delete(2, 5);
        let v = pt.get_value_in_range(Position::new(1, 1), Position::new(1, 6));
        assert_eq!(v, "abhij");
    }

    #[test]
    fn s6_snapshot_isolated_from_later_mutation() {
        let mut pt = PieceTree::empty(Eol::Lf);
        pt.insert(0, "ab", false);
        pt.insert(1, "X", false);
        let mut snap = pt.create_snapshot(String::new());
        pt.insert(0, "Z", false);
        assert_eq!(snap.collect_to_string(), "aXb");
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "ZaXb");
    }

    #[test]
    fn insert_then_delete_restores_content() {
        let mut pt = PieceTree::new(vec!["hello world".to_string()], Eol::Lf, true);
        pt.insert(5, ", there", false);
        pt.delete(5, 7);
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "hello world");
    }

    #[test]
    fn position_offset_duality() {
        let mut pt = PieceTree::new(vec!["abc\ndef\nghi".to_string()], Eol::Lf, true);
        for line in 1..=3u32 {
            for col in 1..=4u32 {
                let off = pt.get_offset_at(line, col);
                let pos = pt.get_position_at(off);
                let back = pt.get_offset_at(pos.line, pos.column);
                assert_eq!(off, back);
            }
        }
    }

    #[test]
    fn equal_ignores_piece_structure() {
        let mut a = PieceTree::new(vec!["hello world".to_string()], Eol::Lf, true);
        let mut b = PieceTree::empty(Eol::Lf);
        b.insert(0, "hello", false);
        b.insert(5, " world", false);
        assert!(a.equal(&mut b));
        a.insert(0, "X", false);
        assert!(!a.equal(&mut b));
    }

    #[test]
    fn mixed_terminators_never_split_crlf() {
        let mut pt = PieceTree::new(vec!["a\rb\nc".to_string()], Eol::CrLf, false);
        pt.insert(2, "\n", false);
        // after the fixup the document reads "a" + CRLF + "b\nc" rewritten
        // boundary-wise: no piece may start with a bare LF whose
        // predecessor ends with a bare CR.
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "a\r\nb\nc");
    }

    #[test]
    fn mid_piece_insert_ending_in_cr_merges_with_following_bare_lf() {
        // Splitting "a\nb" at offset 1 and inserting "X\r" leaves the new
        // text piece immediately before a right remnant that starts with a
        // bare LF ("\nb") — the CRLF boundary sits between the *inserted*
        // text and the right remnant, not between the right remnant and
        // whatever follows it.
        let mut pt = PieceTree::new(vec!["a\nb".to_string()], Eol::CrLf, false);
        pt.insert(1, "X\r", false);
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "aX\r\nb");
        assert_eq!(pt.get_line_count(), 2);
        assert_eq!(pt.get_lines_content(), vec!["aX".to_string(), "b".to_string()]);
    }

    #[test]
    fn append_tail_extend_merges_crlf_without_overcounting_lines() {
        // The second insert lands at the tail of the append buffer right
        // after the first, so it extends the existing piece in place
        // instead of splicing in a new one — the CRLF merge has to be
        // handled by that fast path too, not just the split/fix-up path.
        let mut pt = PieceTree::empty(Eol::CrLf);
        pt.insert(0, "a\r", false);
        pt.insert(2, "\nb", false);
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "a\r\nb");
        assert_eq!(pt.get_line_count(), 2);
        assert_eq!(pt.get_lines_content(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn set_eol_rewrites_terminators() {
        let mut pt = PieceTree::new(vec!["a\nb\nc".to_string()], Eol::Lf, true);
        pt.set_eol(Eol::CrLf);
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "a\r\nb\r\nc");
        assert_eq!(pt.get_line_count(), 3);
    }

    #[test]
    fn out_of_range_reads_clamp() {
        let mut pt = PieceTree::new(vec!["abc".to_string()], Eol::Lf, true);
        assert_eq!(pt.get_line_content(99), "abc");
        assert_eq!(pt.get_position_at(9999), Position::new(1, 4));
        assert_eq!(pt.get_offset_at(1, 9999), 3);
    }

    #[test]
    fn empty_mutations_are_no_ops() {
        let mut pt = PieceTree::new(vec!["abc".to_string()], Eol::Lf, true);
        pt.insert(1, "", false);
        pt.delete(1, 0);
        assert_eq!(pt.get_value_in_range_by_offset(0, pt.get_length()), "abc");
    }

    #[test]
    fn get_line_char_code_at_reads_bytes() {
        let mut pt = PieceTree::new(vec!["abc".to_string()], Eol::Lf, true);
        assert_eq!(pt.get_line_char_code_at(1, 0), b'a');
        assert_eq!(pt.get_line_char_code_at(1, 99), 0);
    }
}
