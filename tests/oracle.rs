// Differential test: drive a PieceTree and a plain String through the same
// randomized edit sequence and check every read agrees.

use fresh_piece_buffer::eol::Eol;
use fresh_piece_buffer::{PieceTree, Position};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert { offset: u32, text: String },
    Delete { offset: u32, count: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u32>(), "[a-z\n\r]{0,6}").prop_map(|(offset, text)| Op::Insert { offset, text }),
        (any::<u32>(), 0u32..8).prop_map(|(offset, count)| Op::Delete { offset, count }),
    ]
}

fn eol_strategy() -> impl Strategy<Value = Eol> {
    prop_oneof![Just(Eol::Lf), Just(Eol::CrLf)]
}

/// Byte offsets of every line start in `s`, counting a bare CR, a bare LF,
/// and a CRLF pair each as exactly one line break (§4.2). Deliberately a
/// second, independent implementation of that classification rather than a
/// call into the crate's own `line_starts` module, so a bug in the crate's
/// scan can't also corrupt the oracle that's supposed to catch it.
fn oracle_line_starts(s: &str) -> Vec<usize> {
    let bytes = s.as_bytes();
    let mut starts = vec![0usize];
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                i += if i + 1 < bytes.len() && bytes[i + 1] == b'\n' { 2 } else { 1 };
                starts.push(i);
            }
            b'\n' => {
                i += 1;
                starts.push(i);
            }
            _ => i += 1,
        }
    }
    starts
}

fn oracle_line_count(s: &str) -> u32 {
    oracle_line_starts(s).len() as u32
}

fn oracle_position(s: &str, byte_offset: usize) -> (u32, u32) {
    let starts = oracle_line_starts(s);
    let byte_offset = byte_offset.min(s.len());
    let line_idx = starts.iter().rposition(|&st| st <= byte_offset).unwrap_or(0);
    let col = byte_offset - starts[line_idx];
    (line_idx as u32 + 1, col as u32 + 1)
}

fn oracle_line_content(s: &str, line: u32) -> String {
    let starts = oracle_line_starts(s);
    let idx = (line - 1) as usize;
    if idx >= starts.len() {
        return String::new();
    }
    let start = starts[idx];
    let end = starts.get(idx + 1).copied().unwrap_or(s.len());
    s[start..end].trim_end_matches(['\r', '\n']).to_string()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn matches_string_reference(
        eol in eol_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let mut pt = PieceTree::empty(eol);
        let mut oracle = String::new();

        for op in ops {
            match op {
                Op::Insert { offset, text } => {
                    let offset = (offset as usize).min(oracle.len()) as u32;
                    let offset = clamp_to_char_boundary(&oracle, offset);
                    pt.insert(offset, &text, false);
                    oracle.insert_str(offset as usize, &text);
                }
                Op::Delete { offset, count } => {
                    let offset = (offset as usize).min(oracle.len()) as u32;
                    let offset = clamp_to_char_boundary(&oracle, offset);
                    let count = count.min(oracle.len() as u32 - offset);
                    let end = clamp_to_char_boundary(&oracle, offset + count);
                    pt.delete(offset, end - offset);
                    oracle.replace_range(offset as usize..end as usize, "");
                }
            }

            prop_assert_eq!(pt.get_length(), oracle.len() as u32);
            prop_assert_eq!(pt.get_line_count(), oracle_line_count(&oracle));
            let whole_end = pt.get_position_at(pt.get_length());
            prop_assert_eq!(
                pt.get_value_in_range(Position::new(1, 1), whole_end),
                oracle.clone()
            );

            for byte_offset in (0..=oracle.len()).step_by((oracle.len() / 5).max(1)) {
                let (exp_line, exp_col) = oracle_position(&oracle, byte_offset);
                let pos = pt.get_position_at(byte_offset as u32);
                prop_assert_eq!((pos.line, pos.column), (exp_line, exp_col));
                prop_assert_eq!(pt.get_offset_at(pos.line, pos.column), byte_offset as u32);
            }

            for line in 1..=oracle_line_count(&oracle) {
                prop_assert_eq!(pt.get_line_content(line), oracle_line_content(&oracle, line));
            }
        }
    }
}

fn clamp_to_char_boundary(s: &str, mut offset: u32) -> u32 {
    while offset > 0 && !s.is_char_boundary(offset as usize) {
        offset -= 1;
    }
    offset
}
