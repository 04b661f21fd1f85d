//! Chunk-boundary invariance of stdout line reassembly

use claudewire_transport::LineBuffer;
use proptest::prelude::*;

fn reassemble(payload: &[u8], cuts: &[usize]) -> (Vec<String>, Option<String>) {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (payload.len() + 1)).collect();
    cuts.sort_unstable();

    let mut buffer = LineBuffer::new();
    let mut lines = Vec::new();
    let mut start = 0;
    for cut in cuts {
        lines.extend(buffer.push(&payload[start..cut]));
        start = cut;
    }
    lines.extend(buffer.push(&payload[start..]));
    (lines, buffer.finish())
}

proptest! {
    #[test]
    fn split_points_do_not_change_lines(
        lines in prop::collection::vec("[a-z{}\":,0-9 é]{0,20}", 0..8),
        trailing in "[a-z]{0,5}",
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let mut payload = String::new();
        for line in &lines {
            payload.push_str(line);
            payload.push('\n');
        }
        payload.push_str(&trailing);
        let bytes = payload.as_bytes();

        let whole = reassemble(bytes, &[]);
        let split = reassemble(bytes, &cuts);

        prop_assert_eq!(&whole.0, &lines);
        prop_assert_eq!(whole, split);
    }

    #[test]
    fn every_byte_split_matches(payload in "[a-z\n]{0,40}") {
        let bytes = payload.as_bytes();
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        for byte in bytes {
            lines.extend(buffer.push(std::slice::from_ref(byte)));
        }

        let expected: Vec<String> = match payload.rfind('\n') {
            Some(end) => payload[..end].split('\n').map(str::to_string).collect(),
            None => Vec::new(),
        };
        prop_assert_eq!(lines, expected);
    }
}
