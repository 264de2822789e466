//! Word Pattern Scanning
//!
//! Patterns made of pointer-sized words, each either a fixed value or a
//! wildcard, matched at word-aligned offsets only. The longest run of fixed
//! words is used as a memchr `memmem` anchor and the full pattern is verified
//! at each hit.

use byteorder::{ByteOrder, LE};

const WORD: usize = std::mem::size_of::<u64>();

/// A sequence of fixed or wildcard 64-bit words
#[derive(Debug, Clone)]
pub struct WordPattern {
    words: Vec<Option<u64>>,
}

impl WordPattern {
    pub fn new(words: Vec<Option<u64>>) -> Self {
        WordPattern { words }
    }

    /// `first`, then `len - 2` wildcards, then `last`.
    pub fn framed(first: u64, last: u64, len: usize) -> Self {
        debug_assert!(len >= 2);
        let mut words = vec![None; len];
        words[0] = Some(first);
        words[len - 1] = Some(last);
        WordPattern { words }
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * WORD
    }

    /// Longest contiguous run of fixed words: (word index, encoded bytes).
    fn best_anchor(&self) -> Option<(usize, Vec<u8>)> {
        let mut best: Option<(usize, usize)> = None;
        let mut run_start = 0;
        let mut run_len = 0;

        for (i, word) in self.words.iter().enumerate() {
            if word.is_some() {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if best.map_or(true, |(_, len)| run_len > len) {
                    best = Some((run_start, run_len));
                }
            } else {
                run_len = 0;
            }
        }

        best.map(|(start, len)| {
            let mut bytes = vec![0u8; len * WORD];
            for (i, word) in self.words[start..start + len].iter().enumerate() {
                LE::write_u64(&mut bytes[i * WORD..], word.unwrap_or_default());
            }
            (start, bytes)
        })
    }

    /// Check the full pattern at byte offset `at`.
    pub fn matches_at(&self, data: &[u8], at: usize) -> bool {
        if at % WORD != 0 || at + self.len_bytes() > data.len() {
            return false;
        }
        self.words.iter().enumerate().all(|(i, word)| match word {
            Some(value) => LE::read_u64(&data[at + i * WORD..]) == *value,
            None => true,
        })
    }

    /// All word-aligned match offsets in `data`, lowest first.
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        if self.words.is_empty() {
            return vec![];
        }

        let Some((anchor_word, anchor_bytes)) = self.best_anchor() else {
            let last = data.len().saturating_sub(self.len_bytes());
            return (0..=last)
                .step_by(WORD)
                .filter(|&at| self.matches_at(data, at))
                .collect();
        };

        let anchor_offset = anchor_word * WORD;
        memchr::memmem::Finder::new(&anchor_bytes)
            .find_iter(data)
            .filter(|&pos| pos >= anchor_offset)
            .map(|pos| pos - anchor_offset)
            .filter(|&at| self.matches_at(data, at))
            .collect()
    }

    pub fn find_first(&self, data: &[u8]) -> Option<usize> {
        self.find_all(data).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u64]) -> Vec<u8> {
        let mut bytes = vec![0u8; values.len() * WORD];
        for (i, v) in values.iter().enumerate() {
            LE::write_u64(&mut bytes[i * WORD..], *v);
        }
        bytes
    }

    #[test]
    fn test_framed_match() {
        let data = words(&[0, 0xaa, 0x1234, 0xbb, 0]);
        let pattern = WordPattern::framed(0xaa, 0xbb, 3);

        assert_eq!(pattern.find_all(&data), vec![8]);
        assert_eq!(pattern.find_first(&data), Some(8));
    }

    #[test]
    fn test_unaligned_hit_rejected() {
        let mut data = vec![0u8; 4];
        data.extend(words(&[0xaa, 0x1, 0xbb]));
        data.extend(vec![0u8; 4]);
        let pattern = WordPattern::framed(0xaa, 0xbb, 3);

        assert!(pattern.find_all(&data).is_empty());
    }

    #[test]
    fn test_multiple_matches_in_order() {
        let data = words(&[0xaa, 1, 0xbb, 0, 0xaa, 2, 0xbb]);
        let pattern = WordPattern::framed(0xaa, 0xbb, 3);

        assert_eq!(pattern.find_all(&data), vec![0, 32]);
    }

    #[test]
    fn test_truncated_match_at_end() {
        let data = words(&[0, 0xaa, 1]);
        let pattern = WordPattern::framed(0xaa, 0xbb, 3);

        assert!(pattern.find_all(&data).is_empty());
    }

    #[test]
    fn test_best_anchor_prefers_longest_run() {
        let pattern = WordPattern::new(vec![Some(1), None, Some(2), Some(3)]);
        let (index, bytes) = pattern.best_anchor().unwrap();

        assert_eq!(index, 2);
        assert_eq!(bytes, words(&[2, 3]));
    }

    #[test]
    fn test_all_wildcards_match_every_word() {
        let data = words(&[5, 6, 7]);
        let pattern = WordPattern::new(vec![None, None]);

        assert_eq!(pattern.find_all(&data), vec![0, 8]);
    }

    #[test]
    fn test_empty_pattern() {
        assert!(WordPattern::new(vec![]).find_all(&words(&[1])).is_empty());
    }
}
