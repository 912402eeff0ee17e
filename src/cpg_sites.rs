use std::collections::HashSet;

/// Zero-indexed positions of every 'C' which begins a CpG dinucleotide in a reference sequence
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpgSiteSet {
    sites: HashSet<i64>,
}

impl CpgSiteSet {
    /// Find all CpG sites in `seq`, ignoring case
    #[cfg(test)]
    pub fn from_seq(seq: &[u8]) -> Self {
        Self::from_seq_range(seq, 0..seq.len() as i64)
    }

    /// Find all CpG sites in `seq` which start within the zero-indexed `range`, ignoring case
    ///
    /// The range may extend past either end of the sequence.
    ///
    pub fn from_seq_range(seq: &[u8], range: std::ops::Range<i64>) -> Self {
        let start = range.start.clamp(0, seq.len() as i64) as usize;
        let end = std::cmp::min(range.end.max(0) as usize + 1, seq.len());
        if start >= end {
            return Self::default();
        }
        let sites = seq[start..end]
            .windows(2)
            .enumerate()
            .filter(|(_, x)| x.eq_ignore_ascii_case(b"CG"))
            .map(|(i, _)| (start + i) as i64)
            .collect();
        Self { sites }
    }

    pub fn contains(&self, pos: i64) -> bool {
        self.sites.contains(&pos)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
