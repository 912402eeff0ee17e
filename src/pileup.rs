use std::collections::BTreeMap;

use log::warn;
use rust_htslib::bam;

use crate::bam_utils::{get_hap_id, get_matched_read_ref_pairs};
use crate::mod_tags::decode_read_mod_calls;
use crate::region::Region;

/// Number of matched read/reference pairs trimmed from each end of a read before use
///
/// Modification calls near the read ends are less reliable.
const TRIM_EDGE_MATCHES: usize = 20;

/// Observations above this probability are considered modified
pub const MOD_PROB_THRESHOLD: f32 = 0.5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

/// A single read's contribution to one reference position
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Observation {
    pub strand: Strand,

    /// Modification probability, where positions without a call are given 0
    pub prob: f32,

    /// 1 or 2 for phased reads, 0 otherwise
    pub hap_id: u8,
}

impl Observation {
    pub fn is_modified(&self) -> bool {
        self.prob > MOD_PROB_THRESHOLD
    }
}

/// All observations at each reference position
///
/// Keys are 0-indexed reference positions. No key is ever stored with an empty observation list.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PositionPileup {
    sites: BTreeMap<i64, Vec<Observation>>,
}

impl PositionPileup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observation(&mut self, ref_pos: i64, obs: Observation) {
        self.sites.entry(ref_pos).or_default().push(obs);
    }

    #[cfg(test)]
    pub fn get(&self, ref_pos: i64) -> Option<&[Observation]> {
        self.sites.get(&ref_pos).map(|x| x.as_slice())
    }

    #[cfg(test)]
    pub fn contains(&self, ref_pos: i64) -> bool {
        self.sites.contains_key(&ref_pos)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Iterate through positions in increasing order
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[Observation])> {
        self.sites.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    /// Keep only the positions selected by `f`
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(i64) -> bool,
    {
        self.sites.retain(|&k, _| f(k));
    }
}

impl IntoIterator for PositionPileup {
    type Item = (i64, Vec<Observation>);
    type IntoIter = std::collections::btree_map::IntoIter<i64, Vec<Observation>>;

    fn into_iter(self) -> Self::IntoIter {
        self.sites.into_iter()
    }
}

impl FromIterator<(i64, Vec<Observation>)> for PositionPileup {
    /// Positions with empty observation lists are dropped
    fn from_iter<T: IntoIterator<Item = (i64, Vec<Observation>)>>(iter: T) -> Self {
        Self {
            sites: iter.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct PileupOptions {
    /// Minimum mapq for reads to be used in the pileup
    pub min_mapq: u32,

    /// 2-letter SAM aux tag used for per-read haplotype ids
    pub hap_tag: [u8; 2],
}

/// Accumulates the modification observations of all reads overlapping one region
///
pub struct PileupBuilder {
    /// Zero-indexed position range of the region, only positions in this range are recorded
    ref_range: std::ops::Range<i64>,

    options: PileupOptions,

    pileup: PositionPileup,

    /// Reads which were skipped because of missing or unusable modification tags
    tag_skipped_read_count: usize,
}

impl PileupBuilder {
    pub fn new(region: &Region, options: &PileupOptions) -> Self {
        Self {
            ref_range: region.zero_based_range(),
            options: options.clone(),
            pileup: PositionPileup::new(),
            tag_skipped_read_count: 0,
        }
    }

    /// Add all observations from a single read
    pub fn process_bam_record(&mut self, record: &bam::Record) {
        if record.is_unmapped() || (record.mapq() as u32) < self.options.min_mapq {
            return;
        }

        let mod_calls = match decode_read_mod_calls(record) {
            Ok(x) => x,
            Err(err) => {
                let qname = String::from_utf8_lossy(record.qname());
                warn!("Skipping read '{qname}': {err}");
                self.tag_skipped_read_count += 1;
                return;
            }
        };

        // At least one pair must remain after trimming both ends
        let read_ref_pairs = get_matched_read_ref_pairs(record);
        if read_ref_pairs.len() <= 2 * TRIM_EDGE_MATCHES {
            return;
        }

        let hap_id = get_hap_id(record, &self.options.hap_tag);
        let read_len = record.seq_len();
        let strand = if record.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };

        let trimmed_pairs =
            &read_ref_pairs[TRIM_EDGE_MATCHES..read_ref_pairs.len() - TRIM_EDGE_MATCHES];
        for &(read_pos, ref_pos) in trimmed_pairs {
            if !self.ref_range.contains(&ref_pos) {
                continue;
            }

            // Translate the read position into the sequencing-order coordinates of the decoded
            // calls. The reverse strand offset is one further than the mirrored position, so that
            // the call on the 'G' of a reverse-strand CpG lands on the 'C' position.
            let call_pos = match strand {
                Strand::Forward => Some(read_pos),
                Strand::Reverse => read_len.checked_sub(read_pos + 2),
            };
            let prob = call_pos
                .and_then(|x| mod_calls.get(&x))
                .copied()
                .unwrap_or(0.0);

            self.pileup.add_observation(
                ref_pos,
                Observation {
                    strand,
                    prob,
                    hap_id,
                },
            );
        }
    }

    pub fn tag_skipped_read_count(&self) -> usize {
        self.tag_skipped_read_count
    }

    pub fn finish(self) -> PositionPileup {
        self.pileup
    }
}

#[cfg(test)]
pub mod test_utils {
    use rust_htslib::bam::{self, header, Header, HeaderView};

    pub fn get_test_header() -> HeaderView {
        let mut _header = Header::new();
        _header.push_record(
            header::HeaderRecord::new(b"SQ")
                .push_tag(b"SN", "chr1")
                .push_tag(b"LN", 10000000),
        );
        HeaderView::from_header(&_header)
    }

    /// Make a mapped read with a simple all-match cigar
    ///
    /// * `pos` - 1-indexed SAM position
    ///
    pub fn make_read(flag: u16, pos: i64, mapq: u8, seq: &str, tags: &str) -> bam::Record {
        let header = get_test_header();
        let qual = "D".repeat(seq.len());
        let mut sam_line = format!(
            "qname\t{flag}\tchr1\t{pos}\t{mapq}\t{}M\t*\t0\t0\t{seq}\t{qual}",
            seq.len()
        );
        if !tags.is_empty() {
            sam_line += "\t";
            sam_line += tags;
        }
        bam::Record::from_sam(&header, sam_line.as_bytes()).unwrap()
    }

    /// A 60 base sequence with a single CpG at read index 30
    pub fn single_cpg_seq() -> String {
        "A".repeat(30) + "CG" + &"A".repeat(28)
    }
}
