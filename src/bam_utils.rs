//! Alignment record accessors needed to build the modification pileup
//!

use rust_htslib::bam::{self, record::Aux, record::Cigar};

/// Haplotype id of a read that has no haplotype assignment
pub const UNPHASED_HAP_ID: u8 = 0;

/// Retrieve an aux tag int value from bam record, if the tag exists with an int type
///
pub fn get_optional_int_aux_tag(record: &bam::Record, aux_tag: &[u8]) -> Option<i64> {
    match record.aux(aux_tag).ok()? {
        Aux::U8(val) => Some(val as i64),
        Aux::U16(val) => Some(val as i64),
        Aux::U32(val) => Some(val as i64),
        Aux::I8(val) => Some(val as i64),
        Aux::I16(val) => Some(val as i64),
        Aux::I32(val) => Some(val as i64),
        _ => None,
    }
}

/// Get the haplotype id of a read from the given haplotype tag
///
/// Reads without the tag, or with any value other than 1 or 2, are treated as unphased.
///
pub fn get_hap_id(record: &bam::Record, hap_tag: &[u8]) -> u8 {
    match get_optional_int_aux_tag(record, hap_tag) {
        Some(x) if x == 1 || x == 2 => x as u8,
        _ => UNPHASED_HAP_ID,
    }
}

/// List every aligned read/reference position pair of a read, restricted to match and mismatch
/// positions
///
/// Read positions exclude hard-clipped bases, so they index directly into the stored read sequence.
/// Reference positions are 0-indexed.
///
pub fn get_matched_read_ref_pairs(record: &bam::Record) -> Vec<(usize, i64)> {
    let mut pairs = Vec::new();
    if record.is_unmapped() {
        return pairs;
    }

    let mut read_pos = 0usize;
    let mut ref_pos = record.pos();
    for c in record.cigar().iter() {
        match c {
            Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
                for i in 0..*len {
                    pairs.push((read_pos + i as usize, ref_pos + i as i64));
                }
                read_pos += *len as usize;
                ref_pos += *len as i64;
            }
            Cigar::Ins(len) | Cigar::SoftClip(len) => {
                read_pos += *len as usize;
            }
            Cigar::Del(len) | Cigar::RefSkip(len) => {
                ref_pos += *len as i64;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }
    pairs
}
