//! Decode 5mC calls from the MM/ML base modification tags of a single read
//!

use std::collections::BTreeMap;
use std::fmt;

use rust_htslib::bam::{self, record::Aux};

/// Full scale of the discrete ML probability encoding
const ML_SCALE: f64 = 256.0;

/// The only modification channel decoded from the MM tag
const TARGET_BASE: u8 = b'C';
const TARGET_STRAND: char = '+';
const TARGET_MOD_CODE: char = 'm';

/// Map from 0-based read index, in sequencing order, to the normalized modification probability
pub type ModCallMap = BTreeMap<usize, f32>;

/// Reasons a read's modification tags can't be used in the pileup
#[derive(Debug, PartialEq)]
pub enum ModTagError {
    /// Either the MM or ML tag is missing from the read
    MissingTags,

    /// MM or ML tag is present with an unexpected aux type
    UnexpectedTagType(&'static str),

    MalformedMmTag(String),

    /// The 5mC calls are interleaved with another modification in a single channel, such as 'C+mh'
    MultiChannel(String),

    /// ML tag has fewer values than the number of 5mC calls in the MM tag
    CallCountMismatch { mm_count: usize, ml_count: usize },

    /// MM tag refers to a target base occurrence beyond the end of the read
    RankOutOfRange { rank: usize, base_count: usize },
}

impl fmt::Display for ModTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModTagError::*;
        match self {
            MissingTags => write!(f, "read is missing MM and/or ML tag(s)"),
            UnexpectedTagType(tag) => write!(f, "unexpected {tag} tag type"),
            MalformedMmTag(mm) => write!(f, "malformed MM tag '{mm}'"),
            MultiChannel(code) => write!(
                f,
                "MM tag uses the multi-modification code '{code}', which is not supported"
            ),
            CallCountMismatch { mm_count, ml_count } => write!(
                f,
                "MM tag has {mm_count} C+m calls but only {ml_count} matching ML values"
            ),
            RankOutOfRange { rank, base_count } => write!(
                f,
                "MM tag refers to C occurrence {rank} but the read only has {base_count}"
            ),
        }
    }
}

/// Raw tag content for the 5mC channel of one read
#[derive(Debug, Default, PartialEq)]
pub struct ModChannel {
    /// Counts of skipped target bases between successive calls
    pub skips: Vec<usize>,

    /// Discrete probability of each call, parallel to `skips`
    pub ml_vals: Vec<u8>,
}

fn base_comp(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        _ => b'N',
    }
}

/// Convert an ML value into a probability rounded to 3 decimal places
///
/// A value of 0 maps exactly to 0.0.
///
pub fn decode_ml(ml: u8) -> f32 {
    if ml == 0 {
        return 0.0;
    }
    ((ml as f64 / ML_SCALE * 1000.0).round() / 1000.0) as f32
}

/// Convert MM skip counts into 1-based ranks among all occurrences of the target base
///
/// # Example
///
/// Skips `[5, 12, 0]` yield ranks `[6, 19, 20]`, so the 6th, 19th and 20th target bases are called.
///
/// Returns None if a rank overflows, which can only happen for a corrupt skip count.
///
pub fn get_mod_ranks(skips: &[usize]) -> Option<Vec<usize>> {
    let mut rank = 0usize;
    skips
        .iter()
        .map(|&skip| {
            rank = rank.checked_add(skip)?.checked_add(1)?;
            Some(rank)
        })
        .collect()
}

/// Find the 0-based index of every occurrence of `base` in the read, in sequencing order
///
/// For a reverse-strand read the stored sequence is reverse complemented first, because MM tag
/// coordinates always follow the original sequencing direction.
///
pub fn get_base_indices(seq: &[u8], base: u8, is_reverse: bool) -> Vec<usize> {
    let is_target = |(_, b): &(usize, u8)| *b == base;
    if is_reverse {
        seq.iter()
            .rev()
            .map(|&b| base_comp(b))
            .enumerate()
            .filter(is_target)
            .map(|(i, _)| i)
            .collect()
    } else {
        seq.iter()
            .copied()
            .enumerate()
            .filter(is_target)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Decode one read's 5mC calls into a map from read index to probability
///
/// * `seq` - Read sequence as stored in the alignment record
/// * `is_reverse` - True if the read is aligned to the reverse strand
/// * `skips` - MM tag skip counts for the C+m channel
/// * `ml_vals` - ML tag values for the same channel
///
pub fn decode_mod_calls(
    seq: &[u8],
    is_reverse: bool,
    skips: &[usize],
    ml_vals: &[u8],
) -> Result<ModCallMap, ModTagError> {
    if ml_vals.len() < skips.len() {
        return Err(ModTagError::CallCountMismatch {
            mm_count: skips.len(),
            ml_count: ml_vals.len(),
        });
    }

    let ranks = get_mod_ranks(skips).ok_or_else(|| {
        let skips = skips.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        ModTagError::MalformedMmTag(format!("C+m,{};", skips.join(",")))
    })?;

    let base_indices = get_base_indices(seq, TARGET_BASE, is_reverse);

    let mut mod_calls = ModCallMap::new();
    for (rank, &ml) in ranks.into_iter().zip(ml_vals.iter()) {
        let read_index = match base_indices.get(rank - 1) {
            Some(&x) => x,
            None => {
                return Err(ModTagError::RankOutOfRange {
                    rank,
                    base_count: base_indices.len(),
                });
            }
        };
        mod_calls.insert(read_index, decode_ml(ml));
    }
    Ok(mod_calls)
}

/// Parsed form of a single MM tag segment code, such as 'C+m?'
struct MmCode<'a> {
    base: u8,
    strand: char,
    mods: &'a str,
}

impl<'a> MmCode<'a> {
    fn parse(word: &'a str) -> Option<Self> {
        let mut chars = word.chars();
        let base = chars.next()?;
        let strand = chars.next()?;
        if !base.is_ascii_alphabetic() || !(strand == '+' || strand == '-') {
            return None;
        }
        let mods = word[2..].trim_end_matches(['.', '?']);
        if mods.is_empty() {
            return None;
        }
        Some(Self {
            base: base as u8,
            strand,
            mods,
        })
    }

    /// Number of ML values stored per MM entry
    fn ml_stride(&self) -> usize {
        if self.mods.bytes().all(|x| x.is_ascii_digit()) {
            // ChEBI code
            1
        } else {
            self.mods.len()
        }
    }

    fn is_target_base(&self) -> bool {
        self.base == TARGET_BASE && self.strand == TARGET_STRAND
    }
}

/// Find the C+m channel in the MM/ML tag pair
///
/// Returns None when the MM tag is blank or has no C+m channel. Segments preceding the C+m
/// channel are only used to find the ML offset of the channel's values.
///
pub fn parse_mod_channel(mm_tag: &str, ml_tag: &[u8]) -> Result<Option<ModChannel>, ModTagError> {
    let mut ml_offset = 0;
    for mm_segment in mm_tag.split(';') {
        if mm_segment.is_empty() {
            continue;
        }
        let mut mm_iter = mm_segment.split(',');
        let word = mm_iter.next().unwrap_or_default();
        let code = MmCode::parse(word)
            .ok_or_else(|| ModTagError::MalformedMmTag(mm_tag.to_string()))?;
        let skips = mm_iter
            .map(|n| n.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ModTagError::MalformedMmTag(mm_tag.to_string()))?;

        if code.is_target_base() && code.mods.contains(TARGET_MOD_CODE) {
            if code.mods.len() > 1 {
                return Err(ModTagError::MultiChannel(word.to_string()));
            }
            let ml_vals = ml_tag
                .iter()
                .skip(ml_offset)
                .take(skips.len())
                .copied()
                .collect::<Vec<_>>();
            return Ok(Some(ModChannel { skips, ml_vals }));
        }
        ml_offset += skips.len() * code.ml_stride();
    }
    Ok(None)
}

fn get_tag<'a>(record: &'a bam::Record, tags: [&[u8]; 2]) -> Option<Aux<'a>> {
    tags.into_iter().find_map(|tag| record.aux(tag).ok())
}

/// Decode the 5mC calls of a bam record from its MM/ML (or legacy Mm/Ml) tags
///
/// Reads with tags present but no C+m channel produce an empty map. Reads with either tag missing
/// produce `ModTagError::MissingTags`.
///
pub fn decode_read_mod_calls(record: &bam::Record) -> Result<ModCallMap, ModTagError> {
    let (mm_tag, ml_tag) = match (
        get_tag(record, [b"MM", b"Mm"]),
        get_tag(record, [b"ML", b"Ml"]),
    ) {
        (Some(mm), Some(ml)) => (mm, ml),
        _ => return Err(ModTagError::MissingTags),
    };

    let mm_tag = match mm_tag {
        Aux::String(x) => x,
        _ => return Err(ModTagError::UnexpectedTagType("MM")),
    };
    let ml_tag = match ml_tag {
        Aux::ArrayU8(x) => x.iter().collect::<Vec<_>>(),
        _ => return Err(ModTagError::UnexpectedTagType("ML")),
    };

    match parse_mod_channel(mm_tag, &ml_tag)? {
        Some(channel) => decode_mod_calls(
            &record.seq().as_bytes(),
            record.is_reverse(),
            &channel.skips,
            &channel.ml_vals,
        ),
        None => Ok(ModCallMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rust_htslib::bam::{header, Header, HeaderView};

    fn get_test_header() -> HeaderView {
        let mut _header = Header::new();
        _header.push_record(
            header::HeaderRecord::new(b"SQ")
                .push_tag(b"SN", "chr1")
                .push_tag(b"LN", 10000000),
        );
        HeaderView::from_header(&_header)
    }

    fn assert_mod_calls(mod_calls: &ModCallMap, expected: &[(usize, f32)]) {
        assert_eq!(mod_calls.len(), expected.len());
        for ((&read_index, &prob), &(expected_index, expected_prob)) in
            mod_calls.iter().zip(expected.iter())
        {
            assert_eq!(read_index, expected_index);
            assert_abs_diff_eq!(prob, expected_prob, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_decode_ml() {
        assert_eq!(decode_ml(0), 0.0);
        assert_abs_diff_eq!(decode_ml(204), 0.797, epsilon = 1e-6);
        assert_abs_diff_eq!(decode_ml(89), 0.348, epsilon = 1e-6);
        assert_abs_diff_eq!(decode_ml(26), 0.102, epsilon = 1e-6);
        assert_abs_diff_eq!(decode_ml(255), 0.996, epsilon = 1e-6);
    }

    #[test]
    fn test_get_mod_ranks() {
        assert_eq!(get_mod_ranks(&[5, 12, 0]), Some(vec![6, 19, 20]));
        assert_eq!(get_mod_ranks(&[0, 0, 0]), Some(vec![1, 2, 3]));
        assert_eq!(get_mod_ranks(&[]), Some(vec![]));

        // Corrupt skip counts
        assert_eq!(get_mod_ranks(&[usize::MAX]), None);
        assert_eq!(get_mod_ranks(&[3, usize::MAX - 2]), None);
    }

    #[test]
    fn test_get_base_indices() {
        let seq = b"ACGCCGTATCGTCTCGAGGA";
        assert_eq!(get_base_indices(seq, b'C', false), vec![1, 3, 4, 9, 12, 14]);

        // Reverse complement of this sequence is the sequence above
        let seq = b"TCCTCGAGACGATACGGCGT";
        assert_eq!(get_base_indices(seq, b'C', true), vec![1, 3, 4, 9, 12, 14]);
    }

    #[test]
    fn test_decode_mod_calls() {
        // 25 C's at odd read indices
        let seq = b"AC".repeat(25);
        let mod_calls = decode_mod_calls(&seq, false, &[5, 12, 0], &[204, 89, 26]).unwrap();
        assert_mod_calls(&mod_calls, &[(11, 0.797), (37, 0.348), (39, 0.102)]);

        // The same tags on a reverse read are indexed against the reverse complement, where the
        // C's are now at even read indices
        let seq = b"AG".repeat(25);
        let mod_calls = decode_mod_calls(&seq, true, &[5, 12, 0], &[204, 89, 26]).unwrap();
        assert_mod_calls(&mod_calls, &[(10, 0.797), (36, 0.348), (38, 0.102)]);
    }

    #[test]
    fn test_decode_mod_calls_errors() {
        let seq = b"ACGT";
        assert_eq!(
            decode_mod_calls(seq, false, &[1], &[100]),
            Err(ModTagError::RankOutOfRange {
                rank: 2,
                base_count: 1
            })
        );
        assert_eq!(
            decode_mod_calls(seq, false, &[usize::MAX], &[100]),
            Err(ModTagError::MalformedMmTag(format!("C+m,{};", usize::MAX)))
        );
        assert_eq!(
            decode_mod_calls(seq, false, &[0], &[]),
            Err(ModTagError::CallCountMismatch {
                mm_count: 1,
                ml_count: 0
            })
        );
    }

    #[test]
    fn test_parse_mod_channel() {
        let channel = parse_mod_channel("A+a,1,0;C+m,0,1,1;", &[100, 150, 200, 220, 240])
            .unwrap()
            .unwrap();
        assert_eq!(channel.skips, vec![0, 1, 1]);
        assert_eq!(channel.ml_vals, vec![200, 220, 240]);

        // Skipped-base mode suffixes are accepted
        let channel = parse_mod_channel("C+m?,2;", &[7]).unwrap().unwrap();
        assert_eq!(channel.skips, vec![2]);
        assert_eq!(channel.ml_vals, vec![7]);

        // Multi-code segments before the target consume one ML value per code
        let channel = parse_mod_channel("A+ab,0;C+m.,0;", &[1, 2, 3]).unwrap().unwrap();
        assert_eq!(channel.ml_vals, vec![3]);

        assert_eq!(parse_mod_channel("", &[]), Ok(None));
        assert_eq!(parse_mod_channel("C+h,0,1;", &[1, 2]), Ok(None));

        assert_eq!(
            parse_mod_channel("C+mh,5,12;", &[204, 26, 89, 130]),
            Err(ModTagError::MultiChannel("C+mh".to_string()))
        );
        assert!(matches!(
            parse_mod_channel("C+m,x;", &[1]),
            Err(ModTagError::MalformedMmTag(_))
        ));
    }

    #[test]
    fn test_decode_read_mod_calls() {
        let header = get_test_header();

        // Read without MM/ML tags
        let sam_line = b"qname\t0\tchr1\t10\t60\t20M\t*\t0\t0\tACGCCGTATCGTCTCGAGGA\tDDDDDEEEEEDDDDDEEEEE";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        assert_eq!(decode_read_mod_calls(&rec), Err(ModTagError::MissingTags));

        // Read with blank MM tag
        let sam_line = b"qname\t0\tchr1\t10\t60\t20M\t*\t0\t0\tACGCCGTATCGTCTCGAGGA\tDDDDDEEEEEDDDDDEEEEE\tMM:Z:\tML:B:C,5";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        assert_eq!(decode_read_mod_calls(&rec), Ok(ModCallMap::new()));

        // Fwd-strand read
        let sam_line = b"qname\t0\tchr1\t10\t60\t20M\t*\t0\t0\tACGCCGTATCGTCTCGAGGA\tDDDDDEEEEEDDDDDEEEEE\tMM:Z:A+m,1,0;C+m,0,1,1;\tML:B:C,100,150,200,220,240";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        let mod_calls = decode_read_mod_calls(&rec).unwrap();
        assert_mod_calls(
            &mod_calls,
            &[(1, decode_ml(200)), (4, decode_ml(220)), (12, decode_ml(240))],
        );

        // Rev-strand read, with read indices relative to the sequencing direction
        let sam_line = b"qname\t16\tchr1\t10\t60\t20M\t*\t0\t0\tTCCTCGAGACGATACGGCGT\tEEEEEDDDDDEEEEEDDDDD\tMM:Z:A+m,1,0;C+m,0,1,1;\tML:B:C,100,150,200,220,240";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        let mod_calls = decode_read_mod_calls(&rec).unwrap();
        assert_mod_calls(
            &mod_calls,
            &[(1, decode_ml(200)), (4, decode_ml(220)), (12, decode_ml(240))],
        );

        // Legacy tag names
        let sam_line = b"qname\t0\tchr1\t10\t60\t20M\t*\t0\t0\tACGCCGTATCGTCTCGAGGA\tDDDDDEEEEEDDDDDEEEEE\tMm:Z:C+m,1;\tMl:B:C,204";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        let mod_calls = decode_read_mod_calls(&rec).unwrap();
        assert_mod_calls(&mod_calls, &[(3, 0.797)]);

        // Skip count overflows the rank
        let sam_line = b"qname\t0\tchr1\t10\t60\t20M\t*\t0\t0\tACGCCGTATCGTCTCGAGGA\tDDDDDEEEEEDDDDDEEEEE\tMM:Z:C+m,1,18446744073709551615;\tML:B:C,204,100";
        let rec = bam::Record::from_sam(&header, sam_line).unwrap();
        assert!(matches!(
            decode_read_mod_calls(&rec),
            Err(ModTagError::MalformedMmTag(_))
        ));
    }
}
