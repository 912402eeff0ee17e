use std::fmt;

/// A bounded interval of one reference contig, processed independently of all other regions
///
/// Coordinates are 1-based and fully closed, so the region `chr1:1-500000` covers the first
/// 500,000 bases of `chr1`.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Index of the contig in the alignment file header
    pub chrom_index: usize,
    pub chrom_name: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    /// The zero-indexed, half-closed reference position range covered by this region
    ///
    /// Pileup positions are always stored in this coordinate system, so this range is used both
    /// to fetch reads and to bound the positions they contribute.
    ///
    pub fn zero_based_range(&self) -> std::ops::Range<i64> {
        (self.start as i64 - 1)..(self.end as i64)
    }

    pub fn size(&self) -> u64 {
        self.end + 1 - self.start
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom_name, self.start, self.end)
    }
}

/// Partition every contig into contiguous, non-overlapping regions no larger than `chunk_size`
///
/// Regions are reported in contig order, then in increasing start order within each contig. The
/// final region of each contig is truncated to the contig length. Zero-length contigs produce no
/// regions.
///
pub fn get_regions<'a, I>(chroms: I, chunk_size: u64) -> Vec<Region>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    assert!(chunk_size > 0);

    let mut regions = Vec::new();
    for (chrom_index, (chrom_name, length)) in chroms.into_iter().enumerate() {
        let mut start = 1;
        while start <= length {
            let end = std::cmp::min(start + chunk_size - 1, length);
            regions.push(Region {
                chrom_index,
                chrom_name: chrom_name.to_string(),
                start,
                end,
            });
            start = end + 1;
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(regions: &[Region]) -> Vec<(u64, u64)> {
        regions.iter().map(|x| (x.start, x.end)).collect()
    }

    #[test]
    fn test_get_regions() {
        let regions = get_regions([("chr1", 1_000_000)], 500_000);
        assert_eq!(bounds(&regions), vec![(1, 500_000), (500_001, 1_000_000)]);

        let regions = get_regions([("chr1", 100)], 200);
        assert_eq!(bounds(&regions), vec![(1, 100)]);

        let regions = get_regions([("chr1", 10)], 4);
        assert_eq!(bounds(&regions), vec![(1, 4), (5, 8), (9, 10)]);
    }

    #[test]
    fn test_get_regions_multiple_chroms() {
        let regions = get_regions([("chr1", 5), ("chr2", 0), ("chr3", 3)], 3);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].chrom_name, "chr1");
        assert_eq!(regions[1].chrom_name, "chr1");
        assert_eq!(regions[2].chrom_name, "chr3");
        assert_eq!(regions[2].chrom_index, 2);
        assert_eq!(bounds(&regions), vec![(1, 3), (4, 5), (1, 3)]);

        assert!(get_regions(std::iter::empty::<(&str, u64)>(), 10).is_empty());
    }

    #[test]
    fn test_get_regions_tile_contig() {
        // No gaps or overlaps for any chunk size
        let length = 97;
        for chunk_size in 1..120 {
            let regions = get_regions([("chr1", length)], chunk_size);
            let mut expected_start = 1;
            for region in regions.iter() {
                assert_eq!(region.start, expected_start);
                assert!(region.size() <= chunk_size);
                expected_start = region.end + 1;
            }
            assert_eq!(expected_start, length + 1);
        }
    }

    #[test]
    fn test_zero_based_range() {
        let region = Region {
            chrom_index: 0,
            chrom_name: "chr1".to_string(),
            start: 11,
            end: 20,
        };
        assert_eq!(region.zero_based_range(), 10..20);
        assert_eq!(region.size(), 10);
        assert_eq!(region.to_string(), "chr1:11-20");
    }
}
