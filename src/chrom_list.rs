use std::collections::HashMap;

use rust_htslib::bam;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChromInfo {
    pub label: String,
    pub length: u64,
}

/// Ordered contig list of the alignment file, used for region partitioning and track output
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChromList {
    pub data: Vec<ChromInfo>,
    pub label_to_index: HashMap<String, usize>,
}

impl ChromList {
    pub fn from_bam_header(header: &bam::HeaderView) -> Self {
        let mut chrom_list = ChromList::default();
        for tid in 0..header.target_count() {
            let label = String::from_utf8_lossy(header.tid2name(tid));
            chrom_list.add_chrom(&label, header.target_len(tid).unwrap_or(0));
        }
        chrom_list
    }

    pub fn add_chrom(&mut self, label: &str, length: u64) {
        assert!(!self.label_to_index.contains_key(label));

        self.label_to_index
            .insert(label.to_string(), self.data.len());
        self.data.push(ChromInfo {
            label: label.to_string(),
            length,
        });
    }

    /// Iterate through (label, length) pairs in header order
    pub fn iter_label_lengths(&self) -> impl Iterator<Item = (&str, u64)> {
        self.data.iter().map(|x| (x.label.as_str(), x.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::{header, Header, HeaderView};

    #[test]
    fn test_chrom_list_from_bam_header() {
        let mut _header = Header::new();
        for (name, len) in [("chr1", 100), ("chr2", 50), ("chrM", 14)] {
            _header.push_record(
                header::HeaderRecord::new(b"SQ")
                    .push_tag(b"SN", name)
                    .push_tag(b"LN", len),
            );
        }
        let header = HeaderView::from_header(&_header);

        let chrom_list = ChromList::from_bam_header(&header);
        assert_eq!(chrom_list.data.len(), 3);
        assert_eq!(
            chrom_list.data[2],
            ChromInfo {
                label: "chrM".to_string(),
                length: 14,
            }
        );
        assert_eq!(*chrom_list.label_to_index.get("chr2").unwrap(), 1);
        assert_eq!(
            chrom_list.iter_label_lengths().collect::<Vec<_>>(),
            vec![("chr1", 100), ("chr2", 50), ("chrM", 14)]
        );
    }
}
