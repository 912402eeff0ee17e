use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use bio::io::fasta;
use log::info;
use unwrap::unwrap;

#[derive(Default)]
pub struct GenomeRef {
    /// A map from chrom name to uppercase chrom sequence
    pub chroms: HashMap<String, Vec<u8>>,
}

impl GenomeRef {
    pub fn get_chrom_seq(&self, chrom_name: &str) -> Option<&[u8]> {
        self.chroms.get(chrom_name).map(|x| x.as_slice())
    }
}

fn get_genome_ref_from_fasta_reader<R: Read>(reader: R, filename: &str) -> GenomeRef {
    let reader = fasta::Reader::new(reader);

    let mut genome_ref = GenomeRef::default();
    for result in reader.records() {
        let record = unwrap!(result, "Error parsing reference fasta file: '{}'", filename);
        genome_ref
            .chroms
            .insert(record.id().to_string(), record.seq().to_ascii_uppercase());
    }
    genome_ref
}

/// Read fasta file into GenomeRef data structure
///
pub fn get_genome_ref_from_fasta(filename: &str) -> GenomeRef {
    info!("Reading reference genome from file '{filename}'");

    let file = unwrap!(
        File::open(filename),
        "Unable to open reference fasta file: '{}'",
        filename,
    );

    let genome_ref = get_genome_ref_from_fasta_reader(file, filename);
    info!(
        "Finished reading {} contigs from reference genome",
        genome_ref.chroms.len()
    );
    genome_ref
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_get_genome_ref_from_fasta() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">chr1 description").unwrap();
        writeln!(file, "acgTAC").unwrap();
        writeln!(file, "GTNN").unwrap();
        writeln!(file, ">chr2").unwrap();
        writeln!(file, "CG").unwrap();
        file.flush().unwrap();

        let genome_ref = get_genome_ref_from_fasta(file.path().to_str().unwrap());

        assert_eq!(genome_ref.chroms.len(), 2);
        assert_eq!(genome_ref.get_chrom_seq("chr1").unwrap(), b"ACGTACGTNN");
        assert_eq!(genome_ref.get_chrom_seq("chr2").unwrap(), b"CG");
        assert!(genome_ref.get_chrom_seq("chr3").is_none());
    }
}
