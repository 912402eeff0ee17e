use std::fmt;

use clap::ValueEnum;
use error_stack::{Context, Report};

use crate::cpg_sites::CpgSiteSet;
use crate::genome_ref::GenomeRef;
use crate::pileup::{Observation, PositionPileup, Strand};

/// Modsites mode options
///
/// Used to select which CpG sites are reported in the output.
///
/// Note that enum values and their doc comments appear in the cmdline help.
///
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, strum::Display, ValueEnum)]
#[allow(non_camel_case_types)]
pub enum ModSitesMode {
    /// Pick sites where at least one read on either strand has a modification call
    #[default]
    denovo,

    /// Pick sites where "CG" is present in the reference sequence
    reference,
}

#[derive(Debug)]
pub struct MissingRefContigContext;

impl fmt::Display for MissingRefContigContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Alignment contig is missing from the reference sequence")
    }
}

impl Context for MissingRefContigContext {}

/// Policy used to select the pileup positions reported as CpG sites
///
pub enum SiteFilter<'a> {
    Reference(&'a GenomeRef),
    Denovo,
}

impl<'a> SiteFilter<'a> {
    /// Create the filter for `mode`
    ///
    /// Reference mode requires a reference genome. This is checked during argument validation,
    /// so None is only returned when that check has been bypassed.
    ///
    pub fn new(mode: ModSitesMode, genome_ref: Option<&'a GenomeRef>) -> Option<Self> {
        match mode {
            ModSitesMode::denovo => Some(Self::Denovo),
            ModSitesMode::reference => genome_ref.map(Self::Reference),
        }
    }

    /// Reduce `pileup` to the positions (and observations) selected by this filter
    ///
    /// In reference mode, a contig missing from the reference is an error unless the pileup is
    /// empty.
    ///
    pub fn filter(
        &self,
        chrom_name: &str,
        pileup: PositionPileup,
    ) -> error_stack::Result<PositionPileup, MissingRefContigContext> {
        match self {
            Self::Reference(genome_ref) => filter_reference_sites(genome_ref, chrom_name, pileup),
            Self::Denovo => Ok(filter_denovo_sites(pileup)),
        }
    }
}

fn filter_reference_sites(
    genome_ref: &GenomeRef,
    chrom_name: &str,
    mut pileup: PositionPileup,
) -> error_stack::Result<PositionPileup, MissingRefContigContext> {
    let first_pos = pileup.iter().next().map(|(pos, _)| pos);
    let last_pos = pileup.iter().last().map(|(pos, _)| pos);
    let (first_pos, last_pos) = match (first_pos, last_pos) {
        (Some(first_pos), Some(last_pos)) => (first_pos, last_pos),
        _ => return Ok(pileup),
    };

    let chrom_seq = genome_ref.get_chrom_seq(chrom_name).ok_or_else(|| {
        Report::new(MissingRefContigContext)
            .attach_printable(format!("Contig '{chrom_name}' not found in reference"))
    })?;

    let cpg_sites = CpgSiteSet::from_seq_range(chrom_seq, first_pos..last_pos + 1);
    pileup.retain(|pos| cpg_sites.contains(pos));
    Ok(pileup)
}

/// Keep the observations of each strand only if at least one of them is modified
fn filter_strand_observations(obs: Vec<Observation>) -> Vec<Observation> {
    let is_strand_modified =
        |strand: Strand| obs.iter().any(|x| x.strand == strand && x.is_modified());
    let fwd_modified = is_strand_modified(Strand::Forward);
    let rev_modified = is_strand_modified(Strand::Reverse);

    obs.into_iter()
        .filter(|x| match x.strand {
            Strand::Forward => fwd_modified,
            Strand::Reverse => rev_modified,
        })
        .collect()
}

fn filter_denovo_sites(pileup: PositionPileup) -> PositionPileup {
    pileup
        .into_iter()
        .map(|(pos, obs)| (pos, filter_strand_observations(obs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(strand: Strand, prob: f32) -> Observation {
        Observation {
            strand,
            prob,
            hap_id: 0,
        }
    }

    fn test_genome_ref() -> GenomeRef {
        let mut genome_ref = GenomeRef::default();
        genome_ref
            .chroms
            .insert("chr1".to_string(), b"ACGCGTTTCG".to_vec());
        genome_ref
    }

    fn positions(pileup: &PositionPileup) -> Vec<i64> {
        pileup.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_reference_filter() {
        let genome_ref = test_genome_ref();
        let filter = SiteFilter::new(ModSitesMode::reference, Some(&genome_ref)).unwrap();

        let mut pileup = PositionPileup::new();
        for pos in 0..10 {
            pileup.add_observation(pos, obs(Strand::Forward, 0.0));
        }
        let filtered = filter.filter("chr1", pileup).unwrap();
        assert_eq!(positions(&filtered), vec![1, 3, 8]);

        // Idempotent
        let refiltered = filter.filter("chr1", filtered.clone()).unwrap();
        assert_eq!(refiltered, filtered);
    }

    #[test]
    fn test_reference_filter_missing_contig() {
        let genome_ref = test_genome_ref();
        let filter = SiteFilter::new(ModSitesMode::reference, Some(&genome_ref)).unwrap();

        let mut pileup = PositionPileup::new();
        pileup.add_observation(1, obs(Strand::Forward, 0.9));
        assert!(filter.filter("chr2", pileup).is_err());

        // Empty pileups skip the reference lookup
        assert!(filter.filter("chr2", PositionPileup::new()).unwrap().is_empty());
    }

    #[test]
    fn test_denovo_filter() {
        let filter = SiteFilter::new(ModSitesMode::denovo, None).unwrap();

        let mut pileup = PositionPileup::new();
        // Only the forward strand qualifies
        pileup.add_observation(1, obs(Strand::Forward, 0.9));
        pileup.add_observation(1, obs(Strand::Forward, 0.1));
        pileup.add_observation(1, obs(Strand::Reverse, 0.3));
        // Neither strand qualifies
        for _ in 0..10 {
            pileup.add_observation(2, obs(Strand::Forward, 0.0));
            pileup.add_observation(2, obs(Strand::Reverse, 0.0));
        }
        // Exactly at threshold is unmodified
        pileup.add_observation(3, obs(Strand::Reverse, 0.5));
        // Both strands qualify
        pileup.add_observation(4, obs(Strand::Forward, 0.6));
        pileup.add_observation(4, obs(Strand::Reverse, 0.7));
        pileup.add_observation(4, obs(Strand::Reverse, 0.2));

        let filtered = filter.filter("chr1", pileup).unwrap();
        assert_eq!(positions(&filtered), vec![1, 4]);
        assert_eq!(
            filtered.get(1).unwrap(),
            &[obs(Strand::Forward, 0.9), obs(Strand::Forward, 0.1)]
        );
        assert_eq!(filtered.get(4).unwrap().len(), 3);

        // Idempotent
        let refiltered = filter.filter("chr1", filtered.clone()).unwrap();
        assert_eq!(refiltered, filtered);
    }

    #[test]
    fn test_new_reference_without_genome() {
        assert!(SiteFilter::new(ModSitesMode::reference, None).is_none());
    }
}
