use std::fmt;
use std::sync::Arc;

/// Read group summarized by a site record
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SiteGroup {
    /// All reads, phased or not
    Total,
    Hap1,
    Hap2,
}

impl SiteGroup {
    pub fn includes_hap_id(&self, hap_id: u8) -> bool {
        match self {
            SiteGroup::Total => true,
            SiteGroup::Hap1 => hap_id == 1,
            SiteGroup::Hap2 => hap_id == 2,
        }
    }

    /// Label used in the bed 'type' column
    pub fn bed_label(&self) -> &'static str {
        match self {
            SiteGroup::Total => "Total",
            SiteGroup::Hap1 => "hap1",
            SiteGroup::Hap2 => "hap2",
        }
    }

    /// Label used in output filenames
    pub fn file_label(&self) -> &'static str {
        match self {
            SiteGroup::Total => "combined",
            SiteGroup::Hap1 => "hap1",
            SiteGroup::Hap2 => "hap2",
        }
    }
}

impl fmt::Display for SiteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bed_label())
    }
}

/// Pileup-mode specific site summary
#[derive(Clone, Debug, PartialEq)]
pub enum SiteDetail {
    /// Info produced in 'model' pileup mode
    Model,

    /// Info produced in 'count' pileup mode
    Count {
        mod_count: u32,
        unmod_count: u32,

        /// Mean probability of the modified observations, None if there are none
        mean_mod_prob: Option<f32>,

        /// Mean probability of the unmodified observations, None if there are none
        mean_unmod_prob: Option<f32>,
    },
}

/// Modification summary of one read group at one CpG site
#[derive(Clone, Debug, PartialEq)]
pub struct SiteRecord {
    pub chrom: Arc<str>,

    /// 0-indexed position of the CpG 'C'
    pub start: i64,

    pub percent_modified: f64,
    pub group: SiteGroup,

    /// Observation count of the group at this site, always at least 1
    pub cov: u32,

    pub detail: SiteDetail,
}

impl SiteRecord {
    pub fn end(&self) -> i64 {
        self.start + 1
    }
}

/// Round to one decimal place
pub fn round_to_tenths(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Convert a model score into counts of modified and unmodified reads consistent with the site
/// coverage
///
/// The modified read estimate is rounded down for scores in (50, 65) or at most 35, and rounded
/// up otherwise, which pushes the adjusted score towards 0, 50 or 100.
///
/// * `score` - Model modification score in percent
///
/// Returns a tuple of (mod_reads, unmod_reads, adjusted_score)
///
pub fn discretize_model_score(score: f64, cov: u32) -> (u32, u32, f64) {
    let is_floor = if score > 50.0 {
        score < 65.0
    } else {
        score <= 35.0
    };
    let est_mod_reads = (score / 100.0) * cov as f64;
    let mod_reads = if is_floor {
        est_mod_reads.floor() as u32
    } else {
        est_mod_reads.ceil() as u32
    };
    let mod_reads = std::cmp::min(mod_reads, cov);
    let unmod_reads = cov - mod_reads;

    let adj_score = if mod_reads == 0 {
        0.0
    } else {
        round_to_tenths(100.0 * mod_reads as f64 / cov as f64)
    };

    (mod_reads, unmod_reads, adj_score)
}
