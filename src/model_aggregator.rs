use std::fmt;
use std::sync::Arc;

use error_stack::{Context, Report};
use log::{debug, warn};

use crate::pileup::PositionPileup;
use crate::region::Region;
use crate::site_record::{round_to_tenths, SiteDetail, SiteGroup, SiteRecord};

/// Number of contiguous CpGs used as input to the pileup model
pub const MODEL_CPG_WINDOW_COUNT: usize = 11;

/// 0-index of the CpG that is actually called within the CpG window
pub const CALLED_CPG_INDEX: usize = 6;

/// The number of bins used for the meth prob distribution
const MODEL_METH_PROB_BIN_COUNT: usize = 20;

/// The number of pileup model features per CpG
pub const MODEL_FEATURES_PER_CPG: usize = MODEL_METH_PROB_BIN_COUNT + 1;

/// Sites with lower coverage in a group are left out of that group's model input
const MIN_MODEL_COVERAGE: usize = 4;

/// Groups with fewer qualifying sites than this in a region are not scored
const MIN_MODEL_SITE_COUNT: usize = MODEL_CPG_WINDOW_COUNT + 1;

/// Model input features of a single CpG site
pub type CpgFeatures = Vec<f32>;

#[derive(Debug)]
pub struct ScorerContext;

impl fmt::Display for ScorerContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Site scoring model error")
    }
}

impl Context for ScorerContext {}

/// A model which predicts the modification level of a CpG site from the features of its
/// neighborhood
///
pub trait SiteScorer {
    /// Predict the modification probability of the site at `CALLED_CPG_INDEX` in `window`
    ///
    /// `window` holds the features of `MODEL_CPG_WINDOW_COUNT` consecutive sites, where zero-filled
    /// features are used as padding past the ends of the site list. The returned value may fall
    /// outside of [0,1].
    ///
    fn score_window(&mut self, window: &[CpgFeatures]) -> error_stack::Result<f32, ScorerContext>;
}

/// Get a histogram of probabilities, L2-normalized
///
/// Bins evenly divide [0,1], with a probability of 1 assigned to the last bin.
///
fn get_norm_prob_histogram(probs: &[f32], bin_count: usize) -> Vec<f32> {
    assert!(bin_count > 0);

    fn prob_to_bin(prob: f32, bin_count: usize) -> usize {
        ((prob * bin_count as f32) as i32).clamp(0, bin_count as i32 - 1) as usize
    }
    let mut hist = vec![0.0f64; bin_count];

    for &prob in probs.iter() {
        hist[prob_to_bin(prob, bin_count)] += 1.0;
    }

    // L2 norm
    let l2n = hist.iter().map(|x| x * x).sum::<f64>().sqrt();
    if l2n == 0.0 {
        return vec![0.0; bin_count];
    }
    hist.iter().map(|x| (x / l2n) as f32).collect::<Vec<_>>()
}

/// Model input for all qualifying sites of one read group, in increasing position order
#[derive(Default)]
struct GroupSiteFeatures {
    positions: Vec<i64>,
    coverages: Vec<u32>,
    features: Vec<CpgFeatures>,
}

impl GroupSiteFeatures {
    fn len(&self) -> usize {
        self.positions.len()
    }
}

/// Pad the site feature list with zero features so that every site gets a full window
///
/// The padded list yields exactly one `MODEL_CPG_WINDOW_COUNT` window per site, with each site at
/// `CALLED_CPG_INDEX` of its window.
///
fn get_padded_features(features: &[CpgFeatures]) -> Vec<CpgFeatures> {
    let trailing_pad_count = MODEL_CPG_WINDOW_COUNT - (CALLED_CPG_INDEX + 1);
    let zero_features = vec![0f32; MODEL_FEATURES_PER_CPG];

    let mut padded = Vec::with_capacity(features.len() + CALLED_CPG_INDEX + trailing_pad_count);
    padded.extend(std::iter::repeat(zero_features.clone()).take(CALLED_CPG_INDEX));
    padded.extend_from_slice(features);
    padded.extend(std::iter::repeat(zero_features).take(trailing_pad_count));
    padded
}

/// Build the model input of every group from the pileup
///
/// The final feature of each site flags whether the previous pileup site is exactly 2 bases
/// upstream. This is determined from the full pileup site list, independent of the group coverage
/// filter.
///
fn get_group_site_features(pileup: &PositionPileup) -> Vec<(SiteGroup, GroupSiteFeatures)> {
    let mut groups = [SiteGroup::Total, SiteGroup::Hap1, SiteGroup::Hap2]
        .map(|x| (x, GroupSiteFeatures::default()));

    let mut previous_pos = None;
    for (ref_pos, obs) in pileup.iter() {
        let is_adjacent_cpg = previous_pos == Some(ref_pos - 2);
        previous_pos = Some(ref_pos);

        for (group, group_features) in groups.iter_mut() {
            let probs = obs
                .iter()
                .filter(|x| group.includes_hap_id(x.hap_id))
                .map(|x| x.prob)
                .collect::<Vec<_>>();
            if probs.len() < MIN_MODEL_COVERAGE {
                continue;
            }

            let mut features = get_norm_prob_histogram(&probs, MODEL_METH_PROB_BIN_COUNT);
            features.push(is_adjacent_cpg as u32 as f32);
            assert_eq!(features.len(), MODEL_FEATURES_PER_CPG);

            group_features.positions.push(ref_pos);
            group_features.coverages.push(probs.len() as u32);
            group_features.features.push(features);
        }
    }
    groups.into_iter().collect()
}

/// Score every site of the pileup with a model of the site's neighborhood
///
/// Records are produced for the Total, hap1 and hap2 groups in that order. A group without enough
/// qualifying sites in the region is skipped.
///
pub fn aggregate_site_model_scores(
    region: &Region,
    chrom: &Arc<str>,
    pileup: &PositionPileup,
    scorer: &mut dyn SiteScorer,
) -> error_stack::Result<Vec<SiteRecord>, ScorerContext> {
    let mut records = Vec::new();
    for (group, group_features) in get_group_site_features(pileup) {
        let site_count = group_features.len();
        if site_count < MIN_MODEL_SITE_COUNT {
            if site_count > 0 {
                warn!(
                    "Insufficient sites for model scoring of {group} reads in region {region}: found {site_count} sites with coverage {MIN_MODEL_COVERAGE} or higher"
                );
            } else {
                debug!("No {group} sites for model scoring in region {region}");
            }
            continue;
        }

        let padded_features = get_padded_features(&group_features.features);
        for (site_index, window) in padded_features
            .windows(MODEL_CPG_WINDOW_COUNT)
            .enumerate()
        {
            let score = scorer.score_window(window)?;
            if score.is_nan() {
                let ref_pos = group_features.positions[site_index];
                return Err(Report::new(ScorerContext).attach_printable(format!(
                    "Model returned NaN score for {group} site at {}:{}",
                    region.chrom_name,
                    ref_pos + 1
                )));
            }
            let score = score.clamp(0.0, 1.0);
            records.push(SiteRecord {
                chrom: chrom.clone(),
                start: group_features.positions[site_index],
                percent_modified: round_to_tenths(100.0 * score as f64),
                group,
                cov: group_features.coverages[site_index],
                detail: SiteDetail::Model,
            });
        }
    }
    Ok(records)
}
