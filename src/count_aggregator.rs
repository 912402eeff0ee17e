use std::sync::Arc;

use crate::pileup::{Observation, PositionPileup};
use crate::site_record::{round_to_tenths, SiteDetail, SiteGroup, SiteRecord};

/// Summarize one group's observations at a site, or None if the group has no observations
fn get_group_count_record(
    chrom: &Arc<str>,
    ref_pos: i64,
    obs: &[Observation],
    group: SiteGroup,
) -> Option<SiteRecord> {
    let mut mod_count = 0u32;
    let mut unmod_count = 0u32;
    let mut mod_prob_sum = 0f64;
    let mut unmod_prob_sum = 0f64;
    for x in obs.iter().filter(|x| group.includes_hap_id(x.hap_id)) {
        if x.is_modified() {
            mod_count += 1;
            mod_prob_sum += x.prob as f64;
        } else {
            unmod_count += 1;
            unmod_prob_sum += x.prob as f64;
        }
    }

    let cov = mod_count + unmod_count;
    if cov == 0 {
        return None;
    }

    let mean = |sum: f64, count: u32| (count > 0).then(|| (sum / count as f64) as f32);

    let percent_modified = if mod_count == 0 {
        0.0
    } else {
        round_to_tenths(100.0 * mod_count as f64 / cov as f64)
    };

    Some(SiteRecord {
        chrom: chrom.clone(),
        start: ref_pos,
        percent_modified,
        group,
        cov,
        detail: SiteDetail::Count {
            mod_count,
            unmod_count,
            mean_mod_prob: mean(mod_prob_sum, mod_count),
            mean_unmod_prob: mean(unmod_prob_sum, unmod_count),
        },
    })
}

/// Summarize every site of the pileup by counting modified and unmodified observations
///
/// Each site yields up to one record for each of hap1, hap2 and Total, in that order.
///
pub fn aggregate_site_counts(chrom: &Arc<str>, pileup: &PositionPileup) -> Vec<SiteRecord> {
    let mut records = Vec::new();
    for (ref_pos, obs) in pileup.iter() {
        for group in [SiteGroup::Hap1, SiteGroup::Hap2, SiteGroup::Total] {
            if let Some(record) = get_group_count_record(chrom, ref_pos, obs, group) {
                records.push(record);
            }
        }
    }
    records
}
