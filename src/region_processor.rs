use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use error_stack::{Context, ResultExt};
use log::debug;

use crate::count_aggregator::aggregate_site_counts;
use crate::model_aggregator::{aggregate_site_model_scores, SiteScorer};
use crate::pileup::PositionPileup;
use crate::region::Region;
use crate::site_filter::SiteFilter;
use crate::site_record::SiteRecord;

/// Pileup mode options
///
/// Used to select which method is used to summarize the observations at each site
///
/// Note that enum values and their doc comments appear in the cmdline help.
///
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, strum::Display, ValueEnum)]
#[allow(non_camel_case_types)]
pub enum PileupMode {
    /// Deep learning model-based approach, requires a model file
    model,

    /// Simple count-based approach
    #[default]
    count,
}

#[derive(Debug)]
pub struct RegionContext;

impl fmt::Display for RegionContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Failed to process region")
    }
}

impl Context for RegionContext {}

/// Method used to convert the filtered pileup of a region into site records
pub enum SiteAggregator<'a> {
    Count,
    Model(&'a mut dyn SiteScorer),
}

/// Filter the region pileup down to CpG sites and summarize each site
///
pub fn process_region_pileup(
    region: &Region,
    pileup: PositionPileup,
    site_filter: &SiteFilter,
    aggregator: SiteAggregator,
) -> error_stack::Result<Vec<SiteRecord>, RegionContext> {
    let pileup_size = pileup.len();
    let sites = site_filter
        .filter(&region.chrom_name, pileup)
        .change_context(RegionContext)
        .attach_printable_lazy(|| format!("Site filtering failed in region {region}"))?;

    debug!(
        "Region {region}: {} of {pileup_size} pileup positions retained as CpG sites",
        sites.len()
    );

    let chrom: Arc<str> = Arc::from(region.chrom_name.as_str());
    let records = match aggregator {
        SiteAggregator::Count => aggregate_site_counts(&chrom, &sites),
        SiteAggregator::Model(scorer) => {
            aggregate_site_model_scores(region, &chrom, &sites, scorer)
                .change_context(RegionContext)
                .attach_printable_lazy(|| format!("Site model scoring failed in region {region}"))?
        }
    };

    debug!("Region {region}: {} site records", records.len());

    Ok(records)
}
