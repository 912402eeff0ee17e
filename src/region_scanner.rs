use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};

use error_stack::{Context, Report, ResultExt};
use log::{debug, info};
use rust_htslib::bam::{self, Read};

use crate::pileup::{PileupBuilder, PileupOptions};
use crate::progress_reporter::ProgressReporter;
use crate::region::Region;
use crate::region_processor::{process_region_pileup, RegionContext, SiteAggregator};
use crate::site_filter::SiteFilter;
use crate::site_record::SiteRecord;
use crate::tflite_model::{create_site_scorer, ModelSelection, WorkerSiteScorer};

/// Number of reads processed between checks for a run abort
const ABORT_CHECK_READ_INTERVAL: usize = 10_000;

#[derive(Debug)]
pub struct ScanContext;

impl fmt::Display for ScanContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Failed to scan alignment file")
    }
}

impl Context for ScanContext {}

/// Data that are persistent to each worker thread
struct WorkerThreadData {
    bam_reader: bam::IndexedReader,
    scorer: Option<WorkerSiteScorer>,
}

impl WorkerThreadData {
    fn new(
        bam_filename: &str,
        ref_filename: &Option<String>,
        model_selection: &ModelSelection,
    ) -> error_stack::Result<Self, ScanContext> {
        let mut bam_reader = bam::IndexedReader::from_path(bam_filename)
            .change_context(ScanContext)
            .attach_printable_lazy(|| {
                format!("Unable to open indexed alignment file: '{bam_filename}'")
            })?;

        if let Some(ref_filename) = ref_filename {
            bam_reader
                .set_reference(ref_filename)
                .change_context(ScanContext)
                .attach_printable_lazy(|| {
                    format!("Unable to set alignment file reference: '{ref_filename}'")
                })?;
        }

        let scorer = create_site_scorer(model_selection).change_context(ScanContext)?;

        Ok(Self { bam_reader, scorer })
    }
}

/// Settings shared by all regions of the scan
pub struct ScanSettings<'a> {
    pub bam_filename: &'a str,
    pub ref_filename: &'a Option<String>,
    pub thread_count: usize,
    pub pileup_options: &'a PileupOptions,
    pub site_filter: &'a SiteFilter<'a>,
    pub model_selection: &'a ModelSelection,
}

/// Run the full pileup, filter and aggregation pipeline on one region
///
/// Returns None if the run was aborted while reading the region.
///
fn scan_region(
    thread_data: &mut WorkerThreadData,
    region: &Region,
    settings: &ScanSettings,
    abort_scan: &AtomicBool,
) -> error_stack::Result<Option<Vec<SiteRecord>>, RegionContext> {
    debug!("Starting region {region} ({} bases)", region.size());

    let ref_range = region.zero_based_range();
    thread_data
        .bam_reader
        .fetch(bam::FetchDefinition::Region(
            region.chrom_index as i32,
            ref_range.start,
            ref_range.end,
        ))
        .change_context(RegionContext)
        .attach_printable_lazy(|| {
            format!(
                "Unable to fetch region {region} from alignment file '{}'",
                settings.bam_filename
            )
        })?;

    let mut pileup_builder = PileupBuilder::new(region, settings.pileup_options);
    let mut record = bam::Record::new();
    let mut read_count = 0;
    while let Some(r) = thread_data.bam_reader.read(&mut record) {
        r.change_context(RegionContext).attach_printable_lazy(|| {
            format!(
                "Failed to parse alignment record in region {region} from alignment file '{}'",
                settings.bam_filename
            )
        })?;

        read_count += 1;
        if read_count % ABORT_CHECK_READ_INTERVAL == 0 && abort_scan.load(Ordering::Relaxed) {
            return Ok(None);
        }

        pileup_builder.process_bam_record(&record);
    }

    let tag_skipped_read_count = pileup_builder.tag_skipped_read_count();
    let pileup = pileup_builder.finish();
    debug!(
        "Region {region}: {read_count} reads, {tag_skipped_read_count} skipped for modification tags, {} pileup positions",
        pileup.len()
    );

    let aggregator = match thread_data.scorer.as_mut() {
        Some(scorer) => SiteAggregator::Model(scorer.as_mut()),
        None => SiteAggregator::Count,
    };

    let records = process_region_pileup(region, pileup, settings.site_filter, aggregator)?;
    Ok(Some(records))
}

/// Combine the site records of all regions into a single list sorted by chromosome name and
/// position
///
/// The result is independent of the order in which region results are provided. Records at the
/// same position keep their order within the region result.
///
pub fn merge_region_results<I>(region_results: I) -> Vec<SiteRecord>
where
    I: IntoIterator<Item = Vec<SiteRecord>>,
{
    let mut records = region_results
        .into_iter()
        .filter(|x| !x.is_empty())
        .flatten()
        .collect::<Vec<_>>();
    records.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start.cmp(&b.start)));
    records
}

/// Process all regions in parallel and merge the results
///
/// Each worker thread has its own alignment file reader and scoring model. On the first region
/// error, all regions which have not started are skipped and the error with the lowest region
/// index is returned.
///
pub fn scan_regions(
    regions: &[Region],
    settings: &ScanSettings,
) -> error_stack::Result<Vec<SiteRecord>, ScanContext> {
    assert!(settings.thread_count > 0);

    info!(
        "Processing {} regions from alignment file '{}'",
        regions.len(),
        settings.bam_filename
    );

    // Setup per-worker-thread data structures:
    let mut worker_thread_data = Vec::new();
    for _ in 0..settings.thread_count {
        worker_thread_data.push(Mutex::new(WorkerThreadData::new(
            settings.bam_filename,
            settings.ref_filename,
            settings.model_selection,
        )?));
    }
    let worker_thread_data = Arc::new(worker_thread_data);

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.thread_count)
        .build()
        .change_context(ScanContext)?;

    let progress_reporter = ProgressReporter::new(regions.len() as u64, "regions");
    let abort_scan = AtomicBool::new(false);

    let (tx, rx) = channel();
    {
        let progress_reporter = &progress_reporter;
        let abort_scan = &abort_scan;
        worker_pool.scope(move |scope| {
            for (region_index, region) in regions.iter().enumerate() {
                let worker_thread_data = worker_thread_data.clone();
                let tx = tx.clone();
                scope.spawn(move |_| {
                    if abort_scan.load(Ordering::Relaxed) {
                        return;
                    }
                    let worker_id = rayon::current_thread_index().unwrap_or(0);
                    let result = scan_region(
                        &mut worker_thread_data[worker_id].lock().unwrap(),
                        region,
                        settings,
                        abort_scan,
                    );
                    if result.is_err() {
                        abort_scan.store(true, Ordering::Relaxed);
                    }
                    progress_reporter.inc(1);
                    tx.send((region_index, result)).unwrap();
                });
            }
        });
    }
    progress_reporter.finish();

    let mut first_error: Option<(usize, Report<RegionContext>)> = None;
    let mut region_results = Vec::new();
    for (region_index, result) in rx {
        match result {
            Ok(Some(records)) => region_results.push(records),
            Ok(None) => {}
            Err(err) => {
                if first_error.as_ref().map_or(true, |(i, _)| region_index < *i) {
                    first_error = Some((region_index, err));
                }
            }
        }
    }

    if let Some((_, err)) = first_error {
        return Err(err.change_context(ScanContext));
    }

    let records = merge_region_results(region_results);
    info!("Finished processing alignment file, found {} site records", records.len());
    Ok(records)
}
