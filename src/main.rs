mod bam_utils;
mod chrom_list;
mod cli;
mod count_aggregator;
mod cpg_sites;
mod genome_ref;
mod globals;
mod mod_tags;
mod model_aggregator;
mod pileup;
mod progress_reporter;
mod region;
mod region_processor;
mod region_scanner;
mod site_filter;
mod site_record;
mod tflite_model;
mod write_tracks;

use std::fmt;
use std::process;

use error_stack::{Context, Report, ResultExt};
use hhmmss::Hhmmss;
use log::{error, info};

use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::pileup::PileupOptions;
use crate::region_processor::PileupMode;
use crate::region_scanner::ScanSettings;
use crate::site_filter::{ModSitesMode, SiteFilter};
use crate::tflite_model::ModelSelection;

#[derive(Debug)]
struct RunContext;

impl fmt::Display for RunContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{PROGRAM_NAME} run failed")
    }
}

impl Context for RunContext {}

fn setup_logger(output_prefix: &str, debug: bool) -> Result<(), fern::InitError> {
    let log_filename = output_prefix.to_owned() + ".log";
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                PROGRAM_NAME,
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .chain(fern::log_file(log_filename)?)
        .apply()?;
    Ok(())
}

/// Boil down all the settings to select the site scoring model
fn get_model_selection_from_settings(settings: &cli::Settings) -> ModelSelection {
    match (settings.pileup_mode, &settings.model_filename) {
        (PileupMode::model, Some(x)) => ModelSelection::Filename(x.clone()),
        _ => ModelSelection::None,
    }
}

fn run(
    settings: &cli::Settings,
    derived_settings: &cli::DerivedSettings,
) -> error_stack::Result<(), RunContext> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    info!("Running on {} threads", derived_settings.thread_count);
    let start = std::time::Instant::now();

    let chrom_list = cli::validate_settings_data(settings);

    // Read the fasta reference
    let genome_ref = if let ModSitesMode::reference = settings.modsites_mode {
        settings
            .ref_filename
            .as_ref()
            .map(|x| genome_ref::get_genome_ref_from_fasta(x))
    } else {
        None
    };

    let site_filter = SiteFilter::new(settings.modsites_mode, genome_ref.as_ref())
        .ok_or_else(|| {
            Report::new(RunContext).attach_printable("No reference available for site filtering")
        })?;

    let regions = region::get_regions(chrom_list.iter_label_lengths(), settings.chunk_size);
    info!(
        "Split alignment file contigs into {} regions of up to {} bases",
        regions.len(),
        settings.chunk_size
    );

    // Scan all regions in parallel
    let pileup_options = PileupOptions {
        min_mapq: settings.min_mapq,
        hap_tag: derived_settings.hap_tag,
    };
    let model_selection = get_model_selection_from_settings(settings);
    let scan_settings = ScanSettings {
        bam_filename: &settings.bam_filename,
        ref_filename: &settings.ref_filename,
        thread_count: derived_settings.thread_count,
        pileup_options: &pileup_options,
        site_filter: &site_filter,
        model_selection: &model_selection,
    };
    let records =
        region_scanner::scan_regions(&regions, &scan_settings).change_context(RunContext)?;

    // Write out all bed and track files
    write_tracks::write_all_output_files(settings, &records, &chrom_list)
        .change_context(RunContext)?;

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::parse_settings();
    if let Err(err) = setup_logger(&settings.output_prefix, settings.debug) {
        eprintln!("Unable to initialize logger: {err}");
        process::exit(exitcode::CANTCREAT);
    }
    let derived_settings = cli::validate_and_fix_settings(&settings);

    if let Err(err) = run(&settings, &derived_settings) {
        error!("{err:?}");
        process::exit(2);
    }
}
