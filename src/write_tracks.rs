use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufWriter, Write};

use error_stack::{Context, Report, ResultExt};
use log::{debug, info};
use rayon::prelude::*;
use rust_htslib::{bgzf, htslib};
use rust_libbigwig::BigWigWriter;
use serde_derive::Serialize;

use crate::chrom_list::ChromList;
use crate::cli::Settings;
use crate::globals::{OUTPUT_FORMAT_TAG, PROGRAM_VERSION};
use crate::region_processor::PileupMode;
use crate::site_record::{discretize_model_score, SiteDetail, SiteGroup, SiteRecord};

#[derive(Debug)]
pub struct OutputContext;

impl fmt::Display for OutputContext {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Failed to write output files")
    }
}

impl Context for OutputContext {}

/// A single genome track interval
#[derive(Debug, PartialEq, Serialize)]
pub struct TrackInterval<'a> {
    pub chrom: &'a str,
    pub start: i64,
    pub end: i64,
    pub value: f64,
}

/// Format an optional mean probability for bed output
fn format_mean_prob(x: Option<f32>) -> String {
    match x {
        Some(x) => format!("{x:.3}"),
        None => ".".to_string(),
    }
}

/// Format a site record as a bed line, without the trailing newline
fn format_bed_line(record: &SiteRecord) -> String {
    let extra_columns = match &record.detail {
        SiteDetail::Model => {
            let (mod_reads, unmod_reads, adj_score) =
                discretize_model_score(record.percent_modified, record.cov);
            format!("{mod_reads}\t{unmod_reads}\t{adj_score:.1}")
        }
        SiteDetail::Count {
            mod_count,
            unmod_count,
            mean_mod_prob,
            mean_unmod_prob,
        } => format!(
            "{mod_count}\t{unmod_count}\t{}\t{}",
            format_mean_prob(*mean_mod_prob),
            format_mean_prob(*mean_unmod_prob)
        ),
    };
    format!(
        "{}\t{}\t{}\t{:.1}\t{}\t{}\t{}",
        record.chrom,
        record.start,
        record.end(),
        record.percent_modified,
        record.group.bed_label(),
        record.cov,
        extra_columns
    )
}

/// Create the full header shared by all bed files
fn get_shared_bed_header(settings: &Settings) -> Vec<String> {
    let mut header = Vec::new();
    header.push(format!("##{OUTPUT_FORMAT_TAG}-version={PROGRAM_VERSION}"));

    let cmdline = std::env::args().collect::<Vec<_>>().join(" ");
    header.push(format!("##cmdline={cmdline}"));

    header.push(format!("##pileup-mode={}", settings.pileup_mode));
    header.push(format!("##modsites-mode={}", settings.modsites_mode));
    header.push(format!("##min-coverage={}", settings.min_coverage));
    header.push(format!("##min-mapq={}", settings.min_mapq));

    let extra_columns = if settings.pileup_mode == PileupMode::model {
        "est_mod_count\test_unmod_count\tdiscretized_mod_score"
    } else {
        "mod_count\tunmod_count\tavg_mod_score\tavg_unmod_score"
    };
    header.push(format!(
        "#chrom\tbegin\tend\tmod_score\ttype\tcov\t{extra_columns}"
    ));

    header
}

fn write_bed_file(
    bed_filename: &str,
    records: &[&SiteRecord],
    bed_header: &[String],
) -> error_stack::Result<(), OutputContext> {
    let attach_filename = || format!("Unable to write bed file: '{bed_filename}'");

    let f = bgzf::Writer::from_path(bed_filename)
        .change_context(OutputContext)
        .attach_printable_lazy(attach_filename)?;
    let mut f = BufWriter::new(f);

    for bed_header_line in bed_header {
        writeln!(f, "{bed_header_line}")
            .change_context(OutputContext)
            .attach_printable_lazy(attach_filename)?;
    }
    for &record in records {
        writeln!(f, "{}", format_bed_line(record))
            .change_context(OutputContext)
            .attach_printable_lazy(attach_filename)?;
    }
    f.flush()
        .change_context(OutputContext)
        .attach_printable_lazy(attach_filename)?;
    Ok(())
}

fn make_bed_file_tabix_index(fname: &str) -> error_stack::Result<(), OutputContext> {
    let cfname = std::ffi::CString::new(fname.as_bytes())
        .change_context(OutputContext)
        .attach_printable_lazy(|| format!("Invalid bed filename: '{fname}'"))?;
    let min_shift = 0;
    let threads = 1;

    let ret = unsafe {
        htslib::tbx_index_build3(
            cfname.as_ptr(),
            std::ptr::null_mut(),
            min_shift,
            threads,
            &htslib::tbx_conf_bed,
        )
    };

    match ret {
        0 => Ok(()),
        -2 => Err(Report::new(OutputContext)
            .attach_printable(format!("[tabix] the compression of {fname} is not BGZF"))),
        _ => Err(Report::new(OutputContext)
            .attach_printable(format!("tbx_index_build3 failed: {fname}"))),
    }
}

/// Get the genome track intervals of a table
///
/// Intervals are restricted to chromosomes found in both the records and `chrom_list`, and are
/// ordered by chromosome name, then start position.
///
pub fn get_track_intervals<'a>(
    records: &[&'a SiteRecord],
    chrom_list: &ChromList,
) -> error_stack::Result<Vec<TrackInterval<'a>>, OutputContext> {
    let mut chrom_intervals = BTreeMap::new();
    for &record in records {
        let chrom = record.chrom.as_ref();
        if !chrom_list.label_to_index.contains_key(chrom) {
            continue;
        }
        chrom_intervals
            .entry(chrom)
            .or_insert_with(Vec::new)
            .push(TrackInterval {
                chrom,
                start: record.start,
                end: record.end(),
                value: record.percent_modified,
            });
    }
    if chrom_intervals.is_empty() {
        return Err(Report::new(OutputContext).attach_printable(
            "No chromosome names match between site records and alignment file header",
        ));
    }

    let mut intervals = Vec::with_capacity(records.len());
    for (chrom, mut chrom_track) in chrom_intervals {
        debug!(
            "Adding {} track intervals for chromosome '{chrom}'",
            chrom_track.len()
        );
        chrom_track.sort_by_key(|x| x.start);
        intervals.extend(chrom_track);
    }
    Ok(intervals)
}

/// Split ordered track intervals into per-chromosome start position and value lists
fn get_chrom_interval_spans<'a>(
    intervals: &[TrackInterval<'a>],
) -> Vec<(&'a str, Vec<u32>, Vec<f32>)> {
    let mut spans: Vec<(&str, Vec<u32>, Vec<f32>)> = Vec::new();
    for interval in intervals {
        let is_new_chrom = spans
            .last()
            .map_or(true, |(chrom, _, _)| *chrom != interval.chrom);
        if is_new_chrom {
            spans.push((interval.chrom, Vec::new(), Vec::new()));
        }
        if let Some((_, starts, values)) = spans.last_mut() {
            starts.push(interval.start as u32);
            values.push(interval.value as f32);
        }
    }
    spans
}

fn bigwig_error(bigwig_filename: &str, err: &dyn fmt::Debug) -> Report<OutputContext> {
    Report::new(OutputContext)
        .attach_printable(format!("Unable to write bigwig file '{bigwig_filename}': {err:?}"))
}

/// Write one bigwig track of single base intervals
///
/// The bigwig header lists only the chromosomes of the track, in track order.
///
fn write_bigwig_file(
    bigwig_filename: &str,
    intervals: &[TrackInterval],
    chrom_list: &ChromList,
) -> error_stack::Result<(), OutputContext> {
    let mut spans = get_chrom_interval_spans(intervals);

    let mut chrom_names = Vec::new();
    let mut chrom_lengths = Vec::new();
    for &(chrom, _, _) in spans.iter() {
        let length = chrom_list
            .label_to_index
            .get(chrom)
            .map(|&x| chrom_list.data[x].length)
            .and_then(|x| u32::try_from(x).ok())
            .ok_or_else(|| {
                Report::new(OutputContext).attach_printable(format!(
                    "Chromosome '{chrom}' has no valid bigwig length in file '{bigwig_filename}'"
                ))
            })?;
        chrom_names.push(chrom.to_string());
        chrom_lengths.push(length);
    }

    let mut bigwig_writer = BigWigWriter::new(bigwig_filename, &chrom_names, &chrom_lengths)
        .map_err(|e| bigwig_error(bigwig_filename, &e))?;
    for (chrom, starts, values) in spans.iter_mut() {
        bigwig_writer
            .add_interval_spans(*chrom, starts, 1, values)
            .map_err(|e| bigwig_error(bigwig_filename, &e))?;
    }
    Ok(())
}

fn write_bedgraph_file(
    bedgraph_filename: &str,
    intervals: &[TrackInterval],
) -> error_stack::Result<(), OutputContext> {
    let attach_filename = || format!("Unable to write bedgraph file: '{bedgraph_filename}'");

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(bedgraph_filename)
        .change_context(OutputContext)
        .attach_printable_lazy(attach_filename)?;
    for interval in intervals {
        writer
            .serialize(interval)
            .change_context(OutputContext)
            .attach_printable_lazy(attach_filename)?;
    }
    writer
        .flush()
        .change_context(OutputContext)
        .attach_printable_lazy(attach_filename)?;
    Ok(())
}

/// Write one table as a bgzip-compressed and tabix-indexed bed file, with bigwig and bedgraph
/// tracks
///
fn write_site_table(
    file_stem: &str,
    records: &[&SiteRecord],
    bed_header: &[String],
    chrom_list: &ChromList,
) -> error_stack::Result<(), OutputContext> {
    let bed_filename = format!("{file_stem}.bed.gz");
    info!(
        "Writing {} site records to bed file: '{bed_filename}'",
        records.len()
    );
    write_bed_file(&bed_filename, records, bed_header)?;
    make_bed_file_tabix_index(&bed_filename)?;

    let intervals = get_track_intervals(records, chrom_list)?;

    let bigwig_filename = format!("{file_stem}.bw");
    info!("Writing site track to bigwig file: '{bigwig_filename}'");
    write_bigwig_file(&bigwig_filename, &intervals, chrom_list)?;

    let bedgraph_filename = format!("{file_stem}.bedgraph");
    info!("Writing site track to bedgraph file: '{bedgraph_filename}'");
    write_bedgraph_file(&bedgraph_filename, &intervals)
}

/// Output file stem of a table, before the file type extension
fn get_table_file_stem(
    settings: &Settings,
    group: SiteGroup,
    min_coverage: Option<u32>,
) -> String {
    let mut stem = format!(
        "{}.{}.{}",
        settings.output_prefix,
        group.file_label(),
        settings.modsites_mode
    );
    if let Some(min_coverage) = min_coverage {
        stem += &format!(".mincov{min_coverage}");
    }
    stem
}

/// Write all bed and track outputs
///
/// Records are split by group into separate tables, each written both in full and with sites below
/// the minimum coverage removed. Empty tables are skipped.
///
/// The full settings object is passed through these routines to fill in run metadata in the bed file output
///
pub fn write_all_output_files(
    settings: &Settings,
    records: &[SiteRecord],
    chrom_list: &ChromList,
) -> error_stack::Result<(), OutputContext> {
    let bed_header = get_shared_bed_header(settings);

    let mut tables = Vec::new();
    for group in [SiteGroup::Total, SiteGroup::Hap1, SiteGroup::Hap2] {
        let group_records = records
            .iter()
            .filter(|x| x.group == group)
            .collect::<Vec<_>>();
        let mincov_records = group_records
            .iter()
            .copied()
            .filter(|x| x.cov >= settings.min_coverage)
            .collect::<Vec<_>>();

        tables.push((get_table_file_stem(settings, group, None), group_records));
        tables.push((
            get_table_file_stem(settings, group, Some(settings.min_coverage)),
            mincov_records,
        ));
    }

    tables
        .par_iter()
        .filter(|(_, table_records)| !table_records.is_empty())
        .try_for_each(|(file_stem, table_records)| {
            write_site_table(file_stem, table_records, &bed_header, chrom_list)
        })
}
