use clap::Parser;
use log::{error, warn};
use simple_error::{bail, SimpleResult};

use crate::chrom_list::ChromList;
use crate::globals::PROGRAM_VERSION;
use crate::region_processor::PileupMode;
use crate::site_filter::ModSitesMode;

#[derive(Parser)]
#[command(
    version = PROGRAM_VERSION,
    about,
    help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(rename_all = "kebab_case")]
pub struct Settings {
    /// Alignment file for input sample in BAM or CRAM format. Alignment file must be mapped and
    /// indexed, with MM/ML tags specifying 5mC methylation. If a CRAM file is provided, then
    /// `--ref` must also be specified.
    #[arg(long = "bam", value_name = "FILE")]
    pub bam_filename: String,

    /// Method to estimate site methylation from the read pileup
    #[arg(long, value_enum, value_name = "MODE", default_value_t = Default::default())]
    pub pileup_mode: PileupMode,

    /// Method to pick 5mC scoring sites
    #[arg(long, value_enum, value_name = "MODE", default_value_t = Default::default())]
    pub modsites_mode: ModSitesMode,

    /// Genome reference in FASTA format. This is required if either (1) 'reference' modsite
    /// mode is selected or (2) input alignments are in CRAM format
    #[arg(long = "ref", value_name = "FILE")]
    pub ref_filename: Option<String>,

    /// Tensorflow-lite model file (*.tflite) used to generate site methylation probability. This
    /// is required for the 'model' pileup mode.
    #[arg(long = "model", value_name = "FILE")]
    pub model_filename: Option<String>,

    /// Prefix used for all file output. If the prefix includes a directory, the directory must
    /// already exist.
    #[arg(long, value_name = "PREFIX", default_value = env!("CARGO_PKG_NAME"))]
    pub output_prefix: String,

    /// Number of threads to use. Defaults to all logical cpus detected.
    #[arg(long = "threads", value_name = "THREAD_COUNT")]
    thread_count_option: Option<usize>,

    /// Size of the reference regions processed independently by each thread
    #[arg(long, value_name = "SIZE", default_value_t = 500_000)]
    pub chunk_size: u64,

    /// Minimum site coverage for the coverage-filtered output files. The prediction model has its
    /// own hard-coded minimum coverage of 4, so any value below this level should have no effect
    /// in 'model' pileup mode.
    #[arg(long, default_value_t = 4)]
    pub min_coverage: u32,

    /// Minimum read mapping quality
    #[arg(long, default_value_t = 0)]
    pub min_mapq: u32,

    /// The 2-letter SAM aux tag used for per-read haplotype ids in the input bam
    #[arg(long, default_value = "HP")]
    pub hap_tag: String,

    /// Enables additional output for debugging
    #[arg(long)]
    pub debug: bool,
}

/// Values immediately computed from the user settings, but not part of direct user inputs
///
pub struct DerivedSettings {
    /// Global thread count to use
    pub thread_count: usize,

    pub hap_tag: [u8; 2],
}

/// Validate settings and use these to produce derived settings
///
fn validate_and_fix_settings_impl(settings: &Settings) -> SimpleResult<DerivedSettings> {
    use std::ffi::OsStr;
    use std::path::Path;

    fn check_required_filename(filename: &str, label: &str) -> SimpleResult<()> {
        if filename.is_empty() {
            bail!("Must specify {label} file");
        }
        if !Path::new(&filename).exists() {
            bail!("Can't find specified {label} file: '{filename}'");
        }
        Ok(())
    }

    fn check_optional_filename(filename_opt: &Option<String>, label: &str) -> SimpleResult<()> {
        if let Some(filename) = filename_opt {
            if !Path::new(&filename).exists() {
                bail!("Can't find specified {label} file: '{filename}'");
            }
        }
        Ok(())
    }

    check_required_filename(&settings.bam_filename, "alignment")?;

    check_optional_filename(&settings.ref_filename, "reference")?;

    // Check if alignment file is cram
    let alignment_file_ext = Path::new(&settings.bam_filename)
        .extension()
        .and_then(OsStr::to_str);
    let cram_input = alignment_file_ext == Some("cram");

    if settings.ref_filename.is_none() {
        if cram_input {
            bail!(
                "The `--ref` option must be provided when input alignment file is in CRAM format"
            );
        }

        if settings.modsites_mode == ModSitesMode::reference {
            bail!("The `--ref` option must be provided when modsite mode is 'reference'");
        }
    }

    match &settings.model_filename {
        Some(model_filename) => {
            check_required_filename(model_filename, "tflite model")?;
            if settings.pileup_mode == PileupMode::count {
                warn!("A tflite model file has been specified, but will not be used in the 'count' pileup mode");
            }
        }
        None => {
            if settings.pileup_mode == PileupMode::model {
                bail!("The `--model` option must be provided when pileup mode is 'model'");
            }
        }
    }

    if settings.pileup_mode == PileupMode::model && cfg!(not(feature = "tflite")) {
        bail!("The model pileup mode has been specified without enabling the corresponding tflite build feature.");
    }

    let hap_tag: [u8; 2] = match settings.hap_tag.as_bytes().try_into() {
        Ok(x) => x,
        Err(_) => bail!("SAM haplotype tag must have a length of 2"),
    };

    if settings.chunk_size == 0 {
        bail!("--chunk-size argument must be greater than 0");
    }

    let thread_count = match settings.thread_count_option {
        Some(count) => {
            if count == 0 {
                bail!("--threads argument must be greater than 0");
            }
            count
        }
        None => num_cpus::get(),
    };

    Ok(DerivedSettings {
        thread_count,
        hap_tag,
    })
}

pub fn validate_and_fix_settings(settings: &Settings) -> DerivedSettings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            error!("Invalid command-line setting: {}", msg);
            std::process::exit(exitcode::USAGE);
        }
    }
}

/// Extended input data/settings validation that's too complex/slow to put in the cmdline parser
///
/// Returns the chromosome list of the alignment file
///
pub fn validate_settings_data(settings: &Settings) -> ChromList {
    use rust_htslib::bam::{self, Read};

    // Test that the BAM file has an index recognized by htslib.
    //
    let bam_reader = match bam::IndexedReader::from_path(&settings.bam_filename) {
        Ok(x) => x,
        Err(error) => {
            error!("Failed to open input bam file: {}", error);
            std::process::exit(exitcode::USAGE);
        }
    };

    // Pull chromosome list from bam
    let chrom_list = ChromList::from_bam_header(bam_reader.header());
    if chrom_list.data.is_empty() {
        error!(
            "No chromosome names found in header of alignment file `{}`.\n\
        Input alignment file must be mapped.",
            settings.bam_filename
        );
        std::process::exit(exitcode::DATAERR);
    }
    chrom_list
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let mut full_args = vec!["cpg_site_scores"];
        full_args.extend_from_slice(args);
        Settings::try_parse_from(full_args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&["--bam", "x.bam"]);
        assert!(settings.pileup_mode == PileupMode::count);
        assert!(settings.modsites_mode == ModSitesMode::denovo);
        assert_eq!(settings.chunk_size, 500_000);
        assert_eq!(settings.min_coverage, 4);
        assert_eq!(settings.min_mapq, 0);
        assert_eq!(settings.hap_tag, "HP");
        assert!(!settings.debug);
    }

    #[test]
    fn test_command_metadata() {
        use clap::CommandFactory;

        let command = Settings::command();
        command.clone().debug_assert();
        assert_eq!(command.get_version(), Some(PROGRAM_VERSION));
        assert!(command.get_author().is_none());
    }

    #[test]
    fn test_validate_settings() {
        let bam_file = tempfile::NamedTempFile::new().unwrap();
        let bam_filename = bam_file.path().to_str().unwrap();

        let settings = parse(&["--bam", bam_filename, "--threads", "3"]);
        let derived_settings = validate_and_fix_settings_impl(&settings).unwrap();
        assert_eq!(derived_settings.thread_count, 3);
        assert_eq!(&derived_settings.hap_tag, b"HP");

        let invalid_args: [&[&str]; 6] = [
            &["--bam", "/nonexistent/x.bam"],
            &["--bam", bam_filename, "--threads", "0"],
            &["--bam", bam_filename, "--chunk-size", "0"],
            &["--bam", bam_filename, "--hap-tag", "HPX"],
            &["--bam", bam_filename, "--modsites-mode", "reference"],
            &["--bam", bam_filename, "--pileup-mode", "model"],
        ];
        for args in invalid_args {
            assert!(validate_and_fix_settings_impl(&parse(args)).is_err());
        }
    }
}
