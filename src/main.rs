use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use phantom_bmd::{
    Calibration, NiftiWriter, Pipeline, PipelineConfig, SeriesReadError, SeriesReader,
    SeriesWriteError, WriterOptions,
};

#[derive(Parser)]
#[command(name = "phantom-bmd")]
#[command(about = "Find calibration phantom rods in a DICOM CT series and report their BMD statistics")]
#[command(version)]
struct Cli {
    /// Directory holding the DICOM files.
    dicom_directory: PathBuf,

    /// 3-D volume written with the cropped ROI (NIfTI).
    #[arg(default_value = "temp.nii")]
    output_filename: PathBuf,

    /// Pipeline configuration (JSON). Defaults to the built-in protocol ROI.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Series Instance UID to process. Defaults to the first series found.
    #[arg(long)]
    series: Option<String>,

    /// Calibration slope, raw intensity to density units.
    #[arg(long, requires = "intercept", allow_hyphen_values = true)]
    slope: Option<f64>,

    /// Calibration intercept.
    #[arg(long, requires = "slope", allow_hyphen_values = true)]
    intercept: Option<f64>,

    /// Gzip the output volume (implied by a .gz file name).
    #[arg(long)]
    compress: bool,

    /// Path to write the per-rod results (JSON).
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory receiving PNGs of every quantized slice and mask.
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> phantom_bmd::Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let (Some(slope), Some(intercept)) = (cli.slope, cli.intercept) {
        config.calibration = Some(Calibration::new(slope, intercept));
    }

    let catalog = match SeriesReader::scan(&cli.dicom_directory) {
        Ok(catalog) => catalog,
        Err(SeriesReadError::NoSeries(dir)) => {
            println!("No DICOMs in: {}", dir.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "The directory: {} contains the following DICOM series:",
        catalog.directory().display()
    );
    for uid in catalog.series_uids() {
        println!("{uid} ({} files)", catalog.file_count(uid).unwrap_or_default());
    }

    let uid = match &cli.series {
        Some(uid) => uid.as_str(),
        None => catalog.first_uid().unwrap_or_default(),
    };
    let volume = catalog.load(uid, config.sort_by)?;
    info!(
        "Volume {:?} voxels, spacing {:?} mm",
        volume.size_xyz(),
        volume.spacing()
    );

    let rois = config.rois.clone();
    let mut pipeline = Pipeline::new(config)?;
    if let Some(dir) = &cli.debug_dir {
        pipeline = pipeline.with_debug_dir(dir);
    }
    let reports = pipeline.run(&volume)?;

    let compress = cli.compress || has_gz_extension(&cli.output_filename);
    let writer = NiftiWriter::new(WriterOptions { compress });
    for (index, roi) in rois.iter().enumerate() {
        let path = output_path(&cli.output_filename, &roi.name, index);
        println!("Writing: {}", path.display());
        writer.write(&volume.crop(&roi.region)?, &path)?;
    }

    for report in &reports {
        if !report.incomplete_slices.is_empty() {
            warn!(
                "ROI '{}' is incomplete: no rod on slice(s) {:?}",
                report.name, report.incomplete_slices
            );
        }
        for rod in &report.rods {
            if !rod.missing_slices.is_empty() {
                warn!(
                    "ROI '{}' rod {}: not detected on slice(s) {:?}, sampled anyway",
                    report.name, rod.rod, rod.missing_slices
                );
            }
            let density = rod
                .density
                .map(|d| format!("  density {d:.3}"))
                .unwrap_or_default();
            println!(
                "{} rod {}: center ({:.1}, {:.1}) r {:.1}  slices {}-{}  mean {:.2}  sd {:.2}  n {}{}",
                report.name,
                rod.rod,
                rod.center.0,
                rod.center.1,
                rod.radius,
                rod.slices.0,
                rod.slices.1,
                rod.mean,
                rod.std_dev,
                rod.voxel_count,
                density
            );
        }
    }

    if let Some(path) = &cli.report {
        let file = File::create(path).map_err(SeriesWriteError::from)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &reports)
            .map_err(|e| SeriesWriteError::Io(e.into()))?;
        info!("Wrote report to {}", path.display());
    }

    println!("Done!");
    Ok(())
}

fn has_gz_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// The first ROI goes to `base`; later ones get their name appended to the stem.
fn output_path(base: &Path, roi: &str, index: usize) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let file_name = base
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("temp.nii");
    let (stem, extension) = match file_name.find('.') {
        Some(dot) => file_name.split_at(dot),
        None => (file_name, ""),
    };
    base.with_file_name(format!("{stem}_{roi}{extension}"))
}
