use anyhow::{bail, Context, Result};
use aqscraper::{
    aqi::Aggregator,
    config::{self, JobConfig, Severity},
    fetch::LegacyClient,
    merge,
    zipcode::{self, ZipLookup},
};
use arrow::{csv::Writer, record_batch::RecordBatch};
use clap::{Parser, Subcommand};
use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "EPA AQI archive retrieval, ZIP geocoding and tract table merging"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download, filter and concatenate yearly AQI archives
    Aqi {
        #[arg(short, long)]
        config: PathBuf,
        /// CSV destination; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Join CSV tables on their detected identifier columns
    Merge {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Look up city, state and county for a ZIP code
    Zip {
        zip: u32,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn write_csv(batch: &RecordBatch, out: Option<&Path>) -> Result<()> {
    let sink: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = Writer::new(sink);
    writer.write(batch).context("writing CSV")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<JobConfig> {
    match path {
        Some(p) => Ok(JobConfig::from_path(p)?),
        None => Ok(JobConfig::default()),
    }
}

async fn run_aqi(cfg: &JobConfig, out: Option<&Path>) -> Result<()> {
    let job = cfg.aqi.as_ref().context("config has no `aqi` section")?;

    let diags = config::validate(job);
    for d in &diags {
        match d.severity {
            Severity::Warning => warn!(param = %d.param, "{}", d.message),
            Severity::Error => error!(param = %d.param, "{}", d.message),
        }
    }
    if config::has_errors(&diags) {
        bail!("AQI job has {} invalid parameter(s)", diags.len());
    }

    let client = LegacyClient::shared(&cfg.http)?;
    let lookup: Option<ZipLookup> = match job.zip_code.as_deref() {
        Some(zip) if job.needs_zip_lookup() => {
            let zip: u32 = zip.parse().with_context(|| format!("zip code {zip}"))?;
            Some(zipcode::resolve_zip(client, &cfg.endpoints.zip_lookup()?, zip).await?)
        }
        _ => None,
    };
    let request = job.resolve(lookup.as_ref())?;
    info!(table = %request.output_name(), "resolved request");

    let start = Instant::now();
    let batch = Aggregator::new(client, cfg.endpoints.aqi_base()?)
        .with_max_concurrent_years(job.max_concurrent_years)
        .aggregate(&request)
        .await?;
    info!(rows = batch.num_rows(), elapsed = ?start.elapsed(), "aqi done");

    write_csv(&batch, out)
}

fn run_merge(cfg: &JobConfig, out: Option<&Path>) -> Result<()> {
    let job = cfg.merge.as_ref().context("config has no `merge` section")?;
    let files = job.expand_files()?;
    if files.is_empty() {
        bail!("merge job lists no input files");
    }
    info!("merging {} tables", files.len());

    let merged = merge::merge_tables(&files, &job.identifier_name)?;
    for skipped in &merged.report.skipped {
        warn!(file = %skipped.path.display(), "not merged: {}", skipped.reason);
    }
    write_csv(&merged.batch, out)
}

async fn run_zip(cfg: &JobConfig, zip: u32) -> Result<()> {
    let client = LegacyClient::shared(&cfg.http)?;
    let lookup = zipcode::resolve_zip(client, &cfg.endpoints.zip_lookup()?, zip).await?;
    println!("{}", serde_json::to_string_pretty(&lookup)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries data; logs go to stderr
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aqscraper=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();
    info!("startup");

    let args = Args::parse();
    match args.command {
        Command::Aqi { config, out } => {
            let cfg = load_config(Some(config.as_path()))?;
            run_aqi(&cfg, out.as_deref()).await?;
        }
        Command::Merge { config, out } => {
            let cfg = load_config(Some(config.as_path()))?;
            run_merge(&cfg, out.as_deref())?;
        }
        Command::Zip { zip, config } => {
            let cfg = load_config(config.as_deref())?;
            run_zip(&cfg, zip).await?;
        }
    }

    info!("all done");
    Ok(())
}
