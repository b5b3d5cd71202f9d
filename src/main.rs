//! CLI entry point: load a configuration and a trace, replay it through
//! the Address Translation Engine with the in-memory reference
//! collaborators, and print the §6 run summary as CSV.

use std::fs;
use std::process::ExitCode;

use caftl_sim::amu::dedup::{FingerprintSource, VecFingerprintSource};
use caftl_sim::amu::AddressTranslationEngine;
use caftl_sim::collaborators::{RefBlockManager, RefFlashController, RefGcUnit, RefTransactionScheduler};
use caftl_sim::config::{self, Config};
use caftl_sim::logging;
use caftl_sim::stats::RunSummary;
use caftl_sim::trace::{FileFingerprintSource, TransactionTrace};
use caftl_sim::types::Fingerprint;

struct Args {
    config_path: String,
    trace_path: String,
    fingerprint_paths: Vec<String>,
    output_path: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut config_path = None;
    let mut trace_path = None;
    let mut fingerprint_paths = Vec::new();
    let mut output_path = None;

    let mut raw = std::env::args().skip(1);
    while let Some(flag) = raw.next() {
        let value = raw.next().ok_or_else(|| format!("{flag} requires a value"))?;
        match flag.as_str() {
            "--config" => config_path = Some(value),
            "--trace" => trace_path = Some(value),
            "--fingerprints" => fingerprint_paths = value.split(',').map(str::to_string).collect(),
            "--output" => output_path = Some(value),
            other => return Err(format!("unrecognized argument {other}")),
        }
    }

    Ok(Args {
        config_path: config_path.ok_or("--config is required")?,
        trace_path: trace_path.ok_or("--trace is required")?,
        fingerprint_paths,
        output_path,
    })
}

fn run() -> Result<(), String> {
    logging::init();

    let args = parse_args()?;
    let config_text = fs::read_to_string(&args.config_path).map_err(|e| e.to_string())?;
    let cfg: Config = config::parse_config(&config_text).map_err(|e| e.to_string())?;

    let sources: Vec<Box<dyn FingerprintSource>> = if args.fingerprint_paths.is_empty() {
        cfg.streams
            .iter()
            .map(|_| Box::new(VecFingerprintSource::new(Vec::<Fingerprint>::new())) as Box<dyn FingerprintSource>)
            .collect()
    } else {
        args.fingerprint_paths
            .iter()
            .map(|p| {
                FileFingerprintSource::open(p)
                    .map(|s| Box::new(s) as Box<dyn FingerprintSource>)
                    .map_err(|e| e.to_string())
            })
            .collect::<Result<_, _>>()?
    };

    let pages_per_block = cfg.page_count_per_block;
    let mut engine = AddressTranslationEngine::new(
        &cfg,
        sources,
        RefBlockManager::new(pages_per_block),
        RefFlashController::new(),
        RefGcUnit::new(0),
        RefTransactionScheduler::new(),
    )
    .map_err(|e| e.to_string())?;
    engine.store_mapping_table_on_flash_at_start().map_err(|e| e.to_string())?;

    let trace = TransactionTrace::open(&args.trace_path).map_err(|e| e.to_string())?;
    log::info!("replaying {} transactions", trace.len());
    engine.translate_and_dispatch(trace.into_transactions()).map_err(|e| e.to_string())?;

    let summary = RunSummary::collect(&cfg, engine.domains());
    let csv = summary.to_csv();

    match args.output_path {
        Some(path) => fs::write(&path, csv).map_err(|e| e.to_string())?,
        None => print!("{csv}"),
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
