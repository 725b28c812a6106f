use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use crate::ingest::{SpinIngestor, SpinRequest};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub struct ImportResult {
    pub ingested: u64,
    pub failed: u64,
}

/// Ingest a JSON-lines file of spin requests on `jobs` worker threads.
///
/// Every line is independent: unparsable lines and failed ingestions are
/// logged and counted, the rest of the file still goes in. Blank lines are
/// skipped.
pub fn import_spins(
    ingestor: &SpinIngestor,
    path: &Path,
    jobs: usize,
) -> Result<ImportResult, ImportError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push((idx + 1, line));
        }
    }

    if lines.is_empty() {
        log::info!("No spins in {}", path.display());
        return Ok(ImportResult { ingested: 0, failed: 0 });
    }

    log::info!("Importing {} spins with {} workers", lines.len(), jobs);

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;

    let outcomes: Vec<bool> = pool.install(|| {
        lines
            .par_iter()
            .map(|(line_no, line)| {
                let ok = ingest_line(ingestor, *line_no, line);
                pb.inc(1);
                ok
            })
            .collect()
    });

    let ingested = outcomes.iter().filter(|ok| **ok).count() as u64;
    let failed = outcomes.len() as u64 - ingested;

    pb.finish_with_message(format!("Done: {} ingested, {} failed", ingested, failed));

    Ok(ImportResult { ingested, failed })
}

fn ingest_line(ingestor: &SpinIngestor, line_no: usize, line: &str) -> bool {
    let req: SpinRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            log::warn!("Line {}: unparsable spin: {}", line_no, e);
            return false;
        }
    };

    match ingestor.ingest_spin(&req) {
        Ok(_) => true,
        Err(e) => {
            log::error!("Line {}: {}", line_no, e);
            false
        }
    }
}
