use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;

use kdam::tqdm;
use log::{error, info, warn};
use serde::Serialize;

use crate::api::{Client, Transport};
use crate::config::Config;
use crate::error::{ApiError, CollectError};
use crate::records::{PredictionRecord, VehicleRecord};

/// Drives the fixed-cadence polling loop and owns the accumulation buffers.
///
/// Buffers are cumulative: a checkpoint is a deduplicated snapshot of every
/// record seen so far in the run, not a delta since the last flush.
pub struct Collector<T: Transport> {
    client: Client<T>,
    config: Config,
    vehicles: Vec<VehicleRecord>,
    predictions: Vec<PredictionRecord>,
    ticks_since_flush: u32,
}

#[derive(Debug)]
pub struct RunReport {
    pub ticks_run: u32,
    pub calls_made: u64,
    pub quota_hit: bool,
}

impl<T: Transport> Collector<T> {
    pub fn new(client: Client<T>, config: Config) -> Self {
        Self {
            client,
            config,
            vehicles: Vec::new(),
            predictions: Vec::new(),
            ticks_since_flush: 0,
        }
    }

    pub fn run(mut self) -> Result<RunReport, CollectError> {
        let mut quota_hit = false;
        let mut ticks_run = 0;

        for tick in tqdm!(
            1..=self.config.ticks,
            total = self.config.ticks as usize,
            desc = "collecting"
        ) {
            match self.tick() {
                Ok(()) => {}
                Err(e @ ApiError::QuotaExceeded { .. }) => {
                    warn!("{e}; stopping collection early");
                    quota_hit = true;
                }
                // mapping failures mean the upstream contract changed; the
                // tick is discarded but collection keeps going
                Err(e) => error!("Tick {tick} discarded: {e}"),
            }
            if quota_hit {
                break;
            }

            ticks_run = tick;
            self.ticks_since_flush += 1;
            if tick % self.config.flush_every == 0 {
                self.flush()?;
            }
            if tick < self.config.ticks {
                thread::sleep(self.config.interval);
            }
        }

        // ticks collected after the last cadence boundary would otherwise be
        // lost on exit
        if self.ticks_since_flush > 0 {
            self.flush()?;
        }

        Ok(RunReport {
            ticks_run,
            calls_made: self.client.calls_made(),
            quota_hit,
        })
    }

    fn tick(&mut self) -> Result<(), ApiError> {
        let vehicles_now = self.client.vehicles(&self.config.routes)?;

        if self.config.predictions {
            let ids: Vec<String> = vehicles_now.iter().map(|v| v.id.clone()).collect();
            let predictions_now = self.client.predictions_for(&ids)?;
            self.predictions.extend(predictions_now);
        }
        self.vehicles.extend(vehicles_now);

        Ok(())
    }

    fn flush(&mut self) -> Result<(), CollectError> {
        info!("Saving...");

        if let (Some(first), Some(last)) = (self.vehicles.first(), self.vehicles.last()) {
            let path =
                self.checkpoint_path("vehicles", &first.timestamp, &last.timestamp);
            let written = write_checkpoint(&path, &self.vehicles, VehicleRecord::key)?;
            info!("Wrote {written} vehicle rows to {path:?}");
        } else {
            info!("No vehicle records to checkpoint yet");
        }

        if self.config.predictions {
            if let (Some(first), Some(last)) = (self.predictions.first(), self.predictions.last())
            {
                let path =
                    self.checkpoint_path("predictions", &first.timestamp, &last.timestamp);
                let written =
                    write_checkpoint(&path, &self.predictions, PredictionRecord::key)?;
                info!("Wrote {written} prediction rows to {path:?}");
            }
        }

        self.ticks_since_flush = 0;
        Ok(())
    }

    /// Cumulative buffers make the upper timestamp bound grow with new data,
    /// so successive checkpoints within a run get distinct names.
    fn checkpoint_path(&self, prefix: &str, from: &str, to: &str) -> PathBuf {
        let name = format!("{prefix}{}-{}.csv", sanitize(from), sanitize(to));
        self.config.output_dir.join(name)
    }
}

fn sanitize(timestamp: &str) -> String {
    timestamp.replace(' ', "@")
}

/// Writes `rows` to a fresh CSV at `path`, collapsing exact duplicates while
/// preserving first-occurrence order. Rewriting an unchanged buffer produces
/// byte-identical content.
fn write_checkpoint<R: Serialize>(
    path: &Path,
    rows: &[R],
    key: impl Fn(&R) -> String,
) -> Result<usize, CollectError> {
    let flush_err = |source: csv::Error| CollectError::Flush {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(flush_err)?;
    let mut seen = HashSet::new();
    let mut written = 0;
    for row in rows {
        if seen.insert(key(row)) {
            writer.serialize(row).map_err(flush_err)?;
            written += 1;
        }
    }
    writer.flush().map_err(|e| flush_err(csv::Error::from(e)))?;

    Ok(written)
}
