use std::fs::File;
use std::path::Path;

use polars::prelude::*;

use crate::channel_model::{ChannelConfig, ChannelRole, ConvertedValue};

const CYCLE_COLUMN_NAME: &str = "Cycle";
const TIME_COLUMN_NAME: &str = "Time(s)";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// `None` outside cycle mode.
    pub cycle: Option<u32>,
    /// Cycle-local time in cycle mode, session time otherwise.
    pub time: f64,
    pub converted: Vec<ConvertedValue>,
    pub raw: Vec<f64>,
}

/// Append-only, full-resolution log of a monitoring session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    channels: Vec<ChannelConfig>,
    cycle_mode: bool,
    records: Vec<SessionRecord>,
}

impl SessionStore {
    pub fn new(channels: Vec<ChannelConfig>, cycle_mode: bool) -> Self {
        Self {
            channels,
            cycle_mode,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: SessionRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.records.last().map(|r| r.time)
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    /// Seal the log. The export can no longer grow.
    pub fn finish(self) -> SessionExport {
        SessionExport {
            channels: self.channels,
            cycle_mode: self.cycle_mode,
            records: self.records,
        }
    }
}

/// The complete log of a finished session.
#[derive(Debug, Clone)]
pub struct SessionExport {
    channels: Vec<ChannelConfig>,
    cycle_mode: bool,
    records: Vec<SessionRecord>,
}

impl SessionExport {
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn cycle_mode(&self) -> bool {
        self.cycle_mode
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.time).collect()
    }

    /// Converted values, one row per sample.
    pub fn converted(&self) -> Vec<Vec<f64>> {
        self.records
            .iter()
            .map(|r| r.converted.iter().map(ConvertedValue::as_f64).collect())
            .collect()
    }

    /// Raw codes, one row per sample.
    pub fn raw(&self) -> Vec<Vec<f64>> {
        self.records.iter().map(|r| r.raw.clone()).collect()
    }

    /// Cycle number of each sample. Empty outside cycle mode.
    pub fn cycle_numbers(&self) -> Vec<u32> {
        self.records.iter().filter_map(|r| r.cycle).collect()
    }

    /// Number of distinct cycles present in the log.
    pub fn cycle_count(&self) -> usize {
        let mut numbers = self.cycle_numbers();
        numbers.dedup();
        numbers.len()
    }

    fn leading_columns(&self) -> Vec<Column> {
        let mut columns = Vec::with_capacity(2);
        if self.cycle_mode {
            let cycles: Vec<u32> = self.cycle_numbers();
            columns.push(Series::new(CYCLE_COLUMN_NAME.into(), cycles).into());
        }
        columns.push(Series::new(TIME_COLUMN_NAME.into(), self.times()).into());
        columns
    }

    /// Converted values as a frame: optional `Cycle`, `Time(s)`, then one
    /// column per channel labelled by role. The trigger column is integer.
    pub fn to_dataframe(&self) -> Result<DataFrame, PolarsError> {
        let mut columns = self.leading_columns();

        for (i, channel) in self.channels.iter().enumerate() {
            let name = channel.column_name();
            let column: Column = if channel.role == ChannelRole::Inductive {
                let bits: Vec<i32> = self
                    .records
                    .iter()
                    .map(|r| r.converted[i].as_f64() as i32)
                    .collect();
                Series::new(name.into(), bits).into()
            } else {
                let values: Vec<f64> = self
                    .records
                    .iter()
                    .map(|r| r.converted[i].as_f64())
                    .collect();
                Series::new(name.into(), values).into()
            };
            columns.push(column);
        }

        DataFrame::new(columns)
    }

    /// Raw ADC codes with the same leading columns, channels named `CH{n}_raw`.
    pub fn to_raw_dataframe(&self) -> Result<DataFrame, PolarsError> {
        let mut columns = self.leading_columns();

        for (i, channel) in self.channels.iter().enumerate() {
            let values: Vec<f64> = self.records.iter().map(|r| r.raw[i]).collect();
            columns.push(Series::new(format!("CH{}_raw", channel.index).into(), values).into());
        }

        DataFrame::new(columns)
    }

    /// Write the converted frame as CSV with a header row.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path.as_ref())?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        log::info!(
            "Session with {} samples written to {}",
            self.records.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}
