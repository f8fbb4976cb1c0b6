//! Temporal synthesizer: derives four time-of-day travel-time columns per
//! link by blending free-flow and congested times with fixed factors.
//!
//! The snapshot carries no measured time-of-day signal, so these columns
//! are a declared synthetic approximation of congestion, not ground truth.
//! The transform is pure: the same input and blend table reproduce the
//! same output bytes.

use std::fs::{self, File};

use polars::prelude::*;
use tracing::{info, warn};

use crate::preprocessing::has_column;
use crate::{DataPaths, Error, Result, PROCESSED_LINKS, PROCESSED_LINKS_BACKUP};

/// Blend factor per period: 0.0 = free-flow traffic, 1.0 = fully congested.
pub const CONGESTION_FACTORS: &[(&str, f64)] = &[
    ("AM", 0.80),
    ("Midday", 0.40),
    ("PM", 0.90),
    ("Evening", 0.20),
];

#[must_use]
pub fn travel_time_column(period: &str) -> String {
    format!("travel_time_{period}")
}

fn load_links(paths: &DataPaths) -> Result<DataFrame> {
    let path = paths.processed_file(PROCESSED_LINKS);
    if !path.exists() {
        return Err(Error::MissingInput {
            path,
            hint: "run the preprocessing stage first",
        });
    }

    info!("loading {}...", path.display());
    let df = CsvReader::from_path(&path)?.infer_schema(None).finish()?;
    Ok(df)
}

fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Make sure `congested_time` exists and has no nulls: synthesize it from
/// `Max_Time`, then `AB_Time`, with `freeflow_time` as the last resort.
pub fn ensure_congested_time(df: &mut DataFrame) -> Result<()> {
    let freeflow = column_f64(df, "freeflow_time")?;

    let existing = if has_column(df, "congested_time") {
        Some(column_f64(df, "congested_time")?)
    } else {
        info!("congested_time column missing, synthesizing it...");
        None
    };

    let mut fallbacks = Vec::new();
    for col in ["Max_Time", "AB_Time"] {
        if has_column(df, col) {
            fallbacks.push(column_f64(df, col)?);
        }
    }

    let mut from_fallback = 0usize;
    let mut from_freeflow = 0usize;
    let congested: Float64Chunked = (0..df.height())
        .map(|i| {
            if let Some(existing) = &existing {
                if let Some(v) = existing[i] {
                    return Some(v);
                }
            }
            for fallback in &fallbacks {
                if let Some(v) = fallback[i] {
                    from_fallback += 1;
                    return Some(v);
                }
            }
            from_freeflow += 1;
            freeflow[i]
        })
        .collect();

    if from_fallback > 0 || from_freeflow > 0 {
        warn!(
            "filled congested_time for {} rows from Max_Time/AB_Time and {} rows from freeflow_time",
            from_fallback, from_freeflow
        );
    }

    let mut series = congested.into_series();
    series.rename("congested_time");
    df.with_column(series)?;
    Ok(())
}

/// Add `travel_time_<period>` columns:
/// `freeflow_time + (congested_time - freeflow_time) * factor`.
pub fn add_temporal_travel_times(df: &mut DataFrame) -> Result<()> {
    info!("creating temporal travel time columns...");

    if !has_column(df, "freeflow_time") {
        return Err(Error::MissingColumn("freeflow_time".to_string()));
    }
    ensure_congested_time(df)?;

    let freeflow = column_f64(df, "freeflow_time")?;
    let congested = column_f64(df, "congested_time")?;

    for &(period, factor) in CONGESTION_FACTORS {
        let name = travel_time_column(period);
        let blended: Float64Chunked = freeflow
            .iter()
            .zip(congested.iter())
            .map(|(f, c)| match (f, c) {
                (Some(f), Some(c)) => Some(f + (c - f) * factor),
                _ => None,
            })
            .collect();

        let mut series = blended.into_series();
        series.rename(&name);
        df.with_column(series)?;
        info!("added column '{}' (factor={})", name, factor);
    }

    Ok(())
}

fn save_links(paths: &DataPaths, df: &mut DataFrame) -> Result<()> {
    let path = paths.processed_file(PROCESSED_LINKS);
    let backup = paths.processed_file(PROCESSED_LINKS_BACKUP);

    fs::copy(&path, &backup)?;
    info!("backed up pre-update links to {}", backup.display());

    let mut file = File::create(&path)?;
    CsvWriter::new(&mut file).finish(df)?;
    info!("overwrote {} with temporal travel times", path.display());
    Ok(())
}

/// Full synthesizer stage: back up the link table, then overwrite it with
/// the four added time-of-day columns.
pub fn run_temporal_preprocessing(paths: &DataPaths) -> Result<()> {
    info!("temporal preprocessing starting...");

    let mut df = load_links(paths)?;
    info!("loaded {} rows, {} columns", df.height(), df.width());

    add_temporal_travel_times(&mut df)?;
    save_links(paths, &mut df)?;

    info!("temporal preprocessing done");
    Ok(())
}
