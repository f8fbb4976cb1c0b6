//! Record normalizer: cleans the raw node/link/flow/OD tables and derives
//! free-flow and congested travel times.
//!
//! Malformed rows are dropped and counted, never repaired. Outputs land in
//! `data/processed/` for the downstream stages.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};

use crate::{
    DataPaths, Error, Result, PROCESSED_LINKS, PROCESSED_NODES, PROCESSED_OD, RAW_LINKFLOWS,
    RAW_LINKS, RAW_NODES, RAW_OD,
};

const INT_LINK_COLS: &[&str] = &["Link_ID", "From_Node_ID", "To_Node_ID", "Lanes"];
const FLOAT_LINK_COLS: &[&str] = &[
    "Length",
    "FreeFlow_Speed",
    "Free_Speed",
    "Speed",
    "speed",
    "Capacity",
];
const SPEED_COLS: &[&str] = &["FreeFlow_Speed", "Free_Speed", "Speed", "speed"];

pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| *c == name)
}

fn cast_to(df: &mut DataFrame, col: &str, dtype: &DataType) -> Result<()> {
    let series = df.column(col)?.cast(dtype)?;
    df.with_column(series)?;
    Ok(())
}

/// Load one CSV from the raw folder, or `None` with a warning if absent.
fn load_raw(paths: &DataPaths, name: &str) -> Result<Option<DataFrame>> {
    let path = paths.raw_file(name);
    if !path.exists() {
        warn!("{} not found in {}, skipping", name, paths.raw.display());
        return Ok(None);
    }

    info!("loading {}...", name);
    let df = CsvReader::from_path(&path)?.infer_schema(None).finish()?;
    Ok(Some(df))
}

pub fn preprocess_nodes(mut nodes: DataFrame) -> Result<DataFrame> {
    info!("cleaning nodes...");

    cast_to(&mut nodes, "Node_ID", &DataType::Int64)?;
    cast_to(&mut nodes, "Lon", &DataType::Float64)?;
    cast_to(&mut nodes, "Lat", &DataType::Float64)?;

    Ok(nodes)
}

/// Valid intersection identifiers from the cleaned node table.
fn node_id_set(nodes: &DataFrame) -> Result<HashSet<i64>> {
    Ok(nodes.column("Node_ID")?.i64()?.into_iter().flatten().collect())
}

fn set_congested_from(links: &mut DataFrame, src: &str) -> Result<()> {
    let mut series = links.column(src)?.cast(&DataType::Float64)?;
    series.rename("congested_time");
    links.with_column(series)?;
    Ok(())
}

/// Elementwise `Length / <speed column>`, nulls where either side is null.
fn time_from_speed(links: &DataFrame, speed_col: &str, name: &str) -> Result<Series> {
    let times: Float64Chunked = {
        let length = links.column("Length")?.f64()?;
        let speed = links.column(speed_col)?.cast(&DataType::Float64)?;
        let speed = speed.f64()?;
        length
            .into_iter()
            .zip(speed.into_iter())
            .map(|(l, s)| match (l, s) {
                (Some(l), Some(s)) if s > 0.0 => Some(l / s),
                _ => None,
            })
            .collect()
    };

    let mut series = times.into_series();
    series.rename(name);
    Ok(series)
}

pub fn preprocess_links(
    mut links: DataFrame,
    nodes: &DataFrame,
    linkflows: Option<DataFrame>,
) -> Result<DataFrame> {
    info!("cleaning links...");

    for col in INT_LINK_COLS {
        if has_column(&links, col) {
            cast_to(&mut links, col, &DataType::Int64)?;
        }
    }
    for col in FLOAT_LINK_COLS {
        if has_column(&links, col) {
            cast_to(&mut links, col, &DataType::Float64)?;
        }
    }

    // Drop rows with non-positive length
    let before = links.height();
    let mask: BooleanChunked = links
        .column("Length")?
        .f64()?
        .into_iter()
        .map(|len| Some(len.is_some_and(|l| l > 0.0)))
        .collect();
    links = links.filter(&mask)?;
    info!("removed {} links with non-positive length", before - links.height());

    // Drop rows referencing nodes that are not in the node table
    let valid = node_id_set(nodes)?;
    let before = links.height();
    let mask: BooleanChunked = {
        let from = links.column("From_Node_ID")?.i64()?;
        let to = links.column("To_Node_ID")?.i64()?;
        from.into_iter()
            .zip(to.into_iter())
            .map(|(f, t)| {
                Some(matches!((f, t), (Some(f), Some(t))
                    if valid.contains(&f) && valid.contains(&t)))
            })
            .collect()
    };
    links = links.filter(&mask)?;
    info!(
        "removed {} links with missing node references",
        before - links.height()
    );

    // Free-flow travel time from the first matching speed column, with a
    // positivity floor against division by zero
    let speed_col = SPEED_COLS
        .iter()
        .find(|c| has_column(&links, c))
        .copied()
        .ok_or_else(|| Error::MissingColumn("free-flow speed".to_string()))?;

    let before = links.height();
    let mask: BooleanChunked = links
        .column(speed_col)?
        .f64()?
        .into_iter()
        .map(|s| Some(s.is_some_and(|v| v > 0.0)))
        .collect();
    links = links.filter(&mask)?;
    info!(
        "removed {} links with non-positive free-flow speed",
        before - links.height()
    );

    let freeflow = time_from_speed(&links, speed_col, "freeflow_time")?;
    links.with_column(freeflow)?;

    // Congested travel time from LinkFlows when available
    match linkflows {
        Some(mut flows) => {
            info!("merging LinkFlows (congested speeds)...");

            if !has_column(&flows, "Link_ID") && has_column(&flows, "ID1") {
                flows.rename("ID1", "Link_ID")?;
            }

            if !has_column(&flows, "Link_ID") {
                warn!("LinkFlows format unexpected, only free-flow times will be used");
                set_congested_from(&mut links, "freeflow_time")?;
            } else {
                cast_to(&mut flows, "Link_ID", &DataType::Int64)?;
                links = links.join(&flows, ["Link_ID"], ["Link_ID"], JoinArgs::new(JoinType::Left))?;

                if has_column(&links, "traversal_time") {
                    set_congested_from(&mut links, "traversal_time")?;
                } else if let Some(time_col) = ["Max_Time", "AB_Time", "BA_Time"]
                    .iter()
                    .find(|c| has_column(&links, c))
                {
                    set_congested_from(&mut links, time_col)?;
                } else if let Some(congested_col) = flows
                    .get_column_names()
                    .iter()
                    .find(|c| c.contains("Speed") || c.contains("speed"))
                    .map(|c| c.to_string())
                    .filter(|c| has_column(&links, c))
                {
                    let congested = time_from_speed(&links, &congested_col, "congested_time")?;
                    links.with_column(congested)?;
                } else {
                    warn!(
                        "no congested time column found in LinkFlows, \
                         only free-flow times will be used"
                    );
                    set_congested_from(&mut links, "freeflow_time")?;
                }
            }
        }
        None => {
            info!("LinkFlows not provided, congested times fall back to free-flow");
            set_congested_from(&mut links, "freeflow_time")?;
        }
    }

    Ok(links)
}

pub fn preprocess_od(mut od: DataFrame, nodes: &DataFrame) -> Result<DataFrame> {
    info!("cleaning OD matrix...");

    // The OD export shows up with several header variants
    let col_map: &[(&str, &[&str])] = &[
        ("origin", &["origin", "O_ID", "O", "Origin"]),
        ("destination", &["destination", "D_ID", "D", "Destination"]),
        ("trips", &["trips", "OD_Number", "Trips", "Trip"]),
    ];

    for (target, options) in col_map {
        let source = options
            .iter()
            .find(|c| has_column(&od, c))
            .copied()
            .ok_or_else(|| Error::MissingColumn(format!("OD {target}")))?;

        let dtype = if *target == "trips" {
            DataType::Float64
        } else {
            DataType::Int64
        };
        let mut series = od.column(source)?.cast(&dtype)?;
        series.rename(target);
        od.with_column(series)?;
    }

    // Drop OD pairs pointing at nodes that do not exist
    let valid = node_id_set(nodes)?;
    let before = od.height();
    let mask: BooleanChunked = {
        let origin = od.column("origin")?.i64()?;
        let destination = od.column("destination")?.i64()?;
        origin
            .into_iter()
            .zip(destination.into_iter())
            .map(|(o, d)| {
                Some(matches!((o, d), (Some(o), Some(d))
                    if valid.contains(&o) && valid.contains(&d)))
            })
            .collect()
    };
    let od = od.filter(&mask)?;
    info!("removed {} OD rows with missing nodes", before - od.height());

    Ok(od)
}

fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}

pub fn save_processed(
    paths: &DataPaths,
    nodes: &mut DataFrame,
    links: &mut DataFrame,
    od: Option<&mut DataFrame>,
) -> Result<()> {
    fs::create_dir_all(&paths.processed)?;

    write_csv(&paths.processed_file(PROCESSED_NODES), nodes)?;
    write_csv(&paths.processed_file(PROCESSED_LINKS), links)?;
    if let Some(od) = od {
        write_csv(&paths.processed_file(PROCESSED_OD), od)?;
    }

    info!("saved processed files to {}", paths.processed.display());
    Ok(())
}

/// Full normalizer stage: raw tables in, cleaned tables out.
pub fn run_preprocessing(paths: &DataPaths) -> Result<()> {
    info!("running data preprocessing...");

    let nodes = load_raw(paths, RAW_NODES)?.ok_or(Error::MissingInput {
        path: paths.raw_file(RAW_NODES),
        hint: "node table is required",
    })?;
    let links = load_raw(paths, RAW_LINKS)?.ok_or(Error::MissingInput {
        path: paths.raw_file(RAW_LINKS),
        hint: "link table is required",
    })?;
    let linkflows = load_raw(paths, RAW_LINKFLOWS)?;
    let od = load_raw(paths, RAW_OD)?;

    let mut nodes = preprocess_nodes(nodes)?;
    let mut links = preprocess_links(links, &nodes, linkflows)?;
    let mut od = match od {
        Some(df) => Some(preprocess_od(df, &nodes)?),
        None => None,
    };

    save_processed(paths, &mut nodes, &mut links, od.as_mut())?;

    info!("preprocessing complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_nodes() -> DataFrame {
        DataFrame::new(vec![
            Series::new("Node_ID", &[1i64, 2, 3]),
            Series::new("Lon", &[-96.80f64, -96.81, -96.82]),
            Series::new("Lat", &[32.78f64, 32.79, 32.80]),
        ])
        .unwrap()
    }

    fn raw_links() -> DataFrame {
        // row 2: zero length, row 3: endpoint 9 missing, row 4: zero speed
        DataFrame::new(vec![
            Series::new("Link_ID", &[10i64, 11, 12, 13, 14]),
            Series::new("From_Node_ID", &[1i64, 2, 1, 3, 2]),
            Series::new("To_Node_ID", &[2i64, 3, 9, 1, 1]),
            Series::new("Length", &[2.0f64, 0.0, 1.0, 3.0, 1.5]),
            Series::new("FreeFlow_Speed", &[40.0f64, 30.0, 30.0, 60.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn drops_invalid_rows_and_derives_freeflow_time() {
        let nodes = preprocess_nodes(raw_nodes()).unwrap();
        let links = preprocess_links(raw_links(), &nodes, None).unwrap();

        assert_eq!(links.height(), 2);

        let ids: Vec<i64> = links
            .column("Link_ID")
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(ids, vec![10, 13]);

        let freeflow: Vec<f64> = links
            .column("freeflow_time")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(freeflow, vec![2.0 / 40.0, 3.0 / 60.0]);
        assert!(freeflow.iter().all(|t| *t > 0.0));
    }

    #[test]
    fn congested_falls_back_to_freeflow_without_linkflows() {
        let nodes = preprocess_nodes(raw_nodes()).unwrap();
        let links = preprocess_links(raw_links(), &nodes, None).unwrap();

        let freeflow: Vec<f64> = links
            .column("freeflow_time")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let congested: Vec<f64> = links
            .column("congested_time")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(freeflow, congested);
    }

    #[test]
    fn congested_time_taken_from_linkflows_max_time() {
        let nodes = preprocess_nodes(raw_nodes()).unwrap();
        let flows = DataFrame::new(vec![
            Series::new("ID1", &[10i64, 13]),
            Series::new("Max_Time", &[0.5f64, 0.25]),
        ])
        .unwrap();

        let links = preprocess_links(raw_links(), &nodes, Some(flows)).unwrap();
        let congested: Vec<f64> = links
            .column("congested_time")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(congested, vec![0.5, 0.25]);
    }

    #[test]
    fn od_rows_with_missing_nodes_are_dropped() {
        let nodes = preprocess_nodes(raw_nodes()).unwrap();
        let od = DataFrame::new(vec![
            Series::new("O_ID", &[1i64, 2, 7]),
            Series::new("D_ID", &[2i64, 3, 1]),
            Series::new("OD_Number", &[12.0f64, 4.0, 9.0]),
        ])
        .unwrap();

        let od = preprocess_od(od, &nodes).unwrap();
        assert_eq!(od.height(), 2);

        let trips: Vec<f64> = od
            .column("trips")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(trips, vec![12.0, 4.0]);
    }
}
