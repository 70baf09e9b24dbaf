// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delimited edge-file parsing.
//!
//! Columns are located by header name; when the source/destination/time
//! headers are not recognised the file is read positionally as
//! `source, destination, timestamp[, label], features...`.
//!
//! | role        | accepted headers (case-insensitive)                    |
//! |-------------|--------------------------------------------------------|
//! | source      | `u`, `src`, `source`, `source_id`, `head`              |
//! | destination | `i`, `dst`, `destination`, `destination_id`, `tail`    |
//! | timestamp   | `ts`, `t`, `time`, `timestamp`                         |
//! | relation    | `rel`, `relation`, `relation_type`, `edge_type`, `r`   |
//! | weight      | `w`, `weight`, `label`, `state_label`, `y`             |
//! | ignored     | `idx`, `index`, empty                                  |
//!
//! Every other column is a numeric edge feature, in file order.
//!
//! Timestamps are stored as integers. Decimal timestamps are scaled by
//! `10^d`, where `d` is the largest number of fraction digits in the column
//! (or a fixed `timestamp_decimals`), so `0.5, 1.25` loads as `50, 125`
//! without going through floating point.

use std::fs::File;
use std::path::Path;

use tracing::{debug, info};

use crate::edges::{Edge, EdgeColumns, NodeId, RelationId, Timestamp};
use crate::error::{Error, Result};
use crate::features::{FeatureMatrix, DEFAULT_FEAT_DIM};

/// Parser settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Minimum edge-feature width; native features are zero-padded up to it.
    pub feat_dim: usize,
    /// Fixed timestamp scale in decimal places. `None` uses the widest
    /// fraction found in the column.
    pub timestamp_decimals: Option<u32>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            feat_dim: DEFAULT_FEAT_DIM,
            timestamp_decimals: None,
        }
    }
}

/// Largest supported timestamp scale; `10^18` still fits an `i64`.
pub const MAX_TIMESTAMP_DECIMALS: u32 = 18;

/// Parsed edge file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdgeTable {
    /// Edge columns with raw node ids, in file order.
    pub edges: EdgeColumns,
    /// Edge-aligned features, padded to at least `feat_dim` columns.
    pub edge_feat: FeatureMatrix,
    /// Number of native feature columns found in the file.
    pub native_feat_dim: usize,
    /// Timestamps were multiplied by `10^timestamp_decimals`.
    pub timestamp_decimals: u32,
}

#[derive(Debug, Default)]
struct Layout {
    src: usize,
    dst: usize,
    ts: usize,
    rel: Option<usize>,
    weight: Option<usize>,
    features: Vec<usize>,
}

fn role(header: &str) -> Option<&'static str> {
    match header.trim().to_ascii_lowercase().as_str() {
        "u" | "src" | "source" | "source_id" | "head" => Some("src"),
        "i" | "dst" | "destination" | "destination_id" | "tail" => Some("dst"),
        "ts" | "t" | "time" | "timestamp" => Some("ts"),
        "rel" | "relation" | "relation_type" | "edge_type" | "r" => Some("rel"),
        "w" | "weight" | "label" | "state_label" | "y" => Some("weight"),
        "idx" | "index" | "" => Some("ignore"),
        _ => None,
    }
}

impl Layout {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let mut layout = Self::default();
        let (mut src, mut dst, mut ts) = (None, None, None);
        for (col, name) in headers.iter().enumerate() {
            match role(name) {
                Some("src") if src.is_none() => src = Some(col),
                Some("dst") if dst.is_none() => dst = Some(col),
                Some("ts") if ts.is_none() => ts = Some(col),
                Some("rel") if layout.rel.is_none() => layout.rel = Some(col),
                Some("weight") if layout.weight.is_none() => layout.weight = Some(col),
                Some("ignore") => {}
                _ => layout.features.push(col),
            }
        }
        if let (Some(s), Some(d), Some(t)) = (src, dst, ts) {
            layout.src = s;
            layout.dst = d;
            layout.ts = t;
            return Ok(layout);
        }

        if headers.len() < 3 {
            return Err(Error::InvalidInput(format!(
                "edge file needs at least 3 columns, header has {}",
                headers.len()
            )));
        }
        debug!("edge headers not recognised, falling back to positional layout");
        Ok(Self {
            src: 0,
            dst: 1,
            ts: 2,
            rel: None,
            weight: (headers.len() > 3).then_some(3),
            features: (4..headers.len()).collect(),
        })
    }
}

/// Parse an integer id, accepting integral float spellings such as `12.0`.
pub(crate) fn parse_integral(field: &str, what: &str, row: usize) -> Result<i128> {
    let field = field.trim();
    if let Ok(v) = field.parse::<i128>() {
        return Ok(v);
    }
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i128),
        _ => Err(Error::InvalidInput(format!(
            "row {row}: {what} {field:?} is not an integer"
        ))),
    }
}

/// Split a decimal spelling into `(mantissa, fraction digits)` with trailing
/// fraction zeros dropped: `1.250` is `(125, 2)`, `100.0` is `(100, 0)`.
/// Exponent spellings are accepted only when integral.
fn parse_decimal(field: &str, what: &str, row: usize) -> Result<(i128, u32)> {
    let text = field.trim();
    let not_numeric =
        || Error::InvalidInput(format!("row {row}: {what} {field:?} is not numeric"));
    if text.contains(['e', 'E']) {
        return parse_integral(text, what, row).map(|v| (v, 0));
    }
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_raw) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_raw.is_empty())
        || !digits_only(int_part)
        || !digits_only(frac_raw)
    {
        return Err(not_numeric());
    }
    let frac = frac_raw.trim_end_matches('0');
    let decimals = u32::try_from(frac.len()).map_err(|_| not_numeric())?;
    if decimals > MAX_TIMESTAMP_DECIMALS {
        return Err(Error::InvalidInput(format!(
            "row {row}: {what} {field:?} has more than {MAX_TIMESTAMP_DECIMALS} decimal places"
        )));
    }
    let digits = format!("{int_part}{frac}");
    let mantissa = if digits.bytes().all(|b| b == b'0') {
        0
    } else {
        digits.parse::<i128>().map_err(|_| {
            Error::InvalidInput(format!("row {row}: {what} {field:?} is out of range"))
        })?
    };
    Ok((if negative { -mantissa } else { mantissa }, decimals))
}

/// Bring every `(mantissa, decimals)` pair to one scale. Returns the scaled
/// column and the scale used.
fn scale_timestamps(stamps: &[(i128, u32)], fixed: Option<u32>) -> Result<(Vec<Timestamp>, u32)> {
    let widest = stamps.iter().map(|&(_, d)| d).max().unwrap_or(0);
    let scale = match fixed {
        Some(d) if d > MAX_TIMESTAMP_DECIMALS => {
            return Err(Error::InvalidConfig(format!(
                "timestamp_decimals {d} exceeds {MAX_TIMESTAMP_DECIMALS}"
            )));
        }
        Some(d) if d < widest => {
            let row = stamps.iter().position(|&(_, dec)| dec > d).unwrap_or(0);
            return Err(Error::InvalidInput(format!(
                "row {row}: timestamp has more than timestamp_decimals={d} decimal places"
            )));
        }
        Some(d) => d,
        None => widest,
    };
    let scaled = stamps
        .iter()
        .enumerate()
        .map(|(row, &(mantissa, d))| {
            10_i128
                .checked_pow(scale - d)
                .and_then(|factor| mantissa.checked_mul(factor))
                .and_then(|v| Timestamp::try_from(v).ok())
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "row {row}: timestamp out of range at {scale} decimal places"
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((scaled, scale))
}

fn parse_node(field: &str, what: &str, row: usize) -> Result<NodeId> {
    let v = parse_integral(field, what, row)?;
    NodeId::try_from(v)
        .map_err(|_| Error::InvalidInput(format!("row {row}: {what} {v} is out of range")))
}

fn parse_f64(field: &str, what: &str, row: usize) -> Result<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::InvalidInput(format!("row {row}: {what} {field:?} is not numeric")))
}

fn field<'r>(record: &'r csv::StringRecord, col: usize, row: usize) -> Result<&'r str> {
    record
        .get(col)
        .ok_or_else(|| Error::InvalidInput(format!("row {row}: missing column {col}")))
}

fn open_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<File>> {
    if !path.exists() {
        return Err(Error::MissingSource {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(Error::io(path))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

/// Parse the edge file at `path`. Rows are kept in file order.
pub fn load_edges(path: &Path, opts: &LoaderOptions) -> Result<RawEdgeTable> {
    let mut reader = open_reader(path, opts.delimiter)?;
    let layout = Layout::from_headers(reader.headers()?)?;

    let mut edges = EdgeColumns::default();
    let mut feature_rows: Vec<Vec<f32>> = Vec::new();
    let mut stamps = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        stamps.push(parse_decimal(field(&record, layout.ts, row)?, "timestamp", row)?);
        let rel = layout
            .rel
            .map(|col| {
                let v = parse_integral(field(&record, col, row)?, "relation", row)?;
                RelationId::try_from(v).map_err(|_| {
                    Error::InvalidInput(format!("row {row}: relation {v} is out of range"))
                })
            })
            .transpose()?;
        let weight = layout
            .weight
            .map(|col| parse_f64(field(&record, col, row)?, "weight", row))
            .transpose()?;
        edges.push(Edge {
            src: parse_node(field(&record, layout.src, row)?, "source", row)?,
            dst: parse_node(field(&record, layout.dst, row)?, "destination", row)?,
            // Replaced below once the column scale is known.
            ts: 0,
            rel,
            weight,
            original_index: row as u64,
        })?;

        let feats = layout
            .features
            .iter()
            .map(|&col| parse_f64(field(&record, col, row)?, "feature", row).map(|v| v as f32))
            .collect::<Result<Vec<f32>>>()?;
        feature_rows.push(feats);
    }

    let (timestamps, timestamp_decimals) = scale_timestamps(&stamps, opts.timestamp_decimals)?;
    edges.timestamps = timestamps;

    let native_feat_dim = layout.features.len();
    let edge_feat = FeatureMatrix::from_rows(feature_rows, opts.feat_dim)?;
    info!(
        path = %path.display(),
        edges = edges.len(),
        native_feat_dim,
        feat_dim = edge_feat.cols(),
        relations = layout.rel.is_some(),
        timestamp_decimals,
        "edge file loaded"
    );
    Ok(RawEdgeTable {
        edges,
        edge_feat,
        native_feat_dim,
        timestamp_decimals,
    })
}

/// Parse a `node_id,type` file into `(raw id, type)` pairs.
///
/// Headers `node_id`/`id`/`node` and `type`/`node_type` are recognised;
/// otherwise the first two columns are used.
pub fn load_node_types(path: &Path, delimiter: u8) -> Result<Vec<(NodeId, u32)>> {
    let mut reader = open_reader(path, delimiter)?;
    let headers = reader.headers()?.clone();
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&h.trim().to_ascii_lowercase().as_str()))
    };
    let id_col = find(&["node_id", "id", "node"]).unwrap_or(0);
    let type_col = find(&["type", "node_type"]).unwrap_or(1);

    let mut out = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let id = parse_node(field(&record, id_col, row)?, "node id", row)?;
        let ty = parse_integral(field(&record, type_col, row)?, "node type", row)?;
        let ty = u32::try_from(ty).map_err(|_| {
            Error::InvalidInput(format!("row {row}: node type {ty} is out of range"))
        })?;
        out.push((id, ty));
    }
    debug!(path = %path.display(), nodes = out.len(), "node types loaded");
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_file_is_missing_source() {
        let err = load_edges(Path::new("/definitely/not/here.csv"), &LoaderOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::MissingSource);
    }

    #[test]
    fn named_columns_in_any_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "e.csv",
            "ts,edge_type,dst,src,weight\n5,2,20,10,0.5\n6,1,21,11,1.5\n",
        );
        let table = load_edges(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(table.edges.sources, vec![10, 11]);
        assert_eq!(table.edges.destinations, vec![20, 21]);
        assert_eq!(table.edges.timestamps, vec![5, 6]);
        assert_eq!(table.edges.relations, Some(vec![2, 1]));
        assert_eq!(table.edges.y, Some(vec![0.5, 1.5]));
        assert_eq!(table.edges.edge_idxs, vec![0, 1]);
        assert_eq!(table.native_feat_dim, 0);
        assert_eq!(table.edge_feat.shape(), (2, 172));
        assert!(table.edge_feat.is_zero());
    }

    #[test]
    fn positional_layout_with_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "e.csv",
            "user_id,item_id,timestamp,state_label,f0,f1\n1,7,100.0,0,0.1,0.2\n2,7,101,1,0.3,0.4\n",
        );
        let opts = LoaderOptions {
            feat_dim: 4,
            ..LoaderOptions::default()
        };
        let table = load_edges(&path, &opts).unwrap();
        assert_eq!(table.edges.sources, vec![1, 2]);
        assert_eq!(table.edges.timestamps, vec![100, 101]);
        assert_eq!(table.edges.y, Some(vec![0.0, 1.0]));
        assert_eq!(table.native_feat_dim, 2);
        assert_eq!(table.edge_feat.shape(), (2, 4));
        assert_eq!(table.edge_feat.get(1, 1), Some(0.4));
    }

    #[test]
    fn rows_are_not_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "e.csv", "u,i,ts\n1,2,9\n3,4,1\n");
        let table = load_edges(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(table.edges.timestamps, vec![9, 1]);
    }

    #[test]
    fn fractional_timestamps_scale_to_the_widest_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "e.csv", "u,i,ts\n1,2,0.5\n2,3,1.25\n3,4,2\n4,5,-0.75\n");
        let table = load_edges(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(table.timestamp_decimals, 2);
        assert_eq!(table.edges.timestamps, vec![50, 125, 200, -75]);
    }

    #[test]
    fn integral_float_spellings_keep_scale_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "e.csv", "u,i,ts\n1,2,100.0\n2,3,1e3\n3,4,0.000\n");
        let table = load_edges(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(table.timestamp_decimals, 0);
        assert_eq!(table.edges.timestamps, vec![100, 1000, 0]);
    }

    #[test]
    fn fixed_timestamp_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "e.csv", "u,i,ts\n1,2,0.5\n2,3,7\n");
        let opts = LoaderOptions {
            timestamp_decimals: Some(3),
            ..LoaderOptions::default()
        };
        let table = load_edges(&path, &opts).unwrap();
        assert_eq!(table.timestamp_decimals, 3);
        assert_eq!(table.edges.timestamps, vec![500, 7000]);

        let narrow = LoaderOptions {
            timestamp_decimals: Some(0),
            ..LoaderOptions::default()
        };
        let err = load_edges(&path, &narrow).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidInput);
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn malformed_timestamp_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["abc", "1.2.3", ".", "-", "1e-3"] {
            let path = write(&dir, "e.csv", &format!("u,i,ts\n1,2,{bad}\n"));
            let err = load_edges(&path, &LoaderOptions::default()).unwrap_err();
            assert_eq!(err.code(), crate::ErrorCode::InvalidInput, "{bad}");
        }
    }

    #[test]
    fn tab_delimited_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "e.tsv", "src\tdst\tts\n1\t2\t3\n");
        let opts = LoaderOptions {
            delimiter: b'\t',
            ..LoaderOptions::default()
        };
        let table = load_edges(&path, &opts).unwrap();
        assert_eq!(table.edges.len(), 1);
    }

    #[test]
    fn node_types_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "types.csv", "type,node_id\n3,100\n4,200\n");
        assert_eq!(load_node_types(&path, b',').unwrap(), vec![(100, 3), (200, 4)]);
    }
}
