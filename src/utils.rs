use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::config::BacktestConfig;
use crate::engine::Dataset;
use crate::errors::{Error, Result};

use serde::de::DeserializeOwned;

/// Reads a JSON document from `filepath`.
pub fn read_json<T: DeserializeOwned>(filepath: impl AsRef<Path>) -> Result<T> {
    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(Error::from)
}

/// Reads a [`Dataset`] (`candidates`, `trades`, `volume_nodes`) from a JSON file.
pub fn load_dataset(filepath: impl AsRef<Path>) -> Result<Dataset> {
    read_json(filepath)
}

/// Reads a [`BacktestConfig`] from a JSON file and validates it.
///
/// Missing fields take their default value.
pub fn load_config(filepath: impl AsRef<Path>) -> Result<BacktestConfig> {
    let config: BacktestConfig = read_json(filepath)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("bts-zones-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[cfg(test)]
#[test]
fn load_dataset_from_json() {
    let path = write_temp(
        "dataset.json",
        r#"{
            "candidates": [{
                "symbol": "AAPL",
                "zone_id": 7,
                "zone_type": "demand",
                "entry_time": "2024-01-02T14:30:00Z",
                "entry_price": 100.0,
                "zone_low": 90.0,
                "zone_high": 95.0,
                "forward_closes": { "1": 101.0, "5": 110.0 }
            }],
            "volume_nodes": [
                { "symbol": "AAPL", "price": 120.0, "node_type": "HVN" }
            ]
        }"#,
    );
    let dataset = load_dataset(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(dataset.candidates.len(), 1);
    assert!(dataset.trades.is_empty());
    let candidate = &dataset.candidates[0];
    assert_eq!(candidate.zone_id(), 7);
    assert_eq!(candidate.forward_close(5), Some(110.0));
    assert_eq!(dataset.volume_nodes[0].node_type, crate::engine::NodeType::Hvn);
}

#[cfg(test)]
#[test]
fn load_config_rejects_invalid() {
    let path = write_temp("bad-config.json", r#"{ "exit_strategy": { "kind": "holding_period", "days": 4 } }"#);
    let result = load_config(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(Error::InvalidHoldingPeriod(4))));

    assert!(matches!(load_config("/nonexistent/bts-zones.json"), Err(Error::IoError(_))));
}
