// ~/src/data_loaders/yaml.rs

use std::{fs, path::Path};

use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;

/// Reads and parses one YAML document. Profiles are read once per process,
/// so there is no cache in front of this.
pub fn load_yaml(path: &Path) -> Result<Value, ConfigError> {
    let txt = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/* =========================
   MAPPING ACCESSORS
   ========================= */

pub fn mapping_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    map.get(Value::String(key.to_string()))?.as_mapping()
}

pub fn bool_at(map: &Mapping, key: &str) -> Option<bool> {
    map.get(Value::String(key.to_string()))?.as_bool()
}

pub fn str_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(Value::String(key.to_string()))?.as_str()
}

pub fn i64_at(map: &Mapping, key: &str) -> Option<i64> {
    map.get(Value::String(key.to_string()))?.as_i64()
}

/// Integers are accepted where floats are expected (`contrast: 1`).
pub fn f64_at(map: &Mapping, key: &str) -> Option<f64> {
    let value = map.get(Value::String(key.to_string()))?;
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

pub fn f64_any(map: &Mapping, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| f64_at(map, k))
}
