//! Batch files: a YAML list of override maps, one per job, indexed in file order.
//!
//! ```yaml
//! - {lr: 0.1, model: small}
//! - {lr: 0.01, model: small}
//! ```

use anyhow::{bail, Context};
use launcher_core::job::JobRequest;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub fn load_batch(path: &Path) -> anyhow::Result<Vec<JobRequest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    parse_batch(&contents).with_context(|| format!("parsing batch file {}", path.display()))
}

pub fn parse_batch(contents: &str) -> anyhow::Result<Vec<JobRequest>> {
    let entries = match serde_yaml::from_str::<Value>(contents)? {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(entries) => entries,
        _ => bail!("expected a list of override maps"),
    };

    let mut batch = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let map = match entry {
            Value::Mapping(map) => map,
            Value::Null => Default::default(),
            _ => bail!("entry {} is not a map", index),
        };
        let mut overrides = BTreeMap::new();
        for (key, value) in map {
            let key = scalar(&key).with_context(|| format!("entry {}: bad key", index))?;
            let value = scalar(&value).with_context(|| format!("entry {}: bad value for '{}'", index, key))?;
            overrides.insert(key, value);
        }
        batch.push(JobRequest::new(index, overrides));
    }
    Ok(batch)
}

fn scalar(value: &Value) -> anyhow::Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => bail!("only scalar values are supported"),
    })
}
