//! Config Command

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use dialog_differ_common::DifferConfig;

use crate::output::{print_list, print_structured, OutputFormat, TableDisplay};

/// One configuration key with its effective value
#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

impl TableDisplay for ConfigEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Key", "Value"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.key.clone(), self.value.clone()]
    }
}

fn entries(config: &DifferConfig) -> Result<Vec<ConfigEntry>> {
    let doc = serde_json::to_value(config)?;
    let fields = doc.as_object().cloned().unwrap_or_default();

    Ok(fields
        .into_iter()
        .map(|(key, value)| ConfigEntry {
            key,
            value: match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
        })
        .collect())
}

pub fn execute(config: &DifferConfig, path: &Path, format: OutputFormat) -> Result<()> {
    if !format.is_human() {
        print_structured(config, format);
        return Ok(());
    }

    let source = if path.exists() { "file" } else { "defaults, no file" };
    println!("Configuration: {} ({})", path.display(), source);
    print_list(&entries(config)?, format);
    Ok(())
}
