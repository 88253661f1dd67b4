//! Sample datasets (§4.5 "Sample loading"): csv/json/inline row sets exposed to templates as
//! `samples.<name>`, each row normalised to a sequence (flat lists become 1-tuples).

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A preloaded sample dataset: rows of values, each row itself a sequence.
#[derive(Clone, Debug, Serialize)]
pub struct Samples(pub Vec<Vec<Value>>);

/// Configuration for one named sample dataset (§6 `event.samples.<name>`).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleSpec {
    /// Rows read from a delimited file.
    Csv {
        /// Path to the CSV file.
        source: String,
        /// Whether the first row is a header to strip. Default `false`.
        #[serde(default)]
        header: bool,
        /// Field delimiter. Default `,`.
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    /// Rows parsed from a JSON file containing an array.
    Json {
        /// Path to the JSON file.
        source: String,
    },
    /// Rows given directly in the configuration.
    Items {
        /// Inline rows; a flat (non-array) item is normalised to a 1-tuple.
        items: Vec<Value>,
    },
}

fn default_delimiter() -> char {
    ','
}

fn normalize_rows(rows: Vec<Value>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| match row {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

impl SampleSpec {
    /// Loads this dataset. A missing file or parse error is a fatal configuration error (§4.5).
    pub fn load(&self) -> Result<Samples, Error> {
        match self {
            SampleSpec::Csv { source, header, delimiter } => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(*header)
                    .delimiter(*delimiter as u8)
                    .from_path(source)
                    .map_err(|e| Error::Configuration(format!("unable to read sample csv {source}: {e}")))?;
                let mut rows = Vec::new();
                for record in reader.records() {
                    let record = record.map_err(|e| {
                        Error::Configuration(format!("invalid csv row in {source}: {e}"))
                    })?;
                    rows.push(record.iter().map(|f| Value::String(f.to_string())).collect());
                }
                Ok(Samples(rows))
            }
            SampleSpec::Json { source } => {
                let contents = std::fs::read_to_string(source).map_err(|e| {
                    Error::Configuration(format!("unable to read sample json {source}: {e}"))
                })?;
                let parsed: Vec<Value> = serde_json::from_str(&contents)?;
                Ok(Samples(normalize_rows(parsed)))
            }
            SampleSpec::Items { items } => Ok(Samples(normalize_rows(items.clone()))),
        }
    }
}
