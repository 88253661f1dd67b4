//! Event formatters (§4.6): the five output-facing shapes a batch of rendered event strings can
//! be turned into before handing them to an output plugin.

use crate::Error;
use serde::Deserialize;
use tera::{Context, Tera};

/// Formatter configuration, selected per output sink (§6 `output.<kind>.formatter`).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FormatterSpec {
    /// Pass events through unchanged.
    Plain,
    /// Parse-and-pretty-print each event as JSON.
    Json {
        /// Indent width; `0` disables pretty-printing.
        #[serde(default)]
        indent: usize,
    },
    /// Validate each event as JSON and concatenate into one JSON array.
    JsonBatch {
        /// Indent width for the array; `0` disables pretty-printing.
        #[serde(default)]
        indent: usize,
    },
    /// Render a user template with `event` bound, once per event.
    Template {
        /// Inline template source.
        template: String,
    },
    /// Render a user template with `events` bound to the whole batch, once.
    TemplateBatch {
        /// Inline template source.
        template: String,
    },
}

/// Outcome of formatting a batch: the successfully formatted strings, how many of the input
/// events that represents, and one error per event that failed (§4.6: "never halt the batch").
pub struct FormatResult {
    pub formatted: Vec<String>,
    pub success_count: usize,
    pub errors: Vec<(String, Error)>,
}

impl FormatterSpec {
    /// Formats `events`, per this spec's rule. Errors on individual events are collected rather
    /// than propagated; only a malformed user template (for the `template*` variants) is fatal,
    /// since there every event shares the same template.
    pub fn format(&self, events: &[String]) -> Result<FormatResult, Error> {
        match self {
            FormatterSpec::Plain => Ok(FormatResult {
                formatted: events.to_vec(),
                success_count: events.len(),
                errors: Vec::new(),
            }),
            FormatterSpec::Json { indent } => {
                let mut formatted = Vec::with_capacity(events.len());
                let mut errors = Vec::new();
                for event in events {
                    match serde_json::from_str::<serde_json::Value>(event) {
                        Ok(value) => formatted.push(render_json(&value, *indent)?),
                        Err(e) => errors.push((event.clone(), Error::EventError(e.to_string()))),
                    }
                }
                let success_count = formatted.len();
                Ok(FormatResult { formatted, success_count, errors })
            }
            FormatterSpec::JsonBatch { indent } => {
                let mut values = Vec::with_capacity(events.len());
                let mut errors = Vec::new();
                for event in events {
                    match serde_json::from_str::<serde_json::Value>(event) {
                        Ok(value) => values.push(value),
                        Err(e) => errors.push((event.clone(), Error::EventError(e.to_string()))),
                    }
                }
                let success_count = values.len();
                let array = serde_json::Value::Array(values);
                let formatted = vec![render_json(&array, *indent)?];
                Ok(FormatResult { formatted, success_count, errors })
            }
            FormatterSpec::Template { template } => {
                let mut tera = Tera::default();
                tera.add_raw_template("event", template)
                    .map_err(|e| Error::Configuration(format!("invalid event formatter template: {e}")))?;
                let mut formatted = Vec::with_capacity(events.len());
                let mut errors = Vec::new();
                for event in events {
                    let mut ctx = Context::new();
                    ctx.insert("event", event);
                    match tera.render("event", &ctx) {
                        Ok(rendered) => formatted.push(rendered),
                        Err(e) => errors.push((event.clone(), Error::Template(e.to_string()))),
                    }
                }
                let success_count = formatted.len();
                Ok(FormatResult { formatted, success_count, errors })
            }
            FormatterSpec::TemplateBatch { template } => {
                let mut tera = Tera::default();
                tera.add_raw_template("events", template)
                    .map_err(|e| Error::Configuration(format!("invalid event formatter template: {e}")))?;
                let mut ctx = Context::new();
                ctx.insert("events", events);
                let rendered = tera
                    .render("events", &ctx)
                    .map_err(|e| Error::Template(e.to_string()))?;
                Ok(FormatResult {
                    formatted: vec![rendered],
                    success_count: events.len(),
                    errors: Vec::new(),
                })
            }
        }
    }
}

fn render_json(value: &serde_json::Value, indent: usize) -> Result<String, Error> {
    if indent == 0 {
        Ok(serde_json::to_string(value)?)
    } else {
        let buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&vec![b' '; indent]);
        let mut ser = serde_json::Serializer::with_formatter(buf, formatter);
        serde::Serialize::serialize(value, &mut ser).map_err(Error::Json)?;
        Ok(String::from_utf8(ser.into_inner()).expect("serde_json always emits valid utf8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_is_pass_through() {
        let result = FormatterSpec::Plain.format(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(result.formatted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.success_count, 2);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn json_round_trips_valid_events() {
        let result = FormatterSpec::Json { indent: 0 }
            .format(&[r#"{"a":1}"#.to_string()])
            .unwrap();
        assert_eq!(result.success_count, 1);
        let parsed: serde_json::Value = serde_json::from_str(&result.formatted[0]).unwrap();
        assert_eq!(parsed, serde_json::json!({"a": 1}));
    }

    #[test]
    fn json_counts_malformed_events_as_errors_without_halting() {
        let result = FormatterSpec::Json { indent: 0 }
            .format(&[r#"{"a":1}"#.to_string(), "not json".to_string()])
            .unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn json_batch_concatenates_into_one_array() {
        let result = FormatterSpec::JsonBatch { indent: 0 }
            .format(&[r#"{"a":1}"#.to_string(), r#"{"a":2}"#.to_string()])
            .unwrap();
        assert_eq!(result.formatted.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&result.formatted[0]).unwrap();
        assert_eq!(parsed, serde_json::json!([{"a": 1}, {"a": 2}]));
    }

    #[test]
    fn template_binds_event_per_item() {
        let result = FormatterSpec::Template { template: "<{{ event }}>".to_string() }
            .format(&["x".to_string(), "y".to_string()])
            .unwrap();
        assert_eq!(result.formatted, vec!["<x>".to_string(), "<y>".to_string()]);
    }

    #[test]
    fn template_batch_binds_whole_batch_once() {
        let result = FormatterSpec::TemplateBatch {
            template: "{{ events | length }}".to_string(),
        }
        .format(&["x".to_string(), "y".to_string(), "z".to_string()])
        .unwrap();
        assert_eq!(result.formatted, vec!["3".to_string()]);
        assert_eq!(result.success_count, 3);
    }
}
