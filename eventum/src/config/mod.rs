//! Top-level configuration (§6): loads, substitutes `${KEY}` environment references, and parses
//! the `input:`/`event:`/`output:` YAML document into the tagged-union specs the rest of the
//! crate consumes directly.

use crate::outputs::OutputSpec;
use crate::picker::{PickerMode, TemplateSpec, TemplateSource, Transition};
use crate::producers::ProducerSpec;
use crate::renderer::SampleSpec;
use crate::Error;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

fn default_timezone() -> String {
    "+00:00".to_string()
}

fn default_composed_max_bytes() -> usize {
    1_048_576
}

/// The `event:` section (§6): template-engine configuration plus two knobs the distilled schema
/// doesn't name a slot for but the renderer's state layer requires at construction time --
/// `timezone` (stamped on every rendered timestamp) and `composed_max_bytes` (the composed
/// state's capacity, §3/§6 "Persisted state layout"). Both default to values that make an
/// `event:` block with neither present behave exactly like the documented schema.
#[derive(Clone, Debug, Deserialize)]
pub struct EventConfig {
    /// Which picking strategy selects template alias(es) per event.
    pub mode: PickerMode,
    /// Arbitrary parameters exposed to every template as `params`.
    #[serde(default)]
    pub params: Value,
    /// Named, preloaded sample datasets exposed as `samples.<name>`.
    #[serde(default)]
    pub samples: HashMap<String, SampleSpec>,
    /// Configured template aliases.
    #[serde(deserialize_with = "deserialize_templates")]
    pub templates: Vec<TemplateSpec>,
    /// Timezone label stamped alongside every rendered timestamp. Purely presentational --
    /// timestamps are stored and compared as naive µs-since-epoch regardless (§3).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Capacity, in encoded bytes, of the composed state store (§6 "Persisted state layout").
    #[serde(default = "default_composed_max_bytes")]
    pub composed_max_bytes: usize,
    /// Name identifying the cross-process composed state file (§9). Processes that set the
    /// same name observe each other's composed state; left unset, each run gets a private,
    /// process-unique file so unrelated runs never collide by accident.
    #[serde(default)]
    pub composed_state_name: Option<String>,
}

impl EventConfig {
    /// Resolves the path of the on-disk composed state store: a name-derived path under the
    /// system temp directory when `composed_state_name` is set, or a fresh process-unique path
    /// otherwise.
    pub fn composed_state_path(&self) -> std::path::PathBuf {
        match &self.composed_state_name {
            Some(name) => std::env::temp_dir().join(format!("eventum-composed-{name}.state")),
            None => std::env::temp_dir().join(format!("eventum-composed-{}.state", uuid::Uuid::new_v4())),
        }
    }
}

/// Each `templates:` entry is a single-key map `{<alias>: {source, chance?, transition?,
/// initial?}}` (§6); this flattens that shape into [`TemplateSpec`], which carries `alias` as an
/// ordinary field for everything downstream.
fn deserialize_templates<'de, D>(deserializer: D) -> Result<Vec<TemplateSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Body {
        source: TemplateSource,
        chance: Option<f64>,
        transition: Option<Transition>,
        #[serde(default)]
        initial: bool,
    }

    let entries: Vec<HashMap<String, Body>> = Vec::deserialize(deserializer)?;
    entries
        .into_iter()
        .map(|mut entry| {
            if entry.len() != 1 {
                return Err(D::Error::custom(format!(
                    "each templates entry must have exactly one alias key, found {}",
                    entry.len()
                )));
            }
            let (alias, body) = entry.drain().next().expect("checked len == 1 above");
            Ok(TemplateSpec {
                alias,
                source: body.source,
                chance: body.chance,
                transition: body.transition,
                initial: body.initial,
            })
        })
        .collect()
}

fn default_batch_size() -> usize {
    100_000
}

fn default_queue_capacity() -> Option<usize> {
    None
}

fn default_look_ahead_seconds() -> f64 {
    crate::batcher::MIN_BATCH_DELAY.as_secs_f64()
}

fn default_merge_chunk_size() -> usize {
    0
}

fn default_event_batch_size() -> usize {
    1_000
}

fn default_event_batch_duration_seconds() -> f64 {
    1.0
}

/// Internal pipeline knobs the distilled schema never names a slot for (the timestamps batcher's
/// `S`/`D`/`Q`, the live merger's `L`/`B`, and Queue B's batcher size/timeout) but which the
/// already-built primitives require as constructor arguments. Exposed as an optional `pipeline:`
/// section so a config with none of this still runs with sensible defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    /// Timestamps batcher size `S`. Default 100,000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timestamps batcher max accumulation delay `D`, in seconds. `None` disables it.
    #[serde(default)]
    pub batch_duration_secs: Option<f64>,
    /// Timestamps batcher input queue capacity `Q`. Defaults to `2 * batch_size`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,
    /// Live merger look-ahead delay `L`, in seconds. Default `MIN_BATCH_DELAY` (0.1s).
    #[serde(default = "default_look_ahead_seconds")]
    pub look_ahead_secs: f64,
    /// Live merger output chunk size `B`. `0` means unbounded.
    #[serde(default = "default_merge_chunk_size")]
    pub merge_chunk_size: usize,
    /// Queue B batcher size.
    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: usize,
    /// Queue B batcher timeout, in seconds.
    #[serde(default = "default_event_batch_duration_seconds")]
    pub event_batch_duration_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            batch_size: default_batch_size(),
            batch_duration_secs: None,
            queue_capacity: default_queue_capacity(),
            look_ahead_secs: default_look_ahead_seconds(),
            merge_chunk_size: default_merge_chunk_size(),
            event_batch_size: default_event_batch_size(),
            event_batch_duration_secs: default_event_batch_duration_seconds(),
        }
    }
}

impl PipelineConfig {
    /// Resolves `queue_capacity`'s default (`2 * batch_size`) now that `batch_size` is known.
    pub fn resolved_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.batch_size * 2)
    }
}

/// A fully parsed eventum configuration: one producer, the event/template configuration, zero or
/// more output sinks, and the ambient pipeline knobs (§6).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The single configured timestamp source.
    pub input: ProducerSpec,
    /// Template-engine configuration.
    pub event: EventConfig,
    /// Configured output sinks, in fan-out order.
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    /// Internal batching/merging knobs, all defaulted.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Matches a `${KEY}` reference: letters, digits, and underscores, not starting with a digit.
fn env_token_pattern() -> Regex {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
}

/// Substitutes every `${KEY}` in `raw` with the matching environment variable's value (§6
/// "Keyring token in configs"), before the text is parsed as YAML. A reference to an unset
/// variable is a fatal configuration error naming the missing key.
fn substitute_env(raw: &str) -> Result<String, Error> {
    let pattern = env_token_pattern();
    let mut err = None;
    let substituted = pattern.replace_all(raw, |caps: &regex::Captures| {
        let key = &caps[1];
        match std::env::var(key) {
            Ok(value) => value,
            Err(_) => {
                err.get_or_insert_with(|| {
                    Error::Configuration(format!("config references unset environment variable `{key}`"))
                });
                String::new()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(substituted.into_owned()),
    }
}

impl Config {
    /// Reads `path`, substitutes `${KEY}` references, and parses the result as a [`Config`].
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("unable to read config {}: {e}", path.display()))
        })?;
        let substituted = substitute_env(&raw)?;
        let config: Config = serde_yaml::from_str(&substituted)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
input:
  static:
    count: 3
event:
  mode: all
  templates:
    - a:
        source: /tmp/does-not-need-to-exist.tera
output:
  - stdout:
      formatter:
        type: plain
"#;

    #[test]
    fn parses_minimal_document_with_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.event.mode, PickerMode::All);
        assert_eq!(config.event.templates.len(), 1);
        assert_eq!(config.event.templates[0].alias, "a");
        assert_eq!(config.event.timezone, "+00:00");
        assert_eq!(config.pipeline.batch_size, 100_000);
        assert_eq!(config.pipeline.resolved_queue_capacity(), 200_000);
        assert_eq!(config.output.len(), 1);
    }

    #[test]
    fn rejects_template_entry_with_multiple_keys() {
        let doc = r#"
input:
  static:
    count: 1
event:
  mode: all
  templates:
    - a: {source: x}
      b: {source: y}
"#;
        assert!(serde_yaml::from_str::<Config>(doc).is_err());
    }

    #[test]
    fn substitutes_known_env_var() {
        std::env::set_var("EVENTUM_TEST_TOKEN", "shh");
        let out = substitute_env("password: ${EVENTUM_TEST_TOKEN}").unwrap();
        assert_eq!(out, "password: shh");
        std::env::remove_var("EVENTUM_TEST_TOKEN");
    }

    #[test]
    fn rejects_unset_env_var() {
        std::env::remove_var("EVENTUM_DEFINITELY_UNSET");
        let err = substitute_env("password: ${EVENTUM_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
