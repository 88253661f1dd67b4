//! Tera-based renderer (§4.5): resolves template alias(es) via the picker, exposes
//! timestamp/timezone/tags/params/samples/module.*/subprocess.run/locals/shared/composed to
//! each template, and returns the rendered string(s).
//!
//! Tera has no native "do" statement for a side-effecting function call, so state-mutating
//! calls are exposed as ordinary Tera functions invoked for their side effect inside
//! `{% set _ = fn(...) %}` -- the idiomatic Tera equivalent of a loop-body statement that
//! discards its return value.

mod samples;

pub use samples::{SampleSpec, Samples};

use crate::model::{Tags, Timestamp};
use crate::state::{ComposedState, StateMap};
use crate::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tera::{Context, Tera};

/// The scopes a single render call is performed against; swapped in just before `render` and
/// read back out by the registered Tera functions.
struct ActiveScopes {
    locals: Arc<StateMap>,
    shared: Arc<StateMap>,
    composed: Arc<ComposedState>,
    tags: Tags,
}

type ActiveSlot = Arc<Mutex<Option<ActiveScopes>>>;

/// Renders configured templates against per-event context plus the three state scopes.
pub struct Renderer {
    tera: Tera,
    params: Value,
    samples: HashMap<String, Samples>,
    timezone: String,
    active: ActiveSlot,
}

fn state_fn_error(msg: impl Into<String>) -> tera::Error {
    tera::Error::msg(msg.into())
}

impl Renderer {
    /// Loads every template source named by `sources` (alias → one or more file paths),
    /// registers the `module.*`/`subprocess.run`/state-access function set, and preloads
    /// `samples`.
    pub fn new(
        sources: &[(String, Vec<String>)],
        params: Value,
        samples: HashMap<String, SampleSpec>,
        timezone: String,
    ) -> Result<Self, Error> {
        let mut tera = Tera::default();
        for (alias, paths) in sources {
            for (i, path) in paths.iter().enumerate() {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("unable to read template {path}: {e}"))
                })?;
                let name = template_name(alias, i);
                tera.add_raw_template(&name, &contents).map_err(|e| {
                    Error::Configuration(format!("invalid template {path}: {e}"))
                })?;
            }
        }

        let loaded_samples = samples
            .into_iter()
            .map(|(name, spec)| spec.load().map(|s| (name, s)))
            .collect::<Result<HashMap<_, _>, Error>>()?;

        let active: ActiveSlot = Arc::new(Mutex::new(None));
        register_functions(&mut tera, Arc::clone(&active));

        Ok(Renderer {
            tera,
            params,
            samples: loaded_samples,
            timezone,
            active,
        })
    }

    /// Number of source files registered under `alias` (1 unless the template used a list of
    /// sources).
    pub fn source_count(&self, alias: &str, len: usize) -> usize {
        let _ = alias;
        len
    }

    /// Renders every source file registered for `alias`, in order, returning one string per
    /// source file.
    pub fn render(
        &mut self,
        alias: &str,
        source_count: usize,
        timestamp: Timestamp,
        tags: Tags,
        locals: Arc<StateMap>,
        shared: Arc<StateMap>,
        composed: Arc<ComposedState>,
    ) -> Result<Vec<String>, Error> {
        *self.active.lock().expect("renderer active-scope lock poisoned") = Some(ActiveScopes {
            locals,
            shared,
            composed,
            tags,
        });

        let mut ctx = Context::new();
        ctx.insert("timestamp", &timestamp.to_string());
        ctx.insert("timezone", &self.timezone);
        ctx.insert(
            "tags",
            &self
                .active
                .lock()
                .expect("renderer active-scope lock poisoned")
                .as_ref()
                .map(|a| (*a.tags).clone())
                .unwrap_or_default(),
        );
        ctx.insert("params", &self.params);
        ctx.insert("samples", &self.samples);

        let mut out = Vec::with_capacity(source_count);
        for i in 0..source_count {
            let name = template_name(alias, i);
            let rendered = self
                .tera
                .render(&name, &ctx)
                .map_err(|e| Error::Template(format!("{alias}: {e}")))?;
            out.push(rendered);
        }

        *self.active.lock().expect("renderer active-scope lock poisoned") = None;
        Ok(out)
    }
}

fn template_name(alias: &str, index: usize) -> String {
    format!("{alias}#{index}")
}

fn with_active<R>(active: &ActiveSlot, f: impl FnOnce(&ActiveScopes) -> tera::Result<R>) -> tera::Result<R> {
    let guard = active.lock().expect("renderer active-scope lock poisoned");
    match guard.as_ref() {
        Some(scopes) => f(scopes),
        None => Err(state_fn_error("state function called outside a render")),
    }
}

fn register_functions(tera: &mut Tera, active: ActiveSlot) {
    let a = Arc::clone(&active);
    tera.register_function("locals_get", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let default = args.get("default").cloned();
        with_active(&a, |s| Ok(non_null_or_default(s.locals.get(&key), &default)))
    });

    let a = Arc::clone(&active);
    tera.register_function("locals_set", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        with_active(&a, |s| {
            s.locals.set(&key, value);
            Ok(Value::Null)
        })
    });

    let a = Arc::clone(&active);
    tera.register_function("shared_get", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let default = args.get("default").cloned();
        with_active(&a, |s| Ok(non_null_or_default(s.shared.get(&key), &default)))
    });

    let a = Arc::clone(&active);
    tera.register_function("shared_set", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        with_active(&a, |s| {
            s.shared.set(&key, value);
            Ok(Value::Null)
        })
    });

    let a = Arc::clone(&active);
    tera.register_function("composed_get", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let default = args.get("default").cloned();
        with_active(&a, |s| Ok(non_null_or_default(s.composed.get(&key), &default)))
    });

    let a = Arc::clone(&active);
    tera.register_function("composed_set", move |args: &HashMap<String, Value>| {
        let key = string_arg(args, "key")?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        with_active(&a, |s| {
            s.composed
                .set(&key, value)
                .map_err(|e| state_fn_error(e.to_string()))?;
            Ok(Value::Null)
        })
    });

    let a = Arc::clone(&active);
    tera.register_function("has_tags", move |args: &HashMap<String, Value>| {
        let wanted: Vec<String> = match args.get("tags") {
            Some(Value::Array(a)) => a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => return Err(state_fn_error("has_tags requires a `tags` argument")),
        };
        with_active(&a, |s| Ok(Value::Bool(wanted.iter().all(|w| s.tags.iter().any(|t| t == w)))))
    });

    tera.register_function("rand_int", |args: &HashMap<String, Value>| {
        use rand::Rng;
        let min = int_arg(args, "min")?;
        let max = int_arg(args, "max")?;
        Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
    });

    tera.register_function("rand_float", |args: &HashMap<String, Value>| {
        use rand::Rng;
        let min = float_arg(args, "min").unwrap_or(0.0);
        let max = float_arg(args, "max").unwrap_or(1.0);
        Ok(Value::from(rand::thread_rng().gen_range(min..max)))
    });

    tera.register_function("rand_choice", |args: &HashMap<String, Value>| {
        use rand::seq::SliceRandom;
        let choices = args
            .get("choices")
            .and_then(Value::as_array)
            .ok_or_else(|| state_fn_error("rand_choice requires a `choices` array"))?;
        choices
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| state_fn_error("rand_choice requires a non-empty `choices` array"))
    });

    tera.register_function("rand_uuid", |_: &HashMap<String, Value>| {
        Ok(Value::String(uuid::Uuid::new_v4().to_string()))
    });

    tera.register_function("faker_name", |_: &HashMap<String, Value>| {
        use fake::faker::name::en::Name;
        use fake::Fake;
        Ok(Value::String(Name().fake()))
    });

    tera.register_function("faker_word", |_: &HashMap<String, Value>| {
        use fake::faker::lorem::en::Word;
        use fake::Fake;
        Ok(Value::String(Word().fake()))
    });

    tera.register_function("faker_sentence", |args: &HashMap<String, Value>| {
        use fake::faker::lorem::en::Sentence;
        use fake::Fake;
        let min = args.get("min_words").and_then(Value::as_u64).unwrap_or(4) as usize;
        let max = args.get("max_words").and_then(Value::as_u64).unwrap_or(8) as usize;
        Ok(Value::String(Sentence(min..max.max(min + 1)).fake()))
    });

    tera.register_function("subprocess_run", |args: &HashMap<String, Value>| {
        let cmd = string_arg(args, "cmd")?;
        let block = args.get("block").and_then(Value::as_bool).unwrap_or(true);

        if block {
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .output()
                .map_err(|e| state_fn_error(format!("subprocess_run failed: {e}")))?;
            let mut result = serde_json::Map::new();
            result.insert("stdout".into(), Value::String(String::from_utf8_lossy(&output.stdout).into_owned()));
            result.insert("stderr".into(), Value::String(String::from_utf8_lossy(&output.stderr).into_owned()));
            result.insert("exit_code".into(), Value::from(output.status.code().unwrap_or(-1)));
            Ok(Value::Object(result))
        } else {
            std::thread::spawn(move || {
                let _ = std::process::Command::new("sh").arg("-c").arg(&cmd).status();
            });
            let mut result = serde_json::Map::new();
            result.insert("stdout".into(), Value::String(String::new()));
            result.insert("stderr".into(), Value::String(String::new()));
            result.insert("exit_code".into(), Value::Null);
            Ok(Value::Object(result))
        }
    });
}

fn string_arg(args: &HashMap<String, Value>, name: &str) -> tera::Result<String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| state_fn_error(format!("missing or non-string argument `{name}`")))
}

fn int_arg(args: &HashMap<String, Value>, name: &str) -> tera::Result<i64> {
    args.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| state_fn_error(format!("missing or non-integer argument `{name}`")))
}

fn float_arg(args: &HashMap<String, Value>, name: &str) -> Option<f64> {
    args.get(name).and_then(Value::as_f64)
}

/// Falls back to `default` when a state lookup comes back `Null` (unset key), so templates can
/// write `shared_get(key="counter", default=0)` instead of guarding every read.
fn non_null_or_default(value: Value, default: &Option<Value>) -> Value {
    if value.is_null() {
        default.clone().unwrap_or(Value::Null)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_template(dir: &tempfile_like::TempDir, name: &str, contents: &str) -> String {
        dir.write(name, contents)
    }

    mod tempfile_like {
        use std::fs;
        use std::path::PathBuf;

        pub struct TempDir {
            path: PathBuf,
        }

        impl TempDir {
            pub fn new() -> Self {
                let path = std::env::temp_dir().join(format!("eventum-renderer-test-{}", uuid::Uuid::new_v4()));
                fs::create_dir_all(&path).unwrap();
                TempDir { path }
            }

            pub fn write(&self, name: &str, contents: &str) -> String {
                let p = self.path.join(name);
                let mut f = fs::File::create(&p).unwrap();
                std::io::Write::write_all(&mut f, contents.as_bytes()).unwrap();
                p.to_string_lossy().into_owned()
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = fs::remove_dir_all(&self.path);
            }
        }
    }

    #[test]
    fn renders_timestamp_and_tags() {
        let dir = tempfile_like::TempDir::new();
        let path = write_template(&dir, "a.tera", "{{ timestamp }} {{ tags | join(sep=\",\") }}");
        let mut renderer = Renderer::new(
            &[("a".to_string(), vec![path])],
            Value::Object(Default::default()),
            HashMap::new(),
            "+00:00".to_string(),
        )
        .unwrap();

        let out = renderer
            .render(
                "a",
                1,
                Timestamp::from_naive(
                    chrono::NaiveDateTime::parse_from_str("2024-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
                ),
                Arc::new(vec!["x".to_string(), "y".to_string()]),
                Arc::new(StateMap::new()),
                Arc::new(StateMap::new()),
                Arc::new(ComposedState::new(dir.write("composed.state", ""), 4096).unwrap()),
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "2024-01-01T00:00:00.000000 x,y");
    }

    #[test]
    fn locals_set_then_get_round_trips_within_one_render() {
        let dir = tempfile_like::TempDir::new();
        let path = write_template(
            &dir,
            "a.tera",
            "{% set _ = locals_set(key=\"n\", value=5) %}{{ locals_get(key=\"n\") }}",
        );
        let mut renderer = Renderer::new(
            &[("a".to_string(), vec![path])],
            Value::Object(Default::default()),
            HashMap::new(),
            "+00:00".to_string(),
        )
        .unwrap();
        let locals = Arc::new(StateMap::new());
        let out = renderer
            .render(
                "a",
                1,
                Timestamp::now(),
                Arc::new(Vec::new()),
                Arc::clone(&locals),
                Arc::new(StateMap::new()),
                Arc::new(ComposedState::new(dir.write("composed.state", ""), 4096).unwrap()),
            )
            .unwrap();
        assert_eq!(out[0], "5");
        assert_eq!(locals.get("n"), Value::from(5));
    }

    #[test]
    fn rand_int_stays_within_bounds() {
        let dir = tempfile_like::TempDir::new();
        let path = write_template(&dir, "a.tera", "{{ rand_int(min=1, max=1) }}");
        let mut renderer = Renderer::new(
            &[("a".to_string(), vec![path])],
            Value::Object(Default::default()),
            HashMap::new(),
            "+00:00".to_string(),
        )
        .unwrap();
        let out = renderer
            .render(
                "a",
                1,
                Timestamp::now(),
                Arc::new(Vec::new()),
                Arc::new(StateMap::new()),
                Arc::new(StateMap::new()),
                Arc::new(ComposedState::new(dir.write("composed.state", ""), 4096).unwrap()),
            )
            .unwrap();
        assert_eq!(out[0], "1");
    }

    #[test]
    fn shared_get_falls_back_to_default_for_unset_key() {
        let dir = tempfile_like::TempDir::new();
        let path = write_template(
            &dir,
            "a.tera",
            "{% set cur = shared_get(key=\"counter\", default=0) %}\
             {% set _ = shared_set(key=\"counter\", value=cur + 1) %}{{ cur }}",
        );
        let mut renderer = Renderer::new(
            &[("a".to_string(), vec![path])],
            Value::Object(Default::default()),
            HashMap::new(),
            "+00:00".to_string(),
        )
        .unwrap();
        let shared = Arc::new(StateMap::new());

        let first = renderer
            .render(
                "a",
                1,
                Timestamp::now(),
                Arc::new(Vec::new()),
                Arc::new(StateMap::new()),
                Arc::clone(&shared),
                Arc::new(ComposedState::new(dir.write("composed.state", ""), 4096).unwrap()),
            )
            .unwrap();
        assert_eq!(first[0], "0");

        let second = renderer
            .render(
                "a",
                1,
                Timestamp::now(),
                Arc::new(Vec::new()),
                Arc::new(StateMap::new()),
                Arc::clone(&shared),
                Arc::new(ComposedState::new(dir.write("composed.state", ""), 4096).unwrap()),
            )
            .unwrap();
        assert_eq!(second[0], "1");
    }
}
