//! Template pickers (§4.4): given the configured template aliases and per-event context, choose
//! which alias(es) to render this event with.

use crate::condition::{Condition, ConditionContext};
use crate::Error;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// An FSM transition: move to `to` once `when` evaluates true against the current context.
#[derive(Clone, Debug, Deserialize)]
pub struct Transition {
    pub to: String,
    pub when: Condition,
}

/// One template alias's configuration (§3 "TemplateSpec").
#[derive(Clone, Debug, Deserialize)]
pub struct TemplateSpec {
    pub alias: String,
    /// Path to the template source, or several paths rendered in sequence.
    pub source: TemplateSource,
    /// Weight for `chance` mode. Required iff the picker mode is `chance`.
    pub chance: Option<f64>,
    /// FSM transition out of this state. Meaningful iff the picker mode is `fsm`.
    pub transition: Option<Transition>,
    /// Whether this is the FSM's starting state. Exactly one template may set this in `fsm`
    /// mode.
    #[serde(default)]
    pub initial: bool,
}

/// A template's source: one path, or several rendered in sequence for the same alias.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    One(String),
    Many(Vec<String>),
}

/// The five picking strategies (§4.4).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PickerMode {
    All,
    Any,
    Chance,
    Spin,
    Fsm,
}

/// Picks which template alias(es) render a given event.
pub enum Picker {
    All(Vec<String>),
    Any {
        aliases: Vec<String>,
        rng: Mutex<StdRng>,
    },
    Chance {
        aliases: Vec<String>,
        weights: Vec<f64>,
        rng: Mutex<StdRng>,
    },
    Spin {
        aliases: Vec<String>,
        cursor: AtomicUsize,
    },
    Fsm {
        templates: Vec<TemplateSpec>,
        current: Mutex<usize>,
    },
}

impl Picker {
    /// Builds a picker for `mode` over `templates`, validating mode-specific requirements:
    /// `chance` weights present iff mode is `chance`, exactly one `initial=true` iff mode is
    /// `fsm`.
    pub fn new(mode: PickerMode, templates: Vec<TemplateSpec>) -> Result<Self, Error> {
        if templates.is_empty() {
            return Err(Error::Configuration("event.templates must not be empty".into()));
        }
        let aliases: Vec<String> = templates.iter().map(|t| t.alias.clone()).collect();

        match mode {
            PickerMode::All => Ok(Picker::All(aliases)),
            PickerMode::Any => Ok(Picker::Any {
                aliases,
                rng: Mutex::new(StdRng::from_entropy()),
            }),
            PickerMode::Chance => {
                let mut weights = Vec::with_capacity(templates.len());
                for t in &templates {
                    let w = t.chance.ok_or_else(|| {
                        Error::Configuration(format!(
                            "template {} is missing chance, required in chance mode",
                            t.alias
                        ))
                    })?;
                    if w < 0.0 {
                        return Err(Error::Configuration(format!(
                            "template {}'s chance must be >= 0",
                            t.alias
                        )));
                    }
                    weights.push(w);
                }
                Ok(Picker::Chance {
                    aliases,
                    weights,
                    rng: Mutex::new(StdRng::from_entropy()),
                })
            }
            PickerMode::Spin => Ok(Picker::Spin {
                aliases,
                cursor: AtomicUsize::new(0),
            }),
            PickerMode::Fsm => {
                let initial_count = templates.iter().filter(|t| t.initial).count();
                if initial_count != 1 {
                    return Err(Error::Configuration(format!(
                        "fsm mode requires exactly one template with initial=true, found {initial_count}"
                    )));
                }
                let current = templates.iter().position(|t| t.initial).unwrap();
                Ok(Picker::Fsm {
                    templates,
                    current: Mutex::new(current),
                })
            }
        }
    }

    /// Returns the alias(es) to render for this event, advancing any stateful picker (`spin`,
    /// `fsm`) as a side effect.
    pub fn pick(&self, ctx: &ConditionContext<'_>) -> Vec<String> {
        match self {
            Picker::All(aliases) => aliases.clone(),
            Picker::Any { aliases, rng } => {
                let mut rng = rng.lock().expect("picker rng lock poisoned");
                use rand::seq::SliceRandom;
                vec![aliases.choose(&mut *rng).expect("non-empty at construction").clone()]
            }
            Picker::Chance { aliases, weights, rng } => {
                let dist = WeightedIndex::new(weights).expect("validated weights at construction");
                let mut rng = rng.lock().expect("picker rng lock poisoned");
                let idx = dist.sample(&mut *rng);
                vec![aliases[idx].clone()]
            }
            Picker::Spin { aliases, cursor } => {
                let idx = cursor.fetch_add(1, Ordering::Relaxed) % aliases.len();
                vec![aliases[idx].clone()]
            }
            Picker::Fsm { templates, current } => {
                let mut idx = current.lock().expect("picker fsm lock poisoned");
                if let Some(transition) = &templates[*idx].transition {
                    if transition.when.evaluate(ctx) {
                        if let Some(next) = templates.iter().position(|t| t.alias == transition.to) {
                            *idx = next;
                        }
                    }
                }
                vec![templates[*idx].alias.clone()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::FieldValue;
    use crate::model::Tags;
    use chrono::NaiveDateTime;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn spec(alias: &str, chance: Option<f64>, transition: Option<Transition>, initial: bool) -> TemplateSpec {
        TemplateSpec {
            alias: alias.to_string(),
            source: TemplateSource::One(format!("{alias}.tera")),
            chance,
            transition,
            initial,
        }
    }

    fn empty_ctx() -> ConditionContext<'static> {
        let shared: &'static HashMap<String, Value> = Box::leak(Box::new(HashMap::new()));
        let tags: &'static Tags = Box::leak(Box::new(Arc::new(Vec::new())));
        ConditionContext {
            shared,
            tags,
            timestamp: NaiveDateTime::parse_from_str("2024-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
        }
    }

    #[test]
    fn all_mode_returns_every_alias_in_order() {
        let picker = Picker::new(PickerMode::All, vec![spec("a", None, None, false), spec("b", None, None, false)]).unwrap();
        assert_eq!(picker.pick(&empty_ctx()), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn spin_mode_round_robins() {
        let picker = Picker::new(
            PickerMode::Spin,
            vec![spec("a", None, None, false), spec("b", None, None, false)],
        )
        .unwrap();
        let ctx = empty_ctx();
        assert_eq!(picker.pick(&ctx), vec!["a"]);
        assert_eq!(picker.pick(&ctx), vec!["b"]);
        assert_eq!(picker.pick(&ctx), vec!["a"]);
    }

    #[test]
    fn chance_requires_weight_on_every_template() {
        let err = Picker::new(
            PickerMode::Chance,
            vec![spec("a", Some(0.5), None, false), spec("b", None, None, false)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn fsm_requires_exactly_one_initial() {
        assert!(Picker::new(
            PickerMode::Fsm,
            vec![spec("a", None, None, false), spec("b", None, None, false)]
        )
        .is_err());
        assert!(Picker::new(
            PickerMode::Fsm,
            vec![spec("a", None, None, true), spec("b", None, None, true)]
        )
        .is_err());
    }

    #[test]
    fn fsm_transitions_deterministically_on_counter_threshold() {
        let transition = Transition {
            to: "b".to_string(),
            when: Condition::Gt(FieldValue {
                state_field: "counter".into(),
                value: Value::from(5),
            }),
        };
        let picker = Picker::new(
            PickerMode::Fsm,
            vec![spec("a", None, Some(transition), true), spec("b", None, None, false)],
        )
        .unwrap();

        let mut picked = Vec::new();
        for i in 0..10 {
            let mut shared = HashMap::new();
            shared.insert("counter".to_string(), Value::from(i));
            let shared: &'static HashMap<String, Value> = Box::leak(Box::new(shared));
            let tags: &'static Tags = Box::leak(Box::new(Arc::new(Vec::new())));
            let ctx = ConditionContext {
                shared,
                tags,
                timestamp: NaiveDateTime::parse_from_str("2024-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
            };
            picked.extend(picker.pick(&ctx));
        }
        assert_eq!(
            picked,
            vec!["a", "a", "a", "a", "a", "a", "b", "b", "b", "b"]
        );
    }
}
