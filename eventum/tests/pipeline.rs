//! Whole-pipeline integration tests: a real [`Config`] parsed from YAML, run end to end through
//! [`Runtime::run`], asserting on what actually landed in the sink. Unlike the unit tests
//! colocated with each component, these exercise the input/event/output units wired together.

use eventum::config::Config;
use eventum::time::Mode;
use eventum::Runtime;

struct TempDir {
    path: std::path::PathBuf,
}

impl TempDir {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("eventum-pipeline-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        TempDir { path }
    }

    fn write(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let p = self.path.join(name);
        std::fs::write(&p, contents).unwrap();
        p
    }

    fn join(&self, name: &str) -> std::path::PathBuf {
        self.path.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[tokio::test]
async fn static_producer_renders_and_writes_to_file() {
    let dir = TempDir::new();
    let template = dir.write("event.tera", "event-{{ timestamp }}");
    let out_path = dir.join("events.ndjson");

    let doc = format!(
        r#"
input:
  static:
    count: 5
event:
  mode: all
  templates:
    - a:
        source: {template}
output:
  - file:
      path: {out}
      formatter:
        type: plain
"#,
        template = template.display(),
        out = out_path.display()
    );

    let config: Config = serde_yaml::from_str(&doc).unwrap();
    let runtime = Runtime::new(config);
    runtime.run(Mode::Sample).await.unwrap();

    let contents = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines.iter().all(|l| l.starts_with("event-")));
}

#[tokio::test]
async fn linspace_sample_preserves_order_and_count_through_full_pipeline() {
    let dir = TempDir::new();
    let template = dir.write("event.tera", "{{ timestamp }}");
    let out_path = dir.join("events.ndjson");

    let doc = format!(
        r#"
input:
  linspace:
    start: "2024-01-01T00:00:00Z"
    end: "2024-01-01T01:00:00Z"
    count: 200
    endpoint: true
event:
  mode: all
  templates:
    - a:
        source: {template}
output:
  - file:
      path: {out}
      formatter:
        type: plain
"#,
        template = template.display(),
        out = out_path.display()
    );

    let config: Config = serde_yaml::from_str(&doc).unwrap();
    let runtime = Runtime::new(config);
    runtime.run(Mode::Sample).await.unwrap();

    let contents = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 200);
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted, "event stage must preserve producer order");
}

#[tokio::test]
async fn fsm_picker_transitions_across_the_full_pipeline() {
    let dir = TempDir::new();
    let out_path = dir.join("events.ndjson");

    // Each rendered `a` event bumps `shared.counter`, so the ten static-producer events sweep
    // the FSM's `gt{counter: 5}` guard deterministically: six `A`s, then four `B`s.
    let template_a = dir.write(
        "a.tera",
        "{% set cur = shared_get(key=\"counter\", default=0) %}\
         {% set _ = shared_set(key=\"counter\", value=cur + 1) %}A",
    );
    let template_b = dir.write("b.tera", "B");

    let doc = format!(
        r#"
input:
  static:
    count: 10
event:
  mode: fsm
  templates:
    - a:
        source: {template_a}
        initial: true
        transition:
          to: b
          when:
            gt:
              state_field: counter
              value: 5
    - b:
        source: {template_b}
output:
  - file:
      path: {out}
      formatter:
        type: plain
"#,
        template_a = template_a.display(),
        template_b = template_b.display(),
        out = out_path.display()
    );

    let config: Config = serde_yaml::from_str(&doc).unwrap();
    let runtime = Runtime::new(config);
    runtime.run(Mode::Sample).await.unwrap();

    let contents = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines.iter().filter(|l| **l == "A").count(), 6);
    assert_eq!(lines.iter().filter(|l| **l == "B").count(), 4);
}
