//! Pipeline supervisor (§4.8): wires the three worker units -- input, event, output -- and
//! supervises their lifetime.
//!
//! `JoinSet`-based task management plus a `tokio::signal::ctrl_c` shutdown loop: each unit runs
//! its own internal `JoinSet` of sub-workers (one per producer, one per output plugin), and an
//! `AtomicBool` "done" flag per unit is polled every `REFRESH_STATUS_INTERVAL` for a liveness
//! snapshot.

use crate::batcher::{GenericBatcher, TimestampsBatcher, TimestampsBatcherConfig};
use crate::condition::ConditionContext;
use crate::config::Config;
use crate::model::{EventBatch, ProducerId, Tags, Timestamp};
use crate::outputs::OutputSink;
use crate::picker::{Picker, TemplateSource};
use crate::producers::{run_merged, EmitSink, Producer, TaggedEmitSink};
use crate::renderer::Renderer;
use crate::state::StateScopes;
use crate::time::Mode;
use crate::Error;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

/// Liveness poll cadence for the supervisor's crash-escalation check (§4.8).
const REFRESH_STATUS_INTERVAL: Duration = Duration::from_millis(100);

/// Owns a parsed configuration and runs it as a three-unit pipeline until completion or a fatal
/// error.
pub struct Runtime {
    config: Config,
}

impl Runtime {
    /// Wraps an already-parsed, already-validated configuration.
    pub fn new(config: Config) -> Self {
        Runtime { config }
    }

    /// Runs the pipeline in `mode` to completion. Returns `Ok(())` once every unit has drained
    /// and shut down cleanly (sample mode reaching its end, or live mode receiving Ctrl+C);
    /// returns `Err` the moment any unit fails or panics, having torn the other two down first.
    pub async fn run(&self, mode: Mode) -> Result<(), Error> {
        let (producers, ordered_merging) = self.config.input.build(mode)?;
        let producer_tags: HashMap<ProducerId, Tags> =
            producers.iter().map(|p| (p.id(), p.tags())).collect();

        let pipeline = &self.config.pipeline;
        let batcher_config = TimestampsBatcherConfig::new(
            pipeline.batch_size,
            pipeline.batch_duration_secs.map(Duration::from_secs_f64),
            pipeline.resolved_queue_capacity(),
            mode == Mode::Live,
        )?;
        let queue_a = Arc::new(TimestampsBatcher::new(batcher_config));

        let templates = self.config.event.templates.clone();
        let picker = Picker::new(self.config.event.mode, templates.clone())?;
        let sources: Vec<(String, Vec<String>)> = templates
            .iter()
            .map(|t| {
                let paths = match &t.source {
                    TemplateSource::One(s) => vec![s.clone()],
                    TemplateSource::Many(v) => v.clone(),
                };
                (t.alias.clone(), paths)
            })
            .collect();
        let source_counts: HashMap<String, usize> = sources
            .iter()
            .map(|(alias, paths)| (alias.clone(), paths.len()))
            .collect();
        let renderer = Renderer::new(
            &sources,
            self.config.event.params.clone(),
            self.config.event.samples.clone(),
            self.config.event.timezone.clone(),
        )?;
        let state = StateScopes::new(
            templates.iter().map(|t| t.alias.clone()),
            self.config.event.composed_state_path(),
            self.config.event.composed_max_bytes,
        )?;

        let outputs: Vec<Box<dyn OutputSink>> = self
            .config
            .output
            .iter()
            .map(|spec| spec.build())
            .collect::<Result<Vec<_>, Error>>()?;

        let (queue_b_tx, queue_b_rx) = flume::unbounded::<EventBatch>();

        let input_done = Arc::new(AtomicBool::new(false));
        let event_done = Arc::new(AtomicBool::new(false));
        let output_done = Arc::new(AtomicBool::new(false));

        let look_ahead = Duration::from_secs_f64(pipeline.look_ahead_secs);
        let merge_chunk_size = pipeline.merge_chunk_size;
        let event_batch_size = pipeline.event_batch_size;
        let event_batch_timeout = Duration::from_secs_f64(pipeline.event_batch_duration_secs);

        let mut handles: JoinSet<(&'static str, Result<(), Error>)> = JoinSet::new();

        handles.spawn({
            let done = Arc::clone(&input_done);
            let queue_a = Arc::clone(&queue_a);
            async move {
                let result =
                    run_input_unit(producers, mode, ordered_merging, look_ahead, merge_chunk_size, Arc::clone(&queue_a))
                        .await;
                queue_a.close().await;
                done.store(true, Ordering::SeqCst);
                ("input", result)
            }
        });

        handles.spawn({
            let done = Arc::clone(&event_done);
            let queue_a = Arc::clone(&queue_a);
            async move {
                let result = run_event_unit(
                    queue_a,
                    picker,
                    renderer,
                    state,
                    producer_tags,
                    source_counts,
                    event_batch_size,
                    event_batch_timeout,
                    queue_b_tx,
                )
                .await;
                done.store(true, Ordering::SeqCst);
                ("event", result)
            }
        });

        handles.spawn({
            let done = Arc::clone(&output_done);
            async move {
                let result = run_output_unit(outputs, queue_b_rx).await;
                done.store(true, Ordering::SeqCst);
                ("output", result)
            }
        });

        info!("pipeline started");
        let mut refresh = tokio::time::interval(REFRESH_STATUS_INTERVAL);

        loop {
            tokio::select! {
                res = handles.join_next() => {
                    match res {
                        Some(Ok((unit, Ok(())))) => {
                            debug!(unit, "pipeline unit finished cleanly");
                        }
                        Some(Ok((unit, Err(e)))) => {
                            warn!(unit, error = %e, "pipeline unit failed, tearing down remaining units");
                            handles.shutdown().await;
                            return Err(Error::UnitFailure { unit, reason: e.to_string() });
                        }
                        Some(Err(join_err)) => {
                            warn!(error = %join_err, "pipeline unit panicked, tearing down remaining units");
                            handles.shutdown().await;
                            return Err(Error::UnitFailure {
                                unit: "unknown",
                                reason: join_err.to_string(),
                            });
                        }
                        None => {
                            info!("pipeline finished");
                            return Ok(());
                        }
                    }
                }
                _ = refresh.tick() => {
                    trace!(
                        input_done = input_done.load(Ordering::SeqCst),
                        event_done = event_done.load(Ordering::SeqCst),
                        output_done = output_done.load(Ordering::SeqCst),
                        "pipeline liveness check",
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal, tearing down pipeline");
                    handles.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Runs every configured producer, forwarding tagged timestamps into `queue_a`. When
/// `ordered_merging` is set, all producers are combined through the live merger (§4.3) for a
/// globally ordered stream; otherwise each producer forwards directly and concurrently, trading
/// strict cross-producer ordering for lower latency (§4.1 "time_patterns pool").
async fn run_input_unit(
    mut producers: Vec<Box<dyn Producer>>,
    mode: Mode,
    ordered_merging: bool,
    look_ahead: Duration,
    chunk_size: usize,
    queue_a: Arc<TimestampsBatcher>,
) -> Result<(), Error> {
    struct BatcherSink {
        queue_a: Arc<TimestampsBatcher>,
    }

    #[async_trait::async_trait]
    impl TaggedEmitSink for BatcherSink {
        async fn emit_tagged(&self, items: Vec<(Timestamp, ProducerId)>) -> Result<(), Error> {
            self.queue_a.add(items, true).await
        }
    }

    if ordered_merging {
        let sink = BatcherSink { queue_a };
        return run_merged(producers, mode, look_ahead, chunk_size, &sink).await;
    }

    struct DirectSink {
        producer_id: ProducerId,
        queue_a: Arc<TimestampsBatcher>,
    }

    #[async_trait::async_trait]
    impl EmitSink for DirectSink {
        async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error> {
            if timestamps.is_empty() {
                return Ok(());
            }
            let tagged = timestamps.into_iter().map(|t| (t, self.producer_id)).collect();
            self.queue_a.add(tagged, true).await
        }
    }

    let mut join_set: JoinSet<()> = JoinSet::new();
    for mut producer in producers.drain(..) {
        let queue_a = Arc::clone(&queue_a);
        join_set.spawn(async move {
            let id = producer.id();
            let sink = DirectSink { producer_id: id, queue_a };
            if let Err(e) = producer.generate(mode, &sink).await {
                warn!(producer_id = id, error = %e, "producer failed, input unit continues with the rest");
            }
        });
    }
    while let Some(res) = join_set.join_next().await {
        if let Err(join_err) = res {
            warn!(error = %join_err, "producer worker panicked");
        }
    }
    Ok(())
}

/// Reads timestamp batches from Queue A, renders an event per `(timestamp, producer_id)` pair via
/// the picker and renderer, and pushes rendered strings through a generic size+timeout batcher
/// (§4.9) onto Queue B.
async fn run_event_unit(
    queue_a: Arc<TimestampsBatcher>,
    picker: Picker,
    renderer: Renderer,
    state: StateScopes,
    producer_tags: HashMap<ProducerId, Tags>,
    source_counts: HashMap<String, usize>,
    batch_size: usize,
    batch_timeout: Duration,
    queue_b_tx: flume::Sender<EventBatch>,
) -> Result<(), Error> {
    let (render_tx, render_rx) = flume::unbounded::<String>();

    let producer_handle = tokio::spawn(render_producer_loop(
        queue_a,
        picker,
        renderer,
        state,
        producer_tags,
        source_counts,
        render_tx,
    ));

    let mut batcher = GenericBatcher::new(render_rx, batch_size, batch_timeout);
    while let Some(batch) = batcher.next_batch().await {
        if queue_b_tx.send_async(batch).await.is_err() {
            producer_handle.abort();
            return Err(Error::UnitFailure {
                unit: "event",
                reason: "output unit channel closed".into(),
            });
        }
    }

    match producer_handle.await {
        Ok(result) => result,
        Err(join_err) => Err(Error::UnitFailure {
            unit: "event",
            reason: join_err.to_string(),
        }),
    }
}

async fn render_producer_loop(
    queue_a: Arc<TimestampsBatcher>,
    picker: Picker,
    mut renderer: Renderer,
    state: StateScopes,
    producer_tags: HashMap<ProducerId, Tags>,
    source_counts: HashMap<String, usize>,
    render_tx: flume::Sender<String>,
) -> Result<(), Error> {
    while let Some(batch) = queue_a.next_batch().await {
        for (ts, producer_id) in batch {
            let tags = producer_tags.get(&producer_id).cloned().unwrap_or_default();
            let shared_snapshot = state.shared.snapshot();
            let ctx = ConditionContext {
                shared: &shared_snapshot,
                tags: &tags,
                timestamp: ts.to_naive(),
            };
            let aliases = picker.pick(&ctx);

            for alias in aliases {
                let locals = match state.locals.get(&alias) {
                    Some(l) => Arc::clone(l),
                    None => {
                        warn!(alias = %alias, "picker selected an unconfigured template alias");
                        continue;
                    }
                };
                let source_count = *source_counts.get(&alias).unwrap_or(&1);
                match renderer.render(
                    &alias,
                    source_count,
                    ts,
                    Arc::clone(&tags),
                    locals,
                    Arc::clone(&state.shared),
                    Arc::clone(&state.composed),
                ) {
                    Ok(rendered) => {
                        for r in rendered {
                            if render_tx.send_async(r).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(alias = %alias, error = %e, "event render failed, event dropped"),
                }
            }
        }
    }
    Ok(())
}

/// Reads rendered-event batches from Queue B, concurrently invoking every configured output
/// plugin's own formatter and `write` per batch. Per-event formatting errors are logged and the
/// event is dropped for that sink alone; a sink's `write` returning `Err` means a whole-request
/// failure (connection refused, a non-2xx bulk response) rather than a per-event one -- those are
/// already absorbed into the plugin's own success count -- and is fatal to the output unit (§4.7
/// Open Question 3). A sink's `open` failing is likewise fatal.
async fn run_output_unit(
    outputs: Vec<Box<dyn OutputSink>>,
    queue_b_rx: flume::Receiver<EventBatch>,
) -> Result<(), Error> {
    for sink in &outputs {
        sink.open().await?;
    }

    while let Ok(batch) = queue_b_rx.recv_async().await {
        let writes = outputs.iter().map(|sink| async {
            let formatted = sink.formatter().format(&batch)?;
            for (event, err) in &formatted.errors {
                warn!(event = %event, error = %err, "event failed to format, dropped for this sink");
            }
            sink.write(&formatted.formatted).await
        });
        for result in futures::future::join_all(writes).await {
            if let Err(e) = result {
                return Err(Error::UnitFailure {
                    unit: "output",
                    reason: e.to_string(),
                });
            }
        }
    }

    for sink in &outputs {
        if let Err(e) = sink.close().await {
            warn!(error = %e, "output sink failed to close cleanly");
        }
    }
    Ok(())
}
