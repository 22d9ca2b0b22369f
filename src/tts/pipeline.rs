//! Ordered, cancellable sentence synthesis.
//!
//! Streaming text is segmented into sentences and pushed onto a single ordered
//! channel consumed by one [`SynthesisWorker`], so synthesis calls never
//! overlap and audio reaches the queue in emission order. Every job captures
//! the generation counter when it is enqueued; the worker re-checks it after
//! synthesis resolves and silently drops the audio if anything bumped it in
//! the meantime (interrupt, new send, new turn, reconnect).

use crate::audio::{AudioTask, AudioTaskQueue};
use crate::runtime::RuntimeEvent;
use crate::tts::{TtsService, sentences};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A sentence waiting for synthesis.
#[derive(Debug, Clone)]
struct SynthesisJob {
    sentence: String,
    generation: u64,
}

/// Per-turn bookkeeping, cleared on every new turn.
#[derive(Debug, Default)]
struct TurnState {
    /// Streamed text seen on the previous event.
    prev_text: String,
    /// Sentences already handed to the synthesizer this turn.
    synthesized: HashSet<String>,
    /// Whether the one-per-turn synthesis warning has fired.
    warned: bool,
}

struct Shared {
    tts: Arc<dyn TtsService>,
    audio: Arc<dyn AudioTaskQueue>,
    generation: AtomicU64,
    pending: AtomicUsize,
    turn: Mutex<TurnState>,
    expression: watch::Sender<Option<String>>,
    events: broadcast::Sender<RuntimeEvent>,
    idle: Notify,
}

impl Shared {
    fn turn(&self) -> MutexGuard<'_, TurnState> {
        self.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn process(&self, job: SynthesisJob) {
        if !self.is_current(job.generation) {
            debug!(sentence = %job.sentence, "dropping stale synthesis job");
            return;
        }
        let result = self.tts.synthesize(&job.sentence).await;
        if !self.is_current(job.generation) {
            debug!(sentence = %job.sentence, "discarding audio from a cancelled turn");
            return;
        }
        match result {
            Ok(Some(synth)) if !synth.audio.is_empty() => {
                self.audio.add_task(AudioTask {
                    sentence: job.sentence,
                    audio: synth.audio,
                    timing: synth.timing,
                    expression: self.expression.borrow().clone(),
                    generation: job.generation,
                });
            }
            Ok(_) => {
                warn!(sentence = %job.sentence, "synthesizer returned no audio");
                self.latch_warning();
            }
            Err(e) => {
                warn!(sentence = %job.sentence, error = %e, "sentence synthesis failed");
                self.latch_warning();
            }
        }
    }

    fn latch_warning(&self) {
        let first = {
            let mut turn = self.turn();
            !std::mem::replace(&mut turn.warned, true)
        };
        if first {
            let _ = self.events.send(RuntimeEvent::SynthesisWarning);
        }
    }

    fn finish_job(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }
}

/// Front half of the pipeline: segmentation, dedup and cancellation.
#[derive(Clone)]
pub struct SynthesisPipeline {
    shared: Arc<Shared>,
    jobs_tx: mpsc::UnboundedSender<SynthesisJob>,
    min_sentence_chars: usize,
}

/// Back half of the pipeline: the single task that talks to the synthesizer.
pub struct SynthesisWorker {
    shared: Arc<Shared>,
    jobs_rx: mpsc::UnboundedReceiver<SynthesisJob>,
}

impl SynthesisPipeline {
    /// Build a pipeline and the worker that must be spawned to drive it.
    pub fn new(
        tts: Arc<dyn TtsService>,
        audio: Arc<dyn AudioTaskQueue>,
        events: broadcast::Sender<RuntimeEvent>,
        min_sentence_chars: usize,
    ) -> (Self, SynthesisWorker) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (expression, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            tts,
            audio,
            generation: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            turn: Mutex::new(TurnState::default()),
            expression,
            events,
            idle: Notify::new(),
        });
        let pipeline = Self {
            shared: Arc::clone(&shared),
            jobs_tx,
            min_sentence_chars,
        };
        (pipeline, SynthesisWorker { shared, jobs_rx })
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation so every queued or in-flight job is discarded.
    pub fn invalidate(&self) -> u64 {
        let next = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation = next, "synthesis generation bumped");
        next
    }

    /// Forget the current turn's text, spoken sentences and warning latch.
    pub fn reset_turn(&self) {
        *self.shared.turn() = TurnState::default();
    }

    /// Feed the full response text so far. Returns how many sentences were enqueued.
    pub fn on_streaming_text(&self, full: &str) -> usize {
        let fresh = {
            let mut turn = self.shared.turn();
            let prev = std::mem::replace(&mut turn.prev_text, full.to_owned());
            let candidates = self.shared.tts.extract_complete_sentences(&prev, full);
            self.admit(&mut turn, candidates)
        };
        self.enqueue(fresh)
    }

    /// The response completed: speak any sentences not yet seen, including a
    /// final sentence whose terminator was held back, and, if
    /// `flush_fragment`, the unterminated tail as well.
    pub fn finish_turn(&self, final_text: &str, flush_fragment: bool) -> usize {
        let mut enqueued = self.on_streaming_text(final_text);
        let tail = sentences::trailing_fragment(final_text);
        if !tail.is_empty() && (flush_fragment || sentences::is_terminated(tail)) {
            let fresh = {
                let mut turn = self.shared.turn();
                self.admit(&mut turn, vec![tail.to_owned()])
            };
            enqueued += self.enqueue(fresh);
        }
        enqueued
    }

    fn admit(&self, turn: &mut TurnState, candidates: Vec<String>) -> Vec<String> {
        candidates
            .into_iter()
            .filter(|s| s.chars().count() >= self.min_sentence_chars)
            .filter(|s| turn.synthesized.insert(s.clone()))
            .collect()
    }

    fn enqueue(&self, sentences: Vec<String>) -> usize {
        let generation = self.generation();
        let mut enqueued = 0;
        for sentence in sentences {
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            debug!(%sentence, generation, "queueing sentence for synthesis");
            if self
                .jobs_tx
                .send(SynthesisJob {
                    sentence,
                    generation,
                })
                .is_err()
            {
                warn!("synthesis worker has stopped; dropping sentence");
                self.shared.finish_job();
                continue;
            }
            enqueued += 1;
        }
        enqueued
    }

    /// Whether any sentence is queued or being synthesized.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst) > 0
    }

    /// Resolves when the last pending job finishes.
    pub async fn idle(&self) {
        self.shared.idle.notified().await;
    }

    /// Set the expression attached to subsequent audio.
    pub fn set_expression(&self, expression: Option<String>) {
        self.shared.expression.send_replace(expression);
    }

    /// Expression currently attached to new audio.
    #[must_use]
    pub fn expression(&self) -> Option<String> {
        self.shared.expression.borrow().clone()
    }
}

impl SynthesisWorker {
    /// Consume jobs strictly one at a time until cancelled or every sender drops.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                job = self.jobs_rx.recv() => {
                    let Some(job) = job else { break };
                    self.shared.process(job).await;
                    self.shared.finish_job();
                }
            }
        }
        debug!("synthesis worker stopped");
    }
}
