//! Frame timing: a passive visualizer that turns step-boundary events into
//! per-step duration samples, bucketed by the experiment hash that was in
//! force when the step started. Comparing the `"unmodified"` series against a
//! visualizer's series shows what an experiment costs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::DrawscopeResult;
use crate::session::ReplayCore;
use crate::trace::StepEvent;
use crate::visualizer::{MutatorRegistrar, StateHash, TriggerArgs, SeekDirective, Visualizer};

/// Monotonic millisecond clock. Swappable so tests drive time by hand.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock anchored at construction.
pub struct SystemClock {
    epoch: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for deterministic timing tests.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.0.get()
    }
}

/// One completed step measurement.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct FrameSample {
    pub step: usize,
    pub duration_ms: f64,
}

#[derive(Debug, Default)]
struct TimingStore {
    series: IndexMap<String, Vec<FrameSample>>,
}

/// Cloneable read handle the UI keeps onto the recorded series.
#[derive(Clone, Debug, Default)]
pub struct TimingHandle(Rc<RefCell<TimingStore>>);

impl TimingHandle {
    /// Experiment keys in first-seen order.
    pub fn experiments(&self) -> Vec<String> {
        self.0.borrow().series.keys().cloned().collect()
    }

    pub fn samples(&self, experiment: &str) -> Vec<FrameSample> {
        self.0
            .borrow()
            .series
            .get(experiment)
            .cloned()
            .unwrap_or_default()
    }

    pub fn average_ms(&self, experiment: &str) -> Option<f64> {
        let store = self.0.borrow();
        let samples = store.series.get(experiment)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|s| s.duration_ms).sum::<f64>() / samples.len() as f64)
    }

    fn push(&self, experiment: String, sample: FrameSample) {
        self.0
            .borrow_mut()
            .series
            .entry(experiment)
            .or_default()
            .push(sample);
    }
}

struct OpenSample {
    step: usize,
    started_ms: f64,
    experiment: String,
}

/// Passive recorder: registers no mutators and never becomes the active
/// visualizer, so it observes both modified and unmodified playback.
pub struct FrameTimingRecorder {
    clock: Box<dyn Clock>,
    open: Option<OpenSample>,
    store: TimingHandle,
}

impl FrameTimingRecorder {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            open: None,
            store: TimingHandle::default(),
        }
    }

    /// Shared handle the UI keeps to read the recorded series.
    pub fn handle(&self) -> TimingHandle {
        self.store.clone()
    }

    fn commit_open(&mut self) {
        if let Some(open) = self.open.take() {
            let sample = FrameSample {
                step: open.step,
                duration_ms: self.clock.now_ms() - open.started_ms,
            };
            trace!(step = sample.step, duration_ms = sample.duration_ms, "frame sample");
            self.store.push(open.experiment, sample);
        }
    }

    fn record_event(&mut self, experiment: &str, event: StepEvent) {
        match event {
            StepEvent::StepStarted { step } | StepEvent::StepChanged { step } => {
                self.commit_open();
                self.open = Some(OpenSample {
                    step,
                    started_ms: self.clock.now_ms(),
                    // Bucketed under the hash in force when the step opened.
                    experiment: experiment.to_string(),
                });
            }
            StepEvent::PlayStopped => {
                // The step did not run to its boundary; a partial duration
                // would poison the series, so the open sample is discarded.
                self.open = None;
            }
        }
    }
}

impl Visualizer for FrameTimingRecorder {
    fn name(&self) -> &'static str {
        "frame_timing"
    }

    fn setup_mutators(&mut self, _registrar: &mut MutatorRegistrar<'_>) {}

    fn is_active(&self) -> bool {
        false
    }

    fn trigger(
        &mut self,
        _core: &mut ReplayCore,
        _args: &TriggerArgs,
    ) -> DrawscopeResult<SeekDirective> {
        Ok(SeekDirective::None)
    }

    fn deactivate(&mut self) {}

    fn on_step_event(&mut self, core: &mut ReplayCore, event: StepEvent) {
        let experiment = core.experiment_hash().to_string();
        self.record_event(&experiment, event);
    }

    fn state_hash(&self) -> String {
        StateHash::new("frame_timing").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_boundaries_close_and_open_samples() {
        let clock = ManualClock::default();
        let mut rec = FrameTimingRecorder::new(clock.clone());
        let handle = rec.handle();

        rec.record_event("unmodified", StepEvent::StepStarted { step: 0 });
        clock.advance(16.0);
        rec.record_event("unmodified", StepEvent::StepChanged { step: 1 });
        clock.advance(10.0);
        rec.record_event("unmodified", StepEvent::StepChanged { step: 2 });

        let samples = handle.samples("unmodified");
        assert_eq!(
            samples,
            vec![
                FrameSample {
                    step: 0,
                    duration_ms: 16.0
                },
                FrameSample {
                    step: 1,
                    duration_ms: 10.0
                },
            ]
        );
        assert_eq!(handle.average_ms("unmodified"), Some(13.0));
    }

    #[test]
    fn play_stopped_discards_the_open_sample() {
        let clock = ManualClock::default();
        let mut rec = FrameTimingRecorder::new(clock.clone());
        let handle = rec.handle();

        rec.record_event("unmodified", StepEvent::StepStarted { step: 0 });
        clock.advance(16.0);
        rec.record_event("unmodified", StepEvent::StepChanged { step: 1 });
        clock.advance(4.0);
        rec.record_event("unmodified", StepEvent::PlayStopped);
        clock.advance(100.0);
        rec.record_event("unmodified", StepEvent::StepStarted { step: 0 });

        // Only the fully bounded step 0 sample survives.
        assert_eq!(handle.samples("unmodified").len(), 1);
        assert_eq!(handle.samples("unmodified")[0].duration_ms, 16.0);
    }

    #[test]
    fn samples_bucket_under_the_experiment_at_open_time() {
        let clock = ManualClock::default();
        let mut rec = FrameTimingRecorder::new(clock.clone());
        let handle = rec.handle();

        rec.record_event("unmodified", StepEvent::StepStarted { step: 0 });
        clock.advance(8.0);
        // The hash changed mid-step; the closing sample still belongs to the
        // series that was in force when the step opened.
        rec.record_event("visualizer=overdraw", StepEvent::StepChanged { step: 1 });
        clock.advance(12.0);
        rec.record_event("visualizer=overdraw", StepEvent::StepChanged { step: 2 });

        assert_eq!(handle.samples("unmodified").len(), 1);
        assert_eq!(handle.samples("unmodified")[0].duration_ms, 8.0);
        assert_eq!(handle.samples("visualizer=overdraw").len(), 1);
        assert_eq!(
            handle.experiments(),
            vec!["unmodified".to_string(), "visualizer=overdraw".to_string()]
        );
    }
}
