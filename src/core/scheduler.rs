use std::time::Duration;

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::dataset::Dataset;
use crate::layout::Diagram;
use crate::model::Model;
use crate::surface::Surface;
use crate::update::{FrameReport, UpdateEngine};

/// Position in the dataset; the only state carried from tick to tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameState {
    pub current_index: usize,
}

impl FrameState {
    /// Moves to the next sample, wrapping at `len`.
    pub fn advance(&mut self, len: usize) {
        if len == 0 {
            self.current_index = 0;
            return;
        }
        self.current_index = (self.current_index + 1) % len;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled { due: Duration },
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Dataset index the frame was drawn from.
    pub index: usize,
    pub tick: u64,
    pub frame: FrameReport,
}

/// Timer-driven loop over the dataset.
///
/// Time is a `Duration` since the driver's epoch, so the same scheduler runs
/// under tokio, a render loop, or a test with a virtual clock.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Duration,
    initial_delay: Duration,
    state: SchedulerState,
    frame: FrameState,
    ticks: u64,
}

impl FrameScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.interval(),
            initial_delay: config.initial_delay(),
            state: SchedulerState::Idle,
            frame: FrameState::default(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn frame(&self) -> FrameState {
        self.frame
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self, now: Duration) {
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Scheduled {
                due: now.saturating_add(self.initial_delay),
            };
            debug!("scheduler armed, first frame in {:?}", self.initial_delay);
        }
    }

    pub fn stop(&mut self) {
        if self.state != SchedulerState::Idle {
            info!("Scheduler stopped after {} ticks", self.ticks);
        }
        self.state = SchedulerState::Idle;
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        match self.state {
            SchedulerState::Scheduled { due } => Some(due),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Duration) -> bool {
        matches!(self.state, SchedulerState::Scheduled { due } if now >= due)
    }

    /// Runs one frame if the timer has fired, then re-arms it.
    ///
    /// An empty dataset stops the scheduler instead of ticking.
    pub fn poll<M, D, S>(
        &mut self,
        now: Duration,
        model: &M,
        dataset: &D,
        diagram: &Diagram,
        surface: &mut S,
    ) -> Option<TickReport>
    where
        M: Model + ?Sized,
        D: Dataset + ?Sized,
        S: Surface + ?Sized,
    {
        if !self.is_due(now) {
            return None;
        }
        let len = dataset.len();
        if len == 0 {
            self.stop();
            return None;
        }
        if self.frame.current_index >= len {
            self.frame.current_index = 0;
        }

        self.state = SchedulerState::Running;
        let index = self.frame.current_index;
        let frame = match dataset.get(index) {
            Some((sample, label)) => {
                let bundle = model.forward_with_intermediates(&sample);
                UpdateEngine::new(diagram).apply(surface, &bundle, label)
            }
            None => {
                debug!("sample {index} unavailable, frame skipped");
                FrameReport::default()
            }
        };

        self.frame.advance(len);
        self.ticks += 1;
        self.state = SchedulerState::Scheduled {
            due: now.saturating_add(self.interval),
        };
        Some(TickReport {
            index,
            tick: self.ticks,
            frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConstants;
    use crate::dataset::InMemoryDataset;
    use crate::layout::LayoutBuilder;
    use crate::registry::Stage;
    use crate::surface::Scene;
    use crate::tensor::{IntermediatesBundle, Tensor};

    struct Echo;

    impl Model for Echo {
        fn forward_with_intermediates(&self, sample: &Tensor) -> IntermediatesBundle {
            IntermediatesBundle::new().with(Stage::Input, sample.clone())
        }
    }

    fn fixture(n: usize) -> (InMemoryDataset, Diagram, Scene) {
        let labels: Vec<u8> = (0..n as u8).collect();
        let ds = InMemoryDataset::new(2, 2, vec![0.5; n * 4], labels).unwrap();
        let mut scene = Scene::new();
        let diagram = LayoutBuilder::new(RenderConstants::default())
            .build(&mut scene)
            .unwrap();
        (ds, diagram, scene)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn advance_wraps() {
        let mut f = FrameState::default();
        for _ in 0..5 {
            f.advance(5);
        }
        assert_eq!(f.current_index, 0);
        f.advance(0);
        assert_eq!(f.current_index, 0);
    }

    #[test]
    fn index_returns_to_zero_after_n_ticks() {
        let (ds, diagram, mut scene) = fixture(4);
        let mut sched = FrameScheduler::new(&SchedulerConfig::default());
        sched.start(ms(0));

        let mut seen = Vec::new();
        let mut now = ms(0);
        for _ in 0..4 {
            let report = sched.poll(now, &Echo, &ds, &diagram, &mut scene).unwrap();
            seen.push((report.index, report.frame.label));
            now += sched.interval();
        }
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert_eq!(sched.frame().current_index, 0);
        assert_eq!(sched.ticks(), 4);
    }

    #[test]
    fn poll_waits_for_deadline() {
        let (ds, diagram, mut scene) = fixture(2);
        let config = SchedulerConfig {
            interval_ms: 2000,
            initial_delay_ms: 100,
        };
        let mut sched = FrameScheduler::new(&config);
        assert!(sched.poll(ms(500), &Echo, &ds, &diagram, &mut scene).is_none());

        sched.start(ms(0));
        assert_eq!(sched.next_deadline(), Some(ms(100)));
        assert!(sched.poll(ms(99), &Echo, &ds, &diagram, &mut scene).is_none());
        assert!(sched.poll(ms(100), &Echo, &ds, &diagram, &mut scene).is_some());
        assert_eq!(sched.state(), SchedulerState::Scheduled { due: ms(2100) });
        assert!(sched.poll(ms(2000), &Echo, &ds, &diagram, &mut scene).is_none());
    }

    #[test]
    fn stop_halts_ticking() {
        let (ds, diagram, mut scene) = fixture(2);
        let mut sched = FrameScheduler::new(&SchedulerConfig::default());
        sched.start(ms(0));
        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(sched.poll(ms(10_000), &Echo, &ds, &diagram, &mut scene).is_none());
    }

    #[test]
    fn empty_dataset_goes_idle() {
        let (_, diagram, mut scene) = fixture(1);
        let empty = InMemoryDataset::new(2, 2, Vec::new(), Vec::new()).unwrap();
        let mut sched = FrameScheduler::new(&SchedulerConfig::default());
        sched.start(ms(0));
        assert!(sched.poll(ms(0), &Echo, &empty, &diagram, &mut scene).is_none());
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn rearm_near_clock_limit_saturates() {
        let (ds, diagram, mut scene) = fixture(1);
        let config = SchedulerConfig {
            interval_ms: u64::MAX,
            initial_delay_ms: 0,
        };
        let mut sched = FrameScheduler::new(&config);
        let late = Duration::MAX - ms(1);
        sched.start(late);
        assert!(sched.poll(late, &Echo, &ds, &diagram, &mut scene).is_some());
        assert_eq!(sched.next_deadline(), Some(Duration::MAX));
    }
}
