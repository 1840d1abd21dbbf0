use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of one expression-building episode.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeResult {
    /// Undiscounted return, i.e. the terminal reward.
    pub reward: f32,
    /// Number of tokens emitted, including the terminating SEP.
    pub length: usize,
}

/// Rolling-window statistics over recent episodes and updates.
pub struct TrainingMetrics {
    episodes: VecDeque<EpisodeResult>,
    losses: VecDeque<f32>,
    capacity: usize,
    total_episodes: usize,
}

impl TrainingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TrainingMetrics {
            episodes: VecDeque::with_capacity(capacity),
            losses: VecDeque::with_capacity(capacity),
            capacity,
            total_episodes: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record_episode(&mut self, result: EpisodeResult) {
        self.total_episodes += 1;
        self.episodes.push_back(result);
        if self.episodes.len() > self.capacity {
            self.episodes.pop_front();
        }
    }

    pub fn record_update(&mut self, loss: f32) {
        self.losses.push_back(loss);
        if self.losses.len() > self.capacity {
            self.losses.pop_front();
        }
    }

    /// Mean episode reward over the last `last_n` episodes, `None` before the first one.
    pub fn mean_reward(&self, last_n: usize) -> Option<f32> {
        let n = self.episodes.len().min(last_n);
        if n == 0 {
            return None;
        }
        let sum: f32 = self.episodes.iter().rev().take(n).map(|e| e.reward).sum();
        Some(sum / n as f32)
    }

    pub fn average_length(&self, last_n: usize) -> Option<f32> {
        let n = self.episodes.len().min(last_n);
        if n == 0 {
            return None;
        }
        let total: usize = self.episodes.iter().rev().take(n).map(|e| e.length).sum();
        Some(total as f32 / n as f32)
    }

    pub fn average_loss(&self, last_n: usize) -> Option<f32> {
        let n = self.losses.len().min(last_n);
        if n == 0 {
            return None;
        }
        let sum: f32 = self.losses.iter().rev().take(n).sum();
        Some(sum / n as f32)
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment-step throughput, excluding time spent inside callbacks.
pub struct TimingMetrics {
    window_start: Instant,
    window_steps: u64,
    window_overhead: Duration,
}

impl TimingMetrics {
    pub fn new() -> Self {
        TimingMetrics {
            window_start: Instant::now(),
            window_steps: 0,
            window_overhead: Duration::ZERO,
        }
    }

    pub fn record_steps(&mut self, steps: u64) {
        self.window_steps += steps;
    }

    /// Time spent in evaluation or checkpointing, not counted as stepping time.
    pub fn record_overhead(&mut self, d: Duration) {
        self.window_overhead += d;
    }

    pub fn steps_per_sec(&self) -> f32 {
        let net = self
            .window_start
            .elapsed()
            .saturating_sub(self.window_overhead);
        if net.is_zero() {
            return 0.0;
        }
        self.window_steps as f32 / net.as_secs_f32()
    }

    pub fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.window_steps = 0;
        self.window_overhead = Duration::ZERO;
    }
}

impl Default for TimingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
