use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::checkpoint::{CheckpointWriter, RunIdentity};
use crate::data::AlphaCalculator;
use crate::error::TrainingError;
use crate::pool::{EnsembleScorer, PoolSnapshot, PoolStateView};
use crate::training::callback::{Callback, RolloutContext};
use crate::training::evaluator::{IcEvaluator, MetricEvaluator};

/// Rollout callback that reports pool health, scores the pool out of sample and
/// writes a checkpoint.
///
/// The pool is shared with the environment; the supervisor only borrows it
/// immutably while the training loop is paused inside the callback.
pub struct TrainingSupervisor<P> {
    pool: Rc<RefCell<P>>,
    test_calculator: Rc<dyn AlphaCalculator>,
    valid_calculator: Option<Rc<dyn AlphaCalculator>>,
    evaluator: Box<dyn MetricEvaluator>,
    writer: CheckpointWriter,
    run: RunIdentity,
    verbose: bool,
}

impl<P: PoolStateView + EnsembleScorer> TrainingSupervisor<P> {
    pub fn new(
        pool: Rc<RefCell<P>>,
        test_calculator: Rc<dyn AlphaCalculator>,
        writer: CheckpointWriter,
        run: RunIdentity,
    ) -> Self {
        TrainingSupervisor {
            pool,
            test_calculator,
            valid_calculator: None,
            evaluator: Box::new(IcEvaluator),
            writer,
            run,
            verbose: false,
        }
    }

    /// Also score the pool on a validation dataset, logged as `valid/<metric>`.
    pub fn with_valid_calculator(mut self, calculator: Rc<dyn AlphaCalculator>) -> Self {
        self.valid_calculator = Some(calculator);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn MetricEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Print the pool report after every rollout.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn run(&self) -> &RunIdentity {
        &self.run
    }

    pub fn writer(&self) -> &CheckpointWriter {
        &self.writer
    }

    pub fn pool_state_report(&self) -> String {
        format_pool_state(&self.pool.borrow().snapshot())
    }

    pub fn show_pool_state(&self) {
        println!("{}", self.pool_state_report());
    }
}

impl<P: PoolStateView + EnsembleScorer> Callback for TrainingSupervisor<P> {
    fn on_run_start(&mut self) -> Result<(), TrainingError> {
        self.writer.ensure_base_dir()?;
        tracing::info!(
            run = %self.run.dir_name(),
            base = %self.writer.base().display(),
            "checkpoint directory ready"
        );
        Ok(())
    }

    fn on_rollout_end(&mut self, ctx: RolloutContext<'_>) -> Result<(), TrainingError> {
        let pool = self.pool.borrow();
        let snapshot = pool.snapshot();
        let metric = self.evaluator.metric_name().to_string();

        ctx.logger.record("pool/size", snapshot.size as f64);
        ctx.logger
            .record("pool/significant", snapshot.significant_count() as f64);
        ctx.logger
            .record("pool/best_ic_ret", snapshot.best_ensemble_metric);
        ctx.logger
            .record("pool/eval_cnt", snapshot.evaluation_count as f64);

        if let Some(valid) = &self.valid_calculator {
            let score = self.evaluator.evaluate(&*pool, valid.as_ref())?;
            ctx.logger.record(&format!("valid/{metric}"), score);
        }
        let test_score = self.evaluator.evaluate(&*pool, self.test_calculator.as_ref())?;
        ctx.logger.record(&format!("test/{metric}"), test_score);
        drop(pool);

        tracing::info!(
            step = ctx.num_timesteps,
            size = snapshot.size,
            best = snapshot.best_ensemble_metric,
            test = test_score,
            "rollout finished"
        );
        if self.verbose {
            println!("{}", format_pool_state(&snapshot));
        }

        self.writer
            .write(&self.run, ctx.num_timesteps, ctx.model, &snapshot)?;
        Ok(())
    }
}

/// Human-readable listing of every pool slot and the best ensemble metric.
pub fn format_pool_state(snapshot: &PoolSnapshot) -> String {
    let rule = "-".repeat(48);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    for i in 0..snapshot.size {
        let _ = writeln!(
            out,
            "[{i}] {:+.4} | ic {:+.4} | {}",
            snapshot.weights[i], snapshot.in_sample_metrics[i], snapshot.expressions[i]
        );
    }
    let _ = writeln!(out, "best ensemble ic: {:.4}", snapshot.best_ensemble_metric);
    let _ = write!(out, "{rule}");
    out
}
