// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Learning-rate schedules and the floor latch that binds one to a tch
//! optimizer.
//!
//! A [`ScheduledOptimizer`] owns both halves. The schedule is the single
//! source of truth for the learning rate: it is pushed into the optimizer on
//! bind and after every scheduler step. Once the rate reaches the configured
//! floor the pair switches to [`SchedulerState::Frozen`] and the scheduler is
//! never stepped again.

use tch::nn;

use crate::error::{MelGenError, Result};

/// A learning-rate schedule advanced once per optimizer step.
pub trait LrScheduler {
    /// Current learning rate.
    fn lr(&self) -> f64;

    /// Advance one step and return the new learning rate.
    fn step(&mut self) -> f64;
}

/// Multiply the rate by `gamma` every `step_size` steps.
#[derive(Debug, Clone)]
pub struct StepLr {
    initial_lr: f64,
    step_size: usize,
    gamma: f64,
    steps: usize,
}

impl StepLr {
    /// Create a step decay schedule.
    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> Result<Self> {
        if step_size == 0 {
            return Err(MelGenError::Config("StepLr step_size must be positive".into()));
        }
        Ok(Self {
            initial_lr,
            step_size,
            gamma,
            steps: 0,
        })
    }
}

impl LrScheduler for StepLr {
    fn lr(&self) -> f64 {
        self.initial_lr * self.gamma.powi((self.steps / self.step_size) as i32)
    }

    fn step(&mut self) -> f64 {
        self.steps += 1;
        self.lr()
    }
}

/// Multiply the rate by `gamma` every step.
#[derive(Debug, Clone)]
pub struct ExponentialLr {
    lr: f64,
    gamma: f64,
}

impl ExponentialLr {
    /// Create an exponential decay schedule.
    pub fn new(initial_lr: f64, gamma: f64) -> Self {
        Self {
            lr: initial_lr,
            gamma,
        }
    }
}

impl LrScheduler for ExponentialLr {
    fn lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self) -> f64 {
        self.lr *= self.gamma;
        self.lr
    }
}

/// One-cycle policy with linear warm-up and linear annealing.
///
/// The rate rises from `max_lr / div_factor` to `max_lr` over the first
/// `pct_start` of `total_steps`, then falls to
/// `max_lr / (div_factor * final_div_factor)`. Past `total_steps` it stays at
/// the final rate.
#[derive(Debug, Clone)]
pub struct OneCycleLr {
    max_lr: f64,
    initial_lr: f64,
    final_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    steps: usize,
}

impl OneCycleLr {
    /// Create a one-cycle schedule with the usual `div_factor = 25`,
    /// `final_div_factor = 1e4`.
    pub fn new(max_lr: f64, total_steps: usize, pct_start: f64) -> Result<Self> {
        Self::with_factors(max_lr, total_steps, pct_start, 25.0, 1e4)
    }

    /// Create a one-cycle schedule with explicit division factors.
    pub fn with_factors(
        max_lr: f64,
        total_steps: usize,
        pct_start: f64,
        div_factor: f64,
        final_div_factor: f64,
    ) -> Result<Self> {
        if total_steps < 2 {
            return Err(MelGenError::Config(
                "OneCycleLr needs at least two total steps".into(),
            ));
        }
        if !(0.0..=1.0).contains(&pct_start) || div_factor <= 0.0 || final_div_factor <= 0.0 {
            return Err(MelGenError::Config(format!(
                "invalid OneCycleLr factors: pct_start={}, div_factor={}, final_div_factor={}",
                pct_start, div_factor, final_div_factor
            )));
        }
        let initial_lr = max_lr / div_factor;
        let warmup_steps = ((pct_start * total_steps as f64) as usize).clamp(1, total_steps - 1);
        Ok(Self {
            max_lr,
            initial_lr,
            final_lr: initial_lr / final_div_factor,
            warmup_steps,
            total_steps,
            steps: 0,
        })
    }

    fn interpolate(start: f64, end: f64, pct: f64) -> f64 {
        start + (end - start) * pct
    }
}

impl LrScheduler for OneCycleLr {
    fn lr(&self) -> f64 {
        let last = self.total_steps - 1;
        if self.steps <= self.warmup_steps {
            let pct = self.steps as f64 / self.warmup_steps as f64;
            Self::interpolate(self.initial_lr, self.max_lr, pct)
        } else if self.steps < last {
            let pct = (self.steps - self.warmup_steps) as f64 / (last - self.warmup_steps) as f64;
            Self::interpolate(self.max_lr, self.final_lr, pct)
        } else {
            self.final_lr
        }
    }

    fn step(&mut self) -> f64 {
        self.steps += 1;
        self.lr()
    }
}

/// Whether the bound scheduler is still being stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler steps after every optimizer step.
    Active,
    /// Floor reached; the scheduler is never stepped again.
    Frozen,
}

/// An optimizer together with its learning-rate schedule and floor latch.
pub struct ScheduledOptimizer {
    optimizer: nn::Optimizer,
    scheduler: Box<dyn LrScheduler>,
    min_lr: f64,
    state: SchedulerState,
}

impl ScheduledOptimizer {
    /// Bind `scheduler` to `optimizer`; the scheduler's current rate is
    /// applied to the optimizer immediately.
    pub fn new(mut optimizer: nn::Optimizer, scheduler: Box<dyn LrScheduler>, min_lr: f64) -> Self {
        optimizer.set_lr(scheduler.lr());
        Self {
            optimizer,
            scheduler,
            min_lr,
            state: SchedulerState::Active,
        }
    }

    /// Reset the gradients of every variable the optimizer updates.
    pub fn zero_grad(&mut self) {
        self.optimizer.zero_grad();
    }

    /// Apply one optimizer update, then advance the floor latch.
    pub fn step(&mut self) {
        self.optimizer.step();
        self.advance_schedule();
    }

    /// Step the scheduler unless the floor has been reached.
    pub fn advance_schedule(&mut self) {
        if self.state == SchedulerState::Frozen {
            return;
        }
        if self.scheduler.lr() <= self.min_lr {
            self.freeze();
            return;
        }
        let lr = self.scheduler.step();
        self.optimizer.set_lr(lr);
        if lr <= self.min_lr {
            self.freeze();
        }
    }

    fn freeze(&mut self) {
        tracing::debug!(
            "learning rate {:.3e} reached floor {:.3e}; scheduler frozen",
            self.scheduler.lr(),
            self.min_lr
        );
        self.state = SchedulerState::Frozen;
    }

    /// Latch state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Learning rate currently applied to the optimizer.
    pub fn lr(&self) -> f64 {
        self.scheduler.lr()
    }

    /// Floor this optimizer was bound with.
    pub fn min_lr(&self) -> f64 {
        self.min_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::OptimizerConfig;

    fn optimizer(vs: &nn::VarStore) -> nn::Optimizer {
        nn::adam(0.9, 0.999, 0.0).build(vs, 1e-3).unwrap()
    }

    #[test]
    fn test_step_lr() {
        let mut sched = StepLr::new(1.0, 2, 0.5).unwrap();
        let lrs: Vec<f64> = (0..5).map(|_| sched.step()).collect();
        assert_eq!(lrs, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
        assert!(StepLr::new(1.0, 0, 0.5).is_err());
    }

    #[test]
    fn test_exponential_lr() {
        let mut sched = ExponentialLr::new(1.0, 0.1);
        sched.step();
        assert!((sched.step() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_one_cycle_shape() {
        let mut sched = OneCycleLr::new(1e-3, 100, 0.3).unwrap();
        assert!((sched.lr() - 4e-5).abs() < 1e-12);
        let lrs: Vec<f64> = (0..120).map(|_| sched.step()).collect();
        let peak = lrs.iter().cloned().fold(f64::MIN, f64::max);
        assert!((peak - 1e-3).abs() < 1e-12);
        assert!((lrs[29] - 1e-3).abs() < 1e-12);
        assert!((lrs[119] - 4e-9).abs() < 1e-15);
        assert!(lrs[30..99].windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_binding_pushes_scheduler_lr() {
        let vs = nn::VarStore::new(tch::Device::Cpu);
        let _w = vs.root().var("w", &[2], nn::Init::Const(1.0));
        let opt = ScheduledOptimizer::new(optimizer(&vs), Box::new(ExponentialLr::new(0.5, 0.5)), 0.0);
        assert_eq!(opt.state(), SchedulerState::Active);
        assert!((opt.lr() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_floor_latch_is_one_way() {
        let vs = nn::VarStore::new(tch::Device::Cpu);
        let _w = vs.root().var("w", &[2], nn::Init::Const(1.0));
        let mut opt =
            ScheduledOptimizer::new(optimizer(&vs), Box::new(ExponentialLr::new(1.0, 0.5)), 0.2);

        // 0.5, 0.25 stay above the floor; 0.125 crosses it
        opt.advance_schedule();
        opt.advance_schedule();
        assert_eq!(opt.state(), SchedulerState::Active);
        opt.advance_schedule();
        assert_eq!(opt.state(), SchedulerState::Frozen);
        let frozen_lr = opt.lr();
        assert!((frozen_lr - 0.125).abs() < 1e-12);

        for _ in 0..50 {
            opt.step();
            assert_eq!(opt.state(), SchedulerState::Frozen);
            assert_eq!(opt.lr(), frozen_lr);
        }
    }

    #[test]
    fn test_starting_below_floor_freezes_without_stepping() {
        let vs = nn::VarStore::new(tch::Device::Cpu);
        let _w = vs.root().var("w", &[2], nn::Init::Const(1.0));
        let mut opt =
            ScheduledOptimizer::new(optimizer(&vs), Box::new(ExponentialLr::new(1e-7, 0.5)), 1e-6);
        opt.advance_schedule();
        assert_eq!(opt.state(), SchedulerState::Frozen);
        assert!((opt.lr() - 1e-7).abs() < 1e-18);
    }
}
