//! Warm-up adaptation of the Hamiltonian step size and diagonal metric.
//!
//! Step size follows the dual averaging scheme of Hoffman & Gelman (2014,
//! Algorithm 5).  The inverse metric is re-estimated from the chain's own
//! warm-up draws in doubling windows, following Stan's windowed adaptation:
//! a fast initial buffer, slow windows of 25, 50, 100, ... iterations, and a
//! terminal buffer where only the step size moves.
use crate::model::CONTINUOUS_DIM;
use average::{Estimate, Variance};

const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;

/// Dual averaging of log step size toward a target acceptance rate.
#[derive(Debug, Clone)]
pub(crate) struct DualAveraging {
    target: f64,
    mu: f64,
    log_step: f64,
    log_step_avg: f64,
    h_bar: f64,
    counter: f64,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    pub(crate) fn new(initial_step: f64, target: f64) -> Self {
        let mut da = Self {
            target,
            mu: 0.0,
            log_step: 0.0,
            log_step_avg: 0.0,
            h_bar: 0.0,
            counter: 0.0,
        };
        da.restart(initial_step);
        da
    }

    pub(crate) fn restart(&mut self, step: f64) {
        self.mu = (10.0 * step).ln();
        self.log_step = step.ln();
        self.log_step_avg = 0.0;
        self.h_bar = 0.0;
        self.counter = 0.0;
    }

    pub(crate) fn update(&mut self, accept_prob: f64) {
        let accept_prob = if accept_prob.is_finite() {
            accept_prob.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.counter += 1.0;
        let w = 1.0 / (self.counter + Self::T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target - accept_prob);
        self.log_step = self.mu - self.counter.sqrt() / Self::GAMMA * self.h_bar;
        let eta = self.counter.powf(-Self::KAPPA);
        self.log_step_avg = eta * self.log_step + (1.0 - eta) * self.log_step_avg;
    }

    /// Step size to use during warm-up.
    pub(crate) fn current(&self) -> f64 {
        self.log_step.exp()
    }

    /// Averaged step size, used once warm-up ends.
    pub(crate) fn adapted(&self) -> f64 {
        if self.counter > 0.0 {
            self.log_step_avg.exp()
        } else {
            self.current()
        }
    }
}

/// Step size and inverse metric adaptation for one chain's warm-up.
#[derive(Debug, Clone)]
pub(crate) struct WindowedAdaptation {
    step: DualAveraging,
    inv_mass: [f64; CONTINUOUS_DIM],
    variance: [Variance; CONTINUOUS_DIM],
    num_warmup: usize,
    init_buffer: usize,
    term_buffer: usize,
    window_size: usize,
    next_window_end: usize,
    counter: usize,
    adapt_metric: bool,
}

impl WindowedAdaptation {
    pub(crate) fn new(
        num_warmup: usize,
        target_accept: f64,
        initial_step: f64,
        inv_mass: [f64; CONTINUOUS_DIM],
    ) -> Self {
        let (adapt_metric, init_buffer, term_buffer, window_size) = if num_warmup < 20 {
            (false, num_warmup, 0, 0)
        } else if INIT_BUFFER + TERM_BUFFER + BASE_WINDOW > num_warmup {
            let init = (0.15 * num_warmup as f64) as usize;
            let term = (0.1 * num_warmup as f64) as usize;
            (true, init, term, num_warmup - init - term)
        } else {
            (true, INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
        };
        Self {
            step: DualAveraging::new(initial_step, target_accept),
            inv_mass,
            variance: std::array::from_fn(|_| Variance::new()),
            num_warmup,
            init_buffer,
            term_buffer,
            window_size,
            next_window_end: (init_buffer + window_size).saturating_sub(1),
            counter: 0,
            adapt_metric,
        }
    }

    pub(crate) fn step_size(&self) -> f64 {
        self.step.current()
    }

    pub(crate) fn adapted_step_size(&self) -> f64 {
        self.step.adapted()
    }

    pub(crate) fn inv_mass(&self) -> &[f64; CONTINUOUS_DIM] {
        &self.inv_mass
    }

    fn in_slow_window(&self) -> bool {
        self.adapt_metric
            && self.counter >= self.init_buffer
            && self.counter < self.num_warmup - self.term_buffer
    }

    fn at_window_end(&self) -> bool {
        self.adapt_metric && self.counter == self.next_window_end && self.counter != self.num_warmup
    }

    fn compute_next_window(&mut self) {
        let last = self.num_warmup - self.term_buffer - 1;
        if self.next_window_end == last {
            return;
        }
        self.window_size *= 2;
        self.next_window_end = self.counter + self.window_size;
        if self.next_window_end == last {
            return;
        }
        // Stretch the window when the one after it would not fit.
        if self.next_window_end + 2 * self.window_size >= self.num_warmup - self.term_buffer {
            self.next_window_end = last;
        }
    }

    /// Feeds one warm-up iteration.  Returns true when the metric changed,
    /// in which case the caller should look for a new reasonable step size
    /// and call [`restart_step_size`](Self::restart_step_size).
    pub(crate) fn update(&mut self, q: &[f64; CONTINUOUS_DIM], accept_prob: f64) -> bool {
        self.step.update(accept_prob);

        if self.in_slow_window() {
            for (acc, &x) in self.variance.iter_mut().zip(q.iter()) {
                acc.add(x);
            }
        }

        let mut metric_changed = false;
        if self.at_window_end() {
            self.compute_next_window();
            for (inv, acc) in self.inv_mass.iter_mut().zip(self.variance.iter()) {
                let var = acc.sample_variance();
                if var.is_finite() && var > 0.0 {
                    *inv = var;
                }
            }
            self.variance = std::array::from_fn(|_| Variance::new());
            metric_changed = true;
        }
        self.counter += 1;
        metric_changed
    }

    pub(crate) fn restart_step_size(&mut self, step: f64) {
        self.step.restart(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dual_averaging_shrinks_when_rejecting() {
        let mut da = DualAveraging::new(1.0, 0.8);
        for _ in 0..50 {
            da.update(0.0);
        }
        assert!(da.current() < 1.0);
        assert!(da.adapted() < 1.0);
    }

    #[test]
    fn test_dual_averaging_grows_when_always_accepting() {
        let mut da = DualAveraging::new(0.01, 0.8);
        for _ in 0..50 {
            da.update(1.0);
        }
        assert!(da.adapted() > 0.01);
    }

    #[test]
    fn test_dual_averaging_ignores_nan() {
        let mut da = DualAveraging::new(0.5, 0.8);
        da.update(f64::NAN);
        assert!(da.current().is_finite());
    }

    fn window_ends(num_warmup: usize) -> Vec<usize> {
        let mut adapt = WindowedAdaptation::new(num_warmup, 0.8, 0.1, [1.0; CONTINUOUS_DIM]);
        (0..num_warmup)
            .filter(|&i| adapt.update(&[i as f64, 0.0, 1.0], 0.8))
            .collect()
    }

    #[test]
    fn test_stan_window_schedule() {
        // Stan's default schedule for 1000 warm-up iterations.
        assert_eq!(window_ends(1000), vec![99, 149, 249, 449, 949]);
    }

    #[test]
    fn test_short_warmup_uses_proportional_buffers() {
        // 15% initial buffer, 10% terminal buffer, one window in between.
        assert_eq!(window_ends(100), vec![89]);
    }

    #[test]
    fn test_tiny_warmup_skips_metric() {
        assert!(window_ends(10).is_empty());
    }

    #[test]
    fn test_metric_learns_window_variance() {
        let mut adapt = WindowedAdaptation::new(100, 0.8, 0.1, [1.0; CONTINUOUS_DIM]);
        for i in 0..100 {
            let x = if i % 2 == 0 { 0.01 } else { -0.01 };
            adapt.update(&[x, 3.0 * x, 0.0], 0.8);
        }
        let inv = adapt.inv_mass();
        assert!(inv[0] > 0.0 && inv[0] < 1e-3);
        assert_abs_diff_eq!(inv[1] / inv[0], 9.0, epsilon = 1e-9);
        // A constant coordinate keeps its previous metric.
        assert_eq!(inv[2], 1.0);
    }
}
