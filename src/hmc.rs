//! Hamiltonian Monte Carlo for the continuous block (μ1, μ2, log σ).
use crate::model::{ContinuousConditional, CONTINUOUS_DIM};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::LN_2;

/// Energy error above which a trajectory is declared divergent.
const MAX_ENERGY_ERROR: f64 = 1000.0;

type Point = [f64; CONTINUOUS_DIM];

/// A differentiable log density over the unconstrained continuous block.
pub(crate) trait LogDensity {
    /// Log density and gradient at `q`; `-inf` marks points outside the
    /// support.
    fn log_density_and_gradient(&self, q: &Point) -> (f64, Point);
}

impl LogDensity for ContinuousConditional<'_, '_> {
    fn log_density_and_gradient(&self, q: &Point) -> (f64, Point) {
        ContinuousConditional::log_density_and_gradient(self, q)
    }
}

/// Position with its cached log density and gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct HmcState {
    pub q: Point,
    pub log_density: f64,
    pub gradient: Point,
}

impl HmcState {
    pub(crate) fn new<L: LogDensity>(target: &L, q: Point) -> Self {
        let (log_density, gradient) = target.log_density_and_gradient(&q);
        Self {
            q,
            log_density,
            gradient,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Transition {
    pub state: HmcState,
    pub accept_prob: f64,
    pub divergent: bool,
}

fn kinetic_energy(p: &Point, inv_mass: &Point) -> f64 {
    0.5 * p
        .iter()
        .zip(inv_mass.iter())
        .map(|(pi, mi)| pi * pi * mi)
        .sum::<f64>()
}

fn sample_momentum<R: Rng + ?Sized>(rng: &mut R, inv_mass: &Point) -> Point {
    let mut p = [0.0; CONTINUOUS_DIM];
    for (pi, mi) in p.iter_mut().zip(inv_mass.iter()) {
        let z: f64 = rng.sample(StandardNormal);
        *pi = z / mi.sqrt();
    }
    p
}

fn leapfrog<L: LogDensity>(
    target: &L,
    state: &HmcState,
    p: &mut Point,
    step_size: f64,
    inv_mass: &Point,
) -> HmcState {
    let mut q = state.q;
    for k in 0..CONTINUOUS_DIM {
        p[k] += 0.5 * step_size * state.gradient[k];
        q[k] += step_size * inv_mass[k] * p[k];
    }
    let next = HmcState::new(target, q);
    for k in 0..CONTINUOUS_DIM {
        p[k] += 0.5 * step_size * next.gradient[k];
    }
    next
}

/// One HMC transition of `n_steps` leapfrog steps from `current`.
///
/// Trajectories that leave the support, produce non-finite energy or an
/// energy error above [`MAX_ENERGY_ERROR`] are divergent and rejected.
pub(crate) fn transition<L: LogDensity, R: Rng + ?Sized>(
    target: &L,
    current: &HmcState,
    step_size: f64,
    n_steps: usize,
    inv_mass: &Point,
    rng: &mut R,
) -> Transition {
    let mut p = sample_momentum(rng, inv_mass);
    let h0 = -current.log_density + kinetic_energy(&p, inv_mass);

    let mut state = *current;
    let mut divergent = false;
    for _ in 0..n_steps {
        state = leapfrog(target, &state, &mut p, step_size, inv_mass);
        let h = -state.log_density + kinetic_energy(&p, inv_mass);
        if !h.is_finite() || h - h0 > MAX_ENERGY_ERROR {
            divergent = true;
            break;
        }
    }

    let accept_prob = if divergent {
        0.0
    } else {
        let h1 = -state.log_density + kinetic_energy(&p, inv_mass);
        (h0 - h1).exp().min(1.0)
    };
    let u: f64 = rng.gen();
    let state = if !divergent && u < accept_prob {
        state
    } else {
        *current
    };
    Transition {
        state,
        accept_prob,
        divergent,
    }
}

/// Heuristic initial step size: doubles or halves until the one-step
/// acceptance probability crosses 1/2 (Hoffman & Gelman 2014, Algorithm 4).
pub(crate) fn find_reasonable_step_size<L: LogDensity, R: Rng + ?Sized>(
    target: &L,
    state: &HmcState,
    inv_mass: &Point,
    initial: f64,
    rng: &mut R,
) -> f64 {
    if !state.log_density.is_finite() {
        return initial;
    }
    let p0 = sample_momentum(rng, inv_mass);
    let h0 = -state.log_density + kinetic_energy(&p0, inv_mass);
    let log_accept = |step: f64| {
        let mut p = p0;
        let next = leapfrog(target, state, &mut p, step, inv_mass);
        let h1 = -next.log_density + kinetic_energy(&p, inv_mass);
        if h1.is_finite() {
            h0 - h1
        } else {
            f64::NEG_INFINITY
        }
    };

    let mut step = initial;
    let direction = if log_accept(step) > -LN_2 { 1.0 } else { -1.0 };
    for _ in 0..100 {
        let next = step * 2f64.powf(direction);
        if !(next.is_finite() && next > 0.0) {
            break;
        }
        step = next;
        if direction * log_accept(step) <= -direction * LN_2 {
            break;
        }
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Independent normals with the given means and standard deviations.
    struct Gaussian {
        mean: Point,
        sd: Point,
    }

    impl LogDensity for Gaussian {
        fn log_density_and_gradient(&self, q: &Point) -> (f64, Point) {
            let mut value = 0.0;
            let mut gradient = [0.0; CONTINUOUS_DIM];
            for k in 0..CONTINUOUS_DIM {
                let z = (q[k] - self.mean[k]) / self.sd[k];
                value -= 0.5 * z * z;
                gradient[k] = -z / self.sd[k];
            }
            (value, gradient)
        }
    }

    fn gaussian() -> Gaussian {
        Gaussian {
            mean: [1.0, -2.0, 0.5],
            sd: [0.1, 2.0, 1.0],
        }
    }

    #[test]
    fn test_leapfrog_conserves_energy_with_small_steps() {
        let target = gaussian();
        let state = HmcState::new(&target, [1.1, -1.0, 0.0]);
        let inv_mass = [0.01, 4.0, 1.0];
        let mut p = [0.3, -0.2, 0.5];
        let h0 = -state.log_density + kinetic_energy(&p, &inv_mass);
        let mut s = state;
        for _ in 0..100 {
            s = leapfrog(&target, &s, &mut p, 0.01, &inv_mass);
        }
        let h1 = -s.log_density + kinetic_energy(&p, &inv_mass);
        assert_abs_diff_eq!(h0, h1, epsilon = 1e-3);
    }

    #[test]
    fn test_hmc_recovers_gaussian_moments() {
        let target = gaussian();
        let inv_mass = [0.01, 4.0, 1.0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut state = HmcState::new(&target, [0.0, 0.0, 0.0]);
        let mut draws = Vec::new();
        for i in 0..6000 {
            let t = transition(&target, &state, 0.4, 4, &inv_mass, &mut rng);
            state = t.state;
            if i >= 1000 {
                draws.push(state.q);
            }
        }
        for k in 0..CONTINUOUS_DIM {
            let values: Vec<f64> = draws.iter().map(|q| q[k]).collect();
            let mean = crate::utils::mean(&values).unwrap();
            let sd = crate::utils::sample_variance(&values).unwrap().sqrt();
            let tol = 0.1 * target.sd[k];
            assert_abs_diff_eq!(mean, target.mean[k], epsilon = tol);
            assert_relative_eq!(sd, target.sd[k], max_relative = 0.1);
        }
    }

    #[test]
    fn test_divergent_trajectory_is_rejected() {
        let target = gaussian();
        let inv_mass = [1.0; CONTINUOUS_DIM];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = HmcState::new(&target, [1.0, -2.0, 0.5]);
        let t = transition(&target, &state, 50.0, 10, &inv_mass, &mut rng);
        assert!(t.divergent);
        assert_eq!(t.accept_prob, 0.0);
        assert_eq!(t.state, state);
    }

    #[test]
    fn test_reasonable_step_size_scales_with_target() {
        let narrow = Gaussian {
            mean: [0.0; CONTINUOUS_DIM],
            sd: [1e-3; CONTINUOUS_DIM],
        };
        let inv_mass = [1.0; CONTINUOUS_DIM];
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let state = HmcState::new(&narrow, [0.0; CONTINUOUS_DIM]);
        let step = find_reasonable_step_size(&narrow, &state, &inv_mass, 1.0, &mut rng);
        assert!(step < 0.01, "step = {}", step);
        assert!(step > 1e-6, "step = {}", step);
    }
}
