//! Belt and athlete dynamics behind the simulated rig.

/// Physical parameters of the simulated belt and runner.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// True belt speed = `belt_factor · raw + belt_offset_kmh` while moving.
    pub belt_factor: f64,
    pub belt_offset_kmh: f64,
    /// Belt acceleration limit, km/h per second.
    pub belt_accel_kmh_s: f64,
    /// Incline motor rate, percent per second.
    pub incline_rate_pct_s: f64,
    pub max_speed_kmh: f64,
    pub max_incline_pct: f64,
    pub rest_hr_bpm: f64,
    pub max_hr_bpm: f64,
    /// Steady-state heart-rate gain per km/h of true speed.
    pub hr_per_kmh: f64,
    pub hr_per_incline_pct: f64,
    /// Heart-rate relaxation time constant, seconds.
    pub hr_tau_s: f64,
    pub body_mass_kg: f64,
    /// Half-width of the uniform noise on the reference speed.
    pub reference_jitter_kmh: f64,
    /// Attach a foot-pod style reference speed to readings.
    pub reference: bool,
    pub seed: u32,
    /// Successful reads before the sensor reports `Disconnected`.
    pub fail_after: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            belt_factor: 0.96,
            belt_offset_kmh: 0.2,
            belt_accel_kmh_s: 2.0,
            incline_rate_pct_s: 1.0,
            max_speed_kmh: 25.0,
            max_incline_pct: 15.0,
            rest_hr_bpm: 60.0,
            max_hr_bpm: 195.0,
            hr_per_kmh: 8.0,
            hr_per_incline_pct: 2.5,
            hr_tau_s: 20.0,
            body_mass_kg: 70.0,
            reference_jitter_kmh: 0.1,
            reference: true,
            seed: 0x5EED,
            fail_after: None,
        }
    }
}

/// Instantaneous rig state. Speeds and incline are raw device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimState {
    pub commanded_speed_kmh: f64,
    pub commanded_incline_pct: f64,
    pub belt_speed_kmh: f64,
    pub incline_pct: f64,
    pub heart_rate_bpm: f64,
    pub stopped: bool,
}

impl SimState {
    pub(crate) fn at_rest(cfg: &SimConfig) -> Self {
        Self {
            commanded_speed_kmh: 0.0,
            commanded_incline_pct: 0.0,
            belt_speed_kmh: 0.0,
            incline_pct: 0.0,
            heart_rate_bpm: cfg.rest_hr_bpm,
            stopped: false,
        }
    }

    /// Speed the runner actually moves at, km/h.
    pub fn true_speed_kmh(&self, cfg: &SimConfig) -> f64 {
        if self.belt_speed_kmh <= 0.0 {
            return 0.0;
        }
        (cfg.belt_factor * self.belt_speed_kmh + cfg.belt_offset_kmh).max(0.0)
    }

    /// Mechanical power estimate: level running cost plus the lift term.
    pub fn power_w(&self, cfg: &SimConfig) -> f64 {
        let v_mps = self.true_speed_kmh(cfg) / 3.6;
        cfg.body_mass_kg * v_mps * (1.0 + 0.0981 * self.incline_pct)
    }

    /// Move the belt, incline and heart rate forward by `dt_s` seconds and
    /// return the distance covered, meters.
    pub(crate) fn advance(&mut self, cfg: &SimConfig, dt_s: f64) -> f64 {
        if dt_s <= 0.0 {
            return 0.0;
        }
        let max_dv = cfg.belt_accel_kmh_s * dt_s;
        self.belt_speed_kmh +=
            (self.commanded_speed_kmh - self.belt_speed_kmh).clamp(-max_dv, max_dv);
        let max_di = cfg.incline_rate_pct_s * dt_s;
        self.incline_pct +=
            (self.commanded_incline_pct - self.incline_pct).clamp(-max_di, max_di);

        let after = self.true_speed_kmh(cfg);
        let steady = (cfg.rest_hr_bpm
            + cfg.hr_per_kmh * after
            + cfg.hr_per_incline_pct * self.incline_pct)
            .min(cfg.max_hr_bpm);
        let alpha = if cfg.hr_tau_s > 0.0 {
            1.0 - (-dt_s / cfg.hr_tau_s).exp()
        } else {
            1.0
        };
        self.heart_rate_bpm += (steady - self.heart_rate_bpm) * alpha;

        after / 3.6 * dt_s
    }
}

/// xorshift32, uniform in [0, 1).
#[derive(Debug, Clone)]
pub(crate) struct Jitter {
    state: u32,
}

impl Jitter {
    pub(crate) fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    pub(crate) fn next_unit(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    }

    /// Uniform in [-half_width, half_width).
    pub(crate) fn symmetric(&mut self, half_width: f64) -> f64 {
        (self.next_unit() * 2.0 - 1.0) * half_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belt_ramps_at_acceleration_limit() {
        let cfg = SimConfig::default();
        let mut s = SimState::at_rest(&cfg);
        s.commanded_speed_kmh = 10.0;
        s.advance(&cfg, 1.0);
        assert!((s.belt_speed_kmh - 2.0).abs() < 1e-12);
        for _ in 0..10 {
            s.advance(&cfg, 1.0);
        }
        assert_eq!(s.belt_speed_kmh, 10.0);
        assert!((s.true_speed_kmh(&cfg) - 9.8).abs() < 1e-12);
    }

    #[test]
    fn heart_rate_relaxes_toward_steady_state() {
        let cfg = SimConfig {
            belt_accel_kmh_s: 1e9,
            ..SimConfig::default()
        };
        let mut s = SimState::at_rest(&cfg);
        s.commanded_speed_kmh = 12.0;
        let mut prev = s.heart_rate_bpm;
        for _ in 0..300 {
            s.advance(&cfg, 1.0);
            assert!(s.heart_rate_bpm >= prev);
            prev = s.heart_rate_bpm;
        }
        let steady = cfg.rest_hr_bpm + cfg.hr_per_kmh * s.true_speed_kmh(&cfg);
        assert!((s.heart_rate_bpm - steady).abs() < 0.01);
    }

    #[test]
    fn stationary_belt_covers_no_ground() {
        let cfg = SimConfig::default();
        let mut s = SimState::at_rest(&cfg);
        assert_eq!(s.advance(&cfg, 5.0), 0.0);
        assert_eq!(s.power_w(&cfg), 0.0);
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut j = Jitter::new(0);
        for _ in 0..1000 {
            let v = j.symmetric(0.1);
            assert!((-0.1..0.1).contains(&v));
        }
    }
}
