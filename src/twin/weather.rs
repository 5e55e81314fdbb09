//! Weather evolution and renewable resource models.
//!
//! The weather state (cloud cover, wind speed, temperature) follows a
//! noisy random walk with a diurnal temperature cycle. Generation and
//! demand are deterministic functions of weather and time, except for
//! the load noise term.

use rand::Rng;

use crate::config::{LoadConfig, SolarConfig, WindConfig};
use crate::twin::types::gaussian_noise;

/// Current weather conditions driving the resource models.
#[derive(Debug, Clone, Copy)]
pub struct Weather {
    pub cloud_cover: f32,
    pub wind_speed_ms: f32,
    pub temperature_c: f32,
}

impl Weather {
    pub fn mild() -> Self {
        Self {
            cloud_cover: 0.3,
            wind_speed_ms: 8.0,
            temperature_c: 25.0,
        }
    }

    /// Advances the weather by one step. Cloud cover random-walks with
    /// a slow clearing drift, wind speed random-walks within turbine
    /// bounds, and temperature tracks a diurnal cosine with noise.
    pub fn advance<R: Rng>(&mut self, rng: &mut R, hour_of_day: f32) {
        self.cloud_cover =
            (self.cloud_cover + gaussian_noise(rng, 0.05) - 0.01).clamp(0.0, 1.0);
        self.wind_speed_ms = (self.wind_speed_ms + gaussian_noise(rng, 1.0)).clamp(0.0, 25.0);
        let diurnal = 27.0 + 8.0 * ((hour_of_day - 14.0) * std::f32::consts::PI / 12.0).cos();
        self.temperature_c = diurnal + gaussian_noise(rng, 0.5);
    }
}

/// Solar output (kW) for the given time and weather.
///
/// Zero outside the 06:00 to 18:00 window. Inside it, a cosine arc
/// peaking at noon, attenuated by cloud cover, modulated by a seasonal
/// factor, and derated 0.4% per degree above 25 C.
pub fn solar_output(cfg: &SolarConfig, hour_of_day: f32, day: u32, weather: &Weather) -> f32 {
    if !(6.0..=18.0).contains(&hour_of_day) {
        return 0.0;
    }
    let arc = ((hour_of_day - 12.0) * std::f32::consts::PI / 12.0).cos();
    let cloud_factor = 1.0 - cfg.cloud_attenuation * weather.cloud_cover;
    let seasonal = 1.0 + 0.2 * (2.0 * std::f32::consts::PI * day as f32 / 365.0).sin();
    let thermal = 1.0 - 0.004 * (weather.temperature_c - 25.0).max(0.0);
    (cfg.capacity_kw * arc * cloud_factor * seasonal * thermal).max(0.0)
}

/// Wind output (kW) from the piecewise turbine power curve.
pub fn wind_output(cfg: &WindConfig, weather: &Weather) -> f32 {
    let v = weather.wind_speed_ms;
    let fraction = if v < cfg.cut_in_ms || v >= cfg.cut_out_ms {
        0.0
    } else if v < cfg.rated_ms {
        (v - cfg.cut_in_ms) / (cfg.rated_ms - cfg.cut_in_ms)
    } else {
        1.0
    };
    cfg.capacity_kw * fraction
}

/// Load demand (kW): a base level plus morning and evening peaks,
/// reduced on weekends, with multiplicative noise. The demand factor
/// is clamped to [0.3, 1.0] of peak after noise.
pub fn load_demand<R: Rng>(cfg: &LoadConfig, rng: &mut R, hour_of_day: f32, day: u32) -> f32 {
    let morning = 0.3 * (-(hour_of_day - 8.0).powi(2) / 2.0).exp();
    let evening = 0.5 * (-(hour_of_day - 20.0).powi(2) / 4.0).exp();
    let mut factor = 0.4 + morning + evening;
    // day 0 is a Monday; days 5 and 6 of each week are the weekend
    if day % 7 >= 5 {
        factor *= 0.9;
    }
    factor *= 1.0 + gaussian_noise(rng, cfg.noise_std);
    cfg.peak_kw * factor.clamp(0.3, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn solar_cfg() -> SolarConfig {
        SolarConfig::default()
    }

    fn wind_cfg() -> WindConfig {
        WindConfig::default()
    }

    #[test]
    fn solar_zero_at_night() {
        let w = Weather::mild();
        assert_eq!(solar_output(&solar_cfg(), 3.0, 0, &w), 0.0);
        assert_eq!(solar_output(&solar_cfg(), 22.0, 0, &w), 0.0);
    }

    #[test]
    fn solar_peaks_at_noon() {
        let w = Weather {
            cloud_cover: 0.0,
            wind_speed_ms: 0.0,
            temperature_c: 25.0,
        };
        let noon = solar_output(&solar_cfg(), 12.0, 0, &w);
        let morning = solar_output(&solar_cfg(), 8.0, 0, &w);
        assert!(noon > morning);
        // day 0, clear sky, 25 C: only the seasonal factor applies
        assert!((noon - 500.0).abs() < 1.0);
    }

    #[test]
    fn solar_cloud_attenuation() {
        let clear = Weather {
            cloud_cover: 0.0,
            wind_speed_ms: 0.0,
            temperature_c: 25.0,
        };
        let overcast = Weather {
            cloud_cover: 0.9,
            ..clear
        };
        let a = solar_output(&solar_cfg(), 12.0, 0, &clear);
        let b = solar_output(&solar_cfg(), 12.0, 0, &overcast);
        // 1 - 0.8 * 0.9 = 0.28
        assert!((b / a - 0.28).abs() < 1e-4);
    }

    #[test]
    fn wind_power_curve_regions() {
        let cfg = wind_cfg();
        let at = |v: f32| {
            wind_output(
                &cfg,
                &Weather {
                    cloud_cover: 0.0,
                    wind_speed_ms: v,
                    temperature_c: 25.0,
                },
            )
        };
        assert_eq!(at(2.0), 0.0);
        assert!((at(7.5) - 150.0).abs() < 1e-3); // halfway up the ramp
        assert_eq!(at(15.0), 300.0);
        assert_eq!(at(25.0), 0.0);
        assert_eq!(at(28.0), 0.0);
    }

    #[test]
    fn wind_ramp_is_non_decreasing() {
        let cfg = wind_cfg();
        let mut prev = 0.0;
        let mut v = 3.0;
        while v < 12.0 {
            let out = wind_output(
                &cfg,
                &Weather {
                    cloud_cover: 0.0,
                    wind_speed_ms: v,
                    temperature_c: 25.0,
                },
            );
            assert!(out >= prev, "power curve dipped at {v} m/s");
            prev = out;
            v += 0.25;
        }
    }

    #[test]
    fn load_within_bounds() {
        let cfg = LoadConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        for step in 0..500 {
            let hour = (step as f32 * 0.1) % 24.0;
            let load = load_demand(&cfg, &mut rng, hour, step / 240);
            assert!(load >= 0.3 * cfg.peak_kw - 1e-3);
            assert!(load <= cfg.peak_kw + 1e-3);
        }
    }

    #[test]
    fn weekend_load_reduced() {
        let cfg = LoadConfig {
            noise_std: 0.0,
            ..LoadConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let weekday = load_demand(&cfg, &mut rng, 20.0, 1);
        let weekend = load_demand(&cfg, &mut rng, 20.0, 6);
        assert!(weekend < weekday);
    }

    #[test]
    fn weather_walk_stays_bounded() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut w = Weather::mild();
        for step in 0..2000 {
            w.advance(&mut rng, (step as f32 * 0.1) % 24.0);
            assert!((0.0..=1.0).contains(&w.cloud_cover));
            assert!((0.0..=25.0).contains(&w.wind_speed_ms));
            assert!(w.temperature_c.is_finite());
        }
    }

    #[test]
    fn overcast_sky_drifts_toward_clearing() {
        // average over many seeds so the walk noise cancels and the
        // -0.01 per-step drift shows through
        let mut total = 0.0;
        for seed in 0..40 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut w = Weather {
                cloud_cover: 0.9,
                ..Weather::mild()
            };
            for _ in 0..50 {
                w.advance(&mut rng, 12.0);
            }
            total += w.cloud_cover;
        }
        assert!(total / 40.0 < 0.8);
    }

    #[test]
    fn temperature_peaks_mid_afternoon() {
        let temp_at = |hour: f32| {
            let mut rng = StdRng::seed_from_u64(0);
            let mut w = Weather::mild();
            w.advance(&mut rng, hour);
            w.temperature_c
        };
        assert!(temp_at(14.0) > temp_at(9.0));
        assert!(temp_at(14.0) > temp_at(20.0));
        // clear-sky afternoon peak sits at 35 C plus noise
        assert!((temp_at(14.0) - 35.0).abs() < 2.0);
    }
}
