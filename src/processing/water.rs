//! Water properties from the station's temperature, pressure and salinity

use crate::core::{ATM_PRESSURE_MBAR, GRAVITY_ACC_MPS2, SPEED_OF_SOUND_WATER};

/// Tracks the environmental inputs needed to turn pressure into depth and
/// propagation time into range
#[derive(Debug, Clone, PartialEq)]
pub struct WaterProperties {
    /// Salinity (PSU), configured rather than measured
    pub salinity_psu: f64,
    /// Latest water temperature at the transducer (°C)
    pub temperature_c: Option<f64>,
    /// Latest absolute pressure at the transducer (mBar)
    pub pressure_mbar: Option<f64>,
}

impl WaterProperties {
    pub fn new(salinity_psu: f64) -> Self {
        Self {
            salinity_psu,
            temperature_c: None,
            pressure_mbar: None,
        }
    }

    /// Water density (kg/m³), available once temperature is known
    pub fn density(&self) -> Option<f64> {
        self.temperature_c
            .map(|t| water_density(t, self.salinity_psu))
    }

    /// Depth below the surface (m), available once temperature and pressure
    /// are both known
    pub fn depth(&self) -> Option<f64> {
        let pressure = self.pressure_mbar?;
        let density = self.density()?;
        Some(depth_by_pressure(pressure, ATM_PRESSURE_MBAR, density, GRAVITY_ACC_MPS2))
    }

    /// Speed of sound (m/s). Falls back to the nominal value until a
    /// temperature is reported.
    pub fn sound_speed(&self) -> f64 {
        match self.temperature_c {
            Some(t) => sound_speed(t, self.salinity_psu, self.depth().unwrap_or(0.0).max(0.0)),
            None => SPEED_OF_SOUND_WATER,
        }
    }
}

/// UNESCO (1981) one-atmosphere density of seawater (kg/m³)
pub fn water_density(temperature_c: f64, salinity_psu: f64) -> f64 {
    let t = temperature_c;
    let s = salinity_psu;

    let rho_w = 999.842594 + 6.793952e-2 * t - 9.095290e-3 * t.powi(2) + 1.001685e-4 * t.powi(3)
        - 1.120083e-6 * t.powi(4)
        + 6.536332e-9 * t.powi(5);

    let a = 0.824493 - 4.0899e-3 * t + 7.6438e-5 * t.powi(2) - 8.2467e-7 * t.powi(3) + 5.3875e-9 * t.powi(4);
    let b = -5.72466e-3 + 1.0227e-4 * t - 1.6546e-6 * t.powi(2);
    let c = 4.8314e-4;

    rho_w + a * s + b * s.powf(1.5) + c * s * s
}

/// Hydrostatic depth (m) from absolute pressure
pub fn depth_by_pressure(pressure_mbar: f64, surface_pressure_mbar: f64, density: f64, gravity: f64) -> f64 {
    (pressure_mbar - surface_pressure_mbar) * 100.0 / (density * gravity)
}

/// Coppens (1981) sound speed (m/s), valid for 0-45 PSU
pub fn sound_speed(temperature_c: f64, salinity_psu: f64, depth_m: f64) -> f64 {
    let t = temperature_c / 10.0;
    let d = depth_m / 1000.0;
    let ds = salinity_psu - 35.0;

    let surface = 1449.05 + 45.7 * t - 5.21 * t * t + 0.23 * t.powi(3)
        + (1.333 - 0.126 * t + 0.009 * t * t) * ds;

    surface
        + (16.23 + 0.253 * t) * d
        + (0.213 - 0.1 * t) * d * d
        + (0.016 + 0.0002 * ds) * ds * t * d
}
