// Hotend physics for the simulated printer

#[derive(Debug, Clone)]
pub struct HeaterState {
    pub power: f64,        // 0.0-1.0
    pub target_temp: f64,  // °C, 0 = off
    pub current_temp: f64, // °C
}

#[derive(Debug, Clone)]
pub struct ThermistorState {
    pub measured_temp: f64, // °C
    pub noise: f64,         // peak-to-peak sensor noise
}

pub const AMBIENT_TEMP: f64 = 25.0;

impl HeaterState {
    pub fn new(ambient: f64) -> Self {
        Self { power: 0.0, target_temp: 0.0, current_temp: ambient }
    }

    pub fn is_on(&self) -> bool {
        self.target_temp > 0.0
    }

    /// Advance the model by `dt` seconds.
    pub fn update(&mut self, dt: f64, ambient: f64) {
        // Proportional drive, saturating 10 °C below target.
        self.power = if self.is_on() {
            ((self.target_temp - self.current_temp) / 10.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let max_delta = 12.0;
        let heat_gain = self.power * max_delta * dt;
        let loss_rate = if self.is_on() { 0.02 } else { 0.1 };
        let heat_loss = loss_rate * (self.current_temp - ambient) * dt;
        self.current_temp += heat_gain - heat_loss;
    }
}

impl ThermistorState {
    pub fn new(ambient: f64, noise: f64) -> Self {
        Self { measured_temp: ambient, noise }
    }

    pub fn update(&mut self, true_temp: f64, dt: f64) {
        let lag = (0.8 * dt).min(1.0);
        self.measured_temp += lag * (true_temp - self.measured_temp);
        if self.noise > 0.0 {
            self.measured_temp += self.noise * (rand::random::<f64>() - 0.5);
        }
    }
}
