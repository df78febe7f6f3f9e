/// Step learning-rate decay. The schedule advances once before each epoch trains, so
/// `lr(epoch) = initial * gamma^((epoch + 1) / step_size)` and the first decay lands on
/// epoch `step_size - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    pub initial: f64,
    pub step_size: usize,
    pub gamma: f64,
}

impl StepDecay {
    pub fn new(initial: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            initial,
            step_size,
            gamma,
        }
    }

    pub fn lr(&self, epoch: usize) -> f64 {
        if self.step_size == 0 {
            return self.initial;
        }
        let decays = (epoch.saturating_add(1) / self.step_size).min(i32::MAX as usize) as i32;
        self.initial * self.gamma.powi(decays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_decay_applies_to_the_epoch_before_the_step() {
        let s = StepDecay::new(1e-2, 20, 0.1);
        assert_eq!(s.lr(0), 1e-2);
        assert_eq!(s.lr(18), 1e-2);
        assert!((s.lr(19) - 1e-3).abs() < 1e-15);
        assert!((s.lr(38) - 1e-3).abs() < 1e-15);
        assert!((s.lr(39) - 1e-4).abs() < 1e-15);
    }

    #[test]
    fn unit_step_decays_every_epoch() {
        let s = StepDecay::new(1.0, 1, 0.5);
        assert_eq!(s.lr(0), 0.5);
        assert_eq!(s.lr(2), 0.125);
    }

    #[test]
    fn zero_step_disables_decay() {
        let s = StepDecay::new(0.5, 0, 0.1);
        assert_eq!(s.lr(100), 0.5);
    }
}
