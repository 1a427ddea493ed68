//! Test step builders

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tickflow::engine::steps::{ConstantStep, GainStep, RampStep, SumStep};
use tickflow::engine::{BuiltinStep, DataKind, Role, Step};

pub fn constant(name: &str, value: f64) -> Arc<Step> {
    Step::builtin(name, BuiltinStep::Constant(ConstantStep::new(value))).unwrap()
}

pub fn gain(name: &str, gain: f64) -> Arc<Step> {
    Step::builtin(name, BuiltinStep::Gain(GainStep::new(gain))).unwrap()
}

pub fn ramp(name: &str, rate: f64) -> Arc<Step> {
    Step::builtin(name, BuiltinStep::Ramp(RampStep::new(rate))).unwrap()
}

pub fn sum(name: &str) -> Arc<Step> {
    Step::builtin(name, BuiltinStep::Sum(SumStep::new())).unwrap()
}

/// Scalar published on `out`, if any
pub fn out(step: &Step) -> Option<f64> {
    step.read(Role::Output, "out").and_then(|s| s.value.as_scalar())
}

pub fn out_version(step: &Step) -> u64 {
    step.read(Role::Output, "out").map(|s| s.version).unwrap_or(0)
}

/// Builder for a closure step that counts its ticks and publishes
/// `1 + sum(inputs)` on `out`.
pub struct CountingStepBuilder {
    name: String,
    inputs: Vec<String>,
    mandatory: bool,
}

impl CountingStepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            mandatory: true,
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn optional_inputs(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn build(self) -> (Arc<Step>, Arc<AtomicU64>) {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let inputs = self.inputs.clone();
        let mandatory = self.mandatory;
        let step = Step::from_fn(
            self.name,
            move |slots| {
                for input in &inputs {
                    slots.declare_slot(Role::Input, input, DataKind::Scalar, mandatory)?;
                }
                slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
            },
            move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                let total: f64 = ctx.input_names().filter_map(|name| ctx.scalar(name)).sum();
                ctx.set_output("out", 1.0 + total)
            },
        )
        .unwrap();
        (step, ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_step_builder() {
        let (step, ticks) = CountingStepBuilder::new("c").input("a").build();
        assert_eq!(step.slot_names(Role::Input), vec!["a"]);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
