//! Sum step: adds two mandatory scalar inputs.

use crate::engine::computation::{StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::DataKind;
use crate::error::Result;
use anyhow::Context;

#[derive(Debug, Clone, Default)]
pub struct SumStep;

impl SumStep {
    pub fn new() -> Self {
        Self
    }
}

impl StepPlugin for SumStep {
    fn type_name(&self) -> &str {
        "sum"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        slots.declare_slot(Role::Input, "a", DataKind::Scalar, true)?;
        slots.declare_slot(Role::Input, "b", DataKind::Scalar, true)?;
        slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        let a = ctx.scalar("a").context("input 'a' has no scalar value")?;
        let b = ctx.scalar("b").context("input 'b' has no scalar value")?;
        ctx.set_output("out", a + b)
    }
}
