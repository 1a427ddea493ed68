//! Built-in step computations.

pub mod component;
pub mod constant;
pub mod function;
pub mod gain;
pub mod ramp;
pub mod recorder;
pub mod script;
pub mod sum;

pub use component::{Component, ComponentStep};
pub use constant::ConstantStep;
pub use function::FnStep;
pub use gain::GainStep;
pub use ramp::RampStep;
pub use recorder::RecorderStep;
pub use script::ScriptStep;
pub use sum::SumStep;
