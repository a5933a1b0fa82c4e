pub mod breakpoint;
pub mod phase;
pub mod reflection;
pub mod task;
pub mod workflow;

pub use breakpoint::*;
pub use phase::*;
pub use reflection::*;
pub use task::*;
pub use workflow::*;
