mod claude;
mod codex;
mod logging;
mod opencode;
mod registry;
mod replay;
mod scan;
mod scheduler;

pub use claude::*;
pub use codex::*;
pub use logging::*;
pub use opencode::*;
pub use registry::*;
pub use replay::*;
pub use scan::*;
pub use scheduler::*;
