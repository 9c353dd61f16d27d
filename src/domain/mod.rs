mod claude;
mod parse;
mod timeline;
mod types;

pub use claude::*;
pub use parse::*;
pub use timeline::*;
pub use types::*;
