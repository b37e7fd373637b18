mod health;
mod imports;

pub use health::*;
pub use imports::*;
