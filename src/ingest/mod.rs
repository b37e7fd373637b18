pub mod coerce;
pub mod intake;
pub mod processor;
pub mod staging;
pub mod target;
