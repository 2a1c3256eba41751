pub mod core;
pub mod picker;
pub mod report;
pub mod roster;
pub mod settings;
pub mod snapshot;
pub mod tally;
