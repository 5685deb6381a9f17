//! Terminal output for the CLI driver.

mod progress;

pub use progress::RunReporter;
