//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `project` | `Init`           |
//! | `run`     | `Run`            |
//! | `status`  | `Status`         |

pub mod project;
pub mod run;
pub mod status;
