//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`            |
//! | `status` | `Status`         |
//! | `clean`  | `Clean`          |

pub mod clean;
pub mod run;
pub mod status;

pub use clean::cmd_clean;
pub use run::{RunArgs, cmd_run};
pub use status::cmd_status;
