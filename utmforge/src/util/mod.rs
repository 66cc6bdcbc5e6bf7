pub mod logging;

pub use logging::{init_logging, register_to_tracing};
