// Observability: Prometheus metrics recorded per pipeline phase

pub mod metrics;

pub use self::metrics::{init, render};
