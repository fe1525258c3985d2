/// Probe executors shipped with the replica
///
/// - `checker`: HTTP (plain, keyword, JSON query), TCP and push probes
/// - `executor`: registry wiring for the worker pool
/// - `validation`: monitor definition checks run before persisting
pub mod checker;
pub mod executor;
pub mod validation;

pub use executor::build_registry;
pub use validation::validate_monitor;
