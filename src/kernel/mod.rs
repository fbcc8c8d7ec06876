pub mod dispatch;
pub(crate) mod guard;
pub mod intent;
pub mod lifecycle;
pub mod runtime;
pub mod telemetry;
