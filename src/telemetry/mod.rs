pub mod emitter;
pub mod sink;

pub use emitter::TelemetryEmitter;
pub use sink::{FanoutSink, JsonLinesSink, TelemetrySink};
