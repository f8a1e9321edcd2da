/*!
 * Monitoring
 * Structured tracing setup for binaries, tests and benchmarks
 */

mod tracer;

pub use tracer::init_tracing;
