/// Idle read timeout adaptor for live streams.
pub mod timeout;

pub use timeout::TimeoutStream;
