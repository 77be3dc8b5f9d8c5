pub mod alert_sink;
pub mod elasticsearch;
pub mod log_threshold;
