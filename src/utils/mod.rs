pub mod date_range;
pub mod log_helpers;
