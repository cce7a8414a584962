//! 查询/响应关联

pub mod correlator;

pub use correlator::{PendingQuery, QueryCorrelator};
