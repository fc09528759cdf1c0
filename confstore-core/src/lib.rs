pub mod config;
pub mod logging;
pub mod metrics;
pub mod store;

pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use store::{
    is_valid_name, ErrorCategory, ReadOnlyTransaction, Revision, Store, StoreError, StoreResult, Value,
    ValueType, WritableTransaction, DEFAULT_NAME_DELIMITER,
};
