//! Stuff I use a lot: durable HTTP requests, date helpers, config-driven
//! command lines and a one-call logging setup.

pub mod cli;
pub mod config;
pub mod dates;
pub mod error;
pub mod http;
pub mod logger;
pub mod testing;

pub use cli::{CliError, CliSpec, ParsedArgs, parse_args, parse_args_from};
pub use dates::{
    DateError, date_string_to_timestamp, datetime_to_timestamp, parse_date, parse_utc_timestamp,
};
pub use error::AppError;
pub use http::{
    DurableClient, RequestError, RetryPolicy, StoreError, make_durable_get, make_durable_post,
    make_durable_request,
};
pub use logger::LoggingConfig;
