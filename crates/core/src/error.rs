use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown market code: {0}")]
    UnknownMarket(String),

    #[error("unknown resolution code: {0}")]
    UnknownResolution(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{key} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        key: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid feed record: {0}")]
    InvalidRecord(String),
}
