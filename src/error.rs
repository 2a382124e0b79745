use thiserror::Error;

/// Fatal at startup: missing/invalid config, missing env, coin not found in
/// spot meta, degenerate grid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("config validation failed:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),

    #[error("environment variable {0} is required and must be non-empty")]
    MissingEnv(String),

    #[error("coin {0} not found in spot meta universe")]
    CoinNotFound(String),

    #[error("degenerate grid: level {index} collapsed onto level {index}-1 ({price}); increase rounding precision or tick size")]
    DegenerateGrid { index: usize, price: f64 },

    #[error("grid index {index} out of range for a grid with {n_orders} levels")]
    IndexOutOfRange { index: usize, n_orders: usize },
}

/// Raised by exchange calls. Tick-local unless explicitly noted.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (429)")]
    RateLimited,

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("exchange rejected the action: {0}")]
    Rejected(String),
}

/// Top-level error type threaded through the tick loop and startup path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TransportError: caught in the tick, logged, budget still debited.
    #[error("transport error: {0}")]
    Transport(#[from] ExchangeError),

    /// LogicError: assertion-class bug. Fatal — abort the tick (or process)
    /// rather than proceed with corrupted state.
    #[error("logic error: {0}")]
    Logic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
