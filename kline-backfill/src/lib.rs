//! # kline-backfill
//! Resumable, rate-limited historical kline (OHLCV) backfill from a paginated exchange REST
//! API into one CSV file per (symbol, resolution).
//!
//! Components, leaves first:
//! - [`cursor`]: progress of one (symbol, resolution) loop towards a fixed horizon.
//! - [`client`]: the [`KlineSource`] seam and the Binance REST implementation.
//! - [`kline`]: upstream positional records and their normalisation.
//! - [`sink`]: durable, append-only CSV output.
//! - [`backfill`]: the orchestrator tying the above together.
//!
//! ```rust,no_run
//! use kline_backfill::{
//!     Backfill, BackfillConfig, BinanceKlineClient,
//!     config::{parse_resolutions, parse_start_date},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BackfillConfig::new(
//!         "BTCUSDT",
//!         parse_resolutions("1h,4h,12h,1d"),
//!         parse_start_date("2018-01-01")?,
//!     );
//!     let client = BinanceKlineClient::from_config(&config)?;
//!
//!     let summary = Backfill::new(config, client)?.run().await?;
//!     println!("persisted {} klines", summary.total_rows());
//!     Ok(())
//! }
//! ```

/// Backfill orchestrator and run reports.
pub mod backfill;

/// Resume checkpoints persisted next to each sink.
pub mod checkpoint;

/// Upstream REST client and the [`KlineSource`] abstraction.
pub mod client;

/// Wall-clock abstraction used for horizons and date labels.
pub mod clock;

/// Run configuration and validation.
pub mod config;

/// Backfill cursor and resolution loop states.
pub mod cursor;

/// All errors generated in `kline-backfill`.
pub mod error;

/// Kline records and normalisation.
pub mod kline;

/// Tracing subscriber bootstrap.
pub mod logging;

/// Inter-call delay strategies.
pub mod pacer;

/// CSV output sink.
pub mod sink;

pub use backfill::{Backfill, ResolutionReport, RunSummary};
pub use client::{BinanceKlineClient, KlineSource, PageOutcome, PageRequest};
pub use config::{BackfillConfig, FetchPolicy, Resolution};
pub use cursor::{BackfillCursor, ResolutionState};
pub use error::{BackfillError, ConfigError, FetchError, SinkError};
pub use kline::{Kline, RawKline};
