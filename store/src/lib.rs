//! Idempotent writer + reader over the time-series tables, hiding connection
//! pooling from ingestion and analytics.

pub mod models;

use chrono::{DateTime, Utc};
use common::StoreError;
use sqlx::PgPool;

pub use models::{GexByStrikeRow, GexSummaryRow, OptionQuoteRow, UnderlyingBar};

/// Tables the maintenance task is allowed to prune, with their default
/// retention. Kept as an enum (rather than a raw table-name string) so
/// `prune_older_than` never interpolates caller-controlled SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunableTable {
    /// Raw underlying bars and option quotes.
    RawQuotes,
    /// Analytics summary/by-strike rows.
    QualityLog,
    /// Anything classified as metrics (reserved for future use).
    Metrics,
}

/// Idempotent upsert store over the time-series tables.
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Wrap an existing connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool, e.g. for a caller that wants its own
    /// short transaction alongside a store call.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not already exist. Run once at startup;
    /// idempotent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS underlying_bars (
                symbol TEXT NOT NULL,
                bucket_start TIMESTAMPTZ NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                up_volume DOUBLE PRECISION NOT NULL,
                down_volume DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (symbol, bucket_start)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS option_quotes (
                contract_symbol TEXT NOT NULL,
                bucket_start TIMESTAMPTZ NOT NULL,
                underlying TEXT NOT NULL,
                expiration DATE NOT NULL,
                strike DOUBLE PRECISION NOT NULL,
                option_type TEXT NOT NULL,
                last DOUBLE PRECISION,
                bid DOUBLE PRECISION,
                ask DOUBLE PRECISION,
                volume DOUBLE PRECISION NOT NULL,
                open_interest DOUBLE PRECISION NOT NULL,
                iv DOUBLE PRECISION,
                iv_source TEXT,
                delta DOUBLE PRECISION,
                gamma DOUBLE PRECISION,
                theta DOUBLE PRECISION,
                vega DOUBLE PRECISION,
                vanna DOUBLE PRECISION,
                charm DOUBLE PRECISION,
                PRIMARY KEY (contract_symbol, bucket_start)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS gex_summary (
                underlying TEXT NOT NULL,
                calc_time TIMESTAMPTZ NOT NULL,
                max_gamma_strike DOUBLE PRECISION,
                max_gamma_value DOUBLE PRECISION,
                gamma_flip_point DOUBLE PRECISION,
                put_call_ratio DOUBLE PRECISION,
                max_pain DOUBLE PRECISION,
                total_call_volume DOUBLE PRECISION NOT NULL,
                total_put_volume DOUBLE PRECISION NOT NULL,
                total_call_oi DOUBLE PRECISION NOT NULL,
                total_put_oi DOUBLE PRECISION NOT NULL,
                total_net_gex DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (underlying, calc_time)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS gex_by_strike (
                underlying TEXT NOT NULL,
                calc_time TIMESTAMPTZ NOT NULL,
                strike DOUBLE PRECISION NOT NULL,
                expiration DATE NOT NULL,
                call_gamma DOUBLE PRECISION NOT NULL,
                put_gamma DOUBLE PRECISION NOT NULL,
                net_gex DOUBLE PRECISION NOT NULL,
                call_volume DOUBLE PRECISION NOT NULL,
                put_volume DOUBLE PRECISION NOT NULL,
                call_oi DOUBLE PRECISION NOT NULL,
                put_oi DOUBLE PRECISION NOT NULL,
                vanna_exposure DOUBLE PRECISION NOT NULL,
                charm_exposure DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (underlying, calc_time, strike, expiration)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert-or-update on `(symbol, bucket_start)`.
    pub async fn upsert_underlying_bar(&self, bar: &UnderlyingBar) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO underlying_bars
                (symbol, bucket_start, open, high, low, close, up_volume, down_volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol, bucket_start) DO UPDATE SET
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                up_volume = EXCLUDED.up_volume,
                down_volume = EXCLUDED.down_volume",
        )
        .bind(&bar.symbol)
        .bind(bar.bucket_start)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.up_volume)
        .bind(bar.down_volume)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert-or-update on `(contract_symbol, bucket_start)`.
    pub async fn upsert_option_quote(&self, quote: &OptionQuoteRow) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO option_quotes
                (contract_symbol, bucket_start, underlying, expiration, strike, option_type,
                 last, bid, ask, volume, open_interest, iv, iv_source, delta, gamma, theta, vega,
                 vanna, charm)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19)
            ON CONFLICT (contract_symbol, bucket_start) DO UPDATE SET
                last = EXCLUDED.last,
                bid = EXCLUDED.bid,
                ask = EXCLUDED.ask,
                volume = EXCLUDED.volume,
                open_interest = EXCLUDED.open_interest,
                iv = EXCLUDED.iv,
                iv_source = EXCLUDED.iv_source,
                delta = EXCLUDED.delta,
                gamma = EXCLUDED.gamma,
                theta = EXCLUDED.theta,
                vega = EXCLUDED.vega,
                vanna = EXCLUDED.vanna,
                charm = EXCLUDED.charm",
        )
        .bind(&quote.contract_symbol)
        .bind(quote.bucket_start)
        .bind(&quote.underlying)
        .bind(quote.expiration)
        .bind(quote.strike)
        .bind(&quote.option_type)
        .bind(quote.last)
        .bind(quote.bid)
        .bind(quote.ask)
        .bind(quote.volume)
        .bind(quote.open_interest)
        .bind(quote.iv)
        .bind(&quote.iv_source)
        .bind(quote.delta)
        .bind(quote.gamma)
        .bind(quote.theta)
        .bind(quote.vega)
        .bind(quote.vanna)
        .bind(quote.charm)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert-or-update on `(underlying, calc_time)`.
    pub async fn upsert_gex_summary(&self, row: &GexSummaryRow) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO gex_summary
                (underlying, calc_time, max_gamma_strike, max_gamma_value, gamma_flip_point,
                 put_call_ratio, max_pain, total_call_volume, total_put_volume,
                 total_call_oi, total_put_oi, total_net_gex)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (underlying, calc_time) DO UPDATE SET
                max_gamma_strike = EXCLUDED.max_gamma_strike,
                max_gamma_value = EXCLUDED.max_gamma_value,
                gamma_flip_point = EXCLUDED.gamma_flip_point,
                put_call_ratio = EXCLUDED.put_call_ratio,
                max_pain = EXCLUDED.max_pain,
                total_call_volume = EXCLUDED.total_call_volume,
                total_put_volume = EXCLUDED.total_put_volume,
                total_call_oi = EXCLUDED.total_call_oi,
                total_put_oi = EXCLUDED.total_put_oi,
                total_net_gex = EXCLUDED.total_net_gex",
        )
        .bind(&row.underlying)
        .bind(row.calc_time)
        .bind(row.max_gamma_strike)
        .bind(row.max_gamma_value)
        .bind(row.gamma_flip_point)
        .bind(row.put_call_ratio)
        .bind(row.max_pain)
        .bind(row.total_call_volume)
        .bind(row.total_put_volume)
        .bind(row.total_call_oi)
        .bind(row.total_put_oi)
        .bind(row.total_net_gex)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert-or-update on `(underlying, calc_time, strike, expiration)`.
    pub async fn upsert_gex_by_strike(&self, row: &GexByStrikeRow) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO gex_by_strike
                (underlying, calc_time, strike, expiration, call_gamma, put_gamma, net_gex,
                 call_volume, put_volume, call_oi, put_oi, vanna_exposure, charm_exposure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (underlying, calc_time, strike, expiration) DO UPDATE SET
                call_gamma = EXCLUDED.call_gamma,
                put_gamma = EXCLUDED.put_gamma,
                net_gex = EXCLUDED.net_gex,
                call_volume = EXCLUDED.call_volume,
                put_volume = EXCLUDED.put_volume,
                call_oi = EXCLUDED.call_oi,
                put_oi = EXCLUDED.put_oi,
                vanna_exposure = EXCLUDED.vanna_exposure,
                charm_exposure = EXCLUDED.charm_exposure",
        )
        .bind(&row.underlying)
        .bind(row.calc_time)
        .bind(row.strike)
        .bind(row.expiration)
        .bind(row.call_gamma)
        .bind(row.put_gamma)
        .bind(row.net_gex)
        .bind(row.call_volume)
        .bind(row.put_volume)
        .bind(row.call_oi)
        .bind(row.put_oi)
        .bind(row.vanna_exposure)
        .bind(row.charm_exposure)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// For each contract under `underlying`, the most recent row whose
    /// `bucket_start` falls within `staleness_window` of now.
    pub async fn latest_option_snapshot(
        &self,
        underlying: &str,
        staleness_window: chrono::Duration,
    ) -> Result<Vec<OptionQuoteRow>, StoreError> {
        let cutoff = Utc::now() - staleness_window;
        let rows = sqlx::query_as::<_, OptionQuoteSqlRow>(
            r"
            SELECT DISTINCT ON (contract_symbol)
                contract_symbol, underlying, expiration, strike, option_type, bucket_start,
                last, bid, ask, volume, open_interest, iv, iv_source, delta, gamma, theta, vega,
                vanna, charm
            FROM option_quotes
            WHERE underlying = $1 AND bucket_start >= $2
            ORDER BY contract_symbol, bucket_start DESC",
        )
        .bind(underlying)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Most recent close for `underlying`, if any bars have been written.
    pub async fn latest_underlying_close(
        &self,
        underlying: &str,
    ) -> Result<Option<(DateTime<Utc>, f64)>, StoreError> {
        let row: Option<(DateTime<Utc>, f64)> = sqlx::query_as(
            r"
            SELECT bucket_start, close FROM underlying_bars
            WHERE symbol = $1
            ORDER BY bucket_start DESC
            LIMIT 1",
        )
        .bind(underlying)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Delete rows older than `retention` from the given table.
    pub async fn prune_older_than(
        &self,
        table: PrunableTable,
        retention: chrono::Duration,
    ) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - retention;
        let result = match table {
            PrunableTable::RawQuotes => {
                sqlx::query("DELETE FROM option_quotes WHERE bucket_start < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("DELETE FROM underlying_bars WHERE bucket_start < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            PrunableTable::QualityLog => {
                sqlx::query("DELETE FROM gex_by_strike WHERE calc_time < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("DELETE FROM gex_summary WHERE calc_time < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            PrunableTable::Metrics => return Ok(0),
        };
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct OptionQuoteSqlRow {
    contract_symbol: String,
    underlying: String,
    expiration: chrono::NaiveDate,
    strike: f64,
    option_type: String,
    bucket_start: DateTime<Utc>,
    last: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    volume: f64,
    open_interest: f64,
    iv: Option<f64>,
    iv_source: Option<String>,
    delta: Option<f64>,
    gamma: Option<f64>,
    theta: Option<f64>,
    vega: Option<f64>,
    vanna: Option<f64>,
    charm: Option<f64>,
}

impl From<OptionQuoteSqlRow> for OptionQuoteRow {
    fn from(r: OptionQuoteSqlRow) -> Self {
        Self {
            contract_symbol: r.contract_symbol,
            underlying: r.underlying,
            expiration: r.expiration,
            strike: r.strike,
            option_type: r.option_type,
            bucket_start: r.bucket_start,
            last: r.last,
            bid: r.bid,
            ask: r.ask,
            volume: r.volume,
            open_interest: r.open_interest,
            iv: r.iv,
            iv_source: r.iv_source,
            delta: r.delta,
            gamma: r.gamma,
            theta: r.theta,
            vega: r.vega,
            vanna: r.vanna,
            charm: r.charm,
        }
    }
}

/// Parse a broker-reported option type string into the normalized form
/// stored in `option_quotes.option_type`. Mirrors the defensive parse-helper
/// style used for persisted enum-like text columns.
pub fn normalize_option_type(raw: &str) -> Option<&'static str> {
    match raw.to_ascii_lowercase().as_str() {
        "call" | "c" => Some("call"),
        "put" | "p" => Some("put"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_option_type_variants() {
        assert_eq!(normalize_option_type("Call"), Some("call"));
        assert_eq!(normalize_option_type("P"), Some("put"));
        assert_eq!(normalize_option_type("straddle"), None);
    }

    // Integration tests below require a live Postgres reachable via
    // DATABASE_URL and are not run by default.
    #[tokio::test]
    #[ignore]
    async fn upsert_underlying_bar_is_idempotent() {
        let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        let store = Store::new(pool);
        store.run_migrations().await.unwrap();

        let bar = UnderlyingBar {
            symbol: "SPY".into(),
            bucket_start: Utc::now(),
            open: 450.0,
            high: 451.0,
            low: 449.5,
            close: 450.5,
            up_volume: 1000.0,
            down_volume: 500.0,
        };
        store.upsert_underlying_bar(&bar).await.unwrap();
        store.upsert_underlying_bar(&bar).await.unwrap();
    }
}
