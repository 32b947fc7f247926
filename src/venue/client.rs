// =============================================================================
// Venue REST API Client — HMAC-SHA256 signed requests
// =============================================================================
//
// One client serves both surfaces of the venue API:
//   - telemetry: pool listing and per-pool microstructure snapshots
//   - execution: add/remove liquidity, claim fees, close position
//
// SECURITY: The secret key is never logged or serialized. All signed
// requests carry X-MRD-APIKEY as a header plus a recvWindow of 5 000 ms to
// tolerate minor clock drift between the bot and the venue gateway.
//
// Every call has a bounded timeout; a failed call is logged and the pool is
// simply skipped for the cycle — retry loops never live in this layer.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::position_engine::BinRange;
use crate::telemetry::{BinLevel, PoolSnapshot};
use crate::types::PoolDescriptor;
use crate::venue::rate_limit::RateLimitTracker;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5_000;

/// Venue REST API client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct VenueClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limits: Arc<RateLimitTracker>,
}

impl VenueClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `VenueClient`.
    ///
    /// # Arguments
    /// * `base_url` — venue gateway, e.g. from MERIDIAN_RPC_URL.
    /// * `api_key`  — sent as a header, never in query params.
    /// * `secret`   — used exclusively for HMAC signing.
    /// * `timeout_ms` — per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();
        let base_url = base_url.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MRD-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, "VenueClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            client,
            rate_limits: Arc::new(RateLimitTracker::new()),
        }
    }

    pub fn rate_limits(&self) -> Arc<RateLimitTracker> {
        self.rate_limits.clone()
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn get_json(&self, path: &str, signed_params: Option<&str>) -> Result<serde_json::Value> {
        let url = match signed_params {
            Some(params) => format!("{}{}?{}", self.base_url, path, self.signed_query(params)),
            None => format!("{}{}", self.base_url, path),
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("venue GET {path} returned {status}: {body}");
        }
        Ok(body)
    }

    async fn post_json(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params));

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("venue POST {path} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Telemetry surface
    // -------------------------------------------------------------------------

    /// GET /v1/pools — raw descriptors for every listed pool.
    #[instrument(skip(self), name = "venue::list_pools")]
    pub async fn list_pools(&self) -> Result<Vec<PoolDescriptor>> {
        let body = self.get_json("/v1/pools", None).await?;

        let pools = body["pools"]
            .as_array()
            .context("listing response missing 'pools' array")?;

        let descriptors: Vec<PoolDescriptor> = pools
            .iter()
            .filter_map(|raw| match serde_json::from_value(raw.clone()) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(error = %e, "skipping unparsable pool descriptor");
                    None
                }
            })
            .collect();

        debug!(count = descriptors.len(), "pool listing retrieved");
        Ok(descriptors)
    }

    /// GET /v1/pools/{address}/snapshot — one microstructure observation.
    #[instrument(skip(self), name = "venue::pool_snapshot")]
    pub async fn pool_snapshot(&self, address: &str) -> Result<PoolSnapshot> {
        let body = self
            .get_json(&format!("/v1/pools/{address}/snapshot"), None)
            .await?;

        parse_snapshot(&body)
            .with_context(|| format!("malformed snapshot payload for pool {address}"))
    }

    // -------------------------------------------------------------------------
    // Execution surface
    // -------------------------------------------------------------------------

    /// POST /v1/liquidity/add (signed) — deploy liquidity over a bin range.
    /// Returns the venue's opaque position handle.
    #[instrument(skip(self), name = "venue::add_liquidity")]
    pub async fn add_liquidity(
        &self,
        pool: &str,
        range: BinRange,
        amount_usd: f64,
    ) -> Result<String> {
        let params = format!(
            "pool={pool}&lowerBin={}&upperBin={}&amountUsd={amount_usd}",
            range.lower, range.upper
        );
        let body = self.post_json("/v1/liquidity/add", &params).await?;

        let handle = body["positionHandle"]
            .as_str()
            .context("add-liquidity response missing 'positionHandle'")?
            .to_string();

        debug!(pool, handle = %handle, amount_usd, "liquidity added");
        Ok(handle)
    }

    /// POST /v1/liquidity/remove (signed) — withdraw a position's liquidity.
    /// Returns the USD value actually withdrawn.
    #[instrument(skip(self), name = "venue::remove_liquidity")]
    pub async fn remove_liquidity(&self, handle: &str) -> Result<f64> {
        let params = format!("positionHandle={handle}");
        let body = self.post_json("/v1/liquidity/remove", &params).await?;

        let withdrawn = body["withdrawnUsd"]
            .as_f64()
            .context("remove-liquidity response missing 'withdrawnUsd'")?;

        debug!(handle, withdrawn, "liquidity removed");
        Ok(withdrawn)
    }

    /// POST /v1/liquidity/claim-fees (signed). Returns fees in USD.
    #[instrument(skip(self), name = "venue::claim_fees")]
    pub async fn claim_fees(&self, handle: &str) -> Result<f64> {
        let params = format!("positionHandle={handle}");
        let body = self.post_json("/v1/liquidity/claim-fees", &params).await?;

        let fees = body["feesUsd"]
            .as_f64()
            .context("claim-fees response missing 'feesUsd'")?;

        debug!(handle, fees, "fees claimed");
        Ok(fees)
    }

    /// POST /v1/liquidity/close (signed) — release the position account.
    #[instrument(skip(self), name = "venue::close_position")]
    pub async fn close_position(&self, handle: &str) -> Result<()> {
        let params = format!("positionHandle={handle}");
        self.post_json("/v1/liquidity/close", &params).await?;
        debug!(handle, "position closed on venue");
        Ok(())
    }

    /// GET /v1/liquidity/positions (signed) — handles of our open
    /// positions, used by reconciliation.
    #[instrument(skip(self), name = "venue::open_handles")]
    pub async fn open_handles(&self) -> Result<Vec<String>> {
        let body = self.get_json("/v1/liquidity/positions", Some("")).await?;

        let handles = body["positions"]
            .as_array()
            .context("positions response missing 'positions' array")?
            .iter()
            .filter_map(|p| p["positionHandle"].as_str().map(str::to_string))
            .collect();

        Ok(handles)
    }
}

impl std::fmt::Debug for VenueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret must never appear in debug output.
        f.debug_struct("VenueClient")
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.is_empty())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Parse a snapshot payload of the shape:
/// ```json
/// {
///   "fetchedAt": 1712345678901,
///   "activeBin": 8412,
///   "totalLiquidity": 123456.0,
///   "liquidityUsd": 98765.0,
///   "velocity": 0.22,
///   "bins": { "8410": {"liquidity": 100.0, "swapCount": 3}, ... }
/// }
/// ```
fn parse_snapshot(body: &serde_json::Value) -> Result<PoolSnapshot> {
    let fetched_at = body["fetchedAt"]
        .as_i64()
        .context("missing field fetchedAt")?;
    let active_bin = body["activeBin"]
        .as_i64()
        .context("missing field activeBin")? as i32;
    let total_liquidity = body["totalLiquidity"].as_f64().unwrap_or(0.0);
    let liquidity_usd = body["liquidityUsd"]
        .as_f64()
        .context("missing field liquidityUsd")?;
    let velocity = body["velocity"].as_f64().unwrap_or(0.0);

    let mut bins = HashMap::new();
    if let Some(map) = body["bins"].as_object() {
        for (bin_id, level) in map {
            let Ok(id) = bin_id.parse::<i32>() else {
                warn!(bin_id = %bin_id, "skipping non-numeric bin id");
                continue;
            };
            bins.insert(
                id,
                BinLevel {
                    liquidity: level["liquidity"].as_f64().unwrap_or(0.0),
                    swap_count: level["swapCount"].as_u64().unwrap_or(0) as u32,
                },
            );
        }
    }

    Ok(PoolSnapshot {
        fetched_at,
        active_bin,
        total_liquidity,
        liquidity_usd,
        velocity,
        bins,
    })
}
