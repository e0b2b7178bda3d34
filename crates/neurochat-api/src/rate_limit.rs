// Rate limiter
//
// Fixed-window counters in redis, keyed `rate_limit:<user_sub>:<route>`.
// First hit sets the key with the window TTL; later hits increment; at the
// limit the request is denied with the remaining TTL. Without a configured
// store everything is admitted and headers carry -1 sentinels.

use redis::AsyncCommands;

/// Snapshot of one route's counters for a user
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct RateLimitInfo {
    pub limit: i64,
    pub remaining: i64,
    /// Seconds until the window resets; None when no window is running
    pub reset_in: Option<i64>,
}

/// Values for the X-RateLimit-* response headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: i64,
    pub remaining: i64,
    pub reset: Option<i64>,
}

impl RateLimitHeaders {
    pub fn new(limit: i64, remaining: i64, reset: Option<i64>) -> Self {
        Self {
            limit,
            remaining,
            reset,
        }
    }

    /// Sentinels used when no store is configured
    pub fn unlimited() -> Self {
        Self::new(-1, -1, Some(-1))
    }

    pub fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.unwrap_or(-1).to_string()),
        ]
    }

    pub fn exposed_names() -> String {
        "x-ratelimit-limit,x-ratelimit-remaining,x-ratelimit-reset".to_string()
    }
}

/// Shared rate limiter over the redis store
#[derive(Clone)]
pub struct RateLimiter {
    client: Option<redis::aio::ConnectionManager>,
    disabled: bool,
}

impl RateLimiter {
    pub fn new(client: Option<redis::aio::ConnectionManager>, disabled: bool) -> Self {
        Self { client, disabled }
    }

    /// Limiter that admits everything (no store configured)
    pub fn unlimited() -> Self {
        Self {
            client: None,
            disabled: true,
        }
    }

    fn key(user_sub: &str, route: &str) -> String {
        format!("rate_limit:{user_sub}:{route}")
    }

    /// Admit or reject one request. Returns the headers to attach either way
    /// and whether the caller is over the limit.
    pub async fn check(
        &self,
        route: &str,
        user_sub: &str,
        limit: i64,
        expiry: u64,
    ) -> anyhow::Result<(RateLimitHeaders, bool)> {
        let Some(client) = &self.client else {
            return Ok((RateLimitHeaders::unlimited(), false));
        };
        if self.disabled {
            return Ok((RateLimitHeaders::unlimited(), false));
        }

        let mut con = client.clone();
        let key = Self::key(user_sub, route);

        let current: Option<i64> = con.get(&key).await?;
        match current {
            None => {
                let _: () = con.set_ex(&key, 1, expiry).await?;
                Ok((
                    RateLimitHeaders::new(limit, limit - 1, Some(expiry as i64)),
                    false,
                ))
            }
            Some(count) if count < limit => {
                let count: i64 = con.incr(&key, 1).await?;
                let pttl: i64 = con.pttl(&key).await?;
                Ok((
                    RateLimitHeaders::new(
                        limit,
                        (limit - count).max(0),
                        Some(millis_to_seconds(pttl)),
                    ),
                    false,
                ))
            }
            Some(_) => {
                let pttl: i64 = con.pttl(&key).await?;
                Ok((
                    RateLimitHeaders::new(limit, 0, Some(millis_to_seconds(pttl))),
                    true,
                ))
            }
        }
    }

    /// Read one route's counters without consuming quota
    pub async fn snapshot(
        &self,
        route: &str,
        user_sub: &str,
        limit: i64,
    ) -> anyhow::Result<RateLimitInfo> {
        let Some(client) = &self.client else {
            return Ok(RateLimitInfo {
                limit: -1,
                remaining: -1,
                reset_in: Some(-1),
            });
        };
        if self.disabled {
            return Ok(RateLimitInfo {
                limit: -1,
                remaining: -1,
                reset_in: Some(-1),
            });
        }

        let mut con = client.clone();
        let key = Self::key(user_sub, route);

        let count: Option<i64> = con.get(&key).await?;
        let pttl: i64 = con.pttl(&key).await?;

        Ok(parse_counters(limit, count, pttl))
    }
}

/// Turn raw store values into a user-facing snapshot
pub fn parse_counters(limit: i64, count: Option<i64>, pttl_ms: i64) -> RateLimitInfo {
    let used = count.unwrap_or(0);
    RateLimitInfo {
        limit,
        remaining: (limit - used).max(0),
        reset_in: (pttl_ms >= 0).then(|| millis_to_seconds(pttl_ms)),
    }
}

fn millis_to_seconds(pttl_ms: i64) -> i64 {
    if pttl_ms < 0 {
        return pttl_ms;
    }
    ((pttl_ms as f64) / 1000.0).round() as i64
}
