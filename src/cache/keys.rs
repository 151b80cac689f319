//! Cache key builders. Every key lives under one namespace so operators can
//! scan and invalidate safely.

const NAMESPACE: &str = "harambee";

/// Gateway bearer token, keyed by consumer key so rotated credentials never
/// read a stale entry.
pub fn gateway_token(consumer_key: &str) -> String {
    format!("{}:mpesa:token:{}", NAMESPACE, consumer_key)
}
