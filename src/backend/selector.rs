//! Least-busy backend selection (spec §4.2).
//!
//! Grounded on `BridgeServer.get_not_busy_server_address` in
//! `bridge_server/server.py`: for each configured backend, GET `/queue`,
//! sum the lengths of every array in the response, and pick the backend
//! with the smallest total. No caching — every allocation re-polls every
//! backend. Ties are broken by configuration order (`min` over an index
//! keeps the first minimum encountered).

use tracing::warn;

use crate::error::ServerError;

use super::client::BackendClient;

/// Picks the least-busy backend out of a fixed, ordered address list.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    addresses: Vec<String>,
}

impl BackendSelector {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Sum the lengths of every queue array at `address`. Returns `None`
    /// if the backend didn't respond or returned an unparsable body.
    async fn queue_depth(client: &BackendClient, address: &str) -> Option<usize> {
        match client.get_queue_state(address).await {
            Ok(value) => Some(sum_array_lengths(&value)),
            Err(e) => {
                warn!(address, error = %e, "backend unreachable during selection");
                None
            }
        }
    }

    /// Pick the backend with the lowest summed queue depth. Fails with
    /// [`ServerError::NoBackend`] if every configured backend is
    /// unreachable, or if none are configured at all.
    pub async fn pick_least_busy(&self, client: &BackendClient) -> Result<String, ServerError> {
        let mut best: Option<(usize, usize)> = None; // (index, depth)

        for (index, address) in self.addresses.iter().enumerate() {
            if let Some(depth) = Self::queue_depth(client, address).await {
                match best {
                    Some((_, best_depth)) if depth >= best_depth => {}
                    _ => best = Some((index, depth)),
                }
            }
        }

        best.map(|(index, _)| self.addresses[index].clone())
            .ok_or(ServerError::NoBackend)
    }
}

/// Sum the lengths of every JSON array found anywhere in `value`'s top
/// level object values (matches the Python's `sum(len(v) for v in
/// data.values())` over the `/queue` response shape
/// `{"queue_running": [...], "queue_pending": [...]}`).
pub(crate) fn sum_array_lengths(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => map
            .values()
            .map(|v| match v {
                serde_json::Value::Array(arr) => arr.len(),
                _ => 0,
            })
            .sum(),
        serde_json::Value::Array(arr) => arr.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sums_queue_arrays() {
        let value = serde_json::json!({
            "queue_running": [1, 2],
            "queue_pending": [1, 2, 3],
        });
        assert_eq!(sum_array_lengths(&value), 5);
    }

    #[test]
    fn empty_queue_is_zero() {
        let value = serde_json::json!({"queue_running": [], "queue_pending": []});
        assert_eq!(sum_array_lengths(&value), 0);
    }
}
