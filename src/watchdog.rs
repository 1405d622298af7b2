// src/watchdog.rs
// Deadline wrapper around individual extraction attempts. A hung OCR
// call must never stall the whole pipeline cycle.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run the operation under a deadline. Expiry is an ordinary failure,
/// surfaced to the caller and counted against the success rate like any
/// other.
pub async fn with_deadline<T, F>(name: &str, deadline: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = name, ?deadline, "operation exceeded deadline");
            Err(anyhow!("{} exceeded deadline of {:?}", name, deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let result =
            with_deadline("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let result = with_deadline("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(7)
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn test_inner_error_propagates() {
        let result: Result<()> = with_deadline("failing", Duration::from_secs(1), async {
            Err(anyhow!("backend offline"))
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("backend offline"));
    }
}
