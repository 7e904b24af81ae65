use std::{future::Future, time::Duration};

use log::*;

use crate::traits::PaymentGatewayError;

/// Runs `op` until it succeeds, fails with a non-transient error, or `attempts` runs have failed transiently.
/// The wait between attempts grows linearly with the attempt number. A spent budget is reported as `Exhausted`.
pub async fn with_retries<T, F, Fut>(
    label: &str,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, PaymentGatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PaymentGatewayError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!("🔄️ {label} hit a transient error on attempt {attempt}/{attempts}: {e}. Retrying.");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            },
            Err(e) if e.is_transient() => {
                warn!("🔄️ {label} still failing after {attempts} attempts: {e}");
                return Err(PaymentGatewayError::Exhausted(format!("{label} failed {attempts} times. Last error: {e}")));
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_transient_errors_only() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(PaymentGatewayError::Transient("busy".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test", 3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PaymentGatewayError::ValidationError("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(PaymentGatewayError::ValidationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test", 3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PaymentGatewayError::Transient("busy".into()))
        })
        .await;
        assert!(matches!(result, Err(PaymentGatewayError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
