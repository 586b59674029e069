use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ExecOptions;
use crate::error::SqlGatewayError;

/// Deadline and cancellation for one logical operation, fixed when it starts.
#[derive(Debug, Clone)]
pub(crate) struct OpGuard {
    expires: Option<(Instant, Duration)>,
    cancel: CancellationToken,
}

impl OpGuard {
    pub(crate) fn start(options: &ExecOptions) -> Self {
        Self {
            expires: options.deadline.map(|d| (Instant::now() + d, d)),
            cancel: options.cancel.clone().unwrap_or_default(),
        }
    }

    /// Fail fast if the operation is already past its deadline or cancelled.
    pub(crate) fn check(&self) -> Result<(), SqlGatewayError> {
        if self.cancel.is_cancelled() {
            return Err(SqlGatewayError::Cancelled);
        }
        match self.expires {
            Some((at, budget)) if Instant::now() >= at => {
                Err(SqlGatewayError::DeadlineExceeded(budget))
            }
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it finishes, the deadline passes or the token fires.
    pub(crate) async fn run<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<SqlGatewayError>,
    {
        self.check().map_err(E::from)?;
        let expiry = async {
            match self.expires {
                Some((at, budget)) => {
                    tokio::time::sleep_until(at).await;
                    SqlGatewayError::DeadlineExceeded(budget)
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(E::from(SqlGatewayError::Cancelled)),
            err = expiry => Err(E::from(err)),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_results_without_limits() {
        let guard = OpGuard::start(&ExecOptions::default());
        let res: Result<u8, SqlGatewayError> = guard.run(async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn expires_slow_futures() {
        let guard = OpGuard::start(&ExecOptions::default().with_deadline(Duration::from_millis(50)));
        let res: Result<(), SqlGatewayError> = guard
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(SqlGatewayError::DeadlineExceeded(d)) if d == Duration::from_millis(50)));
        assert!(guard.check().is_err());
    }

    #[tokio::test]
    async fn honours_cancellation() {
        let token = CancellationToken::new();
        let guard = OpGuard::start(&ExecOptions::default().with_cancel(token.clone()));
        token.cancel();
        let res: Result<(), SqlGatewayError> = guard.run(std::future::pending()).await;
        assert!(matches!(res, Err(SqlGatewayError::Cancelled)));
    }
}
