//! Component F: tries a primary target then ordered alternates on
//! retriable failure (spec §4.F).

use relaygate_protocol::GatewayError;

/// One `(provider, model)` pair the driver may dispatch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub provider: String,
    pub model: String,
}

impl Target {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into() }
    }
}

/// Drives a primary target and its ordered fallbacks. Owns no dispatch
/// logic itself — `run` takes an async closure that performs one full
/// pre-hook → dispatch → post-hook attempt against a single target (spec
/// §4.F rule 3: "plugin chains run per attempt") and decides whether to
/// advance based on the attempt's `Result`.
pub struct FallbackDriver {
    targets: Vec<Target>,
}

impl FallbackDriver {
    /// `primary` plus `fallbacks` in the order they should be tried.
    pub fn new(primary: Target, fallbacks: Vec<Target>) -> Self {
        let mut targets = Vec::with_capacity(1 + fallbacks.len());
        targets.push(primary);
        targets.extend(fallbacks);
        Self { targets }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Runs `attempt` against each target in order until one succeeds, a
    /// failure disallows fallbacks, or targets are exhausted. `attempt`
    /// returns `Ok(T)` on success (`T` is typically a `GatewayResponse` or a
    /// streaming handle) or `Err(GatewayError)`; the driver inspects only the
    /// error's `allow_fallbacks` flag, never its `kind` directly — that
    /// policy decision belongs to whoever constructed the error (the worker
    /// pool for upstream failures, the governance gate for denials).
    pub async fn run<T, F, Fut>(&self, cancelled: &dyn Fn() -> bool, mut attempt: F) -> Result<(Target, T), GatewayError>
    where
        F: FnMut(&Target, usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut last_err: Option<GatewayError> = None;
        for (idx, target) in self.targets.iter().enumerate() {
            if cancelled() {
                return Err(last_err.unwrap_or_else(|| {
                    GatewayError::new(relaygate_protocol::ErrorKind::Cancelled, "cancelled between fallback attempts")
                }));
            }
            match attempt(target, idx).await {
                Ok(value) => return Ok((target.clone(), value)),
                Err(err) => {
                    let allow_fallbacks = err.allow_fallbacks;
                    let is_last = idx + 1 >= self.targets.len();
                    last_err = Some(err);
                    if !allow_fallbacks || is_last {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::new(relaygate_protocol::ErrorKind::Internal, "no fallback targets configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_protocol::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn falls_through_to_next_target_on_retriable_error() {
        let driver = FallbackDriver::new(Target::new("p1", "m"), vec![Target::new("p2", "m")]);
        let attempts = AtomicUsize::new(0);
        let result = driver
            .run(&|| false, |target, _idx| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if target.provider == "p1" {
                        Err(GatewayError::new(ErrorKind::UpstreamServerError, "boom"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        let (target, _value) = result.unwrap();
        assert_eq!(target.provider, "p2");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_when_error_disallows_fallback() {
        let driver = FallbackDriver::new(Target::new("p1", "m"), vec![Target::new("p2", "m")]);
        let attempts = AtomicUsize::new(0);
        let result: Result<(Target, ()), GatewayError> = driver
            .run(&|| false, |_target, _idx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::new(ErrorKind::BudgetExceeded, "no budget").no_fallback()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_last_error_when_all_targets_fail() {
        let driver = FallbackDriver::new(Target::new("p1", "m"), vec![Target::new("p2", "m")]);
        let result: Result<(Target, ()), GatewayError> = driver
            .run(&|| false, |target, _idx| {
                let provider = target.provider.clone();
                async move { Err(GatewayError::new(ErrorKind::UpstreamServerError, format!("{provider} down"))) }
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.message.contains("p2"));
    }
}
