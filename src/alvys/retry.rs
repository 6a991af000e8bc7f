use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::{
    alvys::transport::{HttpResponse, TransportError},
    error::IngestError,
};

/// Bounded exponential backoff with jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0 for the first retry).  A server
    /// hint replaces the computed wait, capped at `max_backoff`.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_backoff);
        }
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_backoff);
        let spread = (base.as_millis() / 4) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff)
    }

    /// Call `send` until it returns a non-transient response or the attempts
    /// run out.  Exhaustion is a [`IngestError::TransientApi`].
    pub fn send<F>(&self, what: &str, mut send: F) -> Result<HttpResponse, IngestError>
    where
        F: FnMut() -> Result<HttpResponse, TransportError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (reason, hint) = match send() {
                Ok(res) if res.is_transient() => {
                    (format!("HTTP {} {}", res.status, res.snippet()), res.retry_after)
                }
                Ok(res) => return Ok(res),
                Err(e) if e.is_transient() => (e.to_string(), None),
                Err(e) => return Err(IngestError::Http(format!("{}: {}", what, e))),
            };
            if attempt >= self.max_attempts {
                return Err(IngestError::TransientApi(format!(
                    "{}: {} (gave up after {} attempts)",
                    what, reason, attempt
                )));
            }
            let wait = self.backoff(attempt - 1, hint);
            warn!(
                "{}: {}, retrying in {:?} (attempt {}/{})",
                what, reason, wait, attempt, self.max_attempts
            );
            std::thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        let first = policy.backoff(0, None);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(625));
        let third = policy.backoff(2, None);
        assert!(third >= Duration::from_millis(2000) && third <= Duration::from_millis(2500));
        assert_eq!(policy.backoff(20, None), Duration::from_secs(30));
        assert_eq!(
            policy.backoff(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.backoff(0, Some(Duration::from_secs(600))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn recovers_from_transient_failures() -> Result<(), Box<dyn std::error::Error>> {
        let calls = Cell::new(0);
        let res = fast(4).send("search", || {
            calls.set(calls.get() + 1);
            match calls.get() {
                1 => Err(TransportError::Timeout("slow".into())),
                2 => Ok(HttpResponse::new(503, "busy")),
                _ => Ok(HttpResponse::new(200, "{}")),
            }
        })?;
        assert_eq!(res.status, 200);
        assert_eq!(calls.get(), 3);
        Ok(())
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let res = fast(3).send("search", || {
            calls.set(calls.get() + 1);
            Ok(HttpResponse::new(500, "boom"))
        });
        assert!(matches!(res, Err(IngestError::TransientApi(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn rejections_are_not_retried() -> Result<(), Box<dyn std::error::Error>> {
        let calls = Cell::new(0);
        let res = fast(4).send("search", || {
            calls.set(calls.get() + 1);
            Ok(HttpResponse::new(401, "unauthorized"))
        })?;
        assert_eq!(res.status, 401);
        assert_eq!(calls.get(), 1);

        let res = fast(4).send("search", || Err(TransportError::Other("bad url".into())));
        assert!(matches!(res, Err(IngestError::Http(_))));
        Ok(())
    }
}
