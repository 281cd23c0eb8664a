//! Races a unit of work against an optional deadline.

use std::{future::Future, time::Duration};

/// The deadline fired before the work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline elapsed after {}ms", .after.as_millis())]
pub struct DeadlineElapsed {
    pub after: Duration,
}

/// Await `work`, giving up once `deadline` has passed.
///
/// A `None` or zero deadline means no deadline at all. Whichever side loses the race is
/// dropped: the sleep when the work finishes first, the work future when the deadline fires.
/// Pass `&mut` to something that outlives the race (a `JoinHandle`, for instance) to keep
/// hold of work that missed its deadline.
pub async fn with_deadline<F>(
    deadline: Option<Duration>,
    work: F,
) -> Result<F::Output, DeadlineElapsed>
where
    F: Future,
{
    let deadline = match deadline {
        Some(d) if !d.is_zero() => d,
        _ => return Ok(work.await),
    };

    tokio::select! {
        biased;
        output = work => Ok(output),
        _ = tokio::time::sleep(deadline) => Err(DeadlineElapsed { after: deadline }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn no_deadline_waits_for_completion() {
        let output = with_deadline(None, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            7
        })
        .await;
        assert_eq!(output, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadline_is_no_deadline() {
        let output = with_deadline(Some(Duration::ZERO), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "done"
        })
        .await;
        assert_eq!(output, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_work_beats_deadline() {
        let output = with_deadline(Some(Duration::from_millis(500)), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<(), &str>("handler error")
        })
        .await;
        assert_eq!(output, Ok(Err("handler error")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_times_out() {
        let started = tokio::time::Instant::now();
        let output = with_deadline(
            Some(Duration::from_millis(500)),
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(
            output,
            Err(DeadlineElapsed {
                after: Duration::from_millis(500)
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
