//! First-success selection over an ordered list of candidates.
//!
//! Used for both the embedding model and the language model: each candidate
//! is initialized (and probed) in preference order, failures are logged, and
//! the first one that comes up is used.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tracing::{info, warn};

/// One failed candidate.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub candidate: String,
    pub error: String,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.error)
    }
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no candidates configured")]
    Empty,
    #[error("all {} candidates failed: {}", .attempts.len(), join_attempts(.attempts))]
    Exhausted { attempts: Vec<Attempt> },
}

fn join_attempts(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Initialize candidates in order and return the first that succeeds,
/// together with its position in `candidates`.
pub async fn select_first<C, T, F, Fut>(
    candidates: &[C],
    mut init: F,
) -> Result<(usize, T), SelectError>
where
    C: fmt::Display,
    F: FnMut(&C) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if candidates.is_empty() {
        return Err(SelectError::Empty);
    }

    let mut attempts = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        match init(candidate).await {
            Ok(value) => {
                info!(candidate = %candidate, position = i, "candidate selected");
                return Ok((i, value));
            }
            Err(e) => {
                warn!(candidate = %candidate, error = %e, "candidate failed, trying next");
                attempts.push(Attempt {
                    candidate: candidate.to_string(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Err(SelectError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[tokio::test]
    async fn test_first_success_wins() {
        let names = ["a", "b", "c"];
        let (i, v) = select_first(&names, |n| {
            let n = n.to_string();
            async move {
                if n == "a" {
                    bail!("down");
                }
                Ok::<_, anyhow::Error>(n.to_uppercase())
            }
        })
        .await
        .unwrap();
        assert_eq!(i, 1);
        assert_eq!(v, "B");
    }

    #[tokio::test]
    async fn test_later_candidates_not_tried() {
        let names = ["a", "b"];
        let mut tried = Vec::new();
        select_first(&names, |n| {
            tried.push(n.to_string());
            async { Ok::<_, anyhow::Error>(()) }
        })
        .await
        .unwrap();
        assert_eq!(tried, vec!["a"]);
    }

    #[tokio::test]
    async fn test_exhausted_lists_attempts() {
        let names = ["x", "y"];
        let err = select_first(&names, |n| {
            let n = n.to_string();
            async move { Err::<(), _>(anyhow::anyhow!("{} unavailable", n)) }
        })
        .await
        .unwrap_err();
        match &err {
            SelectError::Exhausted { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("x: x unavailable"));
        assert!(msg.contains("y: y unavailable"));
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let names: [&str; 0] = [];
        let err = select_first(&names, |_| async { Ok::<_, anyhow::Error>(()) }).await.unwrap_err();
        assert!(matches!(err, SelectError::Empty));
    }
}
