//! Ordered, short-circuiting multi-step transactions.
//!
//! Modem and network configuration often needs several commands in a row
//! (TLS profile, certificate import, MQTT profile, connect). Each step runs
//! only if every earlier step succeeded; the first failure aborts the rest
//! and is reported with its 1-based step index.
//!
//! ```
//! # use corrlink_core::{Checklist, DriverError};
//! # async fn demo() -> Result<(), corrlink_core::ChecklistError> {
//! let mut tx = Checklist::new("tls setup");
//! tx.run(async { Ok::<_, DriverError>(()) }).await?;
//! tx.run(async { Ok::<_, DriverError>(()) }).await?;
//! assert_eq!(tx.completed(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! A failed transaction is never resumed: the caller starts a fresh
//! [`Checklist`] on its next attempt.

use std::future::Future;

use crate::error::{ChecklistError, DriverError};

/// Step counter for one transaction attempt.
#[derive(Debug)]
pub struct Checklist {
    name: &'static str,
    step: usize,
}

impl Checklist {
    /// Start a transaction named `name`.
    pub fn new(name: &'static str) -> Self {
        Self { name, step: 0 }
    }

    /// Transaction name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of steps started so far.
    pub fn completed(&self) -> usize {
        self.step
    }

    /// Run the next step.
    pub async fn run<T, F>(&mut self, step: F) -> Result<T, ChecklistError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        self.step += 1;
        step.await.map_err(|source| self.fail(source))
    }

    /// Record the next step from an already computed result.
    pub fn check<T>(&mut self, result: Result<T, DriverError>) -> Result<T, ChecklistError> {
        self.step += 1;
        result.map_err(|source| self.fail(source))
    }

    fn fail(&self, source: DriverError) -> ChecklistError {
        ChecklistError {
            transaction: self.name,
            step: self.step,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    async fn scripted(results: &[bool], executed: &Cell<usize>) -> Result<(), ChecklistError> {
        let mut tx = Checklist::new("scripted");
        for ok in results {
            tx.run(async {
                executed.set(executed.get() + 1);
                if *ok {
                    Ok(())
                } else {
                    Err(DriverError::Rejected("no".into()))
                }
            })
            .await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let executed = Cell::new(0);
        scripted(&[true, true, true], &executed).await.unwrap();
        assert_eq!(executed.get(), 3);
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let executed = Cell::new(0);
        let err = scripted(&[true, true, false, true, true], &executed)
            .await
            .unwrap_err();
        assert_eq!(err.step, 3);
        assert_eq!(err.transaction, "scripted");
        assert_eq!(executed.get(), 3);
    }

    #[test]
    fn check_counts_sync_steps() {
        let mut tx = Checklist::new("sync");
        tx.check(Ok::<_, DriverError>(1)).unwrap();
        let err = tx.check::<()>(Err(DriverError::Timeout)).unwrap_err();
        assert_eq!(err.step, 2);
        assert_eq!(tx.name(), "sync");
    }
}
