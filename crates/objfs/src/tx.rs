// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Transaction retry

use crate::error::{Error, Result};
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use futures::future::BoxFuture;
use objstore::{ObjectStore, Tx};
use std::time::Duration;

/// Attempts made before a conflicting operation gives up with `Busy`.
pub const MAX_TX_ATTEMPTS: usize = 16;

fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(100))
        .with_max_times(MAX_TX_ATTEMPTS - 1)
        .with_jitter()
}

async fn attempt<'a, T, F>(store: &'a dyn ObjectStore, op: &F) -> Result<T>
where
    F: Fn(Tx) -> BoxFuture<'a, Result<T>>,
{
    let tx = store.tx_open().await?;
    match op(tx).await {
        Ok(value) => {
            store.tx_commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            // The operation's error wins over a failed abort.
            if let Err(abort) = store.tx_abort(tx).await {
                let reason = abort.to_string();
                warn!("Transaction abort failed: {reason}", reason: reason);
            }
            Err(err)
        }
    }
}

/// Runs `op` inside a transaction, re-running all of it when the commit
/// reports a conflict.
///
/// `op` is called once per attempt with a fresh transaction handle and
/// must not keep state across calls. Any other error aborts the
/// transaction and is returned as is.
pub async fn run_in_tx<'a, T, F>(store: &'a dyn ObjectStore, op: F) -> Result<T>
where
    F: Fn(Tx) -> BoxFuture<'a, Result<T>>,
{
    let result = (|| attempt(store, &op))
        .retry(backoff())
        .when(Error::is_restart)
        .notify(|_err: &Error, wait: Duration| {
            let wait_ms = wait.as_millis() as u64;
            warn!("Transaction conflict, restarting in {wait_ms}ms", wait_ms: wait_ms);
        })
        .await;

    match result {
        Err(err) if err.is_restart() => Err(Error::busy(format!(
            "transaction still conflicting after {MAX_TX_ATTEMPTS} attempts"
        ))),
        other => other,
    }
}
