//! Single-authority submission queue
//!
//! Every privileged transaction is signed by one authority account, and
//! the chain orders that account's transactions by a strictly increasing
//! sequence number. Concurrent submissions from the same authority
//! collide, so all writes drain through one task holding the signing
//! client: a bounded mpsc queue in, one submission in flight at a time,
//! oneshot replies out. Transient node failures are retried with
//! bounded exponential backoff; reverts are returned immediately.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use campuscoin_core::{AccountAddress, TransactionSignature};

use crate::{ChainClient, ChainError, Result};

/// Retry attempts per job for `Unavailable` failures
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff; doubles per attempt
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A unit of authority-signed work
#[derive(Debug, Clone)]
pub enum ChainJob {
    Mint {
        to: AccountAddress,
        base_units: u64,
    },
    GrantStudentRole {
        address: AccountAddress,
    },
    RevokeStudentRole {
        address: AccountAddress,
    },
    CompleteActivity {
        address: AccountAddress,
        chain_activity_id: u64,
    },
    BatchCompleteActivity {
        addresses: Vec<AccountAddress>,
        chain_activity_id: u64,
    },
}

type Reply = oneshot::Sender<Result<TransactionSignature>>;

/// Handle for submitting authority-signed jobs.
///
/// Cheap to clone. `submit` applies backpressure when the queue is full
/// rather than dropping work.
#[derive(Clone)]
pub struct SubmitterHandle {
    tx: mpsc::Sender<(ChainJob, Reply)>,
}

impl SubmitterHandle {
    /// Enqueue a job and wait for its on-chain outcome
    pub async fn submit(&self, job: ChainJob) -> Result<TransactionSignature> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((job, reply_tx))
            .await
            .map_err(|_| ChainError::Unavailable("authority submitter stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ChainError::Unavailable("authority submitter dropped job".to_string()))?
    }
}

/// Spawn the authority submitter task over a signing chain client.
///
/// `queue_depth` bounds the number of settlement attempts waiting on the
/// authority account.
pub fn spawn_authority_submitter(client: ChainClient, queue_depth: usize) -> SubmitterHandle {
    let (tx, mut rx) = mpsc::channel::<(ChainJob, Reply)>(queue_depth);

    tokio::spawn(async move {
        while let Some((job, reply)) = rx.recv().await {
            let result = run_with_retry(&client, &job).await;
            // Caller may have given up waiting; nothing to do then
            let _ = reply.send(result);
        }
        debug!("Authority submitter shutting down");
    });

    SubmitterHandle { tx }
}

async fn run_with_retry(client: &ChainClient, job: &ChainJob) -> Result<TransactionSignature> {
    let mut backoff = BACKOFF_BASE;
    let mut attempt = 1;
    loop {
        match run_job(client, job).await {
            Ok(sig) => return Ok(sig),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    "Chain submission attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, MAX_ATTEMPTS, e, backoff,
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_job(client: &ChainClient, job: &ChainJob) -> Result<TransactionSignature> {
    match job {
        ChainJob::Mint { to, base_units } => client.mint(to, *base_units).await,
        ChainJob::GrantStudentRole { address } => client.add_student(address).await,
        ChainJob::RevokeStudentRole { address } => client.remove_student(address).await,
        ChainJob::CompleteActivity { address, chain_activity_id } => {
            client.complete_activity(address, *chain_activity_id).await
        }
        ChainJob::BatchCompleteActivity { addresses, chain_activity_id } => {
            client.batch_complete_activity(addresses, *chain_activity_id).await
        }
    }
}
