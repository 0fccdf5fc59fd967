use {
    crate::domain::{
        error::PipelineError,
        hooks::{HookJob, HookKind, PaymentHooks},
        repository::PaymentRepository,
    },
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

const BATCH_SIZE: i64 = 10;

/// Poll for due hook jobs and deliver them until shutdown.
pub async fn run_worker(
    repo: Arc<dyn PaymentRepository>,
    hooks: Arc<dyn PaymentHooks>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("hook worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("hook worker shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }

        if let Err(e) = poll_once(&*repo, &*hooks).await {
            tracing::error!(error = %e, "worker poll error");
        }
    }
}

async fn deliver(hooks: &dyn PaymentHooks, job: &HookJob) -> Result<(), PipelineError> {
    let order = &job.payload.order;
    let payment = &job.payload.payment;
    match job.kind {
        HookKind::PaymentConfirmed => hooks.on_confirmed(order, payment).await,
        HookKind::PaymentRefunded => hooks.on_refunded(order, payment, job.amount).await,
    }
}

/// Claims one batch and delivers it. Returns how many jobs were delivered.
pub async fn poll_once(
    repo: &dyn PaymentRepository,
    hooks: &dyn PaymentHooks,
) -> Result<usize, PipelineError> {
    let jobs = repo.claim_hooks(BATCH_SIZE).await?;
    let mut delivered = 0;

    for job in jobs {
        match deliver(hooks, &job).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, kind = %job.kind, "hook delivered");
                repo.complete_hook(job.id).await?;
                delivered += 1;
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempts = job.attempts + 1,
                    error = %e,
                    "hook failed, scheduling retry"
                );
                repo.fail_hook(job.id, &e.to_string()).await?;
            }
        }
    }

    Ok(delivered)
}

/// Periodically reset hook jobs stuck in 'processing' back to 'pending'.
pub async fn run_reaper(repo: Arc<dyn PaymentRepository>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("stale hook reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("stale hook reaper shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }

        match repo.reap_stale_hooks().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped stale hook jobs"),
            Err(e) => tracing::error!(error = %e, "reaper error"),
        }
    }
}
