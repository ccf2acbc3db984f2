use anyhow::Result;
use tokio::signal;

/// Waits for Ctrl+C, or SIGTERM on unix.
///
/// # Errors
/// Returns an error if a handler cannot be installed.
pub async fn wait_for_interrupt() -> Result<()> {
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            tracing::debug!("received Ctrl+C");
        }
        result = wait_sigterm() => {
            result?;
            tracing::debug!("received SIGTERM");
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_sigterm() -> Result<()> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    handler.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_sigterm() -> Result<()> {
    std::future::pending::<Result<()>>().await
}
