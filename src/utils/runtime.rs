use anyhow::Result;

/// Runtime for the guard itself. Relevance checks are spawned onto worker threads so the tick
/// loop never waits on the network.
pub fn multi_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("focusguard-worker")
        .enable_all()
        .build()?)
}
