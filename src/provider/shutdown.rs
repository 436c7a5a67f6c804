//! Process-wide interrupt handling.
//!
//! The first registered provider starts a single listener thread for
//! SIGINT and SIGTERM. The thread drives its own current-thread runtime,
//! so it outlives whichever runtime constructed that provider. Every
//! provider registers its process table here; on signal all live tables
//! are torn down and the process exits.

use super::process_table::ProcessTable;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

static LISTENERS_STARTED: AtomicUsize = AtomicUsize::new(0);

static LIVE_TABLES: parking_lot::Mutex<Vec<Weak<ProcessTable>>> =
    parking_lot::const_mutex(Vec::new());

/// Register `table` for teardown on interrupt, installing the listener on
/// first use.
pub(crate) fn register(table: &Arc<ProcessTable>) {
    {
        let mut tables = LIVE_TABLES.lock();
        tables.retain(|t| t.strong_count() > 0);
        tables.push(Arc::downgrade(table));
    }
    install_once();
}

/// Whether the process-wide listener has been installed.
pub fn hook_installed() -> bool {
    HOOK_INSTALLED.load(Ordering::SeqCst)
}

/// Number of listener threads started in this process.
pub fn listener_count() -> usize {
    LISTENERS_STARTED.load(Ordering::SeqCst)
}

fn install_once() {
    if HOOK_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            HOOK_INSTALLED.store(false, Ordering::SeqCst);
            tracing::warn!("Could not build runtime for interrupt handler: {}", e);
            return;
        }
    };

    // Signal streams must be registered before a signal can arrive, so the
    // thread only reports back once they exist.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("stack-signals".to_string())
        .spawn(move || runtime.block_on(listen(ready_tx)));

    match spawned {
        Ok(_) => {
            LISTENERS_STARTED.fetch_add(1, Ordering::SeqCst);
            let _ = ready_rx.recv();
            tracing::debug!("Installed interrupt handler for worker teardown");
        }
        Err(e) => {
            HOOK_INSTALLED.store(false, Ordering::SeqCst);
            tracing::warn!("Could not start interrupt handler thread: {}", e);
        }
    }
}

async fn listen(ready: std::sync::mpsc::Sender<()>) {
    let (name, code) = wait_for_signal(ready).await;
    tracing::info!("Received {}, stopping workers", name);
    let stopped = terminate_all_registered().await;
    tracing::info!("Stopped {} worker(s)", stopped);
    std::process::exit(code);
}

async fn wait_for_signal(ready: std::sync::mpsc::Sender<()>) -> (&'static str, i32) {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt());
    let sigterm = signal(SignalKind::terminate());
    let _ = ready.send(());

    match (sigint, sigterm) {
        (Ok(mut sigint), Ok(mut sigterm)) => tokio::select! {
            _ = sigint.recv() => ("SIGINT", 130),
            _ = sigterm.recv() => ("SIGTERM", 143),
        },
        (Ok(mut sigint), Err(e)) => {
            tracing::warn!("Could not listen for SIGTERM: {}", e);
            sigint.recv().await;
            ("SIGINT", 130)
        }
        (Err(e), Ok(mut sigterm)) => {
            tracing::warn!("Could not listen for SIGINT: {}", e);
            sigterm.recv().await;
            ("SIGTERM", 143)
        }
        (Err(e), Err(_)) => {
            tracing::warn!("Could not listen for interrupts: {}", e);
            std::future::pending().await
        }
    }
}

/// Tear down every registered table that is still alive. Returns the
/// number of workers stopped.
pub async fn terminate_all_registered() -> usize {
    let tables: Vec<Arc<ProcessTable>> = LIVE_TABLES
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .collect();

    let mut stopped = 0;
    for table in tables {
        stopped += table.terminate_all().await;
    }
    stopped
}
