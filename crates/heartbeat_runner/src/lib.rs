//! Runs the relay's long-lived processes side by side and shuts them down together.
//!
//! - every process gets a clone of one `CancellationToken`
//! - SIGINT / SIGTERM, or any process returning an error, cancels the token
//! - closers run after all processes stopped, bounded by a timeout
//!
//! ```no_run
//! use heartbeat_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_app_process(|ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type BoxedRun = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-lived process: receives the shared cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedRun + Send>;

/// Cleanup executed once every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedRun + Send>;

/// Why [`Runner::run_until_stopped`] returned.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process finished or the token was cancelled from outside
    Stopped,
    /// A process failed; the others were cancelled
    Failed {
        process: String,
        error: anyhow::Error,
    },
}

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds.
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Adds an unnamed process, logged as `process_<index>`.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("process_{}", self.processes.len());
        self.with_named_process(name, Box::new(move |token| Box::pin(process(token))))
    }

    /// Adds a process under a name used in shutdown and failure logs.
    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push(NamedProcess {
            name: name.into(),
            process,
        });
        self
    }

    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(move || Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to stop the runner from a test.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Do not install SIGINT / SIGTERM handlers.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run until stopped, then exit the process: code 1 if a process
    /// failed, 0 otherwise.
    pub async fn run(self) {
        match self.run_until_stopped().await {
            RunOutcome::Stopped => {
                tracing::info!("application exiting normally");
                std::process::exit(0);
            }
            RunOutcome::Failed { process, error } => {
                tracing::error!(process = %process, "application exiting with error: {:#}", error);
                std::process::exit(1);
            }
        }
    }

    /// Run every process, wait for them to stop, run the closers and report
    /// how the run ended.
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::debug!(process = %name, "starting process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut outcome = RunOutcome::Stopped;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "process completed");
                }
                Ok((name, Err(error))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, "process failed: {:#}", error);
                        outcome = RunOutcome::Failed {
                            process: name,
                            error,
                        };
                        token.cancel();
                    }
                }
                Err(join_error) => {
                    tracing::error!("process panicked: {}", join_error);
                    if !token.is_cancelled() {
                        outcome = RunOutcome::Failed {
                            process: "unknown".to_string(),
                            error: anyhow::anyhow!("process panicked: {join_error}"),
                        };
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        join_set.shutdown().await;

        run_closers(self.closers, self.closer_timeout).await;

        outcome
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                tracing::error!("error setting up SIGINT handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => {
                tracing::error!("error setting up SIGTERM handler: {}", err);
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    tracing::info!("running closers with timeout of {:?}", timeout);

    let all = async move {
        let mut closer_set = JoinSet::new();
        for closer in closers {
            closer_set.spawn(closer());
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("closer completed"),
                Ok(Err(err)) => tracing::error!("closer error: {:#}", err),
                Err(err) => tracing::error!("closer panicked: {}", err),
            }
        }
    };

    if tokio::time::timeout(timeout, all).await.is_err() {
        tracing::error!("closers timed out after {:?}", timeout);
    }
}
