//! Process-wide browser lifecycle.
//!
//! [`BrowserManager`] owns at most one live browser instance. The first
//! [`acquire`](BrowserManager::acquire) launches it according to the
//! configured mode; later calls share it. Launch is serialised behind an
//! async mutex, so concurrent first callers wait for the single launch in
//! flight and receive the same instance. An instance the launcher reports as
//! dead is shut down and relaunched. [`release`](BrowserManager::release)
//! shuts it down and is safe to call at any time.
//!
//! How a browser is actually started is abstracted by [`BrowserLauncher`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::BrowserMode;
use crate::error::AppError;

/// Where the live browser runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Docker,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Docker => write!(f, "docker"),
        }
    }
}

/// Mode selection state. `AutoResolving` becomes `Local` or `Docker` at the
/// first successful launch and stays that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    Local,
    Docker,
    AutoResolving,
}

impl From<BrowserMode> for ModeSelection {
    fn from(mode: BrowserMode) -> Self {
        match mode {
            BrowserMode::Local => ModeSelection::Local,
            BrowserMode::Docker => ModeSelection::Docker,
            BrowserMode::Auto => ModeSelection::AutoResolving,
        }
    }
}

impl From<ExecutionMode> for ModeSelection {
    fn from(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Local => ModeSelection::Local,
            ExecutionMode::Docker => ModeSelection::Docker,
        }
    }
}

/// Starts and stops concrete browser instances.
pub trait BrowserLauncher: Send + Sync {
    type Instance: Send + Sync + 'static;

    /// Whether the environment permits a local launch at all.
    fn local_allowed(&self) -> bool {
        true
    }

    fn launch_local(&self) -> impl Future<Output = Result<Self::Instance, AppError>> + Send;

    fn launch_docker(&self) -> impl Future<Output = Result<Self::Instance, AppError>> + Send;

    /// Whether a previously launched instance can still serve pages. A dead
    /// instance is shut down and replaced on the next acquire.
    fn is_alive(&self, _instance: &Self::Instance) -> bool {
        true
    }

    /// Tear down an instance. Must not fail; problems are logged.
    fn shutdown(&self, instance: Arc<Self::Instance>) -> impl Future<Output = ()> + Send;
}

/// Shared reference to the live browser.
pub struct BrowserHandle<I> {
    instance: Arc<I>,
    mode: ExecutionMode,
}

impl<I> Clone for BrowserHandle<I> {
    fn clone(&self) -> Self {
        Self {
            instance: Arc::clone(&self.instance),
            mode: self.mode,
        }
    }
}

impl<I> BrowserHandle<I> {
    pub fn instance(&self) -> &I {
        &self.instance
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

struct ManagerState<I> {
    selection: ModeSelection,
    active: Option<BrowserHandle<I>>,
}

/// Lazily launched, lock-guarded singleton browser.
pub struct BrowserManager<L: BrowserLauncher> {
    launcher: L,
    launch_timeout: Duration,
    state: Mutex<ManagerState<L::Instance>>,
}

impl<L: BrowserLauncher> BrowserManager<L> {
    pub fn new(launcher: L, mode: BrowserMode, launch_timeout: Duration) -> Self {
        Self {
            launcher,
            launch_timeout,
            state: Mutex::new(ManagerState {
                selection: mode.into(),
                active: None,
            }),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Return the live browser, launching it first if needed.
    pub async fn acquire(&self) -> Result<BrowserHandle<L::Instance>, AppError> {
        let mut state = self.state.lock().await;
        if let Some(handle) = &state.active
            && self.launcher.is_alive(&handle.instance)
        {
            return Ok(handle.clone());
        }
        if let Some(dead) = state.active.take() {
            tracing::warn!(mode = %dead.mode, "Browser instance died, relaunching");
            self.launcher.shutdown(dead.instance).await;
        }

        let (instance, mode) = match state.selection {
            ModeSelection::Local => (self.launch(ExecutionMode::Local).await?, ExecutionMode::Local),
            ModeSelection::Docker => (
                self.launch(ExecutionMode::Docker).await?,
                ExecutionMode::Docker,
            ),
            ModeSelection::AutoResolving => self.launch_auto().await?,
        };

        tracing::info!(%mode, "Browser launched");
        state.selection = mode.into();
        let handle = BrowserHandle {
            instance: Arc::new(instance),
            mode,
        };
        state.active = Some(handle.clone());
        Ok(handle)
    }

    /// Shut down the live browser, if any.
    pub async fn release(&self) {
        let active = self.state.lock().await.active.take();
        if let Some(handle) = active {
            tracing::info!(mode = %handle.mode, "Releasing browser");
            self.launcher.shutdown(handle.instance).await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// The mode in effect, once resolved.
    pub async fn resolved_mode(&self) -> Option<ExecutionMode> {
        match self.state.lock().await.selection {
            ModeSelection::Local => Some(ExecutionMode::Local),
            ModeSelection::Docker => Some(ExecutionMode::Docker),
            ModeSelection::AutoResolving => None,
        }
    }

    async fn launch_auto(&self) -> Result<(L::Instance, ExecutionMode), AppError> {
        if !self.launcher.local_allowed() {
            tracing::info!("Local browser disallowed by environment, using docker");
            let instance = self.launch(ExecutionMode::Docker).await?;
            return Ok((instance, ExecutionMode::Docker));
        }

        match self.launch(ExecutionMode::Local).await {
            Ok(instance) => Ok((instance, ExecutionMode::Local)),
            Err(local_err) => {
                tracing::warn!(error = %local_err, "Local browser launch failed, falling back to docker");
                match self.launch(ExecutionMode::Docker).await {
                    Ok(instance) => Ok((instance, ExecutionMode::Docker)),
                    Err(docker_err) => Err(AppError::BrowserLaunchError(format!(
                        "local: {local_err}; docker: {docker_err}"
                    ))),
                }
            }
        }
    }

    async fn launch(&self, mode: ExecutionMode) -> Result<L::Instance, AppError> {
        let launch = async {
            match mode {
                ExecutionMode::Local => self.launcher.launch_local().await,
                ExecutionMode::Docker => self.launcher.launch_docker().await,
            }
        };

        match tokio::time::timeout(self.launch_timeout, launch).await {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(AppError::BrowserLaunchError(msg))) => Err(AppError::BrowserLaunchError(msg)),
            Ok(Err(e)) => Err(AppError::BrowserLaunchError(format!("{mode}: {e}"))),
            Err(_) => Err(AppError::BrowserLaunchError(format!(
                "{mode} launch timed out after {} ms",
                self.launch_timeout.as_millis()
            ))),
        }
    }
}
