//! 后台工作线程：承载引擎的单线程运行时，并在公共通道与引擎的
//! 内部通道之间转发命令与更新。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{
    api::{
        DiagnosticInfo, EngineCommand, EngineConfig, EngineUpdate, MediaSnapshot, SessionInfo,
        SessionSet, SettingsSnapshot, StateChanges, UiState,
    },
    engine,
    error::{EngineError, Result},
};

/// 转发给引擎的内部命令（公共 [`EngineCommand`] 去掉 `Shutdown` 后的镜像）。
pub(crate) enum InternalCommand {
    RefreshSessions,
    SetLaunchHint(String),
    UpdateSettings(SettingsSnapshot),
    SetMinimized(bool),
    SetMouseOver(bool),
    MediaChanged(String),
    LaunchApp,
    RequestStateUpdate,
}

/// 引擎产生的内部更新，在 worker 边界转换为公共 [`EngineUpdate`]。
pub(crate) enum InternalUpdate {
    SessionsChanged(Vec<SessionInfo>),
    SelectionChanged(Option<SessionInfo>),
    MediaChanged(MediaSnapshot),
    StateChanged {
        state: UiState,
        changes: StateChanges,
    },
    ShowChooser,
    LaunchAppRequested(String),
    Diagnostic(DiagnosticInfo),
}

impl From<InternalUpdate> for EngineUpdate {
    fn from(update: InternalUpdate) -> Self {
        match update {
            InternalUpdate::SessionsChanged(sessions) => Self::SessionsChanged(sessions),
            InternalUpdate::SelectionChanged(selection) => Self::SelectionChanged(selection),
            InternalUpdate::MediaChanged(snapshot) => Self::MediaChanged(snapshot),
            InternalUpdate::StateChanged { state, changes } => {
                Self::StateChanged { state, changes }
            }
            InternalUpdate::ShowChooser => Self::ShowChooser,
            InternalUpdate::LaunchAppRequested(app_id) => Self::LaunchAppRequested(app_id),
            InternalUpdate::Diagnostic(info) => Self::Diagnostic(info),
        }
    }
}

struct EngineWorker {
    command_rx: mpsc::Receiver<EngineCommand>,
    update_tx: mpsc::Sender<EngineUpdate>,
    engine_control_tx: Option<mpsc::Sender<InternalCommand>>,
    engine_update_rx: mpsc::Receiver<InternalUpdate>,
    engine_shutdown_tx: Option<oneshot::Sender<()>>,
}

impl EngineWorker {
    async fn main_event_loop(&mut self) {
        loop {
            tokio::select! {
                biased;

                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(EngineCommand::Shutdown) => {
                            log::info!("[后台线程] 收到关闭命令。");
                            self.shutdown_engine();
                            break;
                        }
                        Some(command) => self.dispatch_command(command).await,
                        None => {
                            log::info!("[后台线程] 控制器已被丢弃，关闭引擎。");
                            self.shutdown_engine();
                            break;
                        }
                    }
                }

                maybe_update = self.engine_update_rx.recv() => {
                    match maybe_update {
                        Some(update) => {
                            if self.update_tx.send(update.into()).await.is_err() {
                                log::warn!("[后台线程] 更新接收端已被丢弃，关闭引擎。");
                                self.shutdown_engine();
                                break;
                            }
                        }
                        None => {
                            log::info!("[后台线程] 引擎已停止产生更新，退出。");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_command(&self, command: EngineCommand) {
        let internal = match command {
            EngineCommand::SessionsChanged => InternalCommand::RefreshSessions,
            EngineCommand::SetLaunchHint(hint) => InternalCommand::SetLaunchHint(hint),
            EngineCommand::UpdateSettings(settings) => InternalCommand::UpdateSettings(settings),
            EngineCommand::SetMinimized(minimized) => InternalCommand::SetMinimized(minimized),
            EngineCommand::SetMouseOver(mouse_over) => InternalCommand::SetMouseOver(mouse_over),
            EngineCommand::MediaChanged(app_id) => InternalCommand::MediaChanged(app_id),
            EngineCommand::LaunchCurrentSessionApp => InternalCommand::LaunchApp,
            EngineCommand::RequestStateUpdate => InternalCommand::RequestStateUpdate,
            EngineCommand::Shutdown => unreachable!("Shutdown 已在主循环中处理"),
        };
        if let Some(control_tx) = self.engine_control_tx.as_ref()
            && control_tx.send(internal).await.is_err()
        {
            log::warn!("[后台线程] 引擎命令通道已关闭，命令被丢弃。");
        }
    }

    /// 关闭引擎：丢弃命令发送端并触发关闭信号。
    fn shutdown_engine(&mut self) {
        self.engine_control_tx = None;
        if let Some(shutdown_tx) = self.engine_shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// 创建后台线程并在其上启动引擎，返回线程句柄。
pub(crate) fn start_engine_worker_thread(
    session_set: Arc<dyn SessionSet>,
    config: EngineConfig,
    command_rx: mpsc::Receiver<EngineCommand>,
    update_tx: mpsc::Sender<EngineUpdate>,
) -> Result<std::thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("lyric_engine_worker".to_string())
        .spawn(move || {
            log::info!("[后台线程] 引擎工作线程已启动。");

            let local_set = tokio::task::LocalSet::new();
            let (control_tx, control_rx) = mpsc::channel(32);
            let (engine_update_tx, engine_update_rx) = mpsc::channel(256);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();

            local_set.spawn_local(engine::run_engine(
                session_set,
                config,
                engine_update_tx,
                control_rx,
                shutdown_rx,
            ));

            let mut worker = EngineWorker {
                command_rx,
                update_tx,
                engine_control_tx: Some(control_tx),
                engine_update_rx,
                engine_shutdown_tx: Some(shutdown_tx),
            };

            local_set.block_on(&runtime, worker.main_event_loop());
            // 让引擎跑完它的清理路径。
            runtime.block_on(local_set);

            log::info!("[后台线程] 引擎工作线程已退出。");
        })
        .map_err(|e| EngineError::WorkerThread(format!("无法创建引擎工作线程: {e}")))
}
