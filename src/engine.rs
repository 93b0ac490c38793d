//! 引擎核心：在单一逻辑上下文中处理全部状态变更与观察者通知。
//!
//! 所有共享状态都由本模块独占修改；异步工作（会话模型构建、媒体
//! 加载、临时显示计时）在任务中运行，完成后通过信号通道回到这里
//! 才允许触碰状态。

#![allow(clippy::future_not_send)] // worker 已经保证本模块运行在 LocalSet 中

use std::{cell::RefCell, mem, rc::Rc, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{
        DiagnosticInfo, DiagnosticLevel, EngineConfig, MediaPayload, SessionSet, SettingsSnapshot,
        StateChanges, UiState,
    },
    derived::{self, DerivedInputs},
    error::SourceError,
    media::{LoadRequest, MediaLoader},
    selection::{self, SelectionState},
    session::{self, SessionModel},
    tasks,
    worker::{InternalCommand, InternalUpdate},
};

/// 异步任务回报给引擎的内部信号。
pub(crate) enum EngineSignal {
    /// 需要重新拉取会话快照并解析选择。
    Sessions,
    /// 一次媒体加载结束，携带它所属的代数。
    MediaLoadFinished {
        generation: u64,
        result: std::result::Result<MediaPayload, SourceError>,
    },
    /// 临时显示计时任务已让出一次调度，可以置位可见标志了。
    TransientAsserted(u64),
    /// 临时显示计时结束。`expired` 为真表示自然到期，假表示被取消。
    TransientFinished { generation: u64, expired: bool },
}

/// 引擎独占持有的全部可变状态。
struct EngineState {
    session_models: Vec<SessionModel>,
    selected: Option<SessionModel>,
    selection: SelectionState,
    loader: MediaLoader,
    is_minimized: bool,
    is_mouse_over: bool,
    is_title_visible: bool,
    background_transient_visible: bool,
    settings: SettingsSnapshot,
    /// 最近一次发布的状态快照，作为差分基准。
    ui: UiState,
    active_load_task: Option<tokio::task::JoinHandle<()>>,
    active_transient_task: Option<(tokio::task::JoinHandle<()>, CancellationToken)>,
    /// 临时显示的代数计数器。取代不会回退它，只会前进。
    transient_generation: u64,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        let mut state = Self {
            session_models: Vec::new(),
            selected: None,
            selection: SelectionState::default(),
            loader: MediaLoader::new(),
            is_minimized: false,
            is_mouse_over: false,
            is_title_visible: false,
            background_transient_visible: false,
            settings: config.initial_settings.clone(),
            ui: UiState::default(),
            active_load_task: None,
            active_transient_task: None,
            transient_generation: 0,
        };
        state.ui = state.recompute();
        state
    }

    /// 仅由当前输入重新计算完整的 UI 状态。
    fn recompute(&self) -> UiState {
        derived::compute(&DerivedInputs {
            has_selection: self.selected.is_some(),
            is_minimized: self.is_minimized,
            is_mouse_over: self.is_mouse_over,
            is_title_visible: self.is_title_visible,
            background_transient_visible: self.background_transient_visible,
            media: Some(self.loader.model()),
            settings: &self.settings,
        })
    }
}

/// 引擎各部分共享的上下文。
#[derive(Clone)]
struct AppContext {
    state: Rc<RefCell<EngineState>>,
    session_set: Arc<dyn SessionSet>,
    update_tx: mpsc::Sender<InternalUpdate>,
    signal_tx: mpsc::Sender<EngineSignal>,
    config: Rc<EngineConfig>,
}

struct EngineRunner {
    context: AppContext,
    control_rx: mpsc::Receiver<InternalCommand>,
    signal_rx: mpsc::Receiver<EngineSignal>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl EngineRunner {
    async fn run(mut self) {
        // 启动后立即做一次会话解析，不依赖嵌入方的首个通知。
        let _ = self.context.signal_tx.try_send(EngineSignal::Sessions);

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    log::info!("[引擎] 收到关闭信号，准备退出。");
                    break;
                }

                Some(signal) = self.signal_rx.recv() => {
                    self.handle_signal(signal).await;
                }

                maybe_command = self.control_rx.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            log::info!("[引擎] 命令通道已关闭，准备退出。");
                            break;
                        }
                    }
                }
            }
        }

        self.cleanup();
    }

    async fn handle_command(&self, command: InternalCommand) {
        match command {
            InternalCommand::RefreshSessions => self.handle_sessions_changed().await,
            InternalCommand::SetLaunchHint(hint) => {
                self.context.state.borrow_mut().selection.arm_hint(hint);
                self.handle_sessions_changed().await;
            }
            InternalCommand::UpdateSettings(settings) => self.apply_settings(settings),
            InternalCommand::SetMinimized(minimized) => self.set_minimized(minimized),
            InternalCommand::SetMouseOver(mouse_over) => self.set_mouse_over(mouse_over),
            InternalCommand::MediaChanged(app_id) => self.on_media_changed(&app_id),
            InternalCommand::LaunchApp => self.on_launch_app(),
            InternalCommand::RequestStateUpdate => self.on_request_state_update(),
        }
    }

    async fn handle_signal(&self, signal: EngineSignal) {
        match signal {
            EngineSignal::Sessions => self.handle_sessions_changed().await,
            EngineSignal::MediaLoadFinished { generation, result } => {
                self.on_media_load_finished(generation, result);
            }
            EngineSignal::TransientAsserted(generation) => self.on_transient_asserted(generation),
            EngineSignal::TransientFinished { generation, expired } => {
                self.on_transient_finished(generation, expired);
            }
        }
    }

    /// 重新拉取会话快照、重建包装模型并解析选择。
    ///
    /// 选择总是在上一批会话的任何遗留加载触碰状态之前完成协调，
    /// 这由加载器的"先取消再替换"纪律保证。
    async fn handle_sessions_changed(&self) {
        let sources = self.context.session_set.current_sessions();
        let designated = self
            .context
            .session_set
            .designated_current()
            .map(|s| s.app_user_model_id());

        log::debug!("[引擎] 会话集合变化，共 {} 个会话。", sources.len());
        let previous = self.context.state.borrow().session_models.clone();
        let models = session::reconcile_session_models(&previous, sources).await;

        self.send_update(InternalUpdate::SessionsChanged(
            models.iter().map(SessionModel::info).collect(),
        ));

        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        st.session_models = models;
        let resolved = selection::resolve(
            &st.session_models,
            designated.as_deref(),
            &mut st.selection,
            &self.context.config.identity,
        )
        .cloned();
        let first = st.selection.take_first_resolution();

        if first && resolved.is_none() {
            log::info!("[引擎] 首次解析没有找到任何会话，发出选择器信号。");
            self.send_update(InternalUpdate::ShowChooser);
        }

        self.set_selected(st, resolved);
    }

    /// 应用一次选择解析的结果。
    fn set_selected(&self, st: &mut EngineState, resolved: Option<SessionModel>) {
        let changed =
            st.selected.as_ref().map(|m| m.instance_id) != resolved.as_ref().map(|m| m.instance_id);
        st.selected = resolved;
        st.is_title_visible = st.selected.is_some();

        let request = st.loader.on_selection_changed(st.selected.as_ref());
        self.publish_state(st);

        if !changed {
            return;
        }

        log::info!(
            "[引擎] 选中会话 -> {:?}",
            st.selected.as_ref().map(|m| m.app_user_model_id.as_str())
        );
        self.send_update(InternalUpdate::SelectionChanged(
            st.selected.as_ref().map(SessionModel::info),
        ));
        self.publish_media(st);

        if st.selected.is_some() && !st.ui.is_background_visible {
            self.show_background_transient(st, self.context.config.transient_reveal);
        }
        if let Some(request) = request {
            self.spawn_load(st, request);
        }
    }

    fn on_media_load_finished(
        &self,
        generation: u64,
        result: std::result::Result<MediaPayload, SourceError>,
    ) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;

        let failure = result.as_ref().err().cloned();
        if !st.loader.apply_completion(generation, result) {
            log::trace!("[引擎] 丢弃第 {generation} 代的过期加载完成。");
            return;
        }
        if let Some(error) = failure {
            log::warn!("[引擎] 媒体加载失败: {error}");
            self.send_update(InternalUpdate::Diagnostic(DiagnosticInfo {
                level: DiagnosticLevel::Warning,
                message: format!("媒体加载失败: {error}"),
                timestamp: Utc::now(),
            }));
        }

        self.publish_state(st);
        self.publish_media(st);
    }

    /// 当前选中会话内的媒体发生变化（如切歌）时强制重载。
    fn on_media_changed(&self, app_id: &str) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        let Some(selected) = st.selected.as_ref() else {
            return;
        };
        if selected.app_user_model_id != app_id {
            log::debug!("[引擎] 忽略非选中会话 '{app_id}' 的媒体变化。");
            return;
        }

        let request = st.loader.force_reload(selected);
        self.publish_state(st);
        self.publish_media(st);
        if let Some(request) = request {
            self.spawn_load(st, request);
        }
    }

    fn apply_settings(&self, settings: SettingsSnapshot) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        let previous = mem::replace(&mut st.settings, settings);

        if previous.always_show_background != st.settings.always_show_background {
            self.cancel_transient(st);
        }
        self.publish_state(st);

        if previous.show_shadow != st.settings.show_shadow {
            self.show_background_transient(st, self.context.config.transient_reveal);
        }
        if previous.theme != st.settings.theme {
            self.show_background_transient(st, self.context.config.theme_reveal);
        }
    }

    fn set_minimized(&self, minimized: bool) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        if st.is_minimized == minimized {
            return;
        }
        st.is_minimized = minimized;
        self.publish_state(st);

        // 取消最小化而背景仍不可见时，安排一次临时显示。
        if !minimized && !st.ui.is_background_visible {
            self.show_background_transient(st, self.context.config.transient_reveal);
        }
    }

    fn set_mouse_over(&self, mouse_over: bool) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        // 外部的悬停变化总是让进行中的计时器失效，防止它对着过期状态触发。
        self.cancel_transient(st);
        st.is_mouse_over = mouse_over;
        self.publish_state(st);
    }

    fn on_launch_app(&self) {
        let guard = self.context.state.borrow();
        match guard.selected.as_ref() {
            Some(selected) => {
                self.send_update(InternalUpdate::LaunchAppRequested(
                    selected.app_user_model_id.clone(),
                ));
            }
            None => log::debug!("[引擎] 无选中会话，忽略启动应用请求。"),
        }
    }

    /// 把所有关键状态重新发送一遍，用于观察者重新同步。
    fn on_request_state_update(&self) {
        let guard = self.context.state.borrow();
        self.send_update(InternalUpdate::SessionsChanged(
            guard.session_models.iter().map(SessionModel::info).collect(),
        ));
        self.send_update(InternalUpdate::SelectionChanged(
            guard.selected.as_ref().map(SessionModel::info),
        ));
        self.send_update(InternalUpdate::MediaChanged(guard.loader.model().snapshot()));
        self.send_update(InternalUpdate::StateChanged {
            state: guard.ui.clone(),
            changes: StateChanges::all(),
        });
    }

    /// 启动一次背景临时显示（最多同时存在一个，后来者取代先来者）。
    fn show_background_transient(&self, st: &mut EngineState, duration: Duration) {
        if st.ui.actual_minimized || st.settings.always_show_background {
            return;
        }

        // 取代旧计时器：先前进代数再取消，让旧任务的结束回报变成过期信号。
        st.transient_generation += 1;
        let generation = st.transient_generation;
        if let Some((_, token)) = st.active_transient_task.take() {
            token.cancel();
        }

        st.is_mouse_over = true;
        self.publish_state(st);

        let token = CancellationToken::new();
        let task = tokio::task::spawn_local(tasks::transient_visibility_task(
            generation,
            duration,
            token.clone(),
            self.context.signal_tx.clone(),
        ));
        st.active_transient_task = Some((task, token));
        log::debug!("[引擎] 启动第 {generation} 代临时显示，时长 {duration:?}。");
    }

    /// 取消进行中的临时显示计时器，不前进代数。
    ///
    /// 被取消的任务仍会回报结束，由结束处理负责清掉可见标志。
    fn cancel_transient(&self, st: &mut EngineState) {
        if let Some((_, token)) = st.active_transient_task.as_ref() {
            token.cancel();
        }
    }

    fn on_transient_asserted(&self, generation: u64) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        if generation != st.transient_generation || st.active_transient_task.is_none() {
            return;
        }
        st.background_transient_visible = true;
        self.publish_state(st);
    }

    fn on_transient_finished(&self, generation: u64, expired: bool) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        if generation != st.transient_generation {
            log::trace!("[引擎] 丢弃第 {generation} 代的过期计时结束。");
            return;
        }
        st.active_transient_task = None;
        st.background_transient_visible = false;
        // 只有自然到期才收回强制的悬停状态；被取消时悬停由取消方负责。
        if expired {
            st.is_mouse_over = false;
        }
        self.publish_state(st);
    }

    fn spawn_load(&self, st: &mut EngineState, request: LoadRequest) {
        let generation = request.generation;
        let task = tokio::task::spawn_local(tasks::media_load_task(
            request,
            self.context.signal_tx.clone(),
        ));
        st.active_load_task = Some(task);
        log::debug!("[引擎] 启动第 {generation} 代媒体加载。");
    }

    /// 重新推导 UI 状态，与上次发布的快照差分，有变化才通知。
    fn publish_state(&self, st: &mut EngineState) {
        let next = st.recompute();
        let changes = st.ui.diff(&next);
        if changes.is_empty() {
            return;
        }
        st.ui = next.clone();
        self.send_update(InternalUpdate::StateChanged {
            state: next,
            changes,
        });
    }

    fn publish_media(&self, st: &EngineState) {
        self.send_update(InternalUpdate::MediaChanged(st.loader.model().snapshot()));
    }

    fn send_update(&self, update: InternalUpdate) {
        if let Err(e) = self.context.update_tx.try_send(update) {
            log::warn!("[引擎] 无法发送状态更新: {e}");
        }
    }

    fn cleanup(&self) {
        let mut guard = self.context.state.borrow_mut();
        let st = &mut *guard;
        st.loader.cancel_active();
        if let Some((task, token)) = st.active_transient_task.take() {
            token.cancel();
            task.abort();
        }
        if let Some(task) = st.active_load_task.take() {
            task.abort();
        }
    }
}

/// 引擎主入口，由 worker 在 LocalSet 中驱动。
pub(crate) async fn run_engine(
    session_set: Arc<dyn SessionSet>,
    config: EngineConfig,
    update_tx: mpsc::Sender<InternalUpdate>,
    control_rx: mpsc::Receiver<InternalCommand>,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let (signal_tx, signal_rx) = mpsc::channel(64);

    let mut state = EngineState::new(&config);
    if let Some(hint) = config.launch_hint.clone() {
        log::info!("[引擎] 装填启动提示 '{hint}'。");
        state.selection.arm_hint(hint);
    }

    let runner = EngineRunner {
        context: AppContext {
            state: Rc::new(RefCell::new(state)),
            session_set,
            update_tx,
            signal_tx,
            config: Rc::new(config),
        },
        control_rx,
        signal_rx,
        shutdown_rx,
    };

    runner.run().await;
    log::info!("[引擎] 主循环已退出。");
}
