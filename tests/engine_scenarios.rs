use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use lyric_suite::{
    BoxFuture, Engine, EngineCommand, EngineConfig, EngineController, EngineUpdate,
    MediaLoadState, MediaPayload, MediaSource, SessionSet, SettingsSnapshot, SourceError,
    StateChanges,
};
use tokio::{sync::mpsc, time::timeout};

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

/// 一个可脚本化的虚拟媒体源。
struct FakeSource {
    aumid: String,
    title: Option<String>,
    payload: Mutex<Result<MediaPayload, SourceError>>,
    load_delay: Duration,
}

impl FakeSource {
    fn new(aumid: &str, title: &str, lyric: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            aumid: aumid.to_string(),
            title: Some(title.to_string()),
            payload: Mutex::new(Ok(MediaPayload {
                title: title.to_string(),
                artist: "Artist".to_string(),
                lyric: lyric.map(str::to_string),
            })),
            load_delay: Duration::ZERO,
        })
    }

    fn set_payload(&self, payload: Result<MediaPayload, SourceError>) {
        *self.payload.lock().unwrap() = payload;
    }
}

impl MediaSource for FakeSource {
    fn app_user_model_id(&self) -> String {
        self.aumid.clone()
    }

    fn display_title(&self) -> BoxFuture<Option<String>> {
        let title = self.title.clone();
        Box::pin(async move { title })
    }

    fn load_media(&self) -> BoxFuture<Result<MediaPayload, SourceError>> {
        let payload = self.payload.lock().unwrap().clone();
        let delay = self.load_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            payload
        })
    }
}

/// 一个可脚本化的会话集合。
#[derive(Default)]
struct FakeSessionSet {
    sessions: Mutex<Vec<Arc<FakeSource>>>,
    designated: Mutex<Option<String>>,
}

impl FakeSessionSet {
    fn set_sessions(&self, sessions: Vec<Arc<FakeSource>>, designated: Option<&str>) {
        *self.sessions.lock().unwrap() = sessions;
        *self.designated.lock().unwrap() = designated.map(str::to_string);
    }
}

impl SessionSet for FakeSessionSet {
    fn current_sessions(&self) -> Vec<Arc<dyn MediaSource>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn MediaSource>)
            .collect()
    }

    fn designated_current(&self) -> Option<Arc<dyn MediaSource>> {
        let designated = self.designated.lock().unwrap().clone()?;
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.aumid == designated)
            .map(|s| Arc::clone(s) as Arc<dyn MediaSource>)
    }
}

struct TestHarness {
    session_set: Arc<FakeSessionSet>,
    controller: EngineController,
    update_rx: mpsc::Receiver<EngineUpdate>,
}

impl TestHarness {
    fn start(config: EngineConfig) -> Self {
        init_logger();
        let session_set = Arc::new(FakeSessionSet::default());
        let (controller, update_rx) =
            Engine::start(Arc::clone(&session_set) as Arc<dyn SessionSet>, config).unwrap();
        Self {
            session_set,
            controller,
            update_rx,
        }
    }

    async fn send(&self, command: EngineCommand) {
        self.controller.command_tx.send(command).await.unwrap();
    }

    async fn push_sessions(&self) {
        self.send(EngineCommand::SessionsChanged).await;
    }

    /// 持续接收更新直到谓词命中，最多等 5 秒。
    async fn wait_for<T>(&mut self, mut predicate: impl FnMut(&EngineUpdate) -> Option<T>) -> T {
        timeout(Duration::from_secs(5), async {
            loop {
                let update = self.update_rx.recv().await.expect("更新通道意外关闭");
                if let Some(value) = predicate(&update) {
                    break value;
                }
            }
        })
        .await
        .expect("等待更新超时")
    }

    /// 在给定时长内排空通道，返回收到的所有更新。
    async fn drain_for(&mut self, duration: Duration) -> Vec<EngineUpdate> {
        let mut updates = Vec::new();
        let _ = timeout(duration, async {
            while let Some(update) = self.update_rx.recv().await {
                updates.push(update);
            }
        })
        .await;
        updates
    }

    async fn shutdown(self) {
        self.controller.shutdown().await.unwrap();
    }
}

fn selection_id(update: &EngineUpdate) -> Option<Option<String>> {
    if let EngineUpdate::SelectionChanged(selection) = update {
        Some(selection.as_ref().map(|s| s.app_user_model_id.clone()))
    } else {
        None
    }
}

#[tokio::test]
async fn designated_session_is_selected_and_loaded() {
    let mut harness = TestHarness::start(EngineConfig::default());
    harness.session_set.set_sessions(
        vec![
            FakeSource::new("A_1", "Alpha", None),
            FakeSource::new("B_1", "Beta", Some("line one")),
        ],
        Some("B_1"),
    );
    harness.push_sessions().await;

    let selected = harness
        .wait_for(|u| selection_id(u).flatten())
        .await;
    assert_eq!(selected, "B_1");

    let snapshot = harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) if s.state == MediaLoadState::Loaded => Some(s.clone()),
            _ => None,
        })
        .await;
    assert_eq!(snapshot.title, "Beta");
    assert!(snapshot.has_lyric);
    assert_eq!(snapshot.placeholder_text, "Beta");

    harness.shutdown().await;
}

#[tokio::test]
async fn removed_session_reselects_without_reporting_none() {
    let mut harness = TestHarness::start(EngineConfig::default());
    let a = FakeSource::new("A_1", "Alpha", Some("a"));
    let b = FakeSource::new("B_1", "Beta", Some("b"));
    harness
        .session_set
        .set_sessions(vec![Arc::clone(&a), Arc::clone(&b)], Some("A_1"));
    harness.push_sessions().await;
    let selected = harness.wait_for(|u| selection_id(u).flatten()).await;
    assert_eq!(selected, "A_1");

    harness.session_set.set_sessions(vec![b], Some("B_1"));
    harness.push_sessions().await;

    let selected = harness
        .wait_for(|u| match selection_id(u) {
            Some(Some(id)) => Some(id),
            Some(None) => panic!("不应出现空选择"),
            None => None,
        })
        .await;
    assert_eq!(selected, "B_1");

    harness.shutdown().await;
}

#[tokio::test]
async fn launch_hint_beats_designated_and_is_consumed() {
    let config = EngineConfig {
        launch_hint: Some("Foo_".to_string()),
        ..EngineConfig::default()
    };
    let mut harness = TestHarness::start(config);
    harness.session_set.set_sessions(
        vec![
            FakeSource::new("Foo_123", "Foo", Some("x")),
            FakeSource::new("Bar_456", "Bar", Some("y")),
        ],
        Some("Bar_456"),
    );
    harness.push_sessions().await;

    let selected = harness.wait_for(|u| selection_id(u).flatten()).await;
    assert_eq!(selected, "Foo_123");

    // Foo 消失后回落到指定会话；提示已被消费，Foo 再出现也不会被它选中。
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("Bar_456", "Bar", Some("y"))], Some("Bar_456"));
    harness.push_sessions().await;
    let selected = harness.wait_for(|u| selection_id(u).flatten()).await;
    assert_eq!(selected, "Bar_456");

    harness.session_set.set_sessions(
        vec![
            FakeSource::new("Foo_123", "Foo", Some("x")),
            FakeSource::new("Bar_456", "Bar", Some("y")),
        ],
        Some("Bar_456"),
    );
    harness.push_sessions().await;
    harness.send(EngineCommand::RequestStateUpdate).await;
    let selected = harness
        .wait_for(|u| match u {
            EngineUpdate::SelectionChanged(s) => {
                Some(s.as_ref().map(|i| i.app_user_model_id.clone()))
            }
            _ => None,
        })
        .await;
    assert_eq!(selected.as_deref(), Some("Bar_456"));

    harness.shutdown().await;
}

#[tokio::test]
async fn empty_first_resolution_shows_chooser_exactly_once() {
    let mut harness = TestHarness::start(EngineConfig::default());

    harness
        .wait_for(|u| matches!(u, EngineUpdate::ShowChooser).then_some(()))
        .await;

    // 后续的空解析以及会话出现都不应再触发选择器。
    harness.push_sessions().await;
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("A_1", "Alpha", Some("a"))], Some("A_1"));
    harness.push_sessions().await;

    let selected = harness
        .wait_for(|u| {
            assert!(
                !matches!(u, EngineUpdate::ShowChooser),
                "选择器信号只能出现一次"
            );
            selection_id(u).flatten()
        })
        .await;
    assert_eq!(selected, "A_1");

    harness.shutdown().await;
}

#[tokio::test]
async fn superseded_slow_load_never_overwrites_current_media() {
    let mut harness = TestHarness::start(EngineConfig::default());
    let slow = Arc::new(FakeSource {
        aumid: "Slow_1".to_string(),
        title: Some("Slow".to_string()),
        payload: Mutex::new(Ok(MediaPayload {
            title: "SLOW".to_string(),
            artist: String::new(),
            lyric: None,
        })),
        load_delay: Duration::from_millis(500),
    });
    harness
        .session_set
        .set_sessions(vec![slow], Some("Slow_1"));
    harness.push_sessions().await;
    let selected = harness.wait_for(|u| selection_id(u).flatten()).await;
    assert_eq!(selected, "Slow_1");

    // 在慢加载完成之前切换到另一个会话。
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("Fast_1", "Fast", Some("l"))], Some("Fast_1"));
    harness.push_sessions().await;

    let snapshot = harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) if s.state == MediaLoadState::Loaded => Some(s.clone()),
            _ => None,
        })
        .await;
    assert_eq!(snapshot.title, "Fast");

    // 等过慢加载的完成时刻，它的结果必须被丢弃。
    let updates = harness.drain_for(Duration::from_millis(700)).await;
    for update in updates {
        if let EngineUpdate::MediaChanged(s) = update {
            assert_ne!(s.title, "SLOW", "被取代的加载不得覆盖当前模型");
        }
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn unminimize_schedules_exactly_one_transient_window() {
    let config = EngineConfig {
        transient_reveal: Duration::from_millis(200),
        ..EngineConfig::default()
    };
    let mut harness = TestHarness::start(config);
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("A_1", "Alpha", Some("a"))], Some("A_1"));
    harness.push_sessions().await;

    // 先等掉选择触发的那次临时显示。
    harness
        .wait_for(|u| match u {
            EngineUpdate::StateChanged { state, changes }
                if changes.contains(StateChanges::TRANSIENT_VISIBLE)
                    && !state.background_transient_visible =>
            {
                Some(())
            }
            _ => None,
        })
        .await;

    harness.send(EngineCommand::SetMinimized(true)).await;
    harness.send(EngineCommand::SetMinimized(false)).await;

    let updates = harness.drain_for(Duration::from_millis(600)).await;
    let windows_opened = updates
        .iter()
        .filter(|u| {
            matches!(
                u,
                EngineUpdate::StateChanged { state, changes }
                    if changes.contains(StateChanges::TRANSIENT_VISIBLE)
                        && state.background_transient_visible
            )
        })
        .count();
    assert_eq!(windows_opened, 1, "应恰好观察到一次临时显示窗口");

    harness.shutdown().await;
}

#[tokio::test]
async fn failed_load_is_inert_and_not_cached() {
    let mut harness = TestHarness::start(EngineConfig::default());
    let source = FakeSource::new("A_1", "Alpha", Some("a"));
    source.set_payload(Err(SourceError("后端不可用".to_string())));
    harness
        .session_set
        .set_sessions(vec![Arc::clone(&source)], Some("A_1"));
    harness.push_sessions().await;

    // 失败先产生一条诊断，随后是降级为失败状态的快照。
    harness
        .wait_for(|u| matches!(u, EngineUpdate::Diagnostic(_)).then_some(()))
        .await;
    let snapshot = harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) if s.state == MediaLoadState::Failed => Some(s.clone()),
            _ => None,
        })
        .await;
    assert!(!snapshot.has_lyric);
    assert!(!snapshot.is_empty_lyric);
    assert!(snapshot.title.is_empty());

    // 失败不被缓存：数据源恢复后，同一会话的媒体变化通知会重试加载。
    source.set_payload(Ok(MediaPayload {
        title: "Recovered".to_string(),
        artist: "Artist".to_string(),
        lyric: Some("line".to_string()),
    }));
    harness
        .send(EngineCommand::MediaChanged("A_1".to_string()))
        .await;

    let snapshot = harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) if s.state == MediaLoadState::Loaded => Some(s.clone()),
            _ => None,
        })
        .await;
    assert_eq!(snapshot.title, "Recovered");
    assert!(snapshot.has_lyric);

    harness.shutdown().await;
}

#[tokio::test]
async fn media_change_for_other_session_is_ignored() {
    let mut harness = TestHarness::start(EngineConfig::default());
    harness.session_set.set_sessions(
        vec![
            FakeSource::new("A_1", "Alpha", Some("a")),
            FakeSource::new("B_1", "Beta", Some("b")),
        ],
        Some("A_1"),
    );
    harness.push_sessions().await;
    harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) if s.state == MediaLoadState::Loaded => Some(()),
            _ => None,
        })
        .await;

    // 非选中会话的媒体变化不应触发重载；用状态重发作为顺序屏障。
    harness
        .send(EngineCommand::MediaChanged("B_1".to_string()))
        .await;
    harness.send(EngineCommand::RequestStateUpdate).await;

    let snapshot = harness
        .wait_for(|u| match u {
            EngineUpdate::MediaChanged(s) => {
                assert_ne!(s.state, MediaLoadState::Loading, "不应重新进入加载状态");
                Some(s.clone())
            }
            _ => None,
        })
        .await;
    assert_eq!(snapshot.title, "Alpha");
    assert_eq!(snapshot.state, MediaLoadState::Loaded);

    harness.shutdown().await;
}

#[tokio::test]
async fn always_show_background_setting_reveals_background() {
    let config = EngineConfig {
        transient_reveal: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let mut harness = TestHarness::start(config);
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("A_1", "Alpha", Some("a"))], Some("A_1"));
    harness.push_sessions().await;

    // 等选择触发的临时显示自然到期，背景回到隐藏状态。
    harness
        .wait_for(|u| match u {
            EngineUpdate::StateChanged { state, changes }
                if changes.contains(StateChanges::TRANSIENT_VISIBLE)
                    && !state.background_transient_visible
                    && !state.is_background_visible =>
            {
                Some(())
            }
            _ => None,
        })
        .await;

    harness
        .send(EngineCommand::UpdateSettings(SettingsSnapshot {
            always_show_background: true,
            ..SettingsSnapshot::default()
        }))
        .await;

    let state = harness
        .wait_for(|u| match u {
            EngineUpdate::StateChanged { state, changes }
                if changes.contains(StateChanges::BACKGROUND_VISIBLE) =>
            {
                Some(state.clone())
            }
            _ => None,
        })
        .await;
    assert!(state.is_background_visible);
    assert!(!state.actual_minimized);
    assert!((state.lyric_opacity - 1.0).abs() < f64::EPSILON);

    harness.shutdown().await;
}

#[tokio::test]
async fn launch_app_request_resolves_current_selection() {
    let mut harness = TestHarness::start(EngineConfig::default());
    harness
        .session_set
        .set_sessions(vec![FakeSource::new("A_1", "Alpha", Some("a"))], Some("A_1"));
    harness.push_sessions().await;
    let selected = harness.wait_for(|u| selection_id(u).flatten()).await;
    assert_eq!(selected, "A_1");

    harness.send(EngineCommand::LaunchCurrentSessionApp).await;
    let app_id = harness
        .wait_for(|u| match u {
            EngineUpdate::LaunchAppRequested(id) => Some(id.clone()),
            _ => None,
        })
        .await;
    assert_eq!(app_id, "A_1");

    harness.shutdown().await;
}
