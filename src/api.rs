use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{EngineError, Result, SourceError};

/// 本库用于 trait 对象异步方法的 boxed Future 别名。
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// 表示宿主平台上的一个媒体会话（外部协作方持有并管理其生命周期）。
///
/// 引擎只通过这个接口读取会话，从不销毁它；会话消失时引擎只丢弃
/// 自己为它创建的包装模型。
pub trait MediaSource: Send + Sync {
    /// 会话的稳定标识符，通常是 AUMID (Application User Model ID) 形状的字符串。
    fn app_user_model_id(&self) -> String;

    /// 异步获取会话来源应用的显示标题。
    ///
    /// 返回 `None` 表示获取失败；引擎会退回到从标识符推导的名称。
    fn display_title(&self) -> BoxFuture<Option<String>>;

    /// 异步加载当前会话的显示载荷（曲目、艺术家、歌词文本）。
    ///
    /// 引擎通过丢弃返回的 Future 来协作式地取消加载。
    fn load_media(&self) -> BoxFuture<std::result::Result<MediaPayload, SourceError>>;
}

/// 会话集合协作方：向引擎提供当前会话快照。
///
/// 集合发生变化时，嵌入方应发送 [`EngineCommand::SessionsChanged`]
/// 通知引擎重新拉取快照并解析选择。
pub trait SessionSet: Send + Sync {
    /// 返回当前全部会话的无序快照。
    fn current_sessions(&self) -> Vec<Arc<dyn MediaSource>>;

    /// 返回平台指定的"当前"会话（如果有）。
    fn designated_current(&self) -> Option<Arc<dyn MediaSource>>;
}

/// 会话数据源异步加载出的显示载荷。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// 曲目标题。
    pub title: String,
    /// 艺术家。
    pub artist: String,
    /// 歌词文本。`None` 或空字符串都视为没有歌词。
    pub lyric: Option<String>,
}

/// 显示模型的加载生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaLoadState {
    #[default]
    /// 尚未开始加载。
    NotStarted,
    /// 加载中。
    Loading,
    /// 加载完成。
    Loaded,
    /// 加载失败（终态）。显示字段保持为空白安全值。
    Failed,
    /// 被新的加载取代而取消（终态）。
    Cancelled,
}

/// 表示一个可供选择的媒体会话，用于在 UI 中展示会话列表。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionInfo {
    /// 会话来源应用的 AUMID。
    pub app_user_model_id: String,
    /// 用于在 UI 中显示的名称，通常是应用标题或从 AUMID 推导的简称。
    pub display_name: String,
}

/// 当前选中会话的显示模型快照。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaSnapshot {
    /// 曲目标题。
    pub title: String,
    /// 艺术家。
    pub artist: String,
    /// 歌词文本（如果有）。
    pub lyric: Option<String>,
    /// 是否存在非空歌词。
    pub has_lyric: bool,
    /// 哨兵标志：表示"无会话 / 无歌词"的空白模型。
    pub is_empty_lyric: bool,
    /// 当前的加载生命周期状态。
    pub state: MediaLoadState,
    /// 歌词占位文本（第一行，取曲目标题）。
    pub placeholder_text: String,
    /// 歌词占位文本（第二行，取艺术家）。
    pub next_line_placeholder_text: String,
}

/// 歌词的水平对齐方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HorizontalAlignment {
    /// 左对齐。
    Left,
    #[default]
    /// 居中。
    Center,
    /// 右对齐。
    Right,
}

/// 来自设置协作方的一次性设置快照。
///
/// 引擎不负责设置的持久化，只消费快照并推导依赖状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// 背景不可见时歌词的不透明度 (0.0 - 1.0)。
    pub lyric_opacity: f64,
    /// 是否启用卡拉 OK 模式。
    pub karaoke_enabled: bool,
    /// 是否始终显示背景。
    pub always_show_background: bool,
    /// 窗口是否处于穿透（透明）模式。
    pub window_transparent: bool,
    /// 是否显示阴影。
    pub show_shadow: bool,
    /// 是否启用文本描边。
    pub text_stroke_enabled: bool,
    /// 歌词的水平对齐方式。
    pub horizontal_alignment: HorizontalAlignment,
    /// 当前主题名称。
    pub theme: String,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            lyric_opacity: 1.0,
            karaoke_enabled: true,
            always_show_background: false,
            window_transparent: false,
            show_shadow: true,
            text_stroke_enabled: false,
            horizontal_alignment: HorizontalAlignment::default(),
            theme: "default".to_string(),
        }
    }
}

/// 会话身份的前缀归一化策略。
///
/// 生成的会话标识符（如 `48848aaaaaaccd.HyPlayer_1a2b!App`）在会话对象被
/// 重建时可能整体变化，但分隔符之前的前缀对同一个应用保持稳定。
/// 匹配规则被建模为可配置策略而不是硬编码；没有分隔符的标识符没有
/// 前缀，按"永远不匹配"处理而不是报错。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPolicy {
    /// 前缀分隔符，默认 `'_'`。
    pub separator: char,
    /// 是否忽略 ASCII 大小写，默认开启。
    pub case_insensitive: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            separator: '_',
            case_insensitive: true,
        }
    }
}

impl IdentityPolicy {
    /// 返回 `id` 中直到（且包含）第一个分隔符的前缀。
    ///
    /// 没有分隔符时返回 `None`。
    pub fn prefix_of<'a>(&self, id: &'a str) -> Option<&'a str> {
        let pos = id.find(self.separator)?;
        Some(&id[..pos + self.separator.len_utf8()])
    }

    /// 判断 `candidate` 是否与 `reference` 属于同一个归一化身份。
    ///
    /// 即 `candidate` 是否以 `reference` 的前缀开头。
    pub fn matches(&self, reference: &str, candidate: &str) -> bool {
        let Some(prefix) = self.prefix_of(reference) else {
            return false;
        };
        if self.case_insensitive {
            candidate
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        } else {
            candidate.starts_with(prefix)
        }
    }
}

bitflags! {
    /// 一次状态通知中发生变化的字段集合。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct StateChanges: u16 {
        /// `actual_minimized` 发生变化。
        const ACTUAL_MINIMIZED    = 1 << 0;
        /// `is_background_visible` 发生变化。
        const BACKGROUND_VISIBLE  = 1 << 1;
        /// `lyric_opacity` 发生变化。
        const LYRIC_OPACITY       = 1 << 2;
        /// `actual_karaoke_enabled` 发生变化。
        const KARAOKE             = 1 << 3;
        /// `is_title_button_visible` 发生变化。
        const TITLE_BUTTON        = 1 << 4;
        /// `is_title_visible` 发生变化。
        const TITLE_VISIBLE       = 1 << 5;
        /// `background_transient_visible` 发生变化。
        const TRANSIENT_VISIBLE   = 1 << 6;
        /// `is_mouse_over` 发生变化。
        const MOUSE_OVER          = 1 << 7;
        /// `text_stroke_enabled` 发生变化。
        const TEXT_STROKE         = 1 << 8;
        /// `horizontal_alignment` 发生变化。
        const ALIGNMENT           = 1 << 9;
    }
}

/// 引擎对外可见的 UI 状态快照。
///
/// 所有推导字段总是可以仅由当前输入重新计算（没有隐藏历史）；
/// 每次输入变化后，观察者看到的都是整体一致的快照。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiState {
    /// 是否显示标题（有选中会话时为真）。
    pub is_title_visible: bool,
    /// 鼠标是否悬停（临时显示计时器也会临时置位它）。
    pub is_mouse_over: bool,
    /// 实际最小化状态：无选中会话、被最小化或显示模型为空白哨兵时为真。
    pub actual_minimized: bool,
    /// 背景是否可见。
    pub is_background_visible: bool,
    /// 歌词不透明度。背景可见时恒为 1.0。
    pub lyric_opacity: f64,
    /// 卡拉 OK 是否实际启用（设置开启且当前曲目有歌词）。
    pub actual_karaoke_enabled: bool,
    /// 标题按钮是否可见（窗口非穿透时为真）。
    pub is_title_button_visible: bool,
    /// 背景是否处于临时显示窗口中。
    pub background_transient_visible: bool,
    /// 是否启用文本描边（设置透传）。
    pub text_stroke_enabled: bool,
    /// 歌词水平对齐（设置透传）。
    pub horizontal_alignment: HorizontalAlignment,
}

impl UiState {
    /// 计算从 `self` 到 `next` 发生变化的字段集合。
    #[must_use]
    pub fn diff(&self, next: &Self) -> StateChanges {
        let mut changes = StateChanges::empty();
        let mut mark = |cond: bool, flag: StateChanges| {
            if cond {
                changes.insert(flag);
            }
        };
        mark(
            self.actual_minimized != next.actual_minimized,
            StateChanges::ACTUAL_MINIMIZED,
        );
        mark(
            self.is_background_visible != next.is_background_visible,
            StateChanges::BACKGROUND_VISIBLE,
        );
        mark(
            (self.lyric_opacity - next.lyric_opacity).abs() > f64::EPSILON,
            StateChanges::LYRIC_OPACITY,
        );
        mark(
            self.actual_karaoke_enabled != next.actual_karaoke_enabled,
            StateChanges::KARAOKE,
        );
        mark(
            self.is_title_button_visible != next.is_title_button_visible,
            StateChanges::TITLE_BUTTON,
        );
        mark(
            self.is_title_visible != next.is_title_visible,
            StateChanges::TITLE_VISIBLE,
        );
        mark(
            self.background_transient_visible != next.background_transient_visible,
            StateChanges::TRANSIENT_VISIBLE,
        );
        mark(
            self.is_mouse_over != next.is_mouse_over,
            StateChanges::MOUSE_OVER,
        );
        mark(
            self.text_stroke_enabled != next.text_stroke_enabled,
            StateChanges::TEXT_STROKE,
        );
        mark(
            self.horizontal_alignment != next.horizontal_alignment,
            StateChanges::ALIGNMENT,
        );
        changes
    }
}

/// 引擎的启动配置。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 一次性启动提示：发起本次激活的应用的 package-family-name 前缀。
    ///
    /// 在首次会话解析时精确消费一次，之后即使未命中也不会重试。
    /// 携带提示启动时不会弹出会话选择提示。
    pub launch_hint: Option<String>,
    /// 会话身份的归一化策略。
    pub identity: IdentityPolicy,
    /// 初始设置快照。
    pub initial_settings: SettingsSnapshot,
    /// 常规临时显示窗口的时长（会话切换、取消最小化、阴影变化）。
    pub transient_reveal: Duration,
    /// 主题变化时临时显示窗口的时长。
    pub theme_reveal: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            launch_hint: None,
            identity: IdentityPolicy::default(),
            initial_settings: SettingsSnapshot::default(),
            transient_reveal: Duration::from_secs(2),
            theme_reveal: Duration::from_secs(3),
        }
    }
}

/// 发送给引擎后台服务的命令。
///
/// 这是与引擎交互的主要方式，由 [`EngineController`] 发送。
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// 会话集合协作方的集合发生了变化，引擎应重新拉取快照并解析选择。
    SessionsChanged,
    /// 重新装填一次性启动提示（进程实例被再次激活时），并触发一次重新解析。
    SetLaunchHint(String),
    /// 应用一份新的设置快照。
    UpdateSettings(SettingsSnapshot),
    /// 设置窗口最小化状态。
    SetMinimized(bool),
    /// 设置鼠标悬停状态。
    SetMouseOver(bool),
    /// 指定会话内的媒体发生了变化（如切歌）。参数是会话的 AUMID；
    /// 只有当它是当前选中会话时才会触发重新加载。
    MediaChanged(String),
    /// 请求启动当前选中会话的来源应用。
    ///
    /// 引擎只负责解析出 AUMID 并以 [`EngineUpdate::LaunchAppRequested`]
    /// 通知嵌入方；实际的启动由嵌入方完成。无选中会话时静默忽略。
    LaunchCurrentSessionApp,
    /// 请求引擎立即重新发送一次所有关键状态的快照。
    RequestStateUpdate,
    /// 请求关闭整个引擎后台线程。
    Shutdown,
}

/// 从引擎后台服务接收的事件和状态更新。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineUpdate {
    /// 可用的媒体会话列表已更新。
    SessionsChanged(Vec<SessionInfo>),
    /// 当前选中的会话发生了变化。
    SelectionChanged(Option<SessionInfo>),
    /// 当前显示模型发生了变化（开始加载、加载完成或失败）。
    MediaChanged(MediaSnapshot),
    /// UI 状态快照发生了变化。
    StateChanged {
        /// 最新的完整状态快照。
        state: UiState,
        /// 本次通知中发生变化的字段集合。
        changes: StateChanges,
    },
    /// 一次性信号：首次会话解析没有找到任何会话，应向用户展示会话选择器。
    ShowChooser,
    /// 请求嵌入方启动指定 AUMID 对应的应用。
    LaunchAppRequested(String),
    /// 报告一个非致命的运行时诊断信息。
    Diagnostic(DiagnosticInfo),
}

/// 与引擎后台服务交互的控制器。
pub struct EngineController {
    /// 用于向后台服务发送 [`EngineCommand`] 的通道发送端。
    pub command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineController {
    /// 终止后台线程。
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(EngineCommand::Shutdown)
            .await
            .map_err(EngineError::from)
    }
}

/// 诊断信息的严重级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    /// 警告。
    Warning,
    /// 错误。
    Error,
}

/// 封装一条诊断信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    /// 严重级别。
    pub level: DiagnosticLevel,
    /// 诊断内容。
    pub message: String,
    /// 产生时间。
    pub timestamp: DateTime<Utc>,
}
