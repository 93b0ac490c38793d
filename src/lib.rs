#![warn(missing_docs)]

//! 一个为桌面歌词叠加层提供媒体会话选择与状态同步的 Rust 库。
//!
//! `lyric-suite` 在一个独立的后台线程中维护"当前应该显示哪个媒体会话、
//! 它的曲目与歌词数据、以及叠加层窗口的各个推导状态"，并通过通道把
//! 一致的状态快照推送给嵌入它的应用。
//!
//! ## 核心功能
//!
//! * **会话选择**: 在会话集合变化时，按"启动提示 > 上次选择 > 平台指定
//!   的当前会话"的优先级解析出活动会话，并用前缀归一化的身份规则在
//!   会话对象被重建时保持连续性。
//! * **媒体加载**: 为选中会话异步加载曲目与歌词数据；任何时刻最多一个
//!   加载在进行中，被取代的加载先被取消，过期的完成被静默丢弃。
//! * **状态推导**: 最小化、背景可见性、歌词不透明度、卡拉 OK 等字段由
//!   当前输入同步重算，观察者永远只看到整体一致的快照。
//! * **临时显示**: 会话切换、取消最小化或设置变化时，让背景短暂显示
//!   一段时间后自动隐藏；计时器可取消、可重启，后来者总是取代先来者。
//! * **异步事件驱动**: 所有状态变更都在一个独立的单线程异步上下文中
//!   处理，通过通道与主应用通信，不会阻塞你的应用主线程。
//!
//! ## 使用方法
//!
//! 与本库交互的入口是 [`Engine::start()`] 函数。
//!
//! 1.  实现 [`SessionSet`] 与 [`MediaSource`]，把宿主平台的媒体会话
//!     暴露给引擎。
//! 2.  调用 `Engine::start(session_set, config)`，它会启动后台服务并
//!     返回 `(EngineController, mpsc::Receiver<EngineUpdate>)`。
//! 3.  [`EngineController`] 是向后台服务发送 [`EngineCommand`] 的句柄；
//!     会话集合变化时发送 [`EngineCommand::SessionsChanged`]。
//! 4.  在一个独立任务中循环监听 `Receiver` 以接收状态更新。
//! 5.  应用退出时调用 [`EngineController::shutdown()`] 优雅地关闭后台线程。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use lyric_suite::{Engine, EngineConfig, EngineUpdate, MediaSource, SessionSet};
//!
//! struct EmptySessions;
//!
//! impl SessionSet for EmptySessions {
//!     fn current_sessions(&self) -> Vec<Arc<dyn MediaSource>> {
//!         Vec::new()
//!     }
//!     fn designated_current(&self) -> Option<Arc<dyn MediaSource>> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (controller, mut update_rx) =
//!         Engine::start(Arc::new(EmptySessions), EngineConfig::default())?;
//!
//!     let update_task = tokio::spawn(async move {
//!         while let Some(update) = update_rx.recv().await {
//!             match update {
//!                 EngineUpdate::SelectionChanged(selection) => {
//!                     println!("选中会话: {selection:?}");
//!                 }
//!                 EngineUpdate::MediaChanged(snapshot) => {
//!                     println!("曲目: {} - {}", snapshot.artist, snapshot.title);
//!                 }
//!                 EngineUpdate::StateChanged { state, changes } => {
//!                     println!("状态变化 {changes:?}: {state:?}");
//!                 }
//!                 _ => { /* 处理其他更新 */ }
//!             }
//!         }
//!     });
//!
//!     controller.shutdown().await?;
//!     update_task.await?;
//!     Ok(())
//! }
//! ```

mod api;
mod derived;
mod engine;
mod error;
mod media;
mod selection;
mod session;
mod tasks;
mod utils;
mod worker;

pub use api::{
    BoxFuture, DiagnosticInfo, DiagnosticLevel, EngineCommand, EngineConfig, EngineController,
    EngineUpdate, HorizontalAlignment, IdentityPolicy, MediaLoadState, MediaPayload, MediaSnapshot,
    MediaSource, SessionInfo, SessionSet, SettingsSnapshot, StateChanges, UiState,
};
pub use error::{EngineError, Result, SourceError};

use std::sync::Arc;
use tokio::sync::mpsc;

/// `Engine` 是本库的静态入口点。
pub struct Engine;

impl Engine {
    /// 启动引擎后台服务，并返回一个控制器和事件接收器。
    ///
    /// 它会初始化并运行一个专用的后台工作线程，该线程独占处理所有
    /// 状态变更；每次调用都创建一个独立的引擎实例。
    ///
    /// # 返回
    /// - `Ok((controller, update_rx))`: 成功启动后，返回一个元组：
    ///   - `controller`: 一个 [`EngineController`]，用于向后台服务发送命令。
    ///   - `update_rx`: 一个 `mpsc::Receiver<EngineUpdate>`，用于接收所有事件和状态更新。
    /// - `Err(EngineError)`: 如果在启动过程中发生严重错误。
    pub fn start(
        session_set: Arc<dyn SessionSet>,
        config: EngineConfig,
    ) -> Result<(EngineController, mpsc::Receiver<EngineUpdate>)> {
        let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(32);
        let (update_tx, update_rx) = mpsc::channel::<EngineUpdate>(256);

        worker::start_engine_worker_thread(session_set, config, command_rx, update_tx)?;

        Ok((EngineController { command_tx }, update_rx))
    }
}
