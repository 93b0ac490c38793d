use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::api::EngineCommand;

/// 定义库的统一错误枚举。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 无法启动后台工作线程。
    ///
    /// 这通常发生在 `std::thread::Builder::spawn` 失败时。
    #[error("无法启动后台工作线程: {0}")]
    WorkerThread(String),

    /// 向工作线程的命令通道发送外部命令时失败。
    ///
    /// 这通常意味着后台工作线程已经崩溃或关闭。
    #[error("向工作线程发送外部命令失败")]
    CommandSend(#[from] SendError<EngineCommand>),

    /// 创建 Tokio 异步运行时失败。
    ///
    /// 这是一个严重的初始化错误，会导致后台线程无法启动。
    #[error("Tokio 运行时创建失败: {0}")]
    TokioRuntime(#[from] std::io::Error),
}

/// 会话数据源（外部协作方）报告的加载失败。
///
/// 这类失败永远不会导致引擎退出，只会让对应的显示模型
/// 降级为一个空白的、可安全展示的失败状态。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SourceError(pub String);

/// 本库统一的 `Result` 类型别名。
pub type Result<T> = std::result::Result<T, EngineError>;
