use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::EngineSignal,
    error::SourceError,
    media::LoadRequest,
};

/// 单次媒体加载的超时时长，防止数据源的异步调用无限期挂起。
const SOURCE_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// 执行一次媒体加载并把结果回报给引擎。
///
/// 取消令牌被触发时任务直接退出，不回报任何结果；加载本身通过
/// 丢弃 Future 被协作式地取消。超时按加载失败处理。
pub(crate) async fn media_load_task(
    request: LoadRequest,
    signal_tx: tokio::sync::mpsc::Sender<EngineSignal>,
) {
    let LoadRequest {
        generation,
        token,
        source,
    } = request;

    let result = tokio::select! {
        biased;
        () = token.cancelled() => {
            log::trace!("[媒体加载] 第 {generation} 代加载被取消。");
            return;
        }
        loaded = timeout(SOURCE_LOAD_TIMEOUT, source.load_media()) => {
            match loaded {
                Ok(result) => result,
                Err(_) => Err(SourceError("媒体加载超时".to_string())),
            }
        }
    };

    if signal_tx
        .send(EngineSignal::MediaLoadFinished { generation, result })
        .await
        .is_err()
    {
        log::warn!("[媒体加载] 无法回报加载结果，引擎可能已停止。");
    }
}

/// 背景临时显示的计时任务。
///
/// 先回报"已置位"，再等待时长流逝或被取消；两种结束方式都会回报
/// "已结束"，由引擎按代数判断该回报是否仍然有效。
pub(crate) async fn transient_visibility_task(
    generation: u64,
    duration: Duration,
    token: CancellationToken,
    signal_tx: tokio::sync::mpsc::Sender<EngineSignal>,
) {
    // 让出一次调度，保证"置位"在当前命令处理完成之后才被应用。
    tokio::task::yield_now().await;

    let expired = if token.is_cancelled() {
        // 在置位之前就被取消了，跳过整个显示窗口。
        false
    } else {
        if signal_tx
            .send(EngineSignal::TransientAsserted(generation))
            .await
            .is_err()
        {
            return;
        }
        tokio::select! {
            biased;
            () = token.cancelled() => false,
            () = sleep(duration) => true,
        }
    };

    if signal_tx
        .send(EngineSignal::TransientFinished {
            generation,
            expired,
        })
        .await
        .is_err()
    {
        log::trace!("[临时显示] 第 {generation} 代计时结果无处投递。");
    }
}
