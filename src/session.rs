use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::time::{Duration as TokioDuration, timeout as tokio_timeout};

use crate::{
    api::{MediaSource, SessionInfo},
    utils,
};

/// 获取显示标题的超时时长，防止协作方的异步调用无限期阻塞。
const TITLE_FETCH_TIMEOUT: TokioDuration = TokioDuration::from_secs(5);

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// 每个活动会话对应的轻量包装模型。
///
/// 与当前会话快照保持 1:1 对应：集合变化时整批重建，消失的会话的
/// 包装随之丢弃。`instance_id` 在每次构建时都是全新的，用来代替
/// 引用同一性做"是否还是同一个包装"的判断。
#[derive(Clone)]
pub(crate) struct SessionModel {
    pub instance_id: u64,
    pub app_user_model_id: String,
    pub app_title: String,
    pub source: Arc<dyn MediaSource>,
}

impl fmt::Debug for SessionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionModel")
            .field("instance_id", &self.instance_id)
            .field("app_user_model_id", &self.app_user_model_id)
            .field("app_title", &self.app_title)
            .finish_non_exhaustive()
    }
}

impl SessionModel {
    /// 为单个会话构建包装模型。
    ///
    /// 标题获取失败或超时都不是错误：退回到从 AUMID 推导的名称。
    pub(crate) async fn create(source: Arc<dyn MediaSource>) -> Self {
        let app_user_model_id = source.app_user_model_id();
        let app_title = match tokio_timeout(TITLE_FETCH_TIMEOUT, source.display_title()).await {
            Ok(Some(title)) if !title.is_empty() => title,
            Ok(_) => utils::display_name_from_aumid(&app_user_model_id),
            Err(_) => {
                log::warn!("[会话模型] 获取 '{app_user_model_id}' 的显示标题超时。");
                utils::display_name_from_aumid(&app_user_model_id)
            }
        };
        Self {
            instance_id: next_instance_id(),
            app_user_model_id,
            app_title,
            source,
        }
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            app_user_model_id: self.app_user_model_id.clone(),
            display_name: self.app_title.clone(),
        }
    }
}

/// 把当前会话快照与既有包装模型对账。
///
/// 标识符仍然存在的会话保留原有包装（实例同一性不变，避免重启
/// 进行中的加载）；新出现的会话并发构建；消失的会话的包装随返回值
/// 替换旧集合而被丢弃。结果按输入顺序返回。
pub(crate) async fn reconcile_session_models(
    previous: &[SessionModel],
    sources: Vec<Arc<dyn MediaSource>>,
) -> Vec<SessionModel> {
    let count = sources.len();
    let mut slots: Vec<Option<SessionModel>> = (0..count).map(|_| None).collect();
    let mut join_set = tokio::task::JoinSet::new();
    for (index, source) in sources.into_iter().enumerate() {
        let id = source.app_user_model_id();
        if let Some(existing) = previous.iter().find(|m| m.app_user_model_id == id) {
            slots[index] = Some(existing.clone());
        } else {
            join_set.spawn(async move { (index, SessionModel::create(source).await) });
        }
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, model)) => slots[index] = Some(model),
            Err(e) => log::warn!("[会话模型] 构建任务异常终止: {e}"),
        }
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::{BoxFuture, MediaPayload};
    use crate::error::SourceError;

    pub(crate) struct StubSource {
        pub aumid: String,
        pub payload: std::result::Result<MediaPayload, SourceError>,
    }

    impl MediaSource for StubSource {
        fn app_user_model_id(&self) -> String {
            self.aumid.clone()
        }

        fn display_title(&self) -> BoxFuture<Option<String>> {
            Box::pin(async { None })
        }

        fn load_media(&self) -> BoxFuture<std::result::Result<MediaPayload, SourceError>> {
            let payload = self.payload.clone();
            Box::pin(async move { payload })
        }
    }

    pub(crate) fn model(aumid: &str, title: &str) -> SessionModel {
        SessionModel {
            instance_id: next_instance_id(),
            app_user_model_id: aumid.to_string(),
            app_title: title.to_string(),
            source: Arc::new(StubSource {
                aumid: aumid.to_string(),
                payload: Ok(MediaPayload::default()),
            }),
        }
    }
}
