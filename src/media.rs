use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    api::{MediaLoadState, MediaPayload, MediaSnapshot, MediaSource},
    error::SourceError,
    session::SessionModel,
};

/// 当前选中会话的显示模型。
///
/// 引擎在模型的整个生命周期内独占持有它；替换前必须先取消，
/// 绝不在加载中被静默丢弃。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MediaModel {
    pub title: String,
    pub artist: String,
    pub lyric: Option<String>,
    pub has_lyric: bool,
    /// 哨兵标志：没有会话时的空白模型。失败路径不会改变它。
    pub is_empty_lyric: bool,
    pub state: MediaLoadState,
}

impl MediaModel {
    /// 无会话时的空白哨兵模型。没有东西可加载，直接处于已加载状态。
    pub(crate) fn empty() -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            lyric: None,
            has_lyric: false,
            is_empty_lyric: true,
            state: MediaLoadState::Loaded,
        }
    }

    fn loading() -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            lyric: None,
            has_lyric: false,
            is_empty_lyric: false,
            state: MediaLoadState::Loading,
        }
    }

    pub(crate) fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            title: self.title.clone(),
            artist: self.artist.clone(),
            lyric: self.lyric.clone(),
            has_lyric: self.has_lyric,
            is_empty_lyric: self.is_empty_lyric,
            state: self.state,
            placeholder_text: self.title.clone(),
            next_line_placeholder_text: self.artist.clone(),
        }
    }
}

/// 一次待执行的加载请求，由引擎派生为后台任务。
pub(crate) struct LoadRequest {
    pub generation: u64,
    pub token: CancellationToken,
    pub source: Arc<dyn MediaSource>,
}

/// 显示模型的加载器。
///
/// 任何时刻最多持有一个"当前"模型；每次替换都会先取消被替换的
/// 加载（取消是幂等的），并让代数计数器前进一格。完成回调携带
/// 自己的代数，过期的完成会被静默丢弃，因此永远不会写入已经不
/// 属于它的状态。
pub(crate) struct MediaLoader {
    current: MediaModel,
    /// 创建当前模型的 `SessionModel` 实例 ID；`None` 表示空白哨兵。
    bound_instance: Option<u64>,
    generation: u64,
    active_token: Option<CancellationToken>,
}

impl MediaLoader {
    pub(crate) fn new() -> Self {
        Self {
            current: MediaModel::empty(),
            bound_instance: None,
            generation: 0,
            active_token: None,
        }
    }

    pub(crate) fn model(&self) -> &MediaModel {
        &self.current
    }

    /// 选择变化时的入口。
    ///
    /// 同一个包装实例的重复通知是无操作，不会重启进行中的加载；
    /// 其它情况走取消-替换-重载。返回 `Some` 时调用方应启动加载任务。
    pub(crate) fn on_selection_changed(
        &mut self,
        selection: Option<&SessionModel>,
    ) -> Option<LoadRequest> {
        if selection.map(|m| m.instance_id) == self.bound_instance {
            return None;
        }
        self.replace_with(selection)
    }

    /// 同一会话内媒体变化（如切歌）时强制重载，即使实例未变。
    pub(crate) fn force_reload(&mut self, selection: &SessionModel) -> Option<LoadRequest> {
        self.replace_with(Some(selection))
    }

    fn replace_with(&mut self, selection: Option<&SessionModel>) -> Option<LoadRequest> {
        self.cancel_active();
        self.generation += 1;
        match selection {
            Some(model) => {
                self.bound_instance = Some(model.instance_id);
                self.current = MediaModel::loading();
                let token = CancellationToken::new();
                self.active_token = Some(token.clone());
                Some(LoadRequest {
                    generation: self.generation,
                    token,
                    source: Arc::clone(&model.source),
                })
            }
            None => {
                self.bound_instance = None;
                self.current = MediaModel::empty();
                None
            }
        }
    }

    /// 取消当前进行中的加载。对已完成或已取消的模型是无操作。
    pub(crate) fn cancel_active(&mut self) {
        if let Some(token) = self.active_token.take() {
            token.cancel();
        }
        if self.current.state == MediaLoadState::Loading {
            self.current.state = MediaLoadState::Cancelled;
        }
    }

    /// 应用一次加载完成。
    ///
    /// 返回假表示该完成属于已被取代的加载，必须被丢弃，
    /// 不得触发任何观察者通知。
    pub(crate) fn apply_completion(
        &mut self,
        generation: u64,
        result: std::result::Result<MediaPayload, SourceError>,
    ) -> bool {
        if generation != self.generation || self.active_token.is_none() {
            return false;
        }
        self.active_token = None;

        match result {
            Ok(payload) => {
                self.current.has_lyric = payload.lyric.as_ref().is_some_and(|l| !l.is_empty());
                self.current.title = payload.title;
                self.current.artist = payload.artist;
                self.current.lyric = payload.lyric;
                self.current.state = MediaLoadState::Loaded;
            }
            Err(_) => {
                // 失败模型保持为可用的惰性显示对象；is_empty_lyric 不受影响。
                self.current.title = String::new();
                self.current.artist = String::new();
                self.current.lyric = None;
                self.current.has_lyric = false;
                self.current.state = MediaLoadState::Failed;
            }
        }
        true
    }
}
