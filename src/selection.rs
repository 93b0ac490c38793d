use crate::{api::IdentityPolicy, session::SessionModel};

/// 选择逻辑的可变状态。
///
/// 两个一次性标志都被建模为显式状态：`launch_hint` 从"已装填"到
/// "已消费"恰好迁移一次（未命中也会被清除）；`session_inited`
/// 保证"展示会话选择器"的信号最多发出一次。
#[derive(Debug, Default)]
pub(crate) struct SelectionState {
    /// 一次性启动提示（package-family-name 前缀）。
    pub launch_hint: Option<String>,
    /// 粘性身份：跨集合变更重新找回同一个逻辑会话。
    pub last_selected_app_id: String,
    /// 首次解析是否已经发生过。
    pub session_inited: bool,
}

impl SelectionState {
    /// 装填一次性启动提示。
    ///
    /// 携带提示启动（或被再次激活）时不弹出会话选择器，
    /// 所以这里同时消费掉"未初始化"标志。
    pub(crate) fn arm_hint(&mut self, hint: String) {
        self.launch_hint = Some(hint);
        self.session_inited = true;
    }

    /// 消费一次"未初始化"标志。
    ///
    /// 返回真表示这是首次解析，调用方应在结果为空时发出选择器信号。
    pub(crate) fn take_first_resolution(&mut self) -> bool {
        let first = !self.session_inited;
        self.session_inited = true;
        first
    }
}

/// 从当前会话模型集合中解析出活动会话。
///
/// 优先级：启动提示 > 上次选择 > 平台指定的当前会话 > 无。
/// 前两者都按 [`IdentityPolicy`] 的前缀规则匹配，以便在会话对象
/// 被重建（标识符变化但属于同一应用）时保持连续性。
pub(crate) fn resolve<'a>(
    models: &'a [SessionModel],
    designated: Option<&str>,
    state: &mut SelectionState,
    policy: &IdentityPolicy,
) -> Option<&'a SessionModel> {
    // 提示是一次性的：无论是否命中都被消费，之后不再重试。
    if let Some(hint) = state.launch_hint.take() {
        if let Some(model) = find_by_prefix(models, &hint, policy) {
            log::info!("[会话选择] 启动提示命中 -> '{}'", model.app_user_model_id);
            state.last_selected_app_id = model.app_user_model_id.clone();
            return Some(model);
        }
        log::debug!("[会话选择] 启动提示 '{hint}' 未命中任何会话，已丢弃。");
    }

    let previous = state.last_selected_app_id.clone();
    if let Some(model) = find_by_prefix(models, &previous, policy) {
        state.last_selected_app_id = model.app_user_model_id.clone();
        return Some(model);
    }

    if let Some(designated_id) = designated {
        if let Some(model) = models
            .iter()
            .find(|m| m.app_user_model_id == designated_id)
        {
            state.last_selected_app_id = model.app_user_model_id.clone();
            return Some(model);
        }
    }

    state.last_selected_app_id.clear();
    None
}

fn find_by_prefix<'a>(
    models: &'a [SessionModel],
    reference: &str,
    policy: &IdentityPolicy,
) -> Option<&'a SessionModel> {
    if reference.is_empty() {
        return None;
    }
    models
        .iter()
        .find(|m| policy.matches(reference, &m.app_user_model_id))
}
