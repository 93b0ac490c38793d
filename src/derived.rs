use crate::{
    api::{SettingsSnapshot, UiState},
    media::MediaModel,
};

/// 推导一次 UI 状态所需的全部输入。
///
/// 推导是纯函数：没有隐藏历史，任何时刻都可以仅由这些输入重算。
pub(crate) struct DerivedInputs<'a> {
    pub has_selection: bool,
    pub is_minimized: bool,
    pub is_mouse_over: bool,
    pub is_title_visible: bool,
    pub background_transient_visible: bool,
    pub media: Option<&'a MediaModel>,
    pub settings: &'a SettingsSnapshot,
}

/// 由当前输入重新计算完整的 UI 状态快照。
pub(crate) fn compute(inputs: &DerivedInputs<'_>) -> UiState {
    let actual_minimized = !inputs.has_selection
        || inputs.is_minimized
        || inputs.media.is_none()
        || inputs.media.is_some_and(|m| m.is_empty_lyric);
    let is_background_visible =
        !actual_minimized && (inputs.is_mouse_over || inputs.settings.always_show_background);
    let lyric_opacity = if is_background_visible {
        1.0
    } else {
        inputs.settings.lyric_opacity
    };
    let actual_karaoke_enabled =
        inputs.settings.karaoke_enabled && inputs.media.is_some_and(|m| m.has_lyric);
    let is_title_button_visible = !inputs.settings.window_transparent;

    UiState {
        is_title_visible: inputs.is_title_visible,
        is_mouse_over: inputs.is_mouse_over,
        actual_minimized,
        is_background_visible,
        lyric_opacity,
        actual_karaoke_enabled,
        is_title_button_visible,
        background_transient_visible: inputs.background_transient_visible,
        text_stroke_enabled: inputs.settings.text_stroke_enabled,
        horizontal_alignment: inputs.settings.horizontal_alignment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(
        media: Option<&'a MediaModel>,
        settings: &'a SettingsSnapshot,
    ) -> DerivedInputs<'a> {
        DerivedInputs {
            has_selection: true,
            is_minimized: false,
            is_mouse_over: false,
            is_title_visible: true,
            background_transient_visible: false,
            media,
            settings,
        }
    }

    fn loaded_media(has_lyric: bool) -> MediaModel {
        let mut model = MediaModel::empty();
        model.is_empty_lyric = false;
        model.has_lyric = has_lyric;
        model
    }

    #[test]
    fn no_selection_forces_actual_minimized() {
        let settings = SettingsSnapshot::default();
        let media = MediaModel::empty();
        let mut i = inputs(Some(&media), &settings);
        i.has_selection = false;
        assert!(compute(&i).actual_minimized);
    }

    #[test]
    fn empty_lyric_sentinel_forces_actual_minimized() {
        let settings = SettingsSnapshot::default();
        let media = MediaModel::empty();
        let state = compute(&inputs(Some(&media), &settings));
        assert!(state.actual_minimized);
        assert!(!state.is_background_visible);
    }

    #[test]
    fn missing_media_forces_actual_minimized() {
        let settings = SettingsSnapshot::default();
        assert!(compute(&inputs(None, &settings)).actual_minimized);
    }

    #[test]
    fn background_needs_mouse_over_or_setting() {
        let settings = SettingsSnapshot::default();
        let media = loaded_media(true);

        let hidden = compute(&inputs(Some(&media), &settings));
        assert!(!hidden.actual_minimized);
        assert!(!hidden.is_background_visible);

        let mut i = inputs(Some(&media), &settings);
        i.is_mouse_over = true;
        assert!(compute(&i).is_background_visible);

        let always = SettingsSnapshot {
            always_show_background: true,
            ..SettingsSnapshot::default()
        };
        assert!(compute(&inputs(Some(&media), &always)).is_background_visible);
    }

    #[test]
    fn opacity_is_full_when_background_visible() {
        let settings = SettingsSnapshot {
            lyric_opacity: 0.4,
            ..SettingsSnapshot::default()
        };
        let media = loaded_media(false);

        let hidden = compute(&inputs(Some(&media), &settings));
        assert!((hidden.lyric_opacity - 0.4).abs() < f64::EPSILON);

        let mut i = inputs(Some(&media), &settings);
        i.is_mouse_over = true;
        let visible = compute(&i);
        assert!((visible.lyric_opacity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn karaoke_requires_setting_and_lyric() {
        let settings = SettingsSnapshot::default();
        let with_lyric = loaded_media(true);
        let without_lyric = loaded_media(false);
        assert!(compute(&inputs(Some(&with_lyric), &settings)).actual_karaoke_enabled);
        assert!(!compute(&inputs(Some(&without_lyric), &settings)).actual_karaoke_enabled);

        let disabled = SettingsSnapshot {
            karaoke_enabled: false,
            ..SettingsSnapshot::default()
        };
        assert!(!compute(&inputs(Some(&with_lyric), &disabled)).actual_karaoke_enabled);
    }

    #[test]
    fn title_button_hidden_when_transparent() {
        let transparent = SettingsSnapshot {
            window_transparent: true,
            ..SettingsSnapshot::default()
        };
        let media = loaded_media(false);
        assert!(!compute(&inputs(Some(&media), &transparent)).is_title_button_visible);
    }
}
