/// 从会话 ID（通常是 AUMID 或可执行文件名）中提取一个更易读的显示名称。
///
/// ## 解析逻辑
/// 1.  **对于标准可执行文件名** (如 "Spotify.exe"):
///     直接返回文件名本身，因为这已经足够清晰。
/// 2.  **对于 UWP 应用的 AUMID** (如 "`48848aaaaaaccd.HyPlayer_xxxxxxxx!App`"):
///     a. 取 `!` 之前的部分
///     b. 取 `_` 之前的部分
///     c. 取最后一个 `.` 之后的部分
///     d. 对其进行处理：
///        - 在小写字母和大写字母之间插入空格
///        - 移除常见的后缀（如 "Win", "Uwp"）并修剪空格
/// 3.  如果任何步骤失败，则返回原始 ID 作为后备。
pub(crate) fn display_name_from_aumid(id_str: &str) -> String {
    // 1: 如果不包含 '!'，很可能是一个简单的可执行文件名。
    if !id_str.contains('!') {
        return id_str.to_string();
    }

    // 2: 处理 UWP 的 AUMID 格式。
    // 格式: Publisher.AppName_PublisherId!ApplicationId
    let prettified_name = id_str
        .split('!')
        .next()
        .and_then(|pfn| pfn.split('_').next())
        .and_then(|name_part| name_part.rsplit('.').next())
        .map(|app_name| {
            let mut pretty = String::with_capacity(app_name.len() + 5);
            let mut chars = app_name.chars().peekable();
            while let Some(current) = chars.next() {
                pretty.push(current);
                if let Some(&next) = chars.peek() {
                    // 在小写和大写字母之间插入空格
                    if current.is_lowercase() && next.is_uppercase() {
                        pretty.push(' ');
                    }
                }
            }
            pretty
                .trim_end_matches("Win")
                .trim_end_matches("Uwp")
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty());

    prettified_name.unwrap_or_else(|| id_str.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_executable_name_is_kept() {
        assert_eq!(display_name_from_aumid("Spotify.exe"), "Spotify.exe");
    }

    #[test]
    fn uwp_aumid_is_prettified() {
        assert_eq!(
            display_name_from_aumid("AppleInc.AppleMusicWin_nzyj5cx40ttqa!App"),
            "Apple Music"
        );
        assert_eq!(
            display_name_from_aumid("48848aaaaaaccd.HyPlayer_1a2b3c4d!App"),
            "Hy Player"
        );
    }

    #[test]
    fn degenerate_aumid_falls_back_to_raw_id() {
        assert_eq!(display_name_from_aumid(".!App"), ".!App");
    }
}
