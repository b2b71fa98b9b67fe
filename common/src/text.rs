pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut result = String::new();
    for c in text.chars().take(max_len.saturating_sub(3)) {
        result.push(c);
    }
    result.push_str("...");
    result
}

/// 将任意空白（含换行）折叠为单个空格
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 按显示字符截断，超出时保留前 `max_chars` 个字符并追加省略号
pub fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut result: String = text.chars().take(max_chars).collect();
    result.push_str("...");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_joins_lines() {
        assert_eq!(collapse_whitespace("  hello\n\n  world\t!  "), "hello world !");
    }

    #[test]
    fn truncate_display_keeps_short_text() {
        assert_eq!(truncate_display("short", 44), "short");
        let long = "x".repeat(50);
        let out = truncate_display(&long, 44);
        assert_eq!(out.chars().count(), 47);
        assert!(out.ends_with("..."));
    }
}
