use anyhow::{bail, Result};

pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

// byte_offset 为 UTF-8 字节偏移
pub fn utf16_offset(text: &str, byte_offset: usize) -> usize {
    let mut count = 0;
    for (i, c) in text.char_indices() {
        if i >= byte_offset {
            break;
        }
        count += c.len_utf16();
    }
    count
}

/// UTF-16 偏移转换为字节偏移；偏移落在代理对中间时报错
pub fn byte_from_utf16_offset(text: &str, utf16_offset: usize) -> Result<usize> {
    let mut current = 0;
    for (i, c) in text.char_indices() {
        if current == utf16_offset {
            return Ok(i);
        }
        let next = current + c.len_utf16();
        if next > utf16_offset {
            bail!("UTF-16 偏移 {} 落在字符内部", utf16_offset);
        }
        current = next;
    }
    if current == utf16_offset {
        Ok(text.len())
    } else {
        bail!("UTF-16 偏移 {} 超出文本长度 {}", utf16_offset, current)
    }
}

/// 首次出现位置（UTF-16 单位）
pub fn utf16_find(haystack: &str, needle: &str) -> Option<usize> {
    utf16_find_from(haystack, needle, 0)
}

/// 从 `from`（UTF-16 单位）开始查找首次出现位置
pub fn utf16_find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let start = byte_from_utf16_offset(haystack, from).ok()?;
    let pos = haystack[start..].find(needle)?;
    Some(utf16_offset(haystack, start + pos))
}
