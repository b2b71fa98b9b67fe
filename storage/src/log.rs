use anyhow::{Context, Result};
use std::path::Path;

/// 只保留日志文件的最后 max_lines 行
pub fn rotate_log<P: AsRef<Path>>(path: P, max_lines: usize) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }

    let content =
        std::fs::read_to_string(path).with_context(|| format!("无法读取日志文件: {:?}", path))?;
    let lines: Vec<&str> = content.lines().collect();

    if lines.len() <= max_lines {
        return Ok(());
    }

    let start_idx = lines.len().saturating_sub(max_lines);
    let mut new_content = lines[start_idx..].join("\n");
    new_content.push('\n');
    std::fs::write(path, new_content).with_context(|| format!("无法写入日志文件: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let path = std::env::temp_dir().join(format!("rotate_log_test_{}", std::process::id()));
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        rotate_log(&path, 2).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c\nd\n");

        rotate_log(&path, 10).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c\nd\n");

        let _ = std::fs::remove_file(&path);
    }
}
