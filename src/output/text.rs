//! Plain-text writer for working proxies, one per line

use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::Path;

pub fn write(proxies: &[&str], path: &Path) -> Result<()> {
    let mut content = proxies.join("\n");
    content.push('\n');
    fs::write(path, content)
        .with_context(|| format!("Failed to write proxy list to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_proxy_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working.txt");

        write(&["http://10.0.0.1:8080", "socks5://10.0.0.2:1080"], &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "http://10.0.0.1:8080\nsocks5://10.0.0.2:1080\n");
    }
}
