use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = TesseraPath::config_path("tessera.toml"); // config/tessera.toml
/// let shader = TesseraPath::shader_src_path("mesh.vert"); // shader/src/mesh.vert
/// ```
pub struct TesseraPath {}
impl TesseraPath {
    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }

    /// 获取 `shader/src/` 目录下的着色器源码路径
    pub fn shader_src_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("shader").join("src").join(filename)
    }

    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        // 从 crates/tessera-tools 到 workspace root
        manifest_dir.ancestors().nth(2).unwrap_or(manifest_dir).to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_path_contains_crates_dir() {
        let root = TesseraPath::workspace_path();
        assert!(root.join("crates").join("tessera-tools").exists());
    }

    #[test]
    fn test_config_path_under_workspace() {
        let path = TesseraPath::config_path("tessera.toml");
        assert!(path.starts_with(TesseraPath::workspace_path()));
        assert!(path.ends_with("config/tessera.toml"));
    }
}
