//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸）；
//! FsReadTool / FsListTool / FsWriteTool 即别名表中的 fs_read / fs_list / fs_write。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 沙箱文件系统：绑定根目录，校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径（跟随符号链接后仍须在根下）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let relative = self.lexical(path)?;
        let full = self.root_dir.join(relative);
        let canonical = full
            .canonicalize()
            .map_err(|_| format!("Path not found: {path}"))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(format!("Path escapes workspace: {path}"))
        }
    }

    /// 解析写入目标：文件可以不存在，但不得含 .. 或绝对路径
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, String> {
        let relative = self.lexical(path)?;
        if relative.as_os_str().is_empty() {
            return Err("path must name a file".to_string());
        }
        Ok(self.root_dir.join(relative))
    }

    fn lexical(&self, path: &str) -> Result<PathBuf, String> {
        let mut out = PathBuf::new();
        for component in Path::new(path.trim()).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("Path escapes workspace: {path}"));
                }
            }
        }
        Ok(out)
    }

    pub fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {e}"))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = if path.trim().is_empty() || path.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|e| format!("List failed: {e}"))? {
            let e = e.map_err(|e| e.to_string())?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{ty}"));
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub fn write_file(&self, path: &str, content: &str, append: bool) -> Result<usize, String> {
        use std::io::Write;

        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Write failed: {e}"))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&target)
            .map_err(|e| format!("Write failed: {e}"))?;
        file.write_all(content.as_bytes())
            .map_err(|e| format!("Write failed: {e}"))?;
        Ok(content.len())
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// fs_read：读取文件内容
pub struct FsReadTool {
    fs: SafeFs,
}

impl FsReadTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs_read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "file path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").ok_or("missing required parameter 'path'")?;
        tracing::info!(path = %path, "fs_read");
        self.fs.read_file(path)
    }
}

/// fs_list：列出目录
pub struct FsListTool {
    fs: SafeFs,
}

impl FsListTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        "fs_list"
    }

    fn description(&self) -> &str {
        "List a workspace directory; directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "directory path, default '.'"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").unwrap_or(".");
        tracing::info!(path = %path, "fs_list");
        let entries = self.fs.list_dir(path)?;
        Ok(entries.join("\n"))
    }
}

/// fs_write：写入（或追加）文件
pub struct FsWriteTool {
    fs: SafeFs,
}

impl FsWriteTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs_write"
    }

    fn description(&self) -> &str {
        "Write text to a workspace file, creating parent directories."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "append": {"type": "boolean", "default": false}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path").ok_or("missing required parameter 'path'")?;
        let content = str_arg(&args, "content").ok_or("missing required parameter 'content'")?;
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
        tracing::info!(path = %path, append, "fs_write");
        let written = self.fs.write_file(path, content, append)?;
        Ok(format!("wrote {written} bytes to {path}"))
    }
}
