use serde::{Deserialize, Serialize};

/// 查找引擎的可调参数，对应设置文件中的 `find` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindSettings {
    /// 超过该大小（字节）的文件直接跳过
    pub max_file_size: u64,
    pub skip_binary: bool,
    /// 读文件时每块的大小，块之间检查取消
    pub read_chunk_size: usize,
    /// 每处理多少个来源推送一次 Progress
    pub progress_interval: usize,
    /// Folder 范围在配置未指定 glob 时使用
    pub default_glob: String,
}

impl Default for FindSettings {
    fn default() -> Self {
        Self {
            max_file_size: 8 * 1024 * 1024,
            skip_binary: true,
            read_chunk_size: 64 * 1024,
            progress_interval: 100,
            default_glob: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub find: FindSettings,
}
