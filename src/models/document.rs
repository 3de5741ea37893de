//! 共享文档模型
//!
//! 职责：
//! - 文本存储（Rope）
//! - 版本号：每次编辑递增，替换时据此检测过期匹配
//! - 字节偏移 ↔ 字符偏移映射

use crate::kernel::services::ports::{DocumentId, SourceId};
use ropey::{Rope, RopeSlice};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

static DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_document_id() -> DocumentId {
    DOCUMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// 调用方持有的文档句柄；引擎只读扫描，替换时短暂获取写锁
pub type DocumentHandle = Arc<RwLock<Document>>;

/// 从 RopeSlice 获取字符串，优先零拷贝
pub fn slice_to_cow(slice: RopeSlice<'_>) -> Cow<'_, str> {
    match slice.as_str() {
        Some(s) => Cow::Borrowed(s),
        None => Cow::Owned(slice.to_string()),
    }
}

/// 一次编辑：把 `range`（字节）替换为 `text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    path: Option<PathBuf>,
    rope: Rope,
    version: u64,
}

impl Document {
    pub fn new(text: &str) -> Self {
        Self {
            id: next_document_id(),
            path: None,
            rope: Rope::from_str(text),
            version: 0,
        }
    }

    pub fn with_path(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(text)
        }
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::with_path(path, &text))
    }

    pub fn into_handle(self) -> DocumentHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::Document(self.id)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len_bytes(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn text(&self) -> Cow<'_, str> {
        slice_to_cow(self.rope.slice(..))
    }

    pub fn is_char_boundary(&self, byte: usize) -> bool {
        if byte > self.rope.len_bytes() {
            return false;
        }
        let char_idx = self.rope.byte_to_char(byte);
        self.rope.char_to_byte(char_idx) == byte
    }

    /// 替换一段字节区间，版本号 +1
    pub fn replace_range(&mut self, range: Range<usize>, text: &str) {
        self.edit(&range, text);
        self.version += 1;
    }

    /// 整体替换内容（外部修改），版本号 +1
    pub fn set_text(&mut self, text: &str) {
        self.rope = Rope::from_str(text);
        self.version += 1;
    }

    /// 批量应用编辑，返回新版本号
    ///
    /// `edits` 必须按起始偏移降序且互不重叠，这样前面（文档顺序靠前）的偏移
    /// 不受后面编辑的影响。整批只递增一次版本号。
    pub fn apply_edits(&mut self, edits: &[TextEdit]) -> u64 {
        debug_assert!(edits
            .windows(2)
            .all(|w| w[1].range.end <= w[0].range.start));
        for edit in edits {
            self.edit(&edit.range, &edit.text);
        }
        self.version += 1;
        self.version
    }

    fn edit(&mut self, range: &Range<usize>, text: &str) {
        let start = self.rope.byte_to_char(range.start);
        let end = self.rope.byte_to_char(range.end);
        if end > start {
            self.rope.remove(start..end);
        }
        if !text.is_empty() {
            self.rope.insert(start, text);
        }
    }

    /// 流式写入到 Writer，避免大文件 OOM
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for chunk in self.rope.chunks() {
            writer.write_all(chunk.as_bytes())?;
        }
        Ok(())
    }

    /// 写回关联路径（没有路径时写到 `fallback`）
    pub fn save(&self, fallback: &Path) -> io::Result<()> {
        let path = self.path.as_deref().unwrap_or(fallback);
        write_atomic(path, |writer| self.write_to(writer))
    }
}

/// 先写同目录临时文件再 rename，避免留下写到一半的文件
///
/// 符号链接先解析到目标文件，写入落在目标上，链接本身保持不变。
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut io::BufWriter<File>) -> io::Result<()>,
{
    let target = match std::fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(e),
    };
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.zfind-{}.tmp", name, std::process::id()));

    let result = (|| {
        let mut writer = io::BufWriter::new(File::create(&tmp)?);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        if let Ok(meta) = std::fs::metadata(&target) {
            std::fs::set_permissions(&tmp, meta.permissions())?;
        }
        std::fs::rename(&tmp, &target)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
#[path = "../../tests/unit/models/document.rs"]
mod tests;
