//! 搜索范围枚举
//!
//! 在调用线程上同步校验范围（文档/选区/目录是否存在、glob 是否合法），
//! 真正的目录遍历推迟到后台 worker 中惰性进行。

use crate::kernel::services::ports::search::{
    DocumentId, EngineError, ScopeError, SearchConfig, SearchScope, SourceId,
};
use crate::kernel::services::ports::FindSettings;
use crate::models::DocumentHandle;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::{DirEntry, Walk, WalkBuilder};
use rustc_hash::FxHashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// UI 层提供的外部句柄
#[derive(Clone, Default)]
pub struct SearchTargets {
    pub current_document: Option<DocumentHandle>,
    /// 当前文档中的选区（字节区间）
    pub selection: Option<Range<usize>>,
    pub open_documents: Vec<DocumentHandle>,
    pub search_folder: Option<PathBuf>,
}

impl SearchTargets {
    pub fn document(document: DocumentHandle) -> Self {
        Self {
            current_document: Some(document),
            ..Self::default()
        }
    }

    pub fn selection(document: DocumentHandle, selection: Range<usize>) -> Self {
        Self {
            current_document: Some(document),
            selection: Some(selection),
            ..Self::default()
        }
    }

    pub fn open_documents(documents: Vec<DocumentHandle>) -> Self {
        Self {
            open_documents: documents,
            ..Self::default()
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            search_folder: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_open_documents(mut self, documents: Vec<DocumentHandle>) -> Self {
        self.open_documents = documents;
        self
    }

    /// 当前文档 + 打开的文档，按 id 去重
    pub fn documents(&self) -> FxHashMap<DocumentId, DocumentHandle> {
        let mut map = FxHashMap::default();
        for handle in self.current_document.iter().chain(&self.open_documents) {
            if let Some(id) = read_id(handle) {
                map.entry(id).or_insert_with(|| handle.clone());
            }
        }
        map
    }
}

/// 一个待搜索的文本来源
#[derive(Clone)]
pub enum TextSource {
    Document {
        id: DocumentId,
        handle: DocumentHandle,
        /// 只搜索该字节区间（选区范围）
        range: Option<Range<usize>>,
    },
    File {
        path: PathBuf,
    },
}

impl TextSource {
    pub fn id(&self) -> SourceId {
        match self {
            TextSource::Document { id, .. } => SourceId::Document(*id),
            TextSource::File { path } => SourceId::File(path.clone()),
        }
    }
}

impl std::fmt::Debug for TextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextSource::Document { id, range, .. } => f
                .debug_struct("Document")
                .field("id", id)
                .field("range", range)
                .finish(),
            TextSource::File { path } => f.debug_struct("File").field("path", path).finish(),
        }
    }
}

/// 枚举阶段就失败的来源（如目录遍历时无权限）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: SourceId,
    pub error: EngineError,
}

pub type SourceEntry = Result<TextSource, SourceFailure>;

/// 已校验的范围；`sources()` 产生惰性来源序列
#[derive(Clone)]
pub enum ScopePlan {
    Fixed(Vec<TextSource>),
    Folder(FolderWalk),
}

#[derive(Clone)]
pub struct FolderWalk {
    root: PathBuf,
    overrides: Option<Override>,
    follow_links: bool,
    search_hidden_folders: bool,
    respect_ignore_files: bool,
    /// 已打开文档按路径索引，遍历到同一路径时搜索内存中的内容
    open_by_path: FxHashMap<PathBuf, (DocumentId, DocumentHandle)>,
}

impl ScopePlan {
    pub fn resolve(
        config: &SearchConfig,
        targets: &SearchTargets,
        settings: &FindSettings,
    ) -> Result<Self, ScopeError> {
        match config.scope {
            SearchScope::Document => {
                let handle = targets
                    .current_document
                    .as_ref()
                    .ok_or(ScopeError::MissingDocument)?;
                let id = read_id(handle).ok_or(ScopeError::MissingDocument)?;
                Ok(Self::Fixed(vec![TextSource::Document {
                    id,
                    handle: handle.clone(),
                    range: None,
                }]))
            }
            SearchScope::Selection => {
                let handle = targets
                    .current_document
                    .as_ref()
                    .ok_or(ScopeError::MissingDocument)?;
                let range = targets
                    .selection
                    .clone()
                    .ok_or(ScopeError::MissingSelection)?;
                let doc = handle.read().map_err(|_| ScopeError::MissingDocument)?;
                let len = doc.len_bytes();
                if range.start >= range.end
                    || range.end > len
                    || !doc.is_char_boundary(range.start)
                    || !doc.is_char_boundary(range.end)
                {
                    return Err(ScopeError::InvalidSelection {
                        start: range.start,
                        end: range.end,
                        len,
                    });
                }
                Ok(Self::Fixed(vec![TextSource::Document {
                    id: doc.id(),
                    handle: handle.clone(),
                    range: Some(range),
                }]))
            }
            SearchScope::OpenFiles => {
                let mut seen = Vec::new();
                let mut sources = Vec::new();
                for handle in &targets.open_documents {
                    let Some(id) = read_id(handle) else {
                        continue;
                    };
                    if seen.contains(&id) {
                        continue;
                    }
                    seen.push(id);
                    sources.push(TextSource::Document {
                        id,
                        handle: handle.clone(),
                        range: None,
                    });
                }
                Ok(Self::Fixed(sources))
            }
            SearchScope::Folder => {
                let folder = targets
                    .search_folder
                    .as_ref()
                    .ok_or(ScopeError::MissingFolder)?;
                FolderWalk::new(folder, config, targets, settings).map(Self::Folder)
            }
        }
    }

    pub fn sources(self) -> Box<dyn Iterator<Item = SourceEntry>> {
        match self {
            ScopePlan::Fixed(sources) => Box::new(sources.into_iter().map(Ok)),
            ScopePlan::Folder(walk) => Box::new(walk.into_iter()),
        }
    }
}

impl FolderWalk {
    fn new(
        folder: &Path,
        config: &SearchConfig,
        targets: &SearchTargets,
        settings: &FindSettings,
    ) -> Result<Self, ScopeError> {
        let inaccessible = |message: String| ScopeError::FolderInaccessible {
            path: folder.to_path_buf(),
            message,
        };
        let root = folder
            .canonicalize()
            .map_err(|e| inaccessible(e.to_string()))?;
        if !root.is_dir() {
            return Err(inaccessible("not a directory".to_string()));
        }
        std::fs::read_dir(&root).map_err(|e| inaccessible(e.to_string()))?;

        let glob = if config.glob_pattern.trim().is_empty() {
            settings.default_glob.as_str()
        } else {
            config.glob_pattern.as_str()
        };
        let overrides = build_overrides(&root, glob)?;

        let mut open_by_path = FxHashMap::default();
        for (id, handle) in targets.documents() {
            let path = match handle.read() {
                Ok(doc) => doc.path().map(Path::to_path_buf),
                Err(_) => None,
            };
            if let Some(path) = path {
                let path = path.canonicalize().unwrap_or(path);
                open_by_path.insert(path, (id, handle));
            }
        }

        Ok(Self {
            root,
            overrides,
            follow_links: config.follow_links,
            search_hidden_folders: config.search_hidden_folders,
            respect_ignore_files: config.respect_ignore_files,
            open_by_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walker(&self) -> Walk {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .follow_links(self.follow_links)
            .ignore(self.respect_ignore_files)
            .parents(self.respect_ignore_files)
            .git_ignore(self.respect_ignore_files)
            .git_global(self.respect_ignore_files)
            .git_exclude(self.respect_ignore_files)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        if let Some(overrides) = &self.overrides {
            builder.overrides(overrides.clone());
        }
        if !self.search_hidden_folders {
            builder.filter_entry(|entry| !is_hidden_dir(entry));
        }
        builder.build()
    }
}

impl IntoIterator for FolderWalk {
    type Item = SourceEntry;
    type IntoIter = FolderSources;

    fn into_iter(self) -> Self::IntoIter {
        FolderSources {
            walk: self.walker(),
            root: self.root,
            open_by_path: self.open_by_path,
        }
    }
}

/// 深度优先、按文件名排序的目录遍历
pub struct FolderSources {
    walk: Walk,
    root: PathBuf,
    open_by_path: FxHashMap<PathBuf, (DocumentId, DocumentHandle)>,
}

impl Iterator for FolderSources {
    type Item = SourceEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = error_path(&err).unwrap_or_else(|| self.root.clone());
                    tracing::warn!(path = %path.display(), error = %err, "walk entry failed");
                    return Some(Err(SourceFailure {
                        source: SourceId::File(path),
                        error: EngineError::Io {
                            kind: err
                                .io_error()
                                .map(std::io::Error::kind)
                                .unwrap_or(std::io::ErrorKind::Other),
                            message: err.to_string(),
                        },
                    }));
                }
            };

            // path.is_file() 跟随符号链接：链接到文件的条目照常搜索
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if let Some((id, handle)) = self.open_by_path.get(path) {
                return Some(Ok(TextSource::Document {
                    id: *id,
                    handle: handle.clone(),
                    range: None,
                }));
            }
            return Some(Ok(TextSource::File {
                path: path.to_path_buf(),
            }));
        }
    }
}

fn build_overrides(root: &Path, glob: &str) -> Result<Option<Override>, ScopeError> {
    let globs: Vec<&str> = glob
        .split(';')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .collect();
    if globs.is_empty() {
        return Ok(None);
    }

    let invalid = |message: String| ScopeError::InvalidGlob {
        glob: glob.to_string(),
        message,
    };
    let mut builder = OverrideBuilder::new(root);
    for g in globs {
        builder.add(g).map_err(|e| invalid(e.to_string()))?;
    }
    builder.build().map(Some).map_err(|e| invalid(e.to_string()))
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_some_and(|t| t.is_dir())
        && entry.file_name().to_string_lossy().starts_with('.')
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

fn read_id(handle: &DocumentHandle) -> Option<DocumentId> {
    handle.read().ok().map(|doc| doc.id())
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/scope.rs"]
mod tests;
