//! 模式编译器
//!
//! - Literal 模式：memchr 子串搜索；忽略大小写时 ASCII 模式串走小写比较，
//!   非 ASCII 模式串退化为转义后的大小写不敏感正则
//! - 忽略空白（仅字面量）：模式串中每段空白匹配文本中任意一段非空空白
//! - Regex 模式：regex crate；忽略空白在正则模式下不生效

use crate::kernel::services::ports::search::{MatchSpan, PatternError, SearchConfig, SourceId};
use memchr::memmem::Finder;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::ops::Range;

#[derive(Clone)]
enum Matcher {
    Literal {
        /// 忽略大小写时已转为小写
        needle: Vec<u8>,
        fold_ascii: bool,
        finder: Finder<'static>,
    },
    Regex {
        regex: Regex,
    },
}

/// 编译好的匹配器，一次搜索只编译一次
#[derive(Clone)]
pub struct Pattern {
    matcher: Matcher,
    full_words: bool,
    /// 替换串是否展开 `$1` / `${name}`（仅用户显式开启正则时）
    expands_replacement: bool,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.matcher {
            Matcher::Literal { needle, .. } => {
                format!("Literal({:?})", String::from_utf8_lossy(needle))
            }
            Matcher::Regex { regex } => format!("Regex({:?})", regex.as_str()),
        };
        f.debug_struct("Pattern")
            .field("matcher", &kind)
            .field("full_words", &self.full_words)
            .finish()
    }
}

/// 模式在一段文本中的一次命中（偏移相对于传入的文本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'t> {
    pub start: usize,
    pub end: usize,
    pub text: &'t str,
    pub captures: Vec<Option<&'t str>>,
}

impl PatternMatch<'_> {
    /// 转成结果数据；`base` 是文本在来源中的起始偏移（选区搜索时非零）
    pub fn to_span(&self, source: &SourceId, version: u64, base: usize) -> MatchSpan {
        MatchSpan {
            source: source.clone(),
            version,
            start: base + self.start,
            end: base + self.end,
            matched_text: self.text.to_string(),
            captures: self
                .captures
                .iter()
                .map(|c| c.map(str::to_string))
                .collect(),
        }
    }
}

impl Pattern {
    pub fn compile(config: &SearchConfig) -> Result<Self, PatternError> {
        Self::build(
            &config.find_string,
            config.ignore_case,
            config.ignore_whitespace,
            config.regular_expression,
            config.full_words,
        )
    }

    pub fn literal(pattern: &str, ignore_case: bool) -> Result<Self, PatternError> {
        Self::build(pattern, ignore_case, false, false, false)
    }

    pub fn regex(pattern: &str, ignore_case: bool) -> Result<Self, PatternError> {
        Self::build(pattern, ignore_case, false, true, false)
    }

    fn build(
        pattern: &str,
        ignore_case: bool,
        ignore_whitespace: bool,
        regular_expression: bool,
        full_words: bool,
    ) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let matcher = if regular_expression {
            Matcher::Regex {
                regex: build_regex(pattern, pattern, ignore_case)?,
            }
        } else if ignore_whitespace && pattern.chars().any(char::is_whitespace) {
            Matcher::Regex {
                regex: build_regex(&whitespace_insensitive(pattern), pattern, ignore_case)?,
            }
        } else if ignore_case && !pattern.is_ascii() {
            Matcher::Regex {
                regex: build_regex(&regex::escape(pattern), pattern, true)?,
            }
        } else {
            let needle = if ignore_case {
                pattern.to_ascii_lowercase().into_bytes()
            } else {
                pattern.as_bytes().to_vec()
            };
            let finder = Finder::new(&needle).into_owned();
            Matcher::Literal {
                needle,
                fold_ascii: ignore_case,
                finder,
            }
        };

        Ok(Self {
            matcher,
            full_words,
            expands_replacement: regular_expression,
        })
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.matcher, Matcher::Regex { .. })
    }

    pub fn expands_replacement(&self) -> bool {
        self.expands_replacement
    }

    /// 所有不重叠的匹配（惰性、可重复调用）
    pub fn find_all_in<'p, 't>(&'p self, text: &'t str) -> Matches<'p, 't> {
        self.find_all_within(text, 0..text.len())
    }

    /// 完全落在 `range` 内的匹配；区间外的文本仍作为上下文参与整词和正则断言判断
    pub fn find_all_within<'p, 't>(
        &'p self,
        text: &'t str,
        range: Range<usize>,
    ) -> Matches<'p, 't> {
        let folded = match &self.matcher {
            Matcher::Literal {
                fold_ascii: true, ..
            } => Some(Cow::Owned(text.as_bytes().to_ascii_lowercase())),
            _ => None,
        };
        Matches {
            pattern: self,
            text,
            folded,
            pos: range.start,
            limit: range.end.min(text.len()),
        }
    }

    /// `offset` 处或之后的第一个匹配
    pub fn find_at<'t>(&self, text: &'t str, offset: usize) -> Option<PatternMatch<'t>> {
        let folded = match &self.matcher {
            Matcher::Literal {
                fold_ascii: true, ..
            } => Some(Cow::Owned(text.as_bytes().to_ascii_lowercase())),
            _ => None,
        };
        self.next_accepted(text, folded.as_deref(), offset)
    }

    /// 恰好从 `offset` 开始的匹配
    pub fn match_at<'t>(&self, text: &'t str, offset: usize) -> Option<PatternMatch<'t>> {
        if offset > text.len() || !text.is_char_boundary(offset) {
            return None;
        }
        if let Matcher::Literal {
            needle, fold_ascii, ..
        } = &self.matcher
        {
            let end = offset + needle.len();
            let candidate = text.as_bytes().get(offset..end)?;
            let hit = if *fold_ascii {
                candidate.eq_ignore_ascii_case(needle)
            } else {
                candidate == needle.as_slice()
            };
            if !hit || (self.full_words && !is_word_bounded(text, offset, end)) {
                return None;
            }
            return Some(PatternMatch {
                start: offset,
                end,
                text: &text[offset..end],
                captures: Vec::new(),
            });
        }
        self.find_at(text, offset).filter(|m| m.start == offset)
    }

    /// 展开替换串；非正则模式原样返回
    ///
    /// 支持 `$n`、`${n}`、`$name`、`${name}` 和 `$$`，取值来自匹配时保存的捕获组，
    /// 不存在的组展开为空串。
    pub fn expand_replacement(&self, span: &MatchSpan, replacement: &str) -> String {
        let Matcher::Regex { regex } = &self.matcher else {
            return replacement.to_string();
        };
        if !self.expands_replacement {
            return replacement.to_string();
        }

        let mut out = String::with_capacity(replacement.len());
        let mut rest = replacement;
        while let Some(i) = rest.find('$') {
            out.push_str(&rest[..i]);
            rest = &rest[i + 1..];

            if let Some(tail) = rest.strip_prefix('$') {
                out.push('$');
                rest = tail;
                continue;
            }

            let (name, tail) = match rest.strip_prefix('{') {
                Some(braced) => match braced.find('}') {
                    Some(j) => (&braced[..j], &braced[j + 1..]),
                    None => {
                        out.push('$');
                        continue;
                    }
                },
                None => {
                    let n = rest
                        .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                        .unwrap_or(rest.len());
                    (&rest[..n], &rest[n..])
                }
            };
            if name.is_empty() {
                out.push('$');
                continue;
            }
            if let Some(value) = group_value(regex, span, name) {
                out.push_str(value);
            }
            rest = tail;
        }
        out.push_str(rest);
        out
    }

    fn next_accepted<'t>(
        &self,
        text: &'t str,
        folded: Option<&[u8]>,
        mut pos: usize,
    ) -> Option<PatternMatch<'t>> {
        while pos <= text.len() {
            let m = self.raw_find(text, folded, pos)?;
            if m.start == m.end || (self.full_words && !is_word_bounded(text, m.start, m.end)) {
                pos = next_char_boundary(text, m.start);
                continue;
            }
            return Some(m);
        }
        None
    }

    fn raw_find<'t>(
        &self,
        text: &'t str,
        folded: Option<&[u8]>,
        pos: usize,
    ) -> Option<PatternMatch<'t>> {
        match &self.matcher {
            Matcher::Literal { needle, finder, .. } => {
                let hay = folded.unwrap_or(text.as_bytes());
                let start = pos + finder.find(hay.get(pos..)?)?;
                let end = start + needle.len();
                Some(PatternMatch {
                    start,
                    end,
                    text: &text[start..end],
                    captures: Vec::new(),
                })
            }
            Matcher::Regex { regex } => {
                if regex.captures_len() <= 1 {
                    let m = regex.find_at(text, pos)?;
                    return Some(PatternMatch {
                        start: m.start(),
                        end: m.end(),
                        text: m.as_str(),
                        captures: Vec::new(),
                    });
                }
                let caps = regex.captures_at(text, pos)?;
                let whole = caps.get(0)?;
                Some(PatternMatch {
                    start: whole.start(),
                    end: whole.end(),
                    text: whole.as_str(),
                    captures: caps.iter().skip(1).map(|c| c.map(|m| m.as_str())).collect(),
                })
            }
        }
    }
}

/// find_all_in 的迭代器
pub struct Matches<'p, 't> {
    pattern: &'p Pattern,
    text: &'t str,
    folded: Option<Cow<'t, [u8]>>,
    pos: usize,
    limit: usize,
}

impl<'t> Iterator for Matches<'_, 't> {
    type Item = PatternMatch<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos > self.limit {
            return None;
        }
        match self
            .pattern
            .next_accepted(self.text, self.folded.as_deref(), self.pos)
        {
            Some(m) if m.end <= self.limit => {
                // 从匹配末尾继续，保证不重叠
                self.pos = m.end;
                Some(m)
            }
            _ => {
                self.pos = self.limit + 1;
                None
            }
        }
    }
}

fn group_value<'s>(regex: &Regex, span: &'s MatchSpan, name: &str) -> Option<&'s str> {
    let index = match name.parse::<usize>() {
        Ok(i) => i,
        Err(_) => regex.capture_names().position(|n| n == Some(name))?,
    };
    if index == 0 {
        return Some(&span.matched_text);
    }
    span.captures.get(index - 1)?.as_deref()
}

fn build_regex(expr: &str, original: &str, ignore_case: bool) -> Result<Regex, PatternError> {
    RegexBuilder::new(expr)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| regex_error(&e, original))
}

fn regex_error(err: &regex::Error, pattern: &str) -> PatternError {
    let message = err.to_string();
    PatternError::InvalidRegex {
        position: caret_position(&message, pattern),
        message,
    }
}

/// 从 regex 的错误渲染中取出 `^` 所在列
///
/// 单行模式串的错误形如：
/// ```text
/// regex parse error:
///     a(b
///      ^
/// error: unclosed group
/// ```
fn caret_position(message: &str, pattern: &str) -> Option<usize> {
    const INDENT: usize = 4;
    if pattern.contains('\n') {
        return None;
    }
    let mut lines = message.lines().skip(1);
    let echoed = lines.next()?;
    if echoed.get(INDENT..)? != pattern {
        return None;
    }
    let carets = lines.next()?;
    let col = carets.find('^')?;
    let col = col.checked_sub(INDENT)?;
    // 渲染按字符对齐，换算回字节偏移
    pattern.char_indices().nth(col).map(|(i, _)| i)
}

fn whitespace_insensitive(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut in_space = false;
    let mut word = String::new();
    for ch in pattern.chars() {
        if ch.is_whitespace() {
            if !word.is_empty() {
                out.push_str(&regex::escape(&word));
                word.clear();
            }
            if !in_space {
                out.push_str(r"\s+");
                in_space = true;
            }
        } else {
            word.push(ch);
            in_space = false;
        }
    }
    if !word.is_empty() {
        out.push_str(&regex::escape(&word));
    }
    out
}

fn is_word_char(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back().is_some_and(is_word_char);
    let after = text[end..].chars().next().is_some_and(is_word_char);
    !before && !after
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    let mut next = pos + 1;
    while next < text.len() && !text.is_char_boundary(next) {
        next += 1;
    }
    next
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/search/pattern.rs"]
mod tests;
