use super::*;
use crate::kernel::services::ports::search::{RunState, ScopeError, SearchScope};
use std::fs;
use std::sync::mpsc;
use tempfile::tempdir;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

fn run_to_idle(handle: &SearchHandle) {
    assert!(handle.wait_idle(Duration::from_secs(5)), "search timed out");
}

fn doc_search(
    service: &FindService,
    text: &str,
    config: SearchConfig,
) -> (SearchHandle, DocumentHandle) {
    let doc = Document::new(text).into_handle();
    let handle = service
        .start_search(config, SearchTargets::document(doc.clone()))
        .unwrap();
    run_to_idle(&handle);
    (handle, doc)
}

#[test]
fn test_document_search_completes() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("foo", SearchScope::Document);
    let (handle, _doc) = doc_search(&service, "foo bar foo", config);

    let status = handle.current_status();
    assert!(!status.busy);
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.match_count, 2);
    let ranges: Vec<_> = handle
        .current_results()
        .iter_spans()
        .map(MatchSpan::range)
        .collect();
    assert_eq!(ranges, vec![0..3, 8..11]);
}

#[test]
fn test_start_errors_are_synchronous() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());

    let err = service
        .start_search(
            SearchConfig::new("", SearchScope::Document),
            SearchTargets::document(Document::new("x").into_handle()),
        )
        .err();
    assert_eq!(err, Some(StartError::Pattern(PatternError::Empty)));

    let mut config = SearchConfig::new("a(", SearchScope::Document);
    config.regular_expression = true;
    let err = service
        .start_search(config, SearchTargets::document(Document::new("x").into_handle()))
        .err();
    assert!(matches!(
        err,
        Some(StartError::Pattern(PatternError::InvalidRegex { .. }))
    ));

    let err = service
        .start_search(
            SearchConfig::new("x", SearchScope::Folder),
            SearchTargets::default(),
        )
        .err();
    assert_eq!(err, Some(StartError::Scope(ScopeError::MissingFolder)));
}

#[test]
fn test_search_ids_are_unique() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("a", SearchScope::Document);
    let (first, _) = doc_search(&service, "a", config.clone());
    let (second, _) = doc_search(&service, "a", config);
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_events_stream_to_completion() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let (tx, rx) = mpsc::sync_channel(64);

    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "hello world").unwrap();
    fs::write(dir.path().join("b.txt"), "hello rust").unwrap();
    fs::write(dir.path().join("c.txt"), "goodbye").unwrap();

    let handle = service
        .start_search_with_events(
            SearchConfig::new("hello", SearchScope::Folder),
            SearchTargets::folder(dir.path()),
            tx,
        )
        .unwrap();

    let mut sources = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(SearchEvent::SourceMatches {
                search_id, source, ..
            }) => {
                assert_eq!(search_id, handle.id());
                sources.push(source);
            }
            Ok(SearchEvent::Complete {
                total_sources,
                total_matches,
                ..
            }) => {
                assert_eq!(total_sources, 3);
                assert_eq!(total_matches, 2);
                break;
            }
            Ok(SearchEvent::Progress { .. }) => continue,
            Ok(other) => panic!("unexpected event: {:?}", other),
            Err(_) => panic!("Timeout"),
        }
    }
    assert_eq!(sources.len(), 2);
}

#[test]
fn test_cancel_stops_between_sources() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    // 容量为 0：worker 每推送一条事件都要等测试线程接收
    let (tx, rx) = mpsc::sync_channel(0);

    let dir = tempdir().unwrap();
    for i in 0..8 {
        fs::write(dir.path().join(format!("{}.txt", i)), "needle needle").unwrap();
    }

    let handle = service
        .start_search_with_events(
            SearchConfig::new("needle", SearchScope::Folder),
            SearchTargets::folder(dir.path()),
            tx,
        )
        .unwrap();

    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(SearchEvent::SourceMatches { .. }) => {}
        other => panic!("unexpected: {:?}", other),
    }
    handle.cancel();
    assert!(handle.is_cancelled());

    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(SearchEvent::Cancelled { .. }) => break,
            Ok(SearchEvent::SourceMatches { .. }) | Ok(SearchEvent::Progress { .. }) => continue,
            other => panic!("unexpected: {:?}", other),
        }
    }
    run_to_idle(&handle);

    let status = handle.current_status();
    assert_eq!(status.state, RunState::Cancelled);
    let results = handle.current_results();
    assert!(results.source_count() >= 1);
    assert!(results.source_count() < 8);
    // 已提交的来源结果完整
    assert!(results.sources().iter().all(|r| r.spans.len() == 2));
}

#[test]
fn test_find_next_wraps() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("abc", SearchScope::Document);
    let (handle, doc) = doc_search(&service, "abc xyzxyz abc", config);
    let source = doc.read().unwrap().source_id();

    let nav = handle.find_next(Some(&FindCursor::new(source.clone(), 1)));
    assert_eq!(nav.span().map(MatchSpan::range), Some(11..14));
    assert!(!nav.is_wrapped());

    let nav = handle.find_next(Some(&FindCursor::new(source.clone(), 14)));
    assert!(nav.is_wrapped());
    assert_eq!(nav.span().map(MatchSpan::range), Some(0..3));

    let nav = handle.find_previous(Some(&FindCursor::new(source, 0)));
    assert!(nav.is_wrapped());
    assert_eq!(nav.span().map(MatchSpan::range), Some(11..14));
}

#[test]
fn test_find_next_without_wrap() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let mut config = SearchConfig::new("abc", SearchScope::Document);
    config.wrap_around = false;
    let (handle, doc) = doc_search(&service, "abc", config);
    let source = doc.read().unwrap().source_id();
    assert_eq!(
        handle.find_next(Some(&FindCursor::new(source, 3))),
        Navigation::NoMoreMatches
    );
}

#[test]
fn test_find_next_from_document_without_matches() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let docs: Vec<DocumentHandle> = ["needle", "nothing", "needle"]
        .into_iter()
        .map(|text| Document::new(text).into_handle())
        .collect();
    let ids: Vec<SourceId> = docs
        .iter()
        .map(|d| d.read().unwrap().source_id())
        .collect();

    let mut config = SearchConfig::new("needle", SearchScope::OpenFiles);
    config.wrap_around = false;
    let handle = service
        .start_search(config, SearchTargets::open_documents(docs))
        .unwrap();
    run_to_idle(&handle);
    assert_eq!(handle.current_results().source_count(), 2);

    let cursor = FindCursor::new(ids[1].clone(), 3);
    let next = handle.find_next(Some(&cursor));
    assert_eq!(next.span().map(|s| &s.source), Some(&ids[2]));
    assert!(!next.is_wrapped());
    let previous = handle.find_previous(Some(&cursor));
    assert_eq!(previous.span().map(|s| &s.source), Some(&ids[0]));

    let last = FindCursor::new(ids[2].clone(), 6);
    assert_eq!(handle.find_next(Some(&last)), Navigation::NoMoreMatches);
}

#[test]
fn test_replace_updates_document_and_results() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("foo", SearchScope::Document);
    let (handle, doc) = doc_search(&service, "foo bar foo baz foo", config);

    let spans: Vec<MatchSpan> = handle.current_results().iter_spans().cloned().collect();
    let updated = handle
        .replace(&spans[1..2], "quux", ReplaceMode::ReplaceOnly)
        .unwrap();

    assert_eq!(doc.read().unwrap().text(), "foo bar quux baz foo");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].replacements, 1);
    let remaining: Vec<_> = updated[0].remaining.iter().map(MatchSpan::range).collect();
    assert_eq!(remaining, vec![0..3, 17..20]);

    // 剩余匹配已平移，可以直接继续替换
    let spans: Vec<MatchSpan> = handle.current_results().iter_spans().cloned().collect();
    handle.replace(&spans, "x", ReplaceMode::ReplaceOnly).unwrap();
    assert_eq!(doc.read().unwrap().text(), "x bar quux baz x");
    assert_eq!(handle.current_status().match_count, 0);
}

#[test]
fn test_replace_rejects_stale_spans() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("foo", SearchScope::Document);
    let (handle, doc) = doc_search(&service, "foo foo", config);
    let spans: Vec<MatchSpan> = handle.current_results().iter_spans().cloned().collect();

    doc.write().unwrap().replace_range(0..0, "!");
    let err = handle
        .replace(&spans, "bar", ReplaceMode::ReplaceOnly)
        .unwrap_err();
    assert!(matches!(err, ReplaceError::Stale { .. }));
    assert_eq!(doc.read().unwrap().text(), "!foo foo");
    assert_eq!(
        handle.current_status().last_error,
        Some(crate::kernel::services::ports::ErrorClass::Replace)
    );
}

#[test]
fn test_replace_all_is_idempotent_when_pattern_absent() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let mut config = SearchConfig::new("cat", SearchScope::Document);
    config.replace_string = "dog".to_string();
    let (handle, doc) = doc_search(&service, "cat cat", config.clone());

    let updated = handle.replace_all(ReplaceMode::ReplaceOnly).unwrap();
    assert_eq!(updated[0].replacements, 2);
    assert_eq!(doc.read().unwrap().text(), "dog dog");
    assert!(handle.replace_all(ReplaceMode::ReplaceOnly).unwrap().is_empty());

    let again = service
        .start_search(config, SearchTargets::document(doc.clone()))
        .unwrap();
    run_to_idle(&again);
    assert!(again.current_results().is_empty());
    assert!(again.replace_all(ReplaceMode::ReplaceOnly).unwrap().is_empty());
    assert_eq!(doc.read().unwrap().text(), "dog dog");
}

#[test]
fn test_replace_and_continue_rescans() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("ab", SearchScope::Document);
    let (handle, doc) = doc_search(&service, "aabb", config);

    // "aabb" -> 替换中间的 "ab" 为 "ab ab"，重新扫描得到新的匹配
    let spans: Vec<MatchSpan> = handle.current_results().iter_spans().cloned().collect();
    let updated = handle
        .replace(&spans, "ab ab", ReplaceMode::ReplaceAndContinue)
        .unwrap();
    assert_eq!(doc.read().unwrap().text(), "aab abb");
    let remaining: Vec<_> = updated[0].remaining.iter().map(MatchSpan::range).collect();
    assert_eq!(remaining, vec![1..3, 4..6]);
    assert_eq!(handle.current_status().match_count, 2);
}

#[test]
fn test_folder_replace_writes_files() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, "one two one").unwrap();
    fs::write(&b, "two").unwrap();

    let mut config = SearchConfig::new("one", SearchScope::Folder);
    config.replace_string = "1".to_string();
    let handle = service
        .start_search(config, SearchTargets::folder(dir.path()))
        .unwrap();
    run_to_idle(&handle);
    assert_eq!(handle.current_status().match_count, 2);

    handle.replace_all(ReplaceMode::ReplaceOnly).unwrap();
    assert_eq!(fs::read_to_string(&a).unwrap(), "1 two 1");
    assert_eq!(fs::read_to_string(&b).unwrap(), "two");
}

#[test]
fn test_preview() {
    let rt = create_runtime();
    let service = FindService::new(rt.handle().clone());
    let config = SearchConfig::new("needle", SearchScope::Document);
    let (handle, _doc) = doc_search(&service, "first line\nhay needle hay\nlast", config);

    let span = handle.current_results().iter_spans().next().cloned().unwrap();
    let preview = handle.preview(&span, 80).unwrap();
    assert_eq!(preview.line, 1);
    assert_eq!(preview.column, 4);
    assert_eq!(preview.before, "hay ");
    assert_eq!(preview.matched, "needle");
    assert_eq!(preview.after, " hay");
    assert_eq!(preview.line_text(), "hay needle hay");
}

#[test]
fn test_preview_in_trims_context() {
    let text = "aaaaaaaaaa needle bbbbbbbbbb";
    let span = MatchSpan {
        source: SourceId::Document(0),
        version: 0,
        start: 11,
        end: 17,
        matched_text: "needle".to_string(),
        captures: Vec::new(),
    };
    let preview = preview_in(text, &span, 3).unwrap();
    assert_eq!(preview.before, "aa ");
    assert_eq!(preview.after, " bb");

    let out_of_range = MatchSpan {
        start: 40,
        end: 46,
        ..span
    };
    assert!(preview_in(text, &out_of_range, 3).is_none());
}

#[test]
fn test_search_sync_and_find_next_in() {
    let doc = Document::new("x ab ab");
    let config = SearchConfig::new("ab", SearchScope::Document);
    let spans = FindService::search_sync(&doc, &config).unwrap();
    assert_eq!(spans.len(), 2);

    let nav = FindService::find_next_in(&doc, &config, 3).unwrap();
    assert_eq!(nav.span().map(|s| s.start), Some(5));
    let nav = FindService::find_next_in(&doc, &config, 6).unwrap();
    assert!(nav.is_wrapped());
    let nav = FindService::find_previous_in(&doc, &config, 5).unwrap();
    assert_eq!(nav.span().map(|s| s.start), Some(2));

    let empty = SearchConfig::new("zz", SearchScope::Document);
    assert_eq!(
        FindService::find_next_in(&doc, &empty, 0).unwrap(),
        Navigation::NoMoreMatches
    );
}
