use super::*;

fn span(source: &SourceId, start: usize, end: usize) -> MatchSpan {
    MatchSpan {
        source: source.clone(),
        version: 0,
        start,
        end,
        matched_text: "x".repeat(end - start),
        captures: Vec::new(),
    }
}

fn file(name: &str) -> SourceId {
    SourceId::File(PathBuf::from(name))
}

fn two_file_tree() -> ResultTree {
    let a = file("a.txt");
    let b = file("b.txt");
    let mut tree = ResultTree::new();
    tree.insert(a.clone(), vec![span(&a, 0, 3), span(&a, 10, 13)], None);
    tree.insert(b.clone(), vec![span(&b, 4, 7)], None);
    tree
}

#[test]
fn test_next_after_within_source() {
    let tree = two_file_tree();
    let cursor = FindCursor::new(file("a.txt"), 3);
    let nav = tree.next_after(Some(&cursor), true);
    assert_eq!(nav, Navigation::Found(span(&file("a.txt"), 10, 13)));
}

#[test]
fn test_next_after_moves_to_next_source() {
    let tree = two_file_tree();
    let cursor = FindCursor::new(file("a.txt"), 13);
    let nav = tree.next_after(Some(&cursor), true);
    assert_eq!(nav.span().map(|s| &s.source), Some(&file("b.txt")));
    assert!(!nav.is_wrapped());
}

#[test]
fn test_next_after_wraps_to_first_match() {
    let tree = two_file_tree();
    let cursor = FindCursor::new(file("b.txt"), 7);
    let nav = tree.next_after(Some(&cursor), true);
    assert_eq!(nav, Navigation::Wrapped(span(&file("a.txt"), 0, 3)));
}

#[test]
fn test_next_after_without_wrap_stops() {
    let tree = two_file_tree();
    let cursor = FindCursor::new(file("b.txt"), 7);
    assert_eq!(tree.next_after(Some(&cursor), false), Navigation::NoMoreMatches);
}

#[test]
fn test_next_after_without_cursor_returns_first() {
    let tree = two_file_tree();
    assert_eq!(
        tree.next_after(None, false),
        Navigation::Found(span(&file("a.txt"), 0, 3))
    );
    let unknown = FindCursor::new(file("zzz.txt"), 0);
    assert_eq!(
        tree.next_after(Some(&unknown), false),
        Navigation::Found(span(&file("a.txt"), 0, 3))
    );
}

#[test]
fn test_previous_before_and_wrap() {
    let tree = two_file_tree();
    let cursor = FindCursor::new(file("a.txt"), 10);
    assert_eq!(
        tree.previous_before(Some(&cursor), true),
        Navigation::Found(span(&file("a.txt"), 0, 3))
    );

    let cursor = FindCursor::new(file("b.txt"), 4);
    assert_eq!(
        tree.previous_before(Some(&cursor), true),
        Navigation::Found(span(&file("a.txt"), 10, 13))
    );

    let cursor = FindCursor::new(file("a.txt"), 0);
    assert_eq!(
        tree.previous_before(Some(&cursor), true),
        Navigation::Wrapped(span(&file("b.txt"), 4, 7))
    );
    assert_eq!(
        tree.previous_before(Some(&cursor), false),
        Navigation::NoMoreMatches
    );
}

/// a 有匹配，b 扫描过但没有匹配，c 有匹配
fn tree_with_empty_middle() -> ResultTree {
    let a = file("a.txt");
    let c = file("c.txt");
    let mut tree = ResultTree::new();
    tree.insert(a.clone(), vec![span(&a, 0, 6)], None);
    tree.visit(&file("b.txt"));
    tree.insert(c.clone(), vec![span(&c, 0, 6)], None);
    tree
}

#[test]
fn test_next_after_source_without_matches_continues_forward() {
    let tree = tree_with_empty_middle();
    let cursor = FindCursor::new(file("b.txt"), 0);
    assert_eq!(
        tree.next_after(Some(&cursor), false),
        Navigation::Found(span(&file("c.txt"), 0, 6))
    );
    assert_eq!(
        tree.previous_before(Some(&cursor), false),
        Navigation::Found(span(&file("a.txt"), 0, 6))
    );
}

#[test]
fn test_source_without_matches_at_end_honors_wrap() {
    let a = file("a.txt");
    let mut tree = ResultTree::new();
    tree.insert(a.clone(), vec![span(&a, 0, 3)], None);
    tree.visit(&file("z.txt"));

    let cursor = FindCursor::new(file("z.txt"), 0);
    assert_eq!(tree.next_after(Some(&cursor), false), Navigation::NoMoreMatches);
    assert_eq!(
        tree.next_after(Some(&cursor), true),
        Navigation::Wrapped(span(&a, 0, 3))
    );
}

#[test]
fn test_pruned_source_reinserted_in_enumeration_order() {
    let a = file("a.txt");
    let b = file("b.txt");
    let mut tree = two_file_tree();
    tree.get_mut(&a).unwrap().spans.clear();
    tree.prune();
    assert_eq!(tree.sources()[0].source, b);

    tree.insert(a.clone(), vec![span(&a, 2, 5)], None);
    assert_eq!(tree.sources()[0].source, a);
    assert_eq!(tree.spans(&a), &[span(&a, 2, 5)]);
    assert_eq!(tree.spans(&b), &[span(&b, 4, 7)]);
}

#[test]
fn test_empty_tree_navigation() {
    let tree = ResultTree::new();
    assert_eq!(tree.next_after(None, true), Navigation::NoMoreMatches);
    assert_eq!(tree.previous_before(None, true), Navigation::NoMoreMatches);
}

#[test]
fn test_cursor_after_span_skips_current_match() {
    let tree = two_file_tree();
    let current = span(&file("a.txt"), 0, 3);
    let nav = tree.next_after(Some(&FindCursor::after(&current)), true);
    assert_eq!(nav.span().map(|s| s.start), Some(10));
}

#[test]
fn test_insert_replaces_existing_source() {
    let a = file("a.txt");
    let mut tree = two_file_tree();
    tree.insert(a.clone(), vec![span(&a, 1, 2)], None);
    assert_eq!(tree.source_count(), 2);
    assert_eq!(tree.spans(&a), &[span(&a, 1, 2)]);
    assert_eq!(tree.match_count(), 2);
}

#[test]
fn test_prune_keeps_failures() {
    let a = file("a.txt");
    let bad = file("bad.bin");
    let mut tree = two_file_tree();
    tree.insert(
        bad.clone(),
        Vec::new(),
        Some(EngineError::InvalidUtf8 { valid_up_to: 3 }),
    );
    tree.get_mut(&a).unwrap().spans.clear();
    tree.prune();

    assert!(tree.get(&a).is_none());
    assert!(tree.get(&bad).is_some());
    assert_eq!(tree.failures().count(), 1);
    assert_eq!(tree.spans(&file("b.txt")).len(), 1);
}

#[test]
fn test_search_config_serde_defaults() {
    let config: SearchConfig =
        serde_json::from_str(r#"{"find_string":"foo","scope":"open_files"}"#).unwrap();
    assert_eq!(config.find_string, "foo");
    assert_eq!(config.scope, SearchScope::OpenFiles);
    assert!(config.wrap_around);
    assert!(config.respect_ignore_files);
    assert!(!config.regular_expression);
}

#[test]
fn test_start_error_class() {
    let e: StartError = PatternError::Empty.into();
    assert_eq!(e.class(), ErrorClass::Pattern);
    let e: StartError = ScopeError::MissingFolder.into();
    assert_eq!(e.class(), ErrorClass::Scope);
    assert_eq!(e.to_string(), "No search folder set");
}

#[test]
fn test_replace_error_source_id() {
    let e = ReplaceError::Stale {
        source: file("a.txt"),
        expected: 1,
        actual: 2,
    };
    assert_eq!(e.source_id(), &file("a.txt"));
}
