use rss_notifier_core::{ConfigError, FeedEntry, FilterRule};

fn make_entry(title: &str, summary: &str) -> FeedEntry {
    FeedEntry {
        title: Some(title.into()),
        summary: (!summary.is_empty()).then(|| summary.into()),
        ..Default::default()
    }
}

const NO_PATTERNS: [&str; 0] = [];
const NO_KEYWORDS: [&str; 0] = [];

#[test]
fn keyword_match() {
    let rule = FilterRule::new(["one piece"], NO_PATTERNS).unwrap();
    assert!(rule.matches(&make_entry("New One Piece chapter", "")));
}

#[test]
fn regex_match() {
    let rule = FilterRule::new(NO_KEYWORDS, ["isekai"]).unwrap();
    assert!(rule.matches(&make_entry("A new isekai anime announced", "")));
    assert!(rule.matches(&make_entry("ISEKAI season", "")));
}

#[test]
fn no_match() {
    let rule = FilterRule::new(["naruto"], NO_PATTERNS).unwrap();
    assert!(!rule.matches(&make_entry("Some unrelated news", "")));
}

#[test]
fn empty_rule_never_matches() {
    let rule = FilterRule::new(NO_KEYWORDS, NO_PATTERNS).unwrap();
    assert!(rule.is_empty());
    assert!(!rule.matches(&make_entry("anything at all", "with a summary")));
    assert!(!rule.matches(&FeedEntry::default()));
    assert!(!FilterRule::default().matches(&make_entry("", "")));
}

#[test]
fn regex_searches_instead_of_full_matching() {
    let rule = FilterRule::new(NO_KEYWORDS, ["^frieren"]).unwrap();
    assert!(rule.matches(&make_entry("Frieren returns", "")));
    assert!(!rule.matches(&make_entry("The return of Frieren", "")));

    let mid = FilterRule::new(NO_KEYWORDS, ["kaisen"]).unwrap();
    assert!(mid.matches(&make_entry("Jujutsu Kaisen 0", "")));
}

#[test]
fn summary_and_description_are_searched() {
    let rule = FilterRule::new(["dandadan"], NO_PATTERNS).unwrap();
    assert!(rule.matches(&make_entry("Weekly roundup", "includes Dandadan news")));

    let entry = FeedEntry {
        title: Some("Roundup".into()),
        description: Some("<p>Dandadan</p>".into()),
        ..Default::default()
    };
    assert!(rule.matches(&entry));
}

#[test]
fn link_is_not_searched() {
    let rule = FilterRule::new(["frieren"], NO_PATTERNS).unwrap();
    let entry = FeedEntry {
        title: Some("News".into()),
        link: Some("https://example.com/frieren".into()),
        ..Default::default()
    };
    assert!(!rule.matches(&entry));
}

#[test]
fn invalid_regex_is_rejected_at_compile_time() {
    let err = FilterRule::new(NO_KEYWORDS, ["ok", "(unclosed"]).unwrap_err();
    match err {
        ConfigError::InvalidRegex { pattern, .. } => assert_eq!(pattern, "(unclosed"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn keyword_file_skips_bad_lines_and_keeps_the_rest() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keywords.txt");
    let rule = FilterRule::load_keyword_file(&path).unwrap();
    assert_eq!(rule.keywords(), &["one piece".to_string()]);
    assert_eq!(rule.patterns().collect::<Vec<_>>(), vec![r"jujutsu\s+kaisen"]);
    assert!(rule.matches(&make_entry("JUJUTSU  KAISEN finale", "")));
}

#[test]
fn missing_keyword_file_is_an_empty_rule() {
    let dir = tempfile::tempdir().unwrap();
    let rule = FilterRule::load_keyword_file(dir.path().join("absent.txt")).unwrap();
    assert!(rule.is_empty());
}

#[test]
fn merged_rules_match_either_side() {
    let inline = FilterRule::new(["frieren"], NO_PATTERNS).unwrap();
    let from_file = FilterRule::from_keyword_source("r:dan+dadan\n");
    let rule = inline.merge(from_file);
    assert!(rule.matches(&make_entry("Frieren", "")));
    assert!(rule.matches(&make_entry("Dandadan", "")));
    assert!(!rule.matches(&make_entry("Naruto", "")));
}
