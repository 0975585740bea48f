//! Stage prompt builders.
//!
//! Templates ship inside the binary; the engine is built once. The repair
//! prompt embeds the failure log tail-truncated to a byte budget so request
//! limits are respected even for pathological test output.

use std::sync::LazyLock;

use minijinja::{Environment, context};

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const DOCUMENT_TEMPLATE: &str = include_str!("prompts/document.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("plan", PLAN_TEMPLATE)
        .expect("plan template should be valid");
    env.add_template("implement", IMPLEMENT_TEMPLATE)
        .expect("implement template should be valid");
    env.add_template("repair", REPAIR_TEMPLATE)
        .expect("repair template should be valid");
    env.add_template("document", DOCUMENT_TEMPLATE)
        .expect("document template should be valid");
    env
});

fn render(name: &str, ctx: minijinja::Value) -> String {
    ENGINE
        .get_template(name)
        .expect("template should be registered")
        .render(ctx)
        .expect("template should render")
}

pub fn plan(listing: &str) -> String {
    render("plan", context! { listing => listing })
}

pub fn implement() -> String {
    render("implement", context! {})
}

pub fn repair(failure_log: &str, limit_bytes: usize) -> String {
    let log = tail_truncate(failure_log, limit_bytes);
    render("repair", context! { log => log })
}

pub fn document(files: &[String]) -> String {
    render("document", context! { files => files })
}

/// Keep the last `limit` bytes of `text`, cutting on a UTF-8 boundary and
/// marking the cut. Failures usually sit at the end of test output, so the
/// tail is the valuable part.
fn tail_truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[log truncated, showing last {} bytes]\n{}", text.len() - start, &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_embeds_listing_and_contract() {
        let prompt = plan("src/main.py\ntests/test_main.py");
        assert!(prompt.contains("src/main.py"));
        assert!(prompt.contains("### FILE:"));
    }

    #[test]
    fn repair_embeds_failure_log() {
        let prompt = repair("assert 1 == 2", 10_000);
        assert!(prompt.contains("assert 1 == 2"));
        assert!(prompt.contains("<failure>"));
    }

    #[test]
    fn repair_truncates_long_logs_keeping_the_tail() {
        let log = format!("{}THE END", "x".repeat(10_000));
        let prompt = repair(&log, 100);
        assert!(prompt.contains("THE END"));
        assert!(prompt.contains("[log truncated"));
        assert!(!prompt.contains(&"x".repeat(200)));
    }

    #[test]
    fn tail_truncate_respects_char_boundaries() {
        let text = format!("{}é", "a".repeat(100));
        // A limit landing inside the two-byte 'é' must move forward, not panic.
        let truncated = tail_truncate(&text, 1);
        assert!(truncated.ends_with('é') || truncated.ends_with('\n'));
    }

    #[test]
    fn tail_truncate_leaves_short_text_unmarked() {
        assert_eq!(tail_truncate("short", 100), "short");
    }

    #[test]
    fn document_lists_files() {
        let prompt = document(&["src/a.py".to_string(), "tests/test_a.py".to_string()]);
        assert!(prompt.contains("- src/a.py"));
        assert!(prompt.contains("- tests/test_a.py"));
    }

    #[test]
    fn document_without_files_omits_the_list() {
        let prompt = document(&[]);
        assert!(!prompt.contains("Files written tonight"));
    }
}
