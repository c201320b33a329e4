use regex::Regex;
use std::sync::OnceLock;

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```[\s\S]*?```").expect("fence pattern compiles"))
}

/// Remove fenced code blocks, then any stray backtick characters.
///
/// Whitespace around a removed block is kept, so
/// `"Hello ```print(1)``` World"` becomes `"Hello  World"`.
pub fn strip_code_fences(text: &str) -> String {
    fence_pattern().replace_all(text, "").replace('`', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_inline_fence() {
        assert_eq!(strip_code_fences("Hello ```print(1)``` World"), "Hello  World");
    }

    #[test]
    fn removes_multiline_fence_with_language_tag() {
        let text = "Sure:\n```rust\nfn main() {}\n```\nDone";
        assert_eq!(strip_code_fences(text), "Sure:\n\nDone");
    }

    #[test]
    fn fences_are_matched_lazily() {
        assert_eq!(strip_code_fences("a ```x``` b ```y``` c"), "a  b  c");
    }

    #[test]
    fn unmatched_fence_and_inline_ticks_are_dropped() {
        assert_eq!(strip_code_fences("use `ls` then ```oops"), "use ls then oops");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(strip_code_fences("no code here"), "no code here");
    }
}
