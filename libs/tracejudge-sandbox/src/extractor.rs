//! Code Extractor
//!
//! **Core Responsibility:**
//! Pull one runnable program out of free-form response text.
//!
//! Responses mix prose with Markdown fences. Only complete fences count; an
//! opening fence without a closing one is treated as prose. A closing fence may
//! also end the last code line, and a whole block may sit on one line
//! (```` ```python print(1)``` ````). Blocks tagged with
//! a target language win over untagged blocks, and blocks tagged with any other
//! language are never returned.

use tracejudge_common::config::{BlockPreference, ExtractionPolicy};
use tracejudge_common::types::Candidate;

/// A complete fenced block found in the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Lowercased info-string word after the opening fence, `None` when untagged
    pub tag: Option<String>,
    pub body: String,
}

const FENCE: &str = "```";

/// Scan `text` for complete fenced blocks, in order of appearance
pub fn fenced_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        let ticks = trimmed.chars().take_while(|c| *c == '`').count();

        match open.take() {
            None => {
                if ticks < 3 {
                    continue;
                }
                let rest = &trimmed[ticks..];
                match rest.find(FENCE) {
                    Some(end) => blocks.push(single_line_block(&rest[..end])),
                    None => {
                        let tag = rest.split_whitespace().next().map(|t| t.to_lowercase());
                        open = Some((ticks, tag, Vec::new()));
                    }
                }
            }
            Some((fence, tag, mut lines)) => {
                if ticks >= fence && trimmed.len() == ticks {
                    blocks.push(CodeBlock {
                        tag,
                        body: lines.join("\n"),
                    });
                } else if let Some(code) = strip_closing_fence(line, fence) {
                    lines.push(code);
                    blocks.push(CodeBlock {
                        tag,
                        body: lines.join("\n"),
                    });
                } else {
                    lines.push(line);
                    open = Some((fence, tag, lines));
                }
            }
        }
    }

    blocks
}

/// `python print(1)` from ```` ```python print(1)``` ````: first word is the tag
fn single_line_block(inner: &str) -> CodeBlock {
    let inner = inner.trim();
    let (tag, body) = inner
        .split_once(char::is_whitespace)
        .unwrap_or((inner, ""));
    CodeBlock {
        tag: (!tag.is_empty()).then(|| tag.to_lowercase()),
        body: body.trim().to_string(),
    }
}

/// Code in front of a closing fence glued to the end of a line (`print(1)```)
fn strip_closing_fence(line: &str, fence: usize) -> Option<&str> {
    let line = line.trim_end();
    let trailing = line.chars().rev().take_while(|c| *c == '`').count();
    let code = &line[..line.len() - trailing];
    (trailing >= fence && !code.trim().is_empty()).then_some(code)
}

/// Select the candidate program from `text`, or `None` when nothing qualifies
pub fn extract_code(text: &str, policy: &ExtractionPolicy) -> Option<String> {
    let blocks: Vec<CodeBlock> = fenced_blocks(text)
        .into_iter()
        .filter(|b| !b.body.trim().is_empty())
        .collect();

    let tagged: Vec<&CodeBlock> = blocks
        .iter()
        .filter(|b| b.tag.as_deref().is_some_and(|t| policy.matches_language(t)))
        .collect();

    let pool = if !tagged.is_empty() {
        tagged
    } else if policy.allow_untagged {
        blocks.iter().filter(|b| b.tag.is_none()).collect()
    } else {
        Vec::new()
    };

    let chosen = match policy.preference {
        BlockPreference::First => pool.first().copied(),
        BlockPreference::Last => pool.last().copied(),
        // max_by_key keeps the last maximum; iterate in reverse so ties go to the earliest block
        BlockPreference::Largest => pool.iter().rev().copied().max_by_key(|b| b.body.trim().len()),
    };

    chosen.map(|b| b.body.trim().to_string())
}

/// `extract_code` wrapped as a `Candidate`
pub fn extract_candidate(text: &str, policy: &ExtractionPolicy) -> Option<Candidate> {
    extract_code(text, policy).map(Candidate::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(preference: BlockPreference) -> ExtractionPolicy {
        ExtractionPolicy {
            preference,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_tagged_python_block() {
        let text = "Intro\n```\nuntagged()\n```\nThen\n```python\nprint(1)\n```\n";
        assert_eq!(
            extract_code(text, &ExtractionPolicy::default()).as_deref(),
            Some("print(1)")
        );
    }

    #[test]
    fn test_falls_back_to_untagged() {
        let text = "```\nx = int(input())\nprint(x * 2)\n```";
        assert_eq!(
            extract_code(text, &ExtractionPolicy::default()).as_deref(),
            Some("x = int(input())\nprint(x * 2)")
        );

        let strict = ExtractionPolicy {
            allow_untagged: false,
            ..Default::default()
        };
        assert_eq!(extract_code(text, &strict), None);
    }

    #[test]
    fn test_other_language_never_selected() {
        let text = "```cpp\nint main() {}\n```\n```json\n{}\n```";
        assert_eq!(extract_code(text, &ExtractionPolicy::default()), None);
    }

    #[test]
    fn test_no_fences() {
        assert_eq!(extract_code("just prose", &ExtractionPolicy::default()), None);
        assert_eq!(extract_code("", &ExtractionPolicy::default()), None);
    }

    #[test]
    fn test_unterminated_block_ignored() {
        let text = "```python\nprint('done')\n```\n\n```python\nprint('half";
        assert_eq!(
            extract_code(text, &policy(BlockPreference::Last)).as_deref(),
            Some("print('done')")
        );
    }

    #[test]
    fn test_block_preference() {
        let text = "```python\na = 1\n```\n```py\nbbbbbbbb = 2\n```\n```python3\nc = 3\n```";

        assert_eq!(
            extract_code(text, &policy(BlockPreference::First)).as_deref(),
            Some("a = 1")
        );
        assert_eq!(
            extract_code(text, &policy(BlockPreference::Last)).as_deref(),
            Some("c = 3")
        );
        assert_eq!(
            extract_code(text, &policy(BlockPreference::Largest)).as_deref(),
            Some("bbbbbbbb = 2")
        );
    }

    #[test]
    fn test_largest_tie_goes_to_earliest() {
        let text = "```python\nx = 1\n```\n```python\ny = 2\n```";
        assert_eq!(
            extract_code(text, &policy(BlockPreference::Largest)).as_deref(),
            Some("x = 1")
        );
    }

    #[test]
    fn test_whitespace_only_block_skipped_and_body_trimmed() {
        let text = "```python\n   \n```\n```Python\n\n  print(2)  \n\n```";
        assert_eq!(
            extract_code(text, &ExtractionPolicy::default()).as_deref(),
            Some("print(2)")
        );
    }

    #[test]
    fn test_single_line_block() {
        let text = "Answer: ```python print(int(input()) * 2)``` done";
        // fence must open the line
        assert_eq!(extract_code(text, &ExtractionPolicy::default()), None);

        let text = "Answer:\n```python print(int(input()) * 2)```\nDone.";
        assert_eq!(
            extract_code(text, &ExtractionPolicy::default()).as_deref(),
            Some("print(int(input()) * 2)")
        );
        assert!(fenced_blocks("```python```").iter().all(|b| b.body.is_empty()));
    }

    #[test]
    fn test_closing_fence_on_code_line() {
        let text = "```python\nn = int(input())\n    print(n)```\nafter";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag.as_deref(), Some("python"));
        assert_eq!(blocks[0].body, "n = int(input())\n    print(n)");
        assert_eq!(
            extract_code(text, &ExtractionPolicy::default()).as_deref(),
            Some("n = int(input())\n    print(n)")
        );
    }

    #[test]
    fn test_longer_fence_allows_inner_backticks() {
        let text = "````python\ns = \"```\"\nprint(s)\n````";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "s = \"```\"\nprint(s)");
    }
}
