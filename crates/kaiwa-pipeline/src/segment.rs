//! Sentence segmentation for streaming reply text.
//!
//! The chat stream delivers text in arbitrary chunks; these pure functions
//! carve it into playable sentences. [`extract`] is called on every chunk
//! with the accumulated buffer and returns completed sentences plus the
//! unfinished tail; [`flush`] hard-splits whatever tail is left when the
//! stream ends. [`clean_markdown`] strips formatting so markup is never
//! spoken. Determinism: the same buffer always yields the same split —
//! there is no hidden state beyond the explicit arguments.

/// Sentence-ending punctuation, CJK and Western.
const TERMINALS: [char; 8] = ['。', '？', '！', '!', '?', '；', ';', '.'];

/// Result of one [`extract`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Completed sentences, in input order.
    pub sentences: Vec<String>,

    /// Unfinished tail — the caller prepends this to the next chunk.
    pub remainder: String,
}

/// Split `buffer` into completed sentences and an unfinished remainder.
///
/// A run of text ending in terminal punctuation is only emitted once its
/// trimmed length reaches `min_chars` and it contains something besides
/// punctuation; shorter runs are held and merged with subsequent text. A
/// period that completes an abbreviation from `abbreviations` (suffix
/// match) does not terminate a sentence.
///
/// The scan is strictly left-to-right with no lookahead, so feeding a text
/// character by character produces the same sentence sequence as feeding
/// it in one shot.
#[must_use]
pub fn extract(buffer: &str, min_chars: usize, abbreviations: &[String]) -> Extraction {
    let mut sentences = Vec::new();
    // Terminated text still below the minimum length, waiting to merge.
    let mut pending = String::new();
    // Text accumulated since the last confirmed boundary.
    let mut current = String::new();

    for ch in buffer.chars() {
        current.push(ch);

        if !TERMINALS.contains(&ch) {
            continue;
        }
        if ch == '.' && ends_with_abbreviation(&current, abbreviations) {
            continue;
        }

        // Confirmed sentence boundary.
        pending.push_str(&current);
        current.clear();

        let trimmed = pending.trim();
        if trimmed.chars().count() >= min_chars && !is_punctuation_only(trimmed) {
            sentences.push(trimmed.to_string());
            pending.clear();
        }
    }

    let mut remainder = pending;
    remainder.push_str(&current);

    Extraction { sentences, remainder }
}

/// Hard-split the leftover tail into chunks of at most `max_chars`
/// characters, dropping empty and punctuation-only results.
///
/// Used exactly once per turn, when the chat stream ends with text that
/// never reached a sentence boundary.
#[must_use]
pub fn flush(remainder: &str, max_chars: usize) -> Vec<String> {
    let trimmed = remainder.trim();
    if trimmed.is_empty() || is_punctuation_only(trimmed) {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty() && !is_punctuation_only(s))
        .collect()
}

/// Split a sentence that exceeds the per-synthesis-call character budget
/// into budget-sized pieces, preferring clause boundaries over hard cuts.
///
/// The executor concatenates the synthesized audio of the pieces back into
/// a single payload, so the queue never sees a partial sentence.
#[must_use]
pub fn split_for_budget(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    if text.chars().count() <= budget {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for part in text.split_inclusive(&['，', ',', '、', '；', ';', '：', ':', ' '][..]) {
        let part_chars = part.chars().count();
        if current_chars > 0 && current_chars + part_chars > budget {
            pieces.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push_str(part);
        current_chars += part_chars;
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    // Clause splitting may still leave oversized pieces — hard-chunk those.
    pieces
        .into_iter()
        .flat_map(|piece| {
            if piece.chars().count() > budget {
                let chars: Vec<char> = piece.chars().collect();
                chars
                    .chunks(budget)
                    .map(|c| c.iter().collect::<String>())
                    .collect()
            } else {
                vec![piece]
            }
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strip markdown formatting from reply text before synthesis.
///
/// Heading markers, emphasis markers, link/image syntax, inline code
/// backticks, fence lines, and horizontal rules are removed; runs of blank
/// lines collapse to one. Complete `<think>`/`<reasoning>` tag pairs are
/// removed entirely so chain-of-thought output is never spoken.
#[must_use]
pub fn clean_markdown(text: &str) -> String {
    let text = strip_tag_block(text, "<think", "</think>");
    let text = strip_tag_block(&text, "<reasoning>", "</reasoning>");

    let mut result = String::with_capacity(text.len());
    let mut blank_pending = false;

    for line in text.lines() {
        let trimmed = line.trim();

        // Fence lines and horizontal rules disappear entirely.
        if trimmed.starts_with("```") || is_horizontal_rule(trimmed) {
            continue;
        }

        if trimmed.is_empty() {
            blank_pending = !result.is_empty();
            continue;
        }

        let cleaned = strip_line(line);
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }

        if !result.is_empty() {
            result.push('\n');
            if blank_pending {
                result.push('\n');
            }
        }
        blank_pending = false;
        result.push_str(cleaned);
    }

    result
}

// ── Internal helpers ───────────────────────────────────────────────

/// Remove all complete `<open…>…<close>` pairs from text, case-insensitive.
///
/// `open_prefix` may be a prefix like `<think` so attribute forms
/// (`<think duration="5">`) match too. An unmatched open tag is kept as-is.
fn strip_tag_block(text: &str, open_prefix: &str, close_tag: &str) -> String {
    let haystack = text.to_ascii_lowercase();
    let open_lower = open_prefix.to_ascii_lowercase();
    let close_lower = close_tag.to_ascii_lowercase();

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    while cursor < text.len() {
        let Some(open_start) = haystack[cursor..].find(&open_lower) else {
            result.push_str(&text[cursor..]);
            break;
        };
        let abs_open = cursor + open_start;

        let close_end = haystack[abs_open..]
            .find('>')
            .map(|tag_end| abs_open + tag_end + 1)
            .and_then(|tag_end| {
                haystack[tag_end..]
                    .find(&close_lower)
                    .map(|close| tag_end + close + close_tag.len())
            });

        match close_end {
            Some(end) => {
                result.push_str(&text[cursor..abs_open]);
                cursor = end;
            }
            None => {
                // No matching close — keep as-is and move past the prefix.
                result.push_str(&text[cursor..abs_open + open_prefix.len()]);
                cursor = abs_open + open_prefix.len();
            }
        }
    }

    result
}

fn ends_with_abbreviation(current: &str, abbreviations: &[String]) -> bool {
    abbreviations.iter().any(|abbr| current.ends_with(abbr.as_str()))
}

/// True when the text contains nothing worth speaking.
fn is_punctuation_only(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

/// Check if a line is a horizontal rule (---, ***, ___).
fn is_horizontal_rule(line: &str) -> bool {
    let chars: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    chars.len() >= 3
        && chars.iter().all(|&c| c == '-' || c == '*' || c == '_')
        && chars.windows(2).all(|w| w[0] == w[1])
}

/// Strip inline markdown from a single line.
fn strip_line(line: &str) -> String {
    let mut s = line.to_string();

    // Leading blockquote markers
    while s.trim_start().starts_with('>') {
        s = s.trim_start().trim_start_matches('>').trim_start().to_string();
    }

    // Heading markers
    if s.trim_start().starts_with('#') {
        s = s.trim_start().trim_start_matches('#').trim_start().to_string();
    }

    s = strip_list_marker(&s);
    s = strip_images(&s);
    s = strip_links(&s);
    s = strip_inline_code(&s);
    s = strip_emphasis(&s);

    s
}

fn strip_list_marker(line: &str) -> String {
    let trimmed = line.trim_start();

    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        return rest.to_string();
    }

    // Numbered: 1. item, 2) item
    if let Some(pos) = trimmed.find(|c: char| !c.is_ascii_digit()) {
        if pos > 0 {
            let after = &trimmed[pos..];
            if after.starts_with(". ") || after.starts_with(") ") {
                return after[2..].to_string();
            }
        }
    }

    line.to_string()
}

fn strip_images(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '!' && chars.peek() == Some(&'[') {
            chars.next(); // consume '['
            let alt: String = chars.by_ref().take_while(|&c| c != ']').collect();
            if chars.peek() == Some(&'(') {
                chars.next(); // consume '('
                let _url: String = chars.by_ref().take_while(|&c| c != ')').collect();
                result.push_str(&alt);
                continue;
            }
            result.push('!');
            result.push('[');
            result.push_str(&alt);
            result.push(']');
        } else {
            result.push(c);
        }
    }

    result
}

fn strip_links(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '[' {
            let link_text: String = chars.by_ref().take_while(|&c| c != ']').collect();
            if chars.peek() == Some(&'(') {
                chars.next(); // consume '('
                let _url: String = chars.by_ref().take_while(|&c| c != ')').collect();
                result.push_str(&link_text);
                continue;
            }
            result.push('[');
            result.push_str(&link_text);
            result.push(']');
        } else {
            result.push(c);
        }
    }

    result
}

fn strip_inline_code(text: &str) -> String {
    text.chars().filter(|&c| c != '`').collect()
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .replace('*', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaiwa_core::default_abbreviations;

    fn abbrs() -> Vec<String> {
        default_abbreviations()
    }

    #[test]
    fn cjk_short_sentences_merge_forward() {
        let result = extract("你好。我是AI。正在", 8, &abbrs());
        assert_eq!(result.sentences, vec!["你好。我是AI。"]);
        assert_eq!(result.remainder, "正在");
    }

    #[test]
    fn flush_emits_leftover_tail() {
        assert_eq!(flush("正在", 100), vec!["正在"]);
    }

    #[test]
    fn flush_drops_punctuation_only_tail() {
        assert!(flush("。。、！", 100).is_empty());
        assert!(flush("   ", 100).is_empty());
    }

    #[test]
    fn flush_hard_splits_long_tail() {
        let tail = "a".repeat(250);
        let chunks = flush(&tail, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn abbreviations_do_not_terminate() {
        let result = extract("Please ask Dr. Wang about it today! Sure", 8, &abbrs());
        assert_eq!(result.sentences, vec!["Please ask Dr. Wang about it today!"]);
        assert_eq!(result.remainder, " Sure");
    }

    #[test]
    fn western_punctuation_splits() {
        let result = extract("Hello there friend! How are you today? unfinished", 8, &abbrs());
        assert_eq!(
            result.sentences,
            vec!["Hello there friend!", "How are you today?"]
        );
        assert_eq!(result.remainder, " unfinished");
    }

    #[test]
    fn punctuation_only_runs_are_never_emitted() {
        let result = extract("！！！！！！！！！！", 2, &abbrs());
        assert!(result.sentences.is_empty());
        assert_eq!(result.remainder, "！！！！！！！！！！");
    }

    #[test]
    fn char_by_char_matches_one_shot() {
        let text = "今天天气很好。我们出去走走吧！Let's go to the park, shall we? 好的。";
        let one_shot = extract(text, 8, &abbrs());

        let mut buffer = String::new();
        let mut streamed = Vec::new();
        for ch in text.chars() {
            buffer.push(ch);
            let step = extract(&buffer, 8, &abbrs());
            streamed.extend(step.sentences);
            buffer = step.remainder;
        }

        assert_eq!(streamed, one_shot.sentences);
        assert_eq!(buffer, one_shot.remainder);
    }

    #[test]
    fn split_for_budget_keeps_short_text_whole() {
        assert_eq!(split_for_budget("短句。", 150), vec!["短句。"]);
    }

    #[test]
    fn split_for_budget_respects_budget() {
        let long = "第一段内容，第二段内容，第三段内容，".repeat(20);
        let pieces = split_for_budget(&long, 50);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.chars().count() <= 50));
        assert!(pieces.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn markdown_headings_and_emphasis_are_stripped() {
        let input = "## 标题\n**重点**内容和*强调*。";
        assert_eq!(clean_markdown(input), "标题\n重点内容和强调。");
    }

    #[test]
    fn markdown_links_keep_text_only() {
        let input = "查看[这个链接](https://example.com)了解更多。";
        assert_eq!(clean_markdown(input), "查看这个链接了解更多。");
    }

    #[test]
    fn markdown_fences_and_rules_are_removed() {
        let input = "之前。\n```\nlet x = 1;\n```\n---\n之后。";
        assert_eq!(clean_markdown(input), "之前。\nlet x = 1;\n之后。");
    }

    #[test]
    fn blank_line_runs_collapse() {
        let input = "第一段。\n\n\n\n第二段。";
        assert_eq!(clean_markdown(input), "第一段。\n\n第二段。");
    }

    #[test]
    fn inline_code_is_unwrapped() {
        let input = "运行 `cargo run` 即可。";
        assert_eq!(clean_markdown(input), "运行 cargo run 即可。");
    }

    #[test]
    fn think_blocks_are_never_spoken() {
        let input = "<think>考虑一下这个问题。</think>答案是四十二。";
        assert_eq!(clean_markdown(input), "答案是四十二。");
    }

    #[test]
    fn think_blocks_with_attributes_are_stripped() {
        let input = "<think duration=\"5\">hidden</think>Visible answer here.";
        assert_eq!(clean_markdown(input), "Visible answer here.");
    }

    #[test]
    fn unmatched_think_open_is_left_alone() {
        let input = "a < b and b > c.";
        assert_eq!(clean_markdown(input), "a < b and b > c.");
    }
}
