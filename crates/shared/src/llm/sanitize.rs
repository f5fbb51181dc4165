//! Strips markdown artifacts from provider text so the chat surface can
//! render it as plain conversation. Idempotent; never applied to binary
//! payloads.

/// Cleans a provider reply: unwraps a whole-response code fence, drops
/// heading/emphasis/rule/table markers, and collapses runs of blank lines.
pub fn sanitize_markdown(text: &str) -> String {
    let trimmed = text.trim();
    let unfenced = strip_trailing_fence(strip_leading_fence(trimmed));

    let mut cleaned = strip_headings(unfenced);
    for marker in ["**", "__", "*", "_"] {
        cleaned = strip_paired_marker(&cleaned, marker);
    }
    let cleaned = drop_horizontal_rules(&cleaned);
    let cleaned = cleaned.replace('|', " ");

    collapse_blank_runs(&cleaned).trim().to_string()
}

/// Removes a leading ``` or ```markdown fence line. Fences carrying any
/// other language tag are left alone; they are real content, not a wrapper.
fn strip_leading_fence(text: &str) -> &str {
    let rest = match text.strip_prefix("```markdown") {
        Some(rest) => rest,
        None => match text.strip_prefix("```") {
            Some(rest) => rest,
            None => return text,
        },
    };

    let line_end = rest.find('\n').unwrap_or(rest.len());
    if rest[..line_end].trim().is_empty() {
        &rest[(line_end + 1).min(rest.len())..]
    } else {
        text
    }
}

fn strip_trailing_fence(text: &str) -> &str {
    match text.strip_suffix("```") {
        Some(rest) => rest.trim_end(),
        None => text,
    }
}

fn strip_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let hashes = line.bytes().take_while(|byte| *byte == b'#').count();
            if (1..=6).contains(&hashes) {
                let rest = &line[hashes..];
                if rest.starts_with(' ') || rest.starts_with('\t') {
                    return rest.trim_start();
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes paired emphasis markers, keeping the wrapped text. Pairs never
/// span lines; an unpaired marker is passed through untouched, which also
/// makes a second pass a no-op.
fn strip_paired_marker(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(marker) {
        let after_open = &rest[open + marker.len()..];
        let line_end = after_open.find('\n').unwrap_or(after_open.len());
        match after_open[..line_end].find(marker) {
            Some(close) => {
                out.push_str(&rest[..open]);
                out.push_str(&after_open[..close]);
                rest = &after_open[close + marker.len()..];
            }
            None => {
                out.push_str(&rest[..open + marker.len()]);
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

fn drop_horizontal_rules(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            let is_rule =
                trimmed.len() >= 3 && trimmed.chars().all(|ch| ch == '-' || ch == '*');
            if is_rule { "" } else { line }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapses every run of two or more blank lines down to a single blank
/// line, so stripped markup never leaves large vertical gaps.
fn collapse_blank_runs(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_blank_run = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !in_blank_run {
                out.push("");
            }
            in_blank_run = true;
        } else {
            in_blank_run = false;
            out.push(line);
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::sanitize_markdown;

    #[test]
    fn unwraps_markdown_fence_and_strips_formatting() {
        let input = "```markdown\n**Hi** there\n---\n```";
        assert_eq!(sanitize_markdown(input), "Hi there");
    }

    #[test]
    fn unwraps_bare_fence() {
        let input = "```\nplain reply\n```";
        assert_eq!(sanitize_markdown(input), "plain reply");
    }

    #[test]
    fn keeps_language_tagged_opening_fences() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(sanitize_markdown(input), "```json\n{\"a\": 1}");
    }

    #[test]
    fn strips_headings_and_emphasis() {
        let input = "## Title\nSome __bold__ and _italic_ text";
        assert_eq!(sanitize_markdown(input), "Title\nSome bold and italic text");
    }

    #[test]
    fn leaves_unpaired_markers_in_place() {
        assert_eq!(sanitize_markdown("2 * 3 = 6"), "2 * 3 = 6");
    }

    #[test]
    fn emphasis_pairs_do_not_span_lines() {
        let input = "left * alone\nstill * alone";
        assert_eq!(sanitize_markdown(input), input);
    }

    #[test]
    fn replaces_table_pipes_with_spaces() {
        assert_eq!(sanitize_markdown("| a | b |"), "a   b");
    }

    #[test]
    fn collapses_runs_of_blank_lines() {
        let input = "first\n\n\n\nsecond";
        assert_eq!(sanitize_markdown(input), "first\n\nsecond");
    }

    #[test]
    fn single_blank_line_is_preserved() {
        let input = "first\n\nsecond";
        assert_eq!(sanitize_markdown(input), "first\n\nsecond");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "```markdown\n**Hi** there\n---\n```",
            "## Heading\n\n\n\n| t | a |\n***\n*wink*",
            "plain text with no markup",
            "unbalanced ** marker",
        ];
        for input in inputs {
            let once = sanitize_markdown(input);
            assert_eq!(sanitize_markdown(&once), once, "input: {input:?}");
        }
    }
}
