//! Text that goes to the language model and the parsing of what comes back.

use super::{page_client::FetchedPage, Verdict};

pub const LABEL_RELEVANT: &str = "directly relevant";
pub const LABEL_UNSURE: &str = "not sure";
pub const LABEL_IRRELEVANT: &str = "clearly irrelevant";

const MAX_LABEL_CHARS: usize = 80;
const FALLBACK_LABEL: &str = "Off-task page";

const SYSTEM_PROMPT: &str = "\
You check whether a web page helps the user with their current task.
You get the task inside <task> and the page inside <page_title>, <page_url> and <page_text>.
Answer with exactly one of these labels and nothing else:
directly relevant
not sure
clearly irrelevant

Examples:
<task>Write quarterly budget report</task><page_title>Budget template - Google Sheets</page_title>
Answer: directly relevant

<task>Fix login bug in backend</task><page_title>Top 10 funniest cat videos</page_title>
Answer: clearly irrelevant

<task>Prepare conference talk</task><page_title>Hacker News</page_title>
Answer: not sure";

/// Escapes text so it can't open or close a tagged section.
pub fn escape_tagged(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

pub fn user_prompt(task_title: &str, page: &FetchedPage) -> String {
    format!(
        "<task>{}</task>\n<page_title>{}</page_title>\n<page_url>{}</page_url>\n<page_text>{}</page_text>",
        escape_tagged(task_title),
        escape_tagged(&page.title),
        escape_tagged(&page.url),
        escape_tagged(&page.text),
    )
}

/// Finds the label the model answered with. The earliest label in the reply wins, a reply
/// without any label counts as unsure and an empty reply as unknown.
pub fn parse_verdict(reply: &str) -> Verdict {
    let reply = reply.trim().to_lowercase();
    if reply.is_empty() {
        return Verdict::Unknown;
    }
    [
        (LABEL_IRRELEVANT, Verdict::Irrelevant),
        (LABEL_RELEVANT, Verdict::Relevant),
        (LABEL_UNSURE, Verdict::Unsure),
    ]
    .into_iter()
    .filter_map(|(label, verdict)| reply.find(label).map(|position| (position, verdict)))
    .min_by_key(|(position, _)| *position)
    .map(|(_, verdict)| verdict)
    .unwrap_or(Verdict::Unsure)
}

/// Short text describing an off-task page: its title, else its URL.
pub fn warning_label(page: &FetchedPage) -> String {
    let source = [page.title.trim(), page.url.trim()]
        .into_iter()
        .find(|v| !v.is_empty())
        .unwrap_or(FALLBACK_LABEL);
    truncate_label(source, MAX_LABEL_CHARS)
}

pub fn truncate_label(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>()
        .trim_end()
        .to_string();
    truncated.push('…');
    truncated
}
