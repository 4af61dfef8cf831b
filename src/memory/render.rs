//! Canonical string form of turns and of the condensation block

use super::models::Turn;

/// Render a turn to the string stored in the condensation block
///
/// `<message role="user">text</message>`, with the filtered auxiliary data
/// appended as a JSON object on its own line when non-empty.
pub fn render_turn(turn: &Turn, excluded_aux_keys: &[String]) -> String {
    let mut text = turn.text();

    let aux = turn.aux.filtered(excluded_aux_keys);
    if !aux.is_empty() {
        // IndexMap keeps well-known keys ahead of the extra bag
        text.push('\n');
        text.push_str(&serde_json::to_string(&aux).unwrap_or_default());
    }

    format!("<message role=\"{}\">{}</message>", turn.role, text)
}

/// Wrap condensed entries in the memory template
pub fn render_block<'a>(block_name: &str, entries: impl IntoIterator<Item = &'a str>) -> String {
    let body: Vec<&str> = entries.into_iter().collect();
    format!(
        "<memory>\n<{name}>\n{body}\n</{name}>\n</memory>",
        name = block_name,
        body = body.join("\n"),
    )
}
