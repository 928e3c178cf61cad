//! Template field bag used to render placeholder links (§4.I step 1) and
//! `config_rename`/remark templates (§4.I step 4).

use std::collections::HashMap;

/// `{key}`-style template fields derived from a subscription, owner, and
/// (when rewriting a cached node link) the node/original remark.
#[derive(Debug, Clone, Default)]
pub struct FormatFields {
    fields: HashMap<String, String>,
}

impl FormatFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Render a `{key}` template, leaving unknown placeholders untouched.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.char_indices().peekable();
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'{' {
                if let Some(end) = template[i..].find('}') {
                    let key = &template[i + 1..i + end];
                    if let Some(value) = self.get(key) {
                        out.push_str(value);
                        i += end + 1;
                        continue;
                    }
                }
            }
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        let _ = &mut chars;
        collapse_whitespace(&out)
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the first emoji-ish grapheme from a remark and split it out,
/// returning `(emoji, remainder)`. Used to build `server_emoji`/
/// `server_name` fields (§4.I step 4).
#[must_use]
pub fn split_leading_emoji(remark: &str) -> (Option<String>, String) {
    for (idx, ch) in remark.char_indices() {
        if is_emoji_char(ch) {
            let emoji_end = idx + ch.len_utf8();
            let emoji = remark[idx..emoji_end].to_string();
            let remainder = format!("{}{}", &remark[..idx], &remark[emoji_end..]);
            return (Some(emoji), remainder.trim().to_string());
        }
    }
    (None, remark.to_string())
}

fn is_emoji_char(ch: char) -> bool {
    let c = ch as u32;
    matches!(c,
        0x1F1E6..=0x1F1FF // regional indicators (flags)
        | 0x1F300..=0x1FAFF
        | 0x2600..=0x27BF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_fields() {
        let mut fields = FormatFields::new();
        fields.set("username", "alice").set("server_id", "03");
        assert_eq!(fields.render("{server_id} {username}"), "03 alice");
    }

    #[test]
    fn render_leaves_unknown_placeholders_untouched() {
        let fields = FormatFields::new();
        assert_eq!(fields.render("{unknown} tail"), "{unknown} tail");
    }

    #[test]
    fn render_collapses_whitespace() {
        let mut fields = FormatFields::new();
        fields.set("a", "  x  ");
        assert_eq!(fields.render("{a}   y"), "x y");
    }

    #[test]
    fn split_leading_emoji_extracts_flag() {
        let (emoji, remainder) = split_leading_emoji("US \u{1F1FA}\u{1F1F8}");
        assert!(emoji.is_some());
        assert_eq!(remainder, "US");
    }

    #[test]
    fn split_leading_emoji_none_when_absent() {
        let (emoji, remainder) = split_leading_emoji("plain remark");
        assert!(emoji.is_none());
        assert_eq!(remainder, "plain remark");
    }
}
