//! Link Generator (§4.I): composes the client-facing link bundle for one
//! subscription pull from placeholder templates and rewrites of each
//! effective node's cached Links Cache entries.
//!
//! Placeholders are always prepended and, for an inactive subscription,
//! are the entire response.

use std::collections::VecDeque;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::core::domain::{
    derive_password, derive_uuid, split_leading_emoji, Admin, FormatFields, Node, PlaceholderCategory,
    PlaceholderTemplate, Service, Subscription,
};
use crate::core::cache::LinksCache;
use crate::core::service::reconciler::effective_node_ids;

/// §4.I steps 1-5: placeholder links, short-circuited for inactive
/// subscriptions, followed by the priority-sorted, batched, interleaved
/// per-node link bundle.
#[must_use]
pub fn generate(
    sub: &Subscription,
    owner: &Admin,
    services: &[Service],
    nodes: &[Node],
    links_cache: &LinksCache,
    now: DateTime<Utc>,
) -> Vec<String> {
    let fields = subscription_format_fields(sub, owner, now);
    let placeholders = generate_placeholder_links(sub, owner, &fields, now);

    if !sub.is_active_at(now) {
        return placeholders;
    }

    let effective = effective_node_ids(sub, services);
    let mut active_nodes: Vec<&Node> =
        nodes.iter().filter(|n| effective.contains(&n.id) && n.availabled() && n.show_configs).collect();
    active_nodes.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut rng = rand::thread_rng();
    let mut per_node: Vec<(u32, VecDeque<String>)> = Vec::new();
    for node in &active_nodes {
        let mut rewritten: Vec<String> = links_cache
            .get(node.id)
            .into_iter()
            .skip(node.offset_link)
            .filter_map(|link| rewrite_link(&link, sub, node, owner, &fields))
            .collect();
        rewritten.shuffle(&mut rng);
        per_node.push((node.batch_size(), rewritten.into()));
    }

    let max_links = (owner.presentation.max_links > 0).then_some(owner.presentation.max_links as usize);

    let mut out = placeholders;
    out.extend(interleave(per_node, max_links));
    out
}

/// §4.I step 5: round-robin across each node's cursor, taking up to
/// `batch_size` links per visit, until every queue is empty or
/// `max_links` is reached.
fn interleave(mut per_node: Vec<(u32, VecDeque<String>)>, max_links: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        if per_node.iter().all(|(_, queue)| queue.is_empty()) {
            break;
        }
        let mut progressed = false;
        for (batch_size, queue) in &mut per_node {
            if queue.is_empty() {
                continue;
            }
            if max_links.is_some_and(|m| out.len() >= m) {
                break;
            }
            for _ in 0..*batch_size {
                if max_links.is_some_and(|m| out.len() >= m) {
                    break;
                }
                let Some(link) = queue.pop_front() else { break };
                out.push(link);
                progressed = true;
            }
        }
        if !progressed || max_links.is_some_and(|m| out.len() >= m) {
            break;
        }
    }
    out
}

/// §4.I step 1: info templates always apply; limited/expired/disabled are
/// mutually exclusive and checked in that priority order (matches
/// `Subscription.placeholders` in the upstream reference: `limited` wins
/// over `expired`, which wins over a plain disabled/not-enabled state).
fn generate_placeholder_links(
    sub: &Subscription,
    owner: &Admin,
    fields: &FormatFields,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(templates) = owner.placeholders.get(&PlaceholderCategory::Info) {
        out.extend(templates.iter().map(|t| render_placeholder(t, fields)));
    }

    let state_category = if sub.limited() {
        Some(PlaceholderCategory::Limited)
    } else if sub.expired_at(now) {
        Some(PlaceholderCategory::Expired)
    } else if !sub.enabled {
        Some(PlaceholderCategory::Disabled)
    } else {
        None
    };
    if let Some(templates) = state_category.and_then(|cat| owner.placeholders.get(&cat)) {
        out.extend(templates.iter().map(|t| render_placeholder(t, fields)));
    }
    out
}

fn render_placeholder(template: &PlaceholderTemplate, fields: &FormatFields) -> String {
    let remark = fields.render(&template.remark);
    let address = fields.render(&template.address);
    let uuid = fields.render(&template.uuid_template);
    format!("vless://{uuid}@{address}:{}#{}", template.port, percent_encode(&remark))
}

/// `sub.format` field bag (§4.I step 4 "`sub.format` fields (username,
/// usage, expire_date, …)"). Rendered both for placeholder templates and
/// as the base for per-link remark formatting (which layers
/// `server_id`/`server_emoji`/`server_name`/`server_usage` on top).
fn subscription_format_fields(sub: &Subscription, owner: &Admin, now: DateTime<Utc>) -> FormatFields {
    let emoji = |flag: bool| if flag { "✅" } else { "❌" };
    let mut fields = FormatFields::new();
    fields
        .set("username", sub.username.clone().unwrap_or_default())
        .set("owner_username", owner.username.clone().unwrap_or_default())
        .set("access_key", sub.access_key.clone())
        .set("enabled", emoji(sub.enabled))
        .set("activated", emoji(sub.activated))
        .set("limited", emoji(sub.limited()))
        .set("pending", emoji(sub.pending()))
        .set("expired", emoji(sub.expired_at(now)))
        .set("is_active", emoji(sub.is_active_at(now)))
        .set("limit_usage", usage_or_infinity(sub.limit_usage))
        .set("current_usage", byte_convert(sub.current_usage()))
        .set("left_usage", left_usage_display(sub))
        .set("expire_date", expire_date_display(sub.limit_expire))
        .set("expire_in", expire_in_display(sub.limit_expire, now))
        .set("expire_in_days", expire_in_days_display(sub.limit_expire, now));
    fields
}

fn usage_or_infinity(limit_usage: u64) -> String {
    if limit_usage == 0 {
        "♾️".to_string()
    } else {
        byte_convert(limit_usage)
    }
}

fn left_usage_display(sub: &Subscription) -> String {
    if sub.limit_usage == 0 {
        return "♾️".to_string();
    }
    byte_convert(sub.limit_usage.saturating_sub(sub.current_usage()))
}

fn byte_convert(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

fn expire_date_display(limit_expire: i64) -> String {
    if limit_expire <= 0 {
        return "♾️".to_string();
    }
    DateTime::<Utc>::from_timestamp(limit_expire, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "♾️".to_string())
}

fn expire_in_display(limit_expire: i64, now: DateTime<Utc>) -> String {
    if limit_expire <= 0 {
        return "♾️".to_string();
    }
    let secs = (limit_expire - now.timestamp()).max(0);
    format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
}

fn expire_in_days_display(limit_expire: i64, now: DateTime<Utc>) -> String {
    if limit_expire <= 0 {
        return "♾️".to_string();
    }
    let secs = (limit_expire - now.timestamp()).max(0);
    (secs / 86400).to_string()
}

/// §4.I step 4: rewrites one cached link's credentials (deterministic
/// from `sub.access_key`) and `#remark` fragment. Returns `None` when the
/// link does not parse under its declared scheme, matching the upstream
/// reference dropping malformed cached entries rather than forwarding
/// them unmodified.
fn rewrite_link(link: &str, sub: &Subscription, node: &Node, owner: &Admin, fields: &FormatFields) -> Option<String> {
    let original_remark = extract_link_remark(link);
    let new_remark = format_link_remark(owner, node, &original_remark, fields);

    if let Some(rest) = link.strip_prefix("vless://") {
        let (_, tail) = rest.split_once('@')?;
        let new_uuid = derive_uuid(&sub.access_key, "vless");
        return Some(replace_hash_remark(&format!("vless://{new_uuid}@{tail}"), &new_remark));
    }

    if let Some(rest) = link.strip_prefix("vmess://") {
        let decoded = STANDARD.decode(rest).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let mut config: Value = serde_json::from_str(&text).ok()?;
        let obj = config.as_object_mut()?;
        obj.insert("id".into(), Value::String(derive_uuid(&sub.access_key, "vmess").to_string()));
        obj.insert("ps".into(), Value::String(new_remark));
        let encoded_json = serde_json::to_string(&config).ok()?;
        return Some(format!("vmess://{}", STANDARD.encode(encoded_json)));
    }

    if let Some(rest) = link.strip_prefix("trojan://") {
        let (_, tail) = rest.split_once('@')?;
        let new_password = derive_password(&sub.access_key, "trojan");
        return Some(replace_hash_remark(&format!("trojan://{new_password}@{tail}"), &new_remark));
    }

    if let Some(rest) = link.strip_prefix("ss://") {
        let at_index = rest.find('@')?;
        let (before_at, after_at) = rest.split_at(at_index);
        let decoded = STANDARD.decode(before_at).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (method, _) = text.split_once(':')?;
        let new_password = derive_password(&sub.access_key, "ss");
        let encoded = STANDARD.encode(format!("{method}:{new_password}"));
        return Some(replace_hash_remark(&format!("ss://{encoded}{after_at}"), &new_remark));
    }

    None
}

/// vmess carries its remark in the decoded JSON `ps` field; every other
/// scheme carries it as a percent-encoded `#fragment`.
fn extract_link_remark(link: &str) -> String {
    if let Some(rest) = link.strip_prefix("vmess://") {
        return STANDARD
            .decode(rest)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|v| v.get("ps").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
    }
    link.split_once('#').map(|(_, frag)| percent_decode(frag)).unwrap_or_default()
}

/// No `config_rename` (or a blank one) leaves the cached remark
/// untouched; otherwise render the template over `sub.format` plus the
/// node-derived `server_*` fields (§4.I step 4).
fn format_link_remark(owner: &Admin, node: &Node, original_remark: &str, fields: &FormatFields) -> String {
    let template = match owner.presentation.config_rename.as_deref() {
        Some(t) if !t.trim().is_empty() => t,
        _ => return original_remark.to_string(),
    };
    let (emoji, server_name) = split_leading_emoji(original_remark);
    let mut node_fields = fields.clone();
    node_fields
        .set("server_id", format!("{:02}", node.id.value()))
        .set("server_emoji", emoji.unwrap_or_default())
        .set("server_name", server_name)
        .set("server_usage", format!("{}", node.usage_rate));
    node_fields.render(template)
}

fn replace_hash_remark(link: &str, new_remark: &str) -> String {
    let base = link.split('#').next().unwrap_or(link);
    format!("{base}#{}", percent_encode(new_remark))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.as_bytes() {
        match *byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(*byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
