//! Minimal tag scanner for backend response bodies.
//!
//! Responses are small, flat documents; callers only ever need "every
//! element with this local name" plus its attributes and text. Namespace
//! prefixes are ignored when matching names.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Quoted attribute values may contain a raw `>`.
    Regex::new(r#"<(/?)([A-Za-z_][\w.:-]*)((?:\s+(?:[^<>"']|"[^"]*"|'[^']*')*?)?)\s*(/?)>"#)
        .unwrap_or_else(|_| std::process::abort())
});

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .unwrap_or_else(|_| std::process::abort())
});

#[derive(Debug, Clone, Copy)]
pub(crate) struct Element<'a> {
    attributes: &'a str,
    inner: Option<&'a str>,
}

impl<'a> Element<'a> {
    /// Value of the first attribute whose local name is `local`, unescaped.
    pub(crate) fn attr(&self, local: &str) -> Option<String> {
        ATTRIBUTE_RE.captures_iter(self.attributes).find_map(|caps| {
            let name = caps.get(1)?.as_str();
            if local_name(name) != local {
                return None;
            }
            let raw = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some(unescape(raw).into_owned())
        })
    }

    /// Raw markup between the start and end tags. `None` for `<a/>`.
    pub(crate) fn inner(&self) -> Option<&'a str> {
        self.inner
    }

    /// Unescaped, trimmed character content. Nested markup is kept as is.
    pub(crate) fn text(&self) -> Option<String> {
        let inner = self.inner?.trim();
        let inner = inner
            .strip_prefix("<![CDATA[")
            .and_then(|s| s.strip_suffix("]]>"))
            .map(Cow::Borrowed)
            .unwrap_or_else(|| unescape(inner));
        Some(inner.into_owned())
    }

    /// Elements nested anywhere inside this one.
    pub(crate) fn children(&self, local: &str) -> Vec<Element<'a>> {
        self.inner.map(|inner| elements(inner, local)).unwrap_or_default()
    }
}

fn local_name(qualified: &str) -> &str {
    qualified
        .rsplit_once(':')
        .map_or(qualified, |(_, local)| local)
}

/// Every element in `xml` whose local name is `local`, in document order.
pub(crate) fn elements<'a>(xml: &'a str, local: &str) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(caps) = TAG_RE.captures_at(xml, offset) {
        let Some(whole) = caps.get(0) else { break };
        offset = whole.end();
        let (Some(name), Some(attrs)) = (caps.get(2), caps.get(3)) else {
            continue;
        };
        let closing = caps.get(1).is_some_and(|m| !m.is_empty());
        if closing || local_name(name.as_str()) != local {
            continue;
        }
        let self_closing = caps.get(4).is_some_and(|m| !m.is_empty());
        let inner = if self_closing {
            None
        } else {
            closing_tag(xml, name.as_str(), whole.end()).map(|(end, _)| &xml[whole.end()..end])
        };
        found.push(Element {
            attributes: attrs.as_str(),
            inner,
        });
    }
    found
}

/// Value of the first `local` attribute on any start tag.
pub(crate) fn find_attribute(xml: &str, local: &str) -> Option<String> {
    TAG_RE.captures_iter(xml).find_map(|caps| {
        if caps.get(1).is_some_and(|m| !m.is_empty()) {
            return None;
        }
        let element = Element {
            attributes: caps.get(3)?.as_str(),
            inner: None,
        };
        element.attr(local)
    })
}

/// First element named `local`.
pub(crate) fn first<'a>(xml: &'a str, local: &str) -> Option<Element<'a>> {
    elements(xml, local).into_iter().next()
}

/// Trimmed text of the first element named `local`, if non-empty.
pub(crate) fn first_text(xml: &str, local: &str) -> Option<String> {
    first(xml, local)
        .and_then(|el| el.text())
        .filter(|text| !text.is_empty())
}

/// Finds the end tag matching an open `name` element whose content starts at
/// `from`. Returns `(start of end tag, end of end tag)`.
fn closing_tag(xml: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut offset = from;
    while let Some(caps) = TAG_RE.captures_at(xml, offset) {
        let whole = caps.get(0)?;
        offset = whole.end();
        if caps.get(2).map(|m| m.as_str()) != Some(name) {
            continue;
        }
        let closing = caps.get(1).is_some_and(|m| !m.is_empty());
        let self_closing = caps.get(4).is_some_and(|m| !m.is_empty());
        if closing {
            if depth == 0 {
                return Some((whole.start(), whole.end()));
            }
            depth -= 1;
        } else if !self_closing {
            depth += 1;
        }
    }
    None
}

pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 16);
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

pub fn unescape(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let Some(semi) = after.find(';') else {
            out.push_str(after);
            rest = "";
            break;
        };
        let entity = &after[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
