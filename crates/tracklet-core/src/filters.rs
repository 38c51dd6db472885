//! Dashboard filters, supplied as a JSON-encoded array in the `filters`
//! query parameter: `[{"type":"country","value":"DE"}, ...]`.

use crate::limits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Referrer,
    Campaign,
    Country,
    Region,
    City,
    Goal,
    Hostname,
    Page,
    EntryPage,
    Browser,
    Os,
    Device,
}

impl FilterField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "referrer" => Some(Self::Referrer),
            "campaign" => Some(Self::Campaign),
            "country" => Some(Self::Country),
            "region" => Some(Self::Region),
            "city" => Some(Self::City),
            "goal" => Some(Self::Goal),
            "hostname" => Some(Self::Hostname),
            "page" => Some(Self::Page),
            "entryPage" => Some(Self::EntryPage),
            "browser" => Some(Self::Browser),
            "os" => Some(Self::Os),
            "device" => Some(Self::Device),
            _ => None,
        }
    }
}

/// A single active filter. `value` is already LIKE-escaped, ready to be
/// wrapped in `%...%`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: FilterField,
    pub value: String,
}

/// Escape `%`, `_` and `\` so user input matches literally in a LIKE
/// pattern (with `ESCAPE '\'`).
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parse the `filters` query parameter. Anything malformed is dropped
/// rather than erroring: a non-array, entries without string type/value,
/// and unknown filter types are all silently skipped.
pub fn parse_filters(raw: Option<&str>) -> Vec<Filter> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let Some(entries) = parsed.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let field = FilterField::parse(entry.get("type")?.as_str()?)?;
            let value = entry.get("value")?.as_str()?;
            if value.is_empty() {
                return None;
            }
            let capped: String = value.chars().take(limits::FILTER_VALUE).collect();
            Some(Filter {
                field,
                value: escape_like(&capped),
            })
        })
        .collect()
}
