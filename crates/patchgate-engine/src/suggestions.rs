//! Fuzzy matching for template error hints

use serde_json::Value as JsonValue;

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Filters registered by the engine, plus the MiniJinja built-ins worth suggesting
pub const AVAILABLE_FILTERS: &[&str] = &[
    "toyaml",
    "tojson",
    "fromyaml",
    "fromjson",
    "b64encode",
    "b64decode",
    "quote",
    "squote",
    "nindent",
    "indent",
    "required",
    "empty",
    "haskey",
    "sha256",
    "trunc",
    "trimprefix",
    "trimsuffix",
    // MiniJinja built-ins
    "default",
    "upper",
    "lower",
    "replace",
    "trim",
    "join",
    "first",
    "last",
    "length",
    "map",
    "select",
    "selectattr",
    "dictsort",
    "items",
    "int",
    "string",
    "list",
    "urlencode",
];

/// Functions registered by the engine
pub const AVAILABLE_FUNCTIONS: &[&str] = &[
    "fail",
    "dict",
    "list",
    "get",
    "dig",
    "coalesce",
    "ternary",
    "tostring",
    "toint",
    "now",
    "printf",
    "lookup",
    // MiniJinja built-ins
    "range",
    "namespace",
];

/// Find up to `max_results` candidates close to `input`, best first
pub fn find_closest_matches<'a>(input: &str, candidates: &[&'a str], max_results: usize) -> Vec<&'a str> {
    let mut matches: Vec<(usize, &str)> = candidates
        .iter()
        .map(|&c| (strsim::levenshtein(input, c), c))
        .filter(|(d, _)| *d > 0 && *d <= MAX_SUGGESTION_DISTANCE)
        .collect();

    matches.sort_by_key(|(d, _)| *d);
    matches.into_iter().take(max_results).map(|(_, c)| c).collect()
}

fn did_you_mean(matches: &[&str]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let quoted: Vec<String> = matches.iter().map(|m| format!("`{}`", m)).collect();
    Some(format!("Did you mean {}?", quoted.join(" or ")))
}

/// Suggest a correction for an undefined variable path such as `metadata.lables.team`
///
/// Walks `context` along the path and proposes keys close to the first segment
/// that does not exist.
pub fn suggest_undefined_variable(path: &str, context: &JsonValue) -> Option<String> {
    let mut current = context;
    let mut walked: Vec<&str> = Vec::new();

    for part in path.split('.') {
        match current.get(part) {
            Some(next) => {
                walked.push(part);
                current = next;
            }
            None => {
                let available: Vec<&str> = current
                    .as_object()
                    .map(|m| m.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                let prefix = if walked.is_empty() {
                    String::new()
                } else {
                    format!("{}.", walked.join("."))
                };
                let matches: Vec<String> = find_closest_matches(part, &available, 3)
                    .into_iter()
                    .map(|m| format!("{}{}", prefix, m))
                    .collect();
                let refs: Vec<&str> = matches.iter().map(String::as_str).collect();

                return did_you_mean(&refs).or_else(|| {
                    Some(format!(
                        "`{}` is not set on this object. Use `| default(...)` or `get(...)` for optional fields.",
                        path
                    ))
                });
            }
        }
    }
    None
}

/// Suggest corrections for an unknown filter
pub fn suggest_unknown_filter(filter_name: &str) -> Option<String> {
    did_you_mean(&find_closest_matches(filter_name, AVAILABLE_FILTERS, 3)).or_else(|| {
        Some(format!(
            "Unknown filter `{}`. Common filters: toyaml, tojson, fromyaml, quote, default, nindent",
            filter_name
        ))
    })
}

/// Suggest corrections for an unknown function
pub fn suggest_unknown_function(func_name: &str) -> Option<String> {
    did_you_mean(&find_closest_matches(func_name, AVAILABLE_FUNCTIONS, 3)).or_else(|| {
        Some(format!(
            "Unknown function `{}`. Available functions: {}",
            func_name,
            AVAILABLE_FUNCTIONS.join(", ")
        ))
    })
}

/// Extract a backtick or quote delimited name from an error message
pub fn extract_quoted_name(msg: &str) -> Option<String> {
    for delim in ['`', '\'', '"'] {
        if let Some(start) = msg.find(delim) {
            let rest = &msg[start + 1..];
            if let Some(end) = rest.find(delim) {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}
