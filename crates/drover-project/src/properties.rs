use std::collections::BTreeMap;

/// Expand `${name}` references in a command line from the given property
/// table. Unknown names are left untouched so the shell still sees them.
pub fn expand_properties(command: &str, properties: &BTreeMap<String, String>) -> String {
    let mut expanded = String::with_capacity(command.len());
    let mut rest = command;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find('}') {
            Some(close) => {
                let name = &after_open[..close];
                match properties.get(name) {
                    Some(value) => expanded.push_str(value),
                    None => expanded.push_str(&rest[start..start + 2 + close + 1]),
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Unterminated reference; keep the tail verbatim.
                expanded.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    expanded.push_str(rest);
    expanded
}
