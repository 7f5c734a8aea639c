use std::collections::HashMap;

/// Hands out `Type__N` names with one monotonically increasing counter per type
pub struct NameAllocator {
    separator: String,
    counters: HashMap<String, u32>,
}

impl NameAllocator {
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
            counters: HashMap::new(),
        }
    }

    /// Next free name for `type_name`; candidates rejected by `is_taken` are
    /// skipped and never offered again
    pub fn allocate(&mut self, type_name: &str, is_taken: impl Fn(&str) -> bool) -> String {
        let short = short_type_name(type_name);
        let counter = self.counters.entry(short.to_string()).or_insert(0);
        loop {
            let candidate = format!("{}{}{}", short, self.separator, counter);
            *counter += 1;
            if !is_taken(&candidate) {
                return candidate;
            }
        }
    }
}

/// Last segment of a qualified type name
fn short_type_name(type_name: &str) -> &str {
    let after_path = type_name.rsplit("::").next().unwrap_or(type_name);
    after_path.rsplit('.').next().unwrap_or(after_path)
}
