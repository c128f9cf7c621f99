use std::fmt;

/// Prefix subscriptions held by one subscriber connection.
///
/// A frame is delivered when it starts with any subscribed prefix. The empty
/// prefix matches every frame; no subscription matches none.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SubscriptionFilter {
    prefixes: Vec<String>,
}

impl SubscriptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prefix; duplicates are ignored. Returns whether it was added.
    pub fn subscribe(&mut self, prefix: &str) -> bool {
        if self.prefixes.iter().any(|p| p == prefix) {
            return false;
        }
        self.prefixes.push(prefix.to_string());
        true
    }

    /// Remove a prefix. Returns whether it was present.
    pub fn unsubscribe(&mut self, prefix: &str) -> bool {
        let before = self.prefixes.len();
        self.prefixes.retain(|p| p != prefix);
        self.prefixes.len() != before
    }

    pub fn matches(&self, frame: &str) -> bool {
        self.prefixes.iter().any(|p| frame.starts_with(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.prefixes.join(", "))
    }
}
