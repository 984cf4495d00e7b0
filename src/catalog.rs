//! Built-in topic suggestions, grouped by category.

use itertools::Itertools;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopicCategory {
    pub category: &'static str,
    pub topics: &'static [&'static str],
}

pub const TOPIC_CATEGORIES: &[TopicCategory] = &[
    TopicCategory {
        category: "Arrays",
        topics: &[
            "Array manipulation",
            "Two pointers",
            "Sliding window",
            "Array rotation",
            "Subarray problems",
            "Array sorting",
            "Array searching",
        ],
    },
    TopicCategory {
        category: "Strings",
        topics: &[
            "String manipulation",
            "String parsing",
            "Pattern matching",
            "Palindrome problems",
            "Anagram problems",
            "String compression",
            "Substring problems",
        ],
    },
    TopicCategory {
        category: "Objects & Maps",
        topics: &[
            "Object manipulation",
            "Deep cloning",
            "Object merging",
            "Property access",
            "Hash maps",
            "Frequency counting",
            "Object transformation",
        ],
    },
    TopicCategory {
        category: "Functions",
        topics: &[
            "Higher-order functions",
            "Closures",
            "Currying",
            "Function composition",
            "Memoization",
            "Partial application",
            "Callback patterns",
        ],
    },
    TopicCategory {
        category: "Algorithms",
        topics: &[
            "Binary search",
            "Linear search",
            "Sorting algorithms",
            "Recursion",
            "Dynamic programming",
            "Greedy algorithms",
            "Backtracking",
        ],
    },
    TopicCategory {
        category: "Data Structures",
        topics: &[
            "Stack implementation",
            "Queue implementation",
            "Linked list",
            "Tree traversal",
            "Graph basics",
            "Set operations",
            "Priority queue",
        ],
    },
    TopicCategory {
        category: "Logic & Math",
        topics: &[
            "Conditional logic",
            "Boolean algebra",
            "Number manipulation",
            "Prime numbers",
            "Fibonacci sequence",
            "Mathematical operations",
            "Game logic",
        ],
    },
    TopicCategory {
        category: "Async & Promises",
        topics: &[
            "Promise basics",
            "Async/await",
            "Promise chaining",
            "Promise.all patterns",
            "Error handling",
            "Timeout handling",
            "Sequential vs parallel execution",
        ],
    },
    TopicCategory {
        category: "DOM & Events",
        topics: &[
            "Event handling",
            "DOM manipulation",
            "Event delegation",
            "Debouncing",
            "Throttling",
            "Custom events",
            "Form validation",
        ],
    },
    TopicCategory {
        category: "Patterns",
        topics: &[
            "Design patterns",
            "Factory pattern",
            "Observer pattern",
            "Module pattern",
            "Singleton pattern",
            "Iterator pattern",
            "State machines",
        ],
    },
];

/// Every topic of every category, in catalog order.
pub fn suggested_topics() -> Vec<&'static str> {
    TOPIC_CATEGORIES
        .iter()
        .flat_map(|c| c.topics.iter().copied())
        .collect()
}

/// Case-insensitive lookup by category name.
pub fn category(name: &str) -> Option<&'static TopicCategory> {
    TOPIC_CATEGORIES
        .iter()
        .find(|c| c.category.eq_ignore_ascii_case(name.trim()))
}

/// Category a topic belongs to, if it is one of the built-in suggestions.
pub fn category_of(topic: &str) -> Option<&'static str> {
    TOPIC_CATEGORIES
        .iter()
        .find(|c| c.topics.iter().any(|t| t.eq_ignore_ascii_case(topic.trim())))
        .map(|c| c.category)
}

pub fn category_names() -> String {
    TOPIC_CATEGORIES.iter().map(|c| c.category).join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_topics_flatten_categories() {
        let topics = suggested_topics();
        assert_eq!(topics.len(), 70);
        assert_eq!(topics.first(), Some(&"Array manipulation"));
        assert_eq!(topics.last(), Some(&"State machines"));
        assert!(topics.iter().all_unique());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(category("objects & maps").map(|c| c.topics.len()), Some(7));
        assert_eq!(category("Unknown"), None);
        assert_eq!(category_of("memoization"), Some("Functions"));
        assert_eq!(category_of("Quantum computing"), None);
        assert!(category_names().starts_with("Arrays, Strings, "));
    }
}
