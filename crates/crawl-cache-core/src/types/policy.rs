//! Per-category cache policy and builder

use std::ops::Index;
use std::time::Duration;

use super::category::Category;

/// TTL, memory capacity and SWR switch for one category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPolicy {
    /// Time-to-live; `None` never expires
    pub ttl: Option<Duration>,
    /// Maximum in-memory entries (0 disables the memory tier)
    pub memory_capacity: usize,
    /// Serve expired durable entries while refreshing in background
    pub stale_while_revalidate: bool,
}

impl CategoryPolicy {
    /// Policy with no TTL, no memory capacity and SWR disabled
    pub fn new() -> Self {
        Self {
            ttl: None,
            memory_capacity: 0,
            stale_while_revalidate: false,
        }
    }

    /// Built-in defaults for a category
    ///
    /// URL metadata changes often, assets are immutable by hash, screenshots
    /// sit in between, training samples never expire.
    pub fn defaults_for(category: Category) -> Self {
        match category {
            Category::Url => Self::new().ttl_mins(15).capacity(50_000).swr(true),
            Category::Asset => Self::new().ttl_hours(24 * 30).capacity(2_000).swr(true),
            Category::Screenshot => Self::new().ttl_hours(24).capacity(256).swr(true),
            Category::Ocr => Self::new().ttl_hours(24 * 7).capacity(4_096).swr(true),
            Category::TrainingSample => Self::new().capacity(1_024),
        }
    }

    /// Set TTL
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Set TTL in seconds
    pub fn ttl_secs(self, seconds: u64) -> Self {
        self.ttl(Duration::from_secs(seconds))
    }

    /// Set TTL in minutes
    pub fn ttl_mins(self, minutes: u64) -> Self {
        self.ttl(Duration::from_secs(minutes * 60))
    }

    /// Set TTL in hours
    pub fn ttl_hours(self, hours: u64) -> Self {
        self.ttl(Duration::from_secs(hours * 3600))
    }

    /// Never expire
    pub fn no_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Set memory tier capacity
    pub fn capacity(mut self, entries: usize) -> Self {
        self.memory_capacity = entries;
        self
    }

    /// Enable or disable stale-while-revalidate
    pub fn swr(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// One [`CategoryPolicy`] per category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPolicies {
    policies: [CategoryPolicy; Category::COUNT],
}

impl CategoryPolicies {
    /// Policy for a category
    pub fn get(&self, category: Category) -> &CategoryPolicy {
        &self.policies[category.index()]
    }

    /// Replace the policy for a category
    pub fn set(mut self, category: Category, policy: CategoryPolicy) -> Self {
        self.policies[category.index()] = policy;
        self
    }

    /// Modify the policy for a category in place
    pub fn with(
        mut self,
        category: Category,
        f: impl FnOnce(CategoryPolicy) -> CategoryPolicy,
    ) -> Self {
        let current = self.policies[category.index()].clone();
        self.policies[category.index()] = f(current);
        self
    }

    /// Iterate `(category, policy)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryPolicy)> {
        Category::ALL.into_iter().zip(self.policies.iter())
    }
}

impl Default for CategoryPolicies {
    fn default() -> Self {
        Self {
            policies: Category::ALL.map(CategoryPolicy::defaults_for),
        }
    }
}

impl Index<Category> for CategoryPolicies {
    type Output = CategoryPolicy;

    fn index(&self, category: Category) -> &CategoryPolicy {
        self.get(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let policy = CategoryPolicy::new();
        assert!(policy.ttl.is_none());
        assert_eq!(policy.memory_capacity, 0);
        assert!(!policy.stale_while_revalidate);
    }

    #[test]
    fn test_builder_fluent() {
        let policy = CategoryPolicy::new().ttl_secs(60).capacity(10).swr(true);
        assert_eq!(policy.ttl, Some(Duration::from_secs(60)));
        assert_eq!(policy.memory_capacity, 10);
        assert!(policy.stale_while_revalidate);
    }

    #[test]
    fn test_defaults_per_category() {
        let policies = CategoryPolicies::default();
        let url = policies[Category::Url].ttl.unwrap();
        let screenshot = policies[Category::Screenshot].ttl.unwrap();
        let asset = policies[Category::Asset].ttl.unwrap();
        assert!(url < screenshot);
        assert!(screenshot < asset);
        assert!(policies[Category::TrainingSample].ttl.is_none());
    }

    #[test]
    fn test_with_overrides_single_category() {
        let policies =
            CategoryPolicies::default().with(Category::Screenshot, |p| p.ttl_secs(1).capacity(2));
        assert_eq!(policies[Category::Screenshot].ttl, Some(Duration::from_secs(1)));
        assert_eq!(policies[Category::Screenshot].memory_capacity, 2);
        assert_eq!(
            policies[Category::Url],
            CategoryPolicy::defaults_for(Category::Url)
        );
    }
}
