use std::sync::Arc;

use crate::cache::{CacheKey, Patch};

/// Builds the committed value of a key from its pre-mutation value and the
/// server's response.
pub type Populate<T, R> = Arc<dyn Fn(Option<&T>, &R) -> T + Send + Sync>;

/// Cache effects of one mutation.
pub struct MutationOptions<T, R> {
    /// Human-readable action, used in log lines ("create post").
    pub descriptor: String,
    pub affected_keys: Vec<CacheKey>,
    /// Applied to every affected key before the action runs.
    pub optimistic: Option<Patch<T>>,
    /// Applied to every affected key once the action succeeds. Should be an
    /// upsert so that settling twice gives the same data.
    pub populate: Option<Populate<T, R>>,
    /// Refetch affected keys after success.
    pub revalidate: bool,
    /// Log failures at debug instead of error.
    pub fail_silently: bool,
    /// At most one mutation per guard is in flight.
    pub guard: Option<String>,
}

impl<T, R> MutationOptions<T, R> {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            affected_keys: Vec::new(),
            optimistic: None,
            populate: None,
            revalidate: true,
            fail_silently: false,
            guard: None,
        }
    }

    pub fn affecting(mut self, key: CacheKey) -> Self {
        self.affected_keys.push(key);
        self
    }

    pub fn optimistic(mut self, patch: impl Fn(Option<&T>) -> T + Send + Sync + 'static) -> Self {
        self.optimistic = Some(Arc::new(patch));
        self
    }

    pub fn populate(mut self, populate: impl Fn(Option<&T>, &R) -> T + Send + Sync + 'static) -> Self {
        self.populate = Some(Arc::new(populate));
        self
    }

    pub fn without_revalidation(mut self) -> Self {
        self.revalidate = false;
        self
    }

    pub fn fail_silently(mut self) -> Self {
        self.fail_silently = true;
        self
    }

    pub fn guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

impl<T, R> std::fmt::Debug for MutationOptions<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("descriptor", &self.descriptor)
            .field("affected_keys", &self.affected_keys)
            .field("optimistic", &self.optimistic.is_some())
            .field("populate", &self.populate.is_some())
            .field("revalidate", &self.revalidate)
            .field("fail_silently", &self.fail_silently)
            .field("guard", &self.guard)
            .finish()
    }
}
