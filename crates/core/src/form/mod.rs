//! Form state bound to a mutation.
//!
//! A form holds field values and the baseline they were loaded from. Submit
//! validates locally, transforms the values into a request payload, and runs
//! the mutation through a [`MutationExecutor`]. Server field errors land back
//! on the fields; general errors land on [`BASE_FIELD`].

mod values;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;

pub use values::{FieldValues, fields_filled, is_filled_value, values_differ};

use crate::mutation::{MutationExecutor, MutationOptions};
use crate::{BASE_FIELD, FieldErrors, MutationError};

/// Checks one field; `Some(message)` marks it invalid.
pub type Validator = Arc<dyn Fn(&Value, &FieldValues) -> Option<String> + Send + Sync>;

/// Sends the submitted payload.
pub type Action<R> = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<R, MutationError>> + Send + Sync>;

type MutationFor<T, R> = Arc<dyn Fn(&Value) -> MutationOptions<T, R> + Send + Sync>;

static NEXT_FORM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormPhase {
    Idle,
    Validating,
    Submitting,
}

/// What the form does with its values after a successful submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessPolicy {
    /// The submitted values become the new baseline.
    #[default]
    AdoptSubmitted,
    /// Values go back to the current baseline.
    ResetToInitial,
    /// Leave values and baseline alone.
    Keep,
}

#[derive(Debug)]
pub enum SubmitOutcome<R> {
    Submitted(R),
    /// Local validation failed; nothing was sent.
    Invalid(FieldErrors),
    Failed(MutationError),
    /// A submit was already in progress.
    Ignored,
}

impl<R> SubmitOutcome<R> {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    pub values: FieldValues,
    pub initial_values: FieldValues,
    pub errors: FieldErrors,
    pub phase: FormPhase,
}

impl FormState {
    pub fn is_dirty(&self) -> bool {
        values_differ(&self.values, &self.initial_values)
    }

    pub fn is_submitting(&self) -> bool {
        self.phase != FormPhase::Idle
    }
}

/// Props for one input: its current value and error.
pub struct InputProps<'a, T, R> {
    pub field: String,
    pub value: Value,
    pub error: Option<String>,
    form: &'a Form<T, R>,
}

impl<T, R> InputProps<'_, T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn on_change(&self, value: impl Into<Value>) {
        self.form.set_field_value(&self.field, value);
    }
}

/// Static configuration of a [`Form`].
pub struct FormConfig<T, R> {
    descriptor: String,
    action: Action<R>,
    initial_values: FieldValues,
    validators: BTreeMap<String, Validator>,
    transform_values: Option<Arc<dyn Fn(&FieldValues) -> Value + Send + Sync>>,
    transform_errors: Option<Arc<dyn Fn(FieldErrors) -> FieldErrors + Send + Sync>>,
    mutation: Option<MutationFor<T, R>>,
    on_success: SuccessPolicy,
    fail_silently: bool,
}

impl<T, R> FormConfig<T, R>
where
    R: Send + 'static,
{
    pub fn new<F, Fut>(descriptor: impl Into<String>, action: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MutationError>> + Send + 'static,
    {
        Self {
            descriptor: descriptor.into(),
            action: Arc::new(move |payload| action(payload).boxed()),
            initial_values: FieldValues::new(),
            validators: BTreeMap::new(),
            transform_values: None,
            transform_errors: None,
            mutation: None,
            on_success: SuccessPolicy::default(),
            fail_silently: false,
        }
    }

    pub fn initial(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.initial_values.insert(field.into(), value.into());
        self
    }

    pub fn validate(
        mut self, field: impl Into<String>, validator: impl Fn(&Value, &FieldValues) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.validators.insert(field.into(), Arc::new(validator));
        self
    }

    /// Shape the request payload from the field values. Defaults to an
    /// object of all fields.
    pub fn transform_values(mut self, f: impl Fn(&FieldValues) -> Value + Send + Sync + 'static) -> Self {
        self.transform_values = Some(Arc::new(f));
        self
    }

    /// Remap server field errors onto form fields.
    pub fn transform_errors(mut self, f: impl Fn(FieldErrors) -> FieldErrors + Send + Sync + 'static) -> Self {
        self.transform_errors = Some(Arc::new(f));
        self
    }

    /// Cache effects of a submit, built from its payload.
    pub fn mutation(mut self, f: impl Fn(&Value) -> MutationOptions<T, R> + Send + Sync + 'static) -> Self {
        self.mutation = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, policy: SuccessPolicy) -> Self {
        self.on_success = policy;
        self
    }

    pub fn fail_silently(mut self) -> Self {
        self.fail_silently = true;
        self
    }
}

/// Puts the form back to idle however `submit` exits.
struct IdleOnDrop<'a>(&'a Mutex<FormState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.lock().phase = FormPhase::Idle;
    }
}

/// A form whose submit runs a cache-aware mutation.
pub struct Form<T, R> {
    executor: MutationExecutor<T>,
    config: FormConfig<T, R>,
    guard: String,
    state: Mutex<FormState>,
}

impl<T, R> Form<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(executor: MutationExecutor<T>, config: FormConfig<T, R>) -> Self {
        let id = NEXT_FORM_ID.fetch_add(1, Ordering::Relaxed);
        let guard = format!("form:{}#{id}", config.descriptor);
        let state = FormState {
            values: config.initial_values.clone(),
            initial_values: config.initial_values.clone(),
            errors: FieldErrors::new(),
            phase: FormPhase::Idle,
        };
        Self { executor, config, guard, state: Mutex::new(state) }
    }

    pub fn state(&self) -> FormState {
        self.state.lock().clone()
    }

    pub fn values(&self) -> FieldValues {
        self.state.lock().values.clone()
    }

    pub fn value(&self, field: &str) -> Option<Value> {
        self.state.lock().values.get(field).cloned()
    }

    pub fn errors(&self) -> FieldErrors {
        self.state.lock().errors.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().is_dirty()
    }

    pub fn is_submitting(&self) -> bool {
        self.state.lock().is_submitting()
    }

    pub fn phase(&self) -> FormPhase {
        self.state.lock().phase
    }

    pub fn input_props(&self, field: &str) -> InputProps<'_, T, R> {
        let state = self.state.lock();
        InputProps {
            field: field.to_string(),
            value: state.values.get(field).cloned().unwrap_or(Value::Null),
            error: state.errors.get(field).cloned(),
            form: self,
        }
    }

    /// Set one field and clear its error.
    pub fn set_field_value(&self, field: &str, value: impl Into<Value>) {
        let mut state = self.state.lock();
        state.values.insert(field.to_string(), value.into());
        state.errors.remove(field);
    }

    pub fn set_errors(&self, errors: FieldErrors) {
        self.state.lock().errors = errors;
    }

    /// Back to the baseline, with no errors.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.values = state.initial_values.clone();
        state.errors.clear();
    }

    /// Replace the baseline, e.g. after the record was loaded.
    ///
    /// Fields the user has not touched follow the new baseline; edited
    /// fields keep their edits.
    pub fn set_initial_values(&self, initial: FieldValues) {
        let mut state = self.state.lock();
        let FormState { values, initial_values, .. } = &mut *state;
        for (field, next) in &initial {
            let untouched = values.get(field).unwrap_or(&Value::Null) == initial_values.get(field).unwrap_or(&Value::Null);
            if untouched {
                values.insert(field.clone(), next.clone());
            }
        }
        *initial_values = initial;
    }

    /// Whether every named field (every field when `fields` is empty) holds
    /// a filled value.
    pub fn fields_filled(&self, fields: &[&str]) -> bool {
        fields_filled(&self.state.lock().values, fields)
    }

    /// Validate and send the form.
    pub async fn submit(&self) -> SubmitOutcome<R> {
        let values = {
            let mut state = self.state.lock();
            if state.phase != FormPhase::Idle {
                tracing::debug!(form = %self.config.descriptor, "ignoring submit while one is in progress");
                return SubmitOutcome::Ignored;
            }
            state.phase = FormPhase::Validating;
            state.values.clone()
        };
        let _idle = IdleOnDrop(&self.state);

        let invalid = self.validate_values(&values);
        if !invalid.is_empty() {
            tracing::debug!(form = %self.config.descriptor, fields = invalid.len(), "form is invalid");
            self.state.lock().errors = invalid.clone();
            return SubmitOutcome::Invalid(invalid);
        }

        {
            let mut state = self.state.lock();
            state.errors.clear();
            state.phase = FormPhase::Submitting;
        }

        let payload = match &self.config.transform_values {
            Some(transform) => transform(&values),
            None => Value::Object(values.clone().into_iter().collect()),
        };
        let mut options = match &self.config.mutation {
            Some(build) => build(&payload),
            None => MutationOptions::new(self.config.descriptor.clone()),
        };
        if options.guard.is_none() {
            options.guard = Some(self.guard.clone());
        }
        if self.config.fail_silently {
            options.fail_silently = true;
        }

        let action = Arc::clone(&self.config.action);
        let result = self.executor.execute(move || action(payload), options).await;

        let mut state = self.state.lock();
        match result {
            Ok(response) => {
                match self.config.on_success {
                    SuccessPolicy::AdoptSubmitted => state.initial_values = values,
                    SuccessPolicy::ResetToInitial => state.values = state.initial_values.clone(),
                    SuccessPolicy::Keep => {}
                }
                SubmitOutcome::Submitted(response)
            }
            Err(err) if err.is_duplicate() => SubmitOutcome::Ignored,
            Err(err) => {
                state.errors = self.errors_for(&err);
                SubmitOutcome::Failed(err)
            }
        }
    }

    fn validate_values(&self, values: &FieldValues) -> FieldErrors {
        self.config
            .validators
            .iter()
            .filter_map(|(field, validator)| {
                let value = values.get(field).unwrap_or(&Value::Null);
                validator(value, values).map(|message| (field.clone(), message))
            })
            .collect()
    }

    fn errors_for(&self, err: &MutationError) -> FieldErrors {
        match err {
            MutationError::Rejected { message, field_errors } if field_errors.is_empty() => {
                FieldErrors::from([(BASE_FIELD.to_string(), message.clone())])
            }
            MutationError::Rejected { field_errors, .. } => match &self.config.transform_errors {
                Some(transform) => transform(field_errors.clone()),
                None => field_errors.clone(),
            },
            MutationError::Transport(message) | MutationError::Aborted(message) => {
                FieldErrors::from([(BASE_FIELD.to_string(), message.clone())])
            }
            MutationError::DuplicateSubmission(_) => FieldErrors::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, ResourceCache};
    use crate::fetch::FetchCoordinator;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn executor() -> MutationExecutor<Vec<String>> {
        MutationExecutor::new(FetchCoordinator::new(ResourceCache::new()))
    }

    fn blank(value: &Value, _: &FieldValues) -> Option<String> {
        (!is_filled_value(value)).then(|| "can't be blank".to_string())
    }

    fn post_form(calls: Arc<AtomicUsize>) -> Form<Vec<String>, String> {
        let config = FormConfig::new("create post", move |payload: Value| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(payload["body"].as_str().unwrap_or_default().to_string())
            }
        })
        .initial("body", "")
        .validate("body", blank);
        Form::new(executor(), config)
    }

    #[test]
    fn test_set_field_value_marks_dirty() {
        let form = post_form(Arc::default());
        assert!(!form.is_dirty());

        form.input_props("body").on_change("hello");
        assert_eq!(form.value("body"), Some(json!("hello")));
        assert!(form.is_dirty());

        form.set_field_value("body", "");
        assert!(!form.is_dirty());
    }

    #[test]
    fn test_reset_restores_baseline() {
        let form = post_form(Arc::default());
        form.set_field_value("body", "draft");
        form.set_errors(FieldErrors::from([("body".into(), "too short".into())]));

        form.reset();
        assert_eq!(form.value("body"), Some(json!("")));
        assert!(form.errors().is_empty());
    }

    #[test]
    fn test_set_initial_values_keeps_edits() {
        let form = post_form(Arc::default());
        form.set_field_value("title", "mine");

        form.set_initial_values(FieldValues::from([
            ("body".to_string(), json!("loaded body")),
            ("title".to_string(), json!("loaded title")),
        ]));

        assert_eq!(form.value("body"), Some(json!("loaded body")));
        assert_eq!(form.value("title"), Some(json!("mine")));
        assert!(form.is_dirty());
    }

    #[tokio::test]
    async fn test_invalid_form_is_not_sent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let form = post_form(Arc::clone(&calls));

        let outcome = form.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Invalid(ref e) if e.contains_key("body")));
        assert_eq!(form.input_props("body").error.as_deref(), Some("can't be blank"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(form.phase(), FormPhase::Idle);
    }

    #[tokio::test]
    async fn test_submit_adopts_submitted_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let form = post_form(Arc::clone(&calls));
        form.set_field_value("body", "hello world");

        let outcome = form.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Submitted(ref body) if body == "hello world"));
        assert!(!form.is_dirty());
        assert_eq!(form.state().initial_values.get("body"), Some(&json!("hello world")));
    }

    #[tokio::test]
    async fn test_reset_to_initial_on_success() {
        let config = FormConfig::new("create post", |_payload: Value| async { Ok::<_, MutationError>(()) })
            .initial("body", "")
            .on_success(SuccessPolicy::ResetToInitial);
        let form: Form<Vec<String>, ()> = Form::new(executor(), config);
        form.set_field_value("body", "sent");

        assert!(form.submit().await.is_submitted());
        assert_eq!(form.value("body"), Some(json!("")));
    }

    #[tokio::test]
    async fn test_server_field_errors_are_transformed() {
        let config = FormConfig::new("create world", |_payload: Value| async {
            Err::<(), _>(MutationError::invalid(FieldErrors::from([("world_name".into(), "is taken".into())])))
        })
        .initial("name", "Atlantis")
        .transform_errors(|errors| {
            errors.into_iter().map(|(field, message)| (field.replace("world_", ""), message)).collect()
        });
        let form: Form<Vec<String>, ()> = Form::new(executor(), config);

        assert!(matches!(form.submit().await, SubmitOutcome::Failed(_)));
        assert_eq!(form.errors(), FieldErrors::from([("name".into(), "is taken".into())]));
    }

    #[tokio::test]
    async fn test_general_error_lands_on_base() {
        let config = FormConfig::new("create world", |_payload: Value| async {
            Err::<(), _>(MutationError::rejected("worlds are closed"))
        });
        let form: Form<Vec<String>, ()> = Form::new(executor(), config);

        assert!(matches!(form.submit().await, SubmitOutcome::Failed(_)));
        assert_eq!(form.errors().get(BASE_FIELD).map(String::as_str), Some("worlds are closed"));
        assert!(!form.is_submitting());
    }

    #[tokio::test]
    async fn test_transform_values_shapes_payload() {
        let (tx, rx) = oneshot::channel::<Value>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let config = FormConfig::new("create post", move |payload: Value| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(payload);
            }
            async { Ok::<_, MutationError>(()) }
        })
        .initial("body", "hi")
        .initial("title", "")
        .transform_values(|values| json!({ "post": { "body": values["body"], "title": values["title"] } }));
        let form: Form<Vec<String>, ()> = Form::new(executor(), config);

        form.submit().await;
        assert_eq!(rx.await.unwrap(), json!({ "post": { "body": "hi", "title": "" } }));
    }

    #[tokio::test]
    async fn test_double_submit_sends_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let counter = Arc::clone(&calls);
        let config = FormConfig::new("create post", move |_payload: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            let rx = rx.lock().take();
            async move {
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok::<_, MutationError>(())
            }
        })
        .initial("body", "hello");
        let form: Form<Vec<String>, ()> = Form::new(executor(), config);

        let release = async {
            tokio::task::yield_now().await;
            assert!(form.is_submitting());
            tx.send(()).unwrap();
        };
        let (first, second, ()) = tokio::join!(form.submit(), form.submit(), release);

        assert!(first.is_submitted());
        assert!(matches!(second, SubmitOutcome::Ignored));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!form.is_submitting());
    }

    #[tokio::test]
    async fn test_submit_patches_cache_optimistically() {
        let executor = executor();
        let key = CacheKey::new("world_posts").with_param("world_id", "w1");
        executor.cache().set(&key, vec![]);

        let cache = executor.cache().clone();
        let seen_key = key.clone();
        let config = FormConfig::new("create post", move |_payload: Value| {
            let seen = cache.data(&seen_key);
            async move { Ok::<_, MutationError>(seen) }
        })
        .initial("body", "first!")
        .mutation({
            let key = key.clone();
            move |payload: &Value| {
                let body = payload["body"].as_str().unwrap_or_default().to_string();
                MutationOptions::new("create post")
                    .affecting(key.clone())
                    .optimistic(move |posts: Option<&Vec<String>>| {
                        let mut posts = posts.cloned().unwrap_or_default();
                        posts.push(body.clone());
                        posts
                    })
                    .without_revalidation()
            }
        });
        let form = Form::new(executor.clone(), config);

        let outcome = form.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Submitted(Some(ref posts)) if posts == &["first!".to_string()]));
        assert_eq!(executor.cache().data(&key), Some(vec!["first!".to_string()]));
    }
    #[tokio::test]
    async fn test_create_post_lands_once_and_form_is_clean() {
        let executor: MutationExecutor<Vec<Value>> = MutationExecutor::new(FetchCoordinator::new(ResourceCache::new()));
        let feed = CacheKey::new("user_posts").with_param("user_id", "u1");
        executor.cache().set(&feed, vec![]);
        let server_post = json!({ "id": "p1", "body": "hello" });

        let listed = server_post.clone();
        executor.coordinator().register(
            &feed,
            Arc::new(crate::fetch::fetcher_fn(move |_key| {
                let listed = listed.clone();
                async move { Ok(vec![listed]) }
            })),
        );

        let created = server_post.clone();
        let config = FormConfig::new("create post", move |_payload: Value| {
            let created = created.clone();
            async move { Ok::<_, MutationError>(json!({ "post": created })) }
        })
        .initial("title", "")
        .initial("body", "")
        .mutation({
            let feed = feed.clone();
            move |payload: &Value| {
                let draft = json!({ "id": null, "body": payload["body"] });
                MutationOptions::new("create post")
                    .affecting(feed.clone())
                    .optimistic(move |posts: Option<&Vec<Value>>| {
                        let mut posts = posts.cloned().unwrap_or_default();
                        posts.push(draft.clone());
                        posts
                    })
                    .populate(|prior: Option<&Vec<Value>>, response: &Value| {
                        let post = response["post"].clone();
                        let mut posts: Vec<Value> =
                            prior.cloned().unwrap_or_default().into_iter().filter(|p| p["id"] != post["id"]).collect();
                        posts.push(post);
                        posts
                    })
            }
        });
        let form = Form::new(executor.clone(), config);

        form.set_field_value("body", "hello");
        assert!(form.submit().await.is_submitted());
        while executor.coordinator().is_fetching(&feed) {
            tokio::task::yield_now().await;
        }

        let posts = executor.cache().data(&feed).unwrap_or_default();
        assert_eq!(posts.iter().filter(|p| p["id"] == "p1").count(), 1);
        assert_eq!(posts, vec![server_post]);
        assert!(!form.is_dirty());
    }
}
