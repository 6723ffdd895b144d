//! Forms on top of the store
//!
//! A form owns two memory-only namespaces: `form:<id>` for field data and
//! `errors.form:<id>` for one error string per field path. Validators are
//! attached per field at build time and keep the error namespace current.

use std::ops::Deref;
use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::hooks::ObjectWatch;
use crate::root::{Node, StoreOptions, StoreRoot};
use crate::store::{Store, Subscription};

/// Custom validator: field value and form in, error message out
pub type ValidatorFn = Arc<dyn Fn(Option<&Value>, &FormStore) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum Validator {
    /// Empty string or non-scalar value is an error
    NotEmpty,
    /// Stringified value must match
    Regex(Regex),
    Custom(ValidatorFn),
}

impl Validator {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(Option<&Value>, &FormStore) -> Option<String> + Send + Sync + 'static,
    {
        Validator::Custom(Arc::new(check))
    }

    fn check(&self, field: &str, value: Option<&Value>, form: &FormStore) -> Option<String> {
        match self {
            Validator::NotEmpty => {
                string_value(value)
                    .is_empty()
                    .then(|| format!("{} is required", pascal_case(field)))
            }
            Validator::Regex(regex) => {
                (!regex.is_match(&string_value(value)))
                    .then(|| format!("{} is invalid", pascal_case(field)))
            }
            Validator::Custom(check) => check(value, form),
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validator::NotEmpty => f.write_str("NotEmpty"),
            Validator::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
            Validator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub struct FormBuilder {
    store: Arc<Store>,
    default: Value,
    validators: Vec<(String, Validator)>,
}

impl FormBuilder {
    pub fn validate(mut self, path: impl Into<String>, validator: Validator) -> Self {
        self.validators.push((path.into(), validator));
        self
    }

    pub fn build(self) -> Form {
        let namespace = format!("form:{}", Uuid::new_v4().simple());
        let memory_only = StoreOptions { memory_only: true };

        let data = StoreRoot::new(self.store.clone(), &namespace, self.default, memory_only);
        let errors = StoreRoot::new(
            self.store.clone(),
            format!("errors.{}", namespace),
            json!({}),
            memory_only,
        );
        let form = FormStore { data, errors };

        let mut subscriptions = Vec::with_capacity(self.validators.len());
        for (path, validator) in self.validators {
            let run = {
                let form = form.clone();
                let path = path.clone();
                move || {
                    let value = form.data.value(&path);
                    let error = validator.check(&path, value.as_ref(), &form);
                    form.errors.set(&path, error.map(Value::String));
                }
            };

            run();
            subscriptions.push(self.store.subscribe(&form.data.key(&path), run));
        }

        tracing::debug!(namespace = %namespace, validators = subscriptions.len(), "form created");

        Form {
            store: form,
            _validators: subscriptions,
        }
    }
}

/// A live form; dropping it detaches its validators
pub struct Form {
    store: FormStore,
    _validators: Vec<Subscription>,
}

impl Form {
    pub fn builder(store: Arc<Store>, default: Value) -> FormBuilder {
        FormBuilder {
            store,
            default,
            validators: Vec::new(),
        }
    }

    pub fn store(&self) -> &FormStore {
        &self.store
    }
}

impl Deref for Form {
    type Target = FormStore;

    fn deref(&self) -> &FormStore {
        &self.store
    }
}

/// Event handed to a submit handler
#[derive(Debug, Default)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Clone, Debug)]
pub struct FormStore {
    data: StoreRoot,
    errors: StoreRoot,
}

impl FormStore {
    pub fn namespace(&self) -> &str {
        self.data.namespace()
    }

    pub fn error_namespace(&self) -> &str {
        self.errors.namespace()
    }

    pub fn field(&self, path: &str) -> FormField {
        FormField {
            node: self.data.node(path),
            errors: self.errors.clone(),
        }
    }

    /// Full data snapshot
    pub fn snapshot(&self) -> Value {
        self.data.value("").unwrap_or(Value::Null)
    }

    /// Field path -> error message, for every field currently in error
    pub fn errors(&self) -> Value {
        self.errors.value("").unwrap_or_else(|| json!({}))
    }

    pub fn clear_errors(&self) {
        self.errors
            .store()
            .produce(self.errors.namespace(), None, false, true);
    }

    /// Wrap `on_submit` into an event handler that suppresses the default
    /// action and passes the current data snapshot
    pub fn handle_submit<F>(&self, on_submit: F) -> impl Fn(&mut SubmitEvent)
    where
        F: Fn(Value),
    {
        let form = self.clone();
        move |event: &mut SubmitEvent| {
            event.prevent_default();
            on_submit(form.snapshot());
        }
    }
}

/// Form field accessor: a `Node` plus its error slot
#[derive(Clone, Debug)]
pub struct FormField {
    node: Node,
    errors: StoreRoot,
}

impl FormField {
    pub fn field(&self, segment: &str) -> FormField {
        FormField {
            node: self.node.at(segment),
            errors: self.errors.clone(),
        }
    }

    pub fn error(&self) -> Option<String> {
        match self.errors.value(self.node.path())? {
            Value::String(message) => Some(message),
            _ => None,
        }
    }

    pub fn set_error(&self, error: Option<String>) {
        self.errors.set(self.node.path(), error.map(Value::String));
    }

    pub fn watch_error(&self) -> ObjectWatch {
        self.errors.watch(self.node.path())
    }
}

impl Deref for FormField {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

/// Text a validator checks: strings as-is, numbers and booleans printed,
/// anything else empty
pub fn string_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// `user.firstName` -> `UserFirstName`
pub fn pascal_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut word_start = true;
    let mut prev_lower = false;

    for ch in input.chars() {
        if !ch.is_alphanumeric() {
            word_start = true;
            prev_lower = false;
            continue;
        }

        if ch.is_uppercase() && prev_lower {
            word_start = true;
        }

        if word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }

        word_start = false;
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
    }

    out
}
