use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use juststore::{Form, MemoryPersistence, Store, SubmitEvent, Validator};
use serde_json::json;

#[test]
fn scenario_form_validation() {
    let store = Store::in_memory();
    let form = Form::builder(store, json!({"alias": ""}))
        .validate("alias", Validator::NotEmpty)
        .build();

    let alias = form.field("alias");
    assert_eq!(alias.error().as_deref(), Some("Alias is required"));

    alias.set(json!("x"));
    assert_eq!(alias.error(), None);

    alias.set(json!(""));
    assert_eq!(alias.error().as_deref(), Some("Alias is required"));
}

#[test]
fn nested_field_validation_and_whole_form_writes() {
    let store = Store::in_memory();
    let form = Form::builder(store, json!({"user": {"firstName": "Ada"}}))
        .validate("user.firstName", Validator::NotEmpty)
        .build();

    let first = form.field("user").field("firstName");
    assert_eq!(first.error(), None);

    // Replacing the whole form reaches the field through the descendant diff
    form.field("user").set(json!({"firstName": ""}));
    assert_eq!(first.error().as_deref(), Some("UserFirstName is required"));
}

#[test]
fn form_state_never_persists() {
    let persistence = Arc::new(MemoryPersistence::new());
    let store = Store::builder().persistence(persistence.clone()).build();

    let form = Form::builder(store, json!({"alias": ""}))
        .validate("alias", Validator::NotEmpty)
        .build();
    form.field("alias").set(json!("y"));
    form.field("alias").set_error(Some("taken".into()));

    assert!(persistence.is_empty());
}

#[test]
fn forms_are_isolated() {
    let store = Store::in_memory();
    let a = Form::builder(store.clone(), json!({"v": 1})).build();
    let b = Form::builder(store, json!({"v": 2})).build();

    a.field("v").set(json!(10));
    a.field("v").set_error(Some("bad".into()));

    assert_eq!(b.field("v").value(), Some(json!(2)));
    assert_eq!(b.field("v").error(), None);
    assert_ne!(a.namespace(), b.namespace());
}

#[test]
fn error_watch_follows_validator() {
    let store = Store::in_memory();
    let form = Form::builder(store, json!({"email": "a@b"}))
        .validate(
            "email",
            Validator::Regex(regex::Regex::new(r"^[^@]+@[^@]+\.[a-z]+$").unwrap()),
        )
        .build();

    let email = form.field("email");
    let watch = email.watch_error();
    assert_eq!(watch.get(), Some(json!("Email is invalid")));

    email.set(json!("a@b.io"));
    assert_eq!(watch.get(), None);
}

#[test]
fn submit_receives_current_values() {
    let store = Store::in_memory();
    let form = Form::builder(store, json!({"alias": "", "tags": []})).build();
    form.field("alias").set(json!("neo"));
    form.field("tags").push(json!("admin"));

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let submit = form.handle_submit(move |values| {
        assert_eq!(values, json!({"alias": "neo", "tags": ["admin"]}));
        c.fetch_add(1, Ordering::SeqCst);
    });

    let mut event = SubmitEvent::new();
    submit(&mut event);

    assert!(event.default_prevented());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
