//! End-to-end engine behavior: registration, validation, submission, reset,
//! visibility propagation, deferred state tasks, and graph serialization.

use formant_core::{
    FieldRegistryProps, Form, FormError, FormOptions, FormPath, GraphNodeSnapshot, LifeCycleType,
    ResetOptions, ValidateOptions, ValidateRule, VirtualFieldRegistryProps,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn recorded_events(form: &Form) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    form.subscribe(move |event| {
        events_clone
            .lock()
            .unwrap()
            .push(event.event_type.name().to_string());
    });
    events
}

#[test]
fn registration_pulls_values_from_initial_values() {
    let form = Form::new(FormOptions::new().initial_values(json!({"user": {"name": "ada"}})));
    form.register_field(FieldRegistryProps::new("user.name"));

    assert_eq!(form.get_field_value("user.name"), Some(json!("ada")));
    assert!(form.get_form_state(|s| s.pristine));
}

#[test]
fn reregistration_returns_same_node_and_keeps_input() {
    let form = Form::new(FormOptions::new());
    let first = form.register_field(FieldRegistryProps::new("name"));
    first.set_state(|s| s.value = json!("typed"));

    // A remounting UI registers the same path again
    let second = form.register_field(FieldRegistryProps::new("name").required(true));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(form.get_field_value("name"), Some(json!("typed")));
    assert!(form.get_field_state("name", |s| s.required).unwrap());
}

#[test]
fn virtual_nodes_are_skipped_in_the_data_path() {
    let form = Form::new(FormOptions::new());
    form.register_virtual_field(VirtualFieldRegistryProps::new("layout"));
    let field = form.register_field(FieldRegistryProps::new("layout.name"));
    field.set_state(|s| s.value = json!("x"));

    assert_eq!(form.get_form_state(|s| s.values.clone()), json!({"name": "x"}));
}

#[tokio::test]
async fn validate_collects_required_errors_and_syncs_form_state() {
    let form = Form::new(FormOptions::new());
    form.register_field(
        FieldRegistryProps::new("email")
            .rules(vec![ValidateRule::required().with_message("email is required")]),
    );
    form.register_field(FieldRegistryProps::new("nickname"));

    let err = form
        .validate(FormPath::root(), ValidateOptions::default())
        .await
        .unwrap_err();
    match err {
        FormError::ValidateFailed(result) => {
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.errors[0].messages, vec!["email is required".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!form.get_form_state(|s| s.valid));
    assert_eq!(form.get_form_state(|s| s.errors.len()), 1);

    form.set_field_value("email", json!("a@b.c"));
    let result = form
        .validate(FormPath::root(), ValidateOptions::default())
        .await
        .unwrap();
    assert!(result.is_valid());
    assert!(form.get_form_state(|s| s.valid));
    assert!(form.get_form_state(|s| s.errors.is_empty()));
}

#[tokio::test]
async fn invisible_fields_are_skipped_by_validation() {
    let form = Form::new(FormOptions::new());
    form.register_field(
        FieldRegistryProps::new("hidden")
            .visible(false)
            .rules(vec![ValidateRule::required()]),
    );

    let result = form
        .validate(FormPath::root(), ValidateOptions::default())
        .await
        .unwrap();
    assert!(result.is_valid());
}

#[tokio::test]
async fn readonly_fields_are_skipped_by_validation() {
    let form = Form::new(FormOptions::new().editable(false));
    form.register_field(
        FieldRegistryProps::new("locked").rules(vec![ValidateRule::required()]),
    );

    let result = form
        .validate(FormPath::root(), ValidateOptions::default())
        .await
        .unwrap();
    assert!(result.is_valid());
}

#[tokio::test]
async fn submit_hands_values_to_the_handler() {
    let form = Form::new(FormOptions::new().on_submit(|values| {
        Box::pin(async move { Ok(json!({"echo": values})) })
    }));
    form.register_field(FieldRegistryProps::new("name").value(json!("ada")));
    let events = recorded_events(&form);

    let result = form.submit(None).await.unwrap();
    assert_eq!(result.values, json!({"name": "ada"}));
    assert_eq!(result.payload, Some(json!({"echo": {"name": "ada"}})));
    assert!(!form.get_form_state(|s| s.submitting));

    let events = events.lock().unwrap();
    assert!(events.contains(&"onFormSubmitStart".to_string()));
    assert!(events.contains(&"onFormSubmitValidateSuccess".to_string()));
    assert!(events.contains(&"onFormOnSubmitSuccess".to_string()));
    assert!(events.contains(&"onFormSubmitEnd".to_string()));
}

#[tokio::test]
async fn concurrent_submits_share_one_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let form = Form::new(FormOptions::new().on_submit(move |_| {
        let calls = calls_clone.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(json!("done"))
        })
    }));
    form.register_field(FieldRegistryProps::new("a").value(json!(1)));

    let (first, second) = tokio::join!(form.submit(None), form.submit(None));
    assert_eq!(first.unwrap().payload, Some(json!("done")));
    assert_eq!(second.unwrap().payload, Some(json!("done")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn submit_with_errors_rejects_before_the_handler_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let form = Form::new(FormOptions::new().on_submit(move |_| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(Value::Null) })
    }));
    form.register_field(
        FieldRegistryProps::new("must").rules(vec![ValidateRule::required()]),
    );
    let events = recorded_events(&form);

    let err = form.submit(None).await.unwrap_err();
    assert!(matches!(err, FormError::ValidateFailed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!form.get_form_state(|s| s.submitting));
    assert!(events
        .lock()
        .unwrap()
        .contains(&"onFormSubmitValidateFailed".to_string()));
}

#[tokio::test]
async fn failed_handler_surfaces_as_submit_error() {
    let form = Form::new(
        FormOptions::new().on_submit(|_| Box::pin(async move { Err("server said no".into()) })),
    );
    form.register_field(FieldRegistryProps::new("a").value(json!(1)));
    let events = recorded_events(&form);

    let err = form.submit(None).await.unwrap_err();
    assert!(matches!(err, FormError::SubmitFailed(ref message) if message == "server said no"));
    assert!(!form.get_form_state(|s| s.submitting));
    assert!(events
        .lock()
        .unwrap()
        .contains(&"onFormOnSubmitFailed".to_string()));
}

#[tokio::test]
async fn reset_restores_initial_values_and_clears_messages() {
    let form = Form::new(FormOptions::new().initial_values(json!({"name": "ada", "tags": ["x"]})));
    form.register_field(
        FieldRegistryProps::new("name").rules(vec![ValidateRule::required()]),
    );
    form.register_field(FieldRegistryProps::new("tags"));

    form.set_field_value("name", json!("changed"));
    form.set_field_state("name", |s| s.effect_errors = vec!["pushed".into()]);
    assert!(!form.get_form_state(|s| s.valid));

    form.reset(ResetOptions::new()).await.unwrap();
    assert_eq!(form.get_field_value("name"), Some(json!("ada")));
    assert_eq!(form.get_field_value("tags"), Some(json!(["x"])));
    assert!(!form.get_field_state("name", |s| s.modified).unwrap());
    assert!(form.get_form_state(|s| s.valid));
}

#[tokio::test]
async fn force_clear_reset_empties_values() {
    let form = Form::new(FormOptions::new().initial_values(json!({"name": "ada", "tags": ["x"]})));
    form.register_field(FieldRegistryProps::new("name"));
    form.register_field(FieldRegistryProps::new("tags"));

    form.reset(ResetOptions::new().force_clear(true).validate(false))
        .await
        .unwrap();
    assert_eq!(form.get_field_value("name"), Some(Value::Null));
    assert_eq!(form.get_field_value("tags"), Some(json!([])));
}

#[test]
fn hiding_a_parent_cascades_and_restores_explicitly_hidden_children() {
    let form = Form::new(FormOptions::new());
    form.register_field(FieldRegistryProps::new("group").value(json!({})));
    form.register_field(FieldRegistryProps::new("group.a").value(json!("va")));
    form.register_field(FieldRegistryProps::new("group.b").value(json!("vb")));

    // Child hides on its own first
    form.set_field_state("group.b", |s| s.visible = false);
    assert_eq!(
        form.get_form_state(|s| s.values.clone()),
        json!({"group": {"a": "va"}})
    );

    form.set_field_state("group", |s| s.visible = false);
    assert!(!form.get_field_state("group.a", |s| s.visible).unwrap());

    form.set_field_state("group", |s| s.visible = true);
    // Cascaded child comes back, explicitly hidden child stays hidden
    assert!(form.get_field_state("group.a", |s| s.visible).unwrap());
    assert!(!form.get_field_state("group.b", |s| s.visible).unwrap());
    assert_eq!(form.get_field_value("group.a"), Some(json!("va")));
}

#[test]
fn unmatched_state_tasks_apply_to_later_registrations() {
    let form = Form::new(FormOptions::new());
    form.set_field_state("later", |s| s.required = true);

    form.register_field(FieldRegistryProps::new("later"));
    assert!(form.get_field_state("later", |s| s.required).unwrap());
}

#[test]
fn state_mutations_reach_virtual_nodes() {
    let form = Form::new(FormOptions::new());
    form.register_virtual_field(VirtualFieldRegistryProps::new("layout"));

    form.set_field_state("layout", |s| s.visible = false);
    assert!(!form.virtual_field_state("layout").unwrap().visible);
}

#[test]
fn unmatched_state_tasks_apply_to_later_virtual_registrations() {
    let form = Form::new(FormOptions::new());
    form.set_field_state("layout", |s| s.display = false);

    let vfield = form.register_virtual_field(VirtualFieldRegistryProps::new("layout"));
    assert!(!vfield.state().display);
}

#[test]
fn wildcard_state_tasks_keep_applying() {
    let form = Form::new(FormOptions::new());
    form.set_field_state("items.*", |s| s.props = json!({"size": "small"}));

    form.register_field(FieldRegistryProps::new("items.0"));
    form.register_field(FieldRegistryProps::new("items.1"));
    assert_eq!(
        form.get_field_state("items.0", |s| s.props.clone()).unwrap(),
        json!({"size": "small"})
    );
    assert_eq!(
        form.get_field_state("items.1", |s| s.props.clone()).unwrap(),
        json!({"size": "small"})
    );
}

#[test]
fn unmount_removes_node_only_without_retained_value() {
    let form = Form::new(FormOptions::new());
    form.register_field(FieldRegistryProps::new("kept").value(json!("v")));
    form.register_field(
        FieldRegistryProps::new("dropped")
            .value(json!("v"))
            .unmount_remove_value(true),
    );

    form.set_field_state("kept", |s| s.unmounted = true);
    form.set_field_state("dropped", |s| s.unmounted = true);

    // Retained value keeps the node alive for remounting
    assert!(form.field_state("kept").is_some());
    assert!(form.field_state("dropped").is_none());
    assert_eq!(form.get_form_state(|s| s.values.clone()), json!({"kept": "v"}));
}

#[test]
fn dirty_queries_work_only_inside_dispatch() {
    let form = Form::new(FormOptions::new());
    form.register_field(FieldRegistryProps::new("name"));

    let observed = Arc::new(Mutex::new(None));
    let observed_clone = observed.clone();
    let probe = form.clone();
    form.subscribe(move |event| {
        if event.event_type == LifeCycleType::OnFieldValueChange {
            *observed_clone.lock().unwrap() =
                Some(probe.field_has_changed("name", "value").unwrap());
        }
    });

    form.set_field_value("name", json!("x"));
    assert_eq!(*observed.lock().unwrap(), Some(true));
    assert!(matches!(
        form.field_has_changed("name", "value"),
        Err(FormError::IllegalDirtyAccess)
    ));
    assert!(matches!(
        form.field_has_changed("name", "bogus"),
        Err(FormError::UnknownStateKey(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn slow_validation_raises_the_validating_flag() {
    let form = Form::new(FormOptions::new());
    form.register_field(FieldRegistryProps::new("slow").rules(vec![
        ValidateRule::custom(|_value| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Some("too slow".to_string())
            })
        }),
    ]));

    let saw_validating = Arc::new(AtomicUsize::new(0));
    let saw_clone = saw_validating.clone();
    form.subscribe(move |event| {
        if let Some(state) = event.payload.as_field() {
            if state.validating {
                saw_clone.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let err = form
        .validate(FormPath::root(), ValidateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FormError::ValidateFailed(_)));
    assert!(saw_validating.load(Ordering::SeqCst) > 0);
    assert!(!form.get_field_state("slow", |s| s.validating).unwrap());
    assert!(!form.get_form_state(|s| s.validating));
}

#[test]
fn graph_export_and_import_round_trip() {
    let form = Form::new(FormOptions::new());
    form.register_field(FieldRegistryProps::new("name").value(json!("ada")));
    form.register_virtual_field(VirtualFieldRegistryProps::new("layout"));
    form.set_field_state("name", |s| s.effect_errors = vec!["bad".into()]);

    let snapshot = form.form_graph();
    assert!(matches!(snapshot.get(""), Some(GraphNodeSnapshot::Form(_))));
    assert!(matches!(
        snapshot.get("name"),
        Some(GraphNodeSnapshot::Field(_))
    ));
    assert!(matches!(
        snapshot.get("layout"),
        Some(GraphNodeSnapshot::Virtual(_))
    ));

    // Snapshots survive serialization
    let raw = serde_json::to_string(&snapshot).unwrap();
    let parsed: formant_core::FormGraphSnapshot = serde_json::from_str(&raw).unwrap();

    let restored = Form::new(FormOptions::new());
    restored.set_form_graph(parsed);
    assert_eq!(restored.get_field_value("name"), Some(json!("ada")));
    assert_eq!(
        restored.get_field_state("name", |s| s.effect_errors.clone()).unwrap(),
        vec!["bad".to_string()]
    );
    assert!(restored.virtual_field_state("layout").is_some());
}

#[test]
fn custom_events_flow_through_the_lifecycle_stream() {
    let form = Form::new(FormOptions::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    form.subscribe(move |event| {
        if let LifeCycleType::Custom(name) = &event.event_type {
            seen_clone.lock().unwrap().push(name.clone());
        }
    });

    form.notify("app:step-changed", json!({"step": 2}));
    assert_eq!(*seen.lock().unwrap(), vec!["app:step-changed".to_string()]);
}
