//! Field array behaviour observed through the form: keys, errors and
//! registrations follow their records across structural edits.

use std::cell::RefCell;
use std::rc::Rc;

use formwork::{
    FieldPath, Form, FormEvent, FormOptions, RegisterOptions, SetValueOptions, ValidationMode,
    ValidationRule,
};
use serde_json::json;

fn phone_form(options: FormOptions, numbers: serde_json::Value) -> Form {
    let form = Form::with_defaults(options, json!({ "phNumbers": numbers }));
    let len = numbers_len(&form);
    for index in 0..len {
        form.register(
            FieldPath::parse("phNumbers").index(index).key("number"),
            vec![ValidationRule::required("Phone number is required")],
            RegisterOptions::new(),
        )
        .unwrap();
    }
    form
}

fn numbers_len(form: &Form) -> usize {
    form.get_value("phNumbers")
        .unwrap()
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0)
}

#[test]
fn append_then_remove_first_keeps_the_second_key() {
    let form = Form::with_defaults(
        FormOptions::default(),
        json!({"phNumbers": [{"number": "1"}]}),
    );
    let numbers = form.field_array("phNumbers");

    assert!(numbers.append(json!({"number": "2"})).unwrap());
    let before = numbers.fields().unwrap();
    assert_eq!(before.len(), 2);
    assert_ne!(before[0].key, before[1].key);

    assert!(numbers.remove(0).unwrap());
    let after = numbers.fields().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].key, before[1].key);
    assert_eq!(after[0].value, json!({"number": "2"}));
    assert_eq!(
        form.values().unwrap(),
        json!({"phNumbers": [{"number": "2"}]})
    );
}

#[test]
fn keys_survive_reads_and_value_writes() {
    let form = Form::with_defaults(
        FormOptions::default(),
        json!({"phNumbers": [{"number": "1"}, {"number": "2"}]}),
    );
    let numbers = form.field_array("phNumbers");
    let first = numbers.fields().unwrap();

    form.set_value("phNumbers.1.number", json!("22"), SetValueOptions::new())
        .unwrap();
    let second = numbers.fields().unwrap();
    assert_eq!(
        first.iter().map(|i| i.key).collect::<Vec<_>>(),
        second.iter().map(|i| i.key).collect::<Vec<_>>()
    );
    assert_eq!(second[1].value, json!({"number": "22"}));
}

#[tokio::test]
async fn errors_and_registrations_follow_their_record() {
    let form = phone_form(
        FormOptions::default(),
        json!([{"number": "1"}, {"number": ""}]),
    );
    assert!(!form.validate_form().await.unwrap());
    assert!(form.errors().unwrap().contains(&"phNumbers.1.number".into()));

    form.field_array("phNumbers").remove(0).unwrap();

    let errors = form.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.message(&"phNumbers.0.number".into()),
        Some("Phone number is required")
    );
    assert!(!errors.contains(&"phNumbers.1.number".into()));

    // the moved registration still validates the record it followed
    form.set_value("phNumbers.0.number", json!("555"), SetValueOptions::new())
        .unwrap();
    assert!(form.validate_form().await.unwrap());
    assert!(!form
        .set_value("phNumbers.1.number", json!("x"), SetValueOptions::new())
        .unwrap());
}

#[test]
fn removing_a_record_drops_its_error() {
    let form = phone_form(
        FormOptions::default(),
        json!([{"number": ""}, {"number": "2"}]),
    );
    form.set_error("phNumbers.0.number", "Number rejected by carrier")
        .unwrap();

    form.field_array("phNumbers").remove(0).unwrap();
    assert!(form.errors().unwrap().is_empty());
}

#[test]
fn item_subscribers_hear_array_edits() {
    let form = phone_form(
        FormOptions::default(),
        json!([{"number": "1"}, {"number": ""}]),
    );
    form.set_error("phNumbers.1.number", "Phone number is required")
        .unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let _sub = {
        let log = Rc::clone(&log);
        form.subscribe("phNumbers.0.number", move |event: &FormEvent| {
            log.borrow_mut().push(event.clone())
        })
    };

    form.field_array("phNumbers").remove(0).unwrap();

    let log = log.borrow();
    assert!(log.iter().any(|e| matches!(
        e,
        FormEvent::Value { path, .. } if *path == FieldPath::parse("phNumbers")
    )));
    assert!(log.iter().any(|e| matches!(
        e,
        FormEvent::Error { path, error: Some(_) } if *path == FieldPath::parse("phNumbers.0.number")
    )));
}

#[test]
fn replace_issues_a_new_key_and_clears_item_state() {
    let form = phone_form(FormOptions::default(), json!([{"number": "1"}]));
    form.set_value(
        "phNumbers.0.number",
        json!(""),
        SetValueOptions::new().touch(),
    )
    .unwrap();
    form.set_error("phNumbers.0.number", "Phone number is required")
        .unwrap();

    let numbers = form.field_array("phNumbers");
    let before = numbers.fields().unwrap();
    assert!(numbers.replace(0, json!({"number": "9"})).unwrap());

    let after = numbers.fields().unwrap();
    assert_ne!(after[0].key, before[0].key);
    assert_eq!(after[0].value, json!({"number": "9"}));

    let state = form.field_state("phNumbers.0.number").unwrap();
    assert!(!state.touched);
    assert!(state.error.is_none());
}

#[test]
fn on_change_mode_revalidates_after_a_swap() {
    let form = phone_form(
        FormOptions::default().with_mode(ValidationMode::OnChange),
        json!([{"number": ""}, {"number": "2"}]),
    );
    assert!(form.errors().unwrap().is_empty());

    form.field_array("phNumbers").swap(0, 1).unwrap();

    let errors = form.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors.contains(&"phNumbers.1.number".into()));
    assert_eq!(
        form.get_value("phNumbers.0.number").unwrap(),
        Some(json!("2"))
    );
}

#[test]
fn array_edits_are_reflected_in_dirty_state() {
    let form = Form::with_defaults(
        FormOptions::default(),
        json!({"phNumbers": [{"number": "1"}]}),
    );
    let numbers = form.field_array("phNumbers");

    numbers.append(json!({"number": "2"})).unwrap();
    let state = form.form_state().unwrap();
    assert!(state.is_dirty);

    numbers.remove(1).unwrap();
    assert!(!form.form_state().unwrap().is_dirty);
}

#[test]
fn out_of_range_edits_change_nothing() {
    let form = phone_form(FormOptions::default(), json!([{"number": "1"}]));
    let numbers = form.field_array("phNumbers");
    let before = numbers.fields().unwrap();

    let log = Rc::new(RefCell::new(0));
    let _sub = {
        let log = Rc::clone(&log);
        form.subscribe(formwork::Selector::All, move |_: &FormEvent| {
            *log.borrow_mut() += 1
        })
    };

    assert!(!numbers.remove(3).unwrap());
    assert!(!numbers.move_item(0, 4).unwrap());
    assert!(!numbers.replace(1, json!({})).unwrap());
    assert_eq!(*log.borrow(), 0);
    assert_eq!(numbers.fields().unwrap(), before);
}

#[test]
fn insert_and_move_place_records() {
    let form = Form::with_defaults(FormOptions::default(), json!({"tags": ["a", "c"]}));
    let tags = form.field_array("tags");

    tags.insert(1, json!("b")).unwrap();
    tags.prepend(json!("z")).unwrap();
    assert_eq!(form.get_value("tags").unwrap(), Some(json!(["z", "a", "b", "c"])));

    tags.move_item(0, 3).unwrap();
    assert_eq!(form.get_value("tags").unwrap(), Some(json!(["a", "b", "c", "z"])));
}

#[tokio::test]
async fn unregistering_an_item_removes_it_through_the_array() {
    let form = Form::with_defaults(
        FormOptions::default().with_should_unregister(true),
        json!({"list": [{"a": "one"}, {"a": "two"}]}),
    );
    for path in ["list.0.a", "list.1.a"] {
        form.register(path, vec![ValidationRule::required("req")], RegisterOptions::new())
            .unwrap();
    }
    form.set_error("list.1.a", "Already taken").unwrap();
    let list = form.field_array("list");
    let before = list.fields().unwrap();

    assert!(form.unregister("list.0").unwrap());

    assert_eq!(form.values().unwrap(), json!({"list": [{"a": "two"}]}));
    let after = list.fields().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].key, before[1].key);

    // the surviving record's error and registration moved with it
    let errors = form.errors().unwrap();
    assert_eq!(errors.message(&"list.0.a".into()), Some("Already taken"));
    assert!(!errors.contains(&"list.1.a".into()));

    assert!(form.validate_form().await.unwrap());
    form.set_value("list.0.a", json!(""), SetValueOptions::new())
        .unwrap();
    assert!(!form.validate_form().await.unwrap());
    assert_eq!(
        form.errors().unwrap().to_value(),
        json!({"list": [{"a": "req"}]})
    );
}
