//! End-to-end tests for a three-field sign-up form: a required username, an
//! email checked by pattern and custom rules, and a required channel name.

use formwork::{
    resolver_fn, FieldPath, Form, FormError, FormOptions, InitializationError, RegisterOptions,
    ResolveError, RuleKind, SessionStatus, SetValueOptions, SubmitOutcome, ValidationRule,
};
use serde_json::{json, Value};

const EMAIL_PATTERN: &str =
    r"[a-zA-Z0-9.!#$&'*+/=?^_`{|}~-]+@[a-zA-Z0-9]+(?:\.[a-zA-Z0-9-]+)";

/// Register the fields of the sign-up form.
fn register_fields(form: &Form) {
    form.register(
        "username",
        vec![ValidationRule::required("Username is required!")],
        RegisterOptions::new(),
    )
    .unwrap();
    form.register(
        "email",
        vec![
            ValidationRule::pattern(EMAIL_PATTERN, "Invalid email format!").unwrap(),
            ValidationRule::custom("notAdmin", |value, _| {
                if value == "admin@demo.com" {
                    Err("Enter a different email address".into())
                } else {
                    Ok(())
                }
            }),
            ValidationRule::custom("notBlackListed", |value, _| {
                if value.as_str().is_some_and(|v| v.ends_with("baddomain.com")) {
                    Err("This domain is not supported!".into())
                } else {
                    Ok(())
                }
            }),
        ],
        RegisterOptions::new(),
    )
    .unwrap();
    form.register(
        "channel",
        vec![ValidationRule::required("Channel name is required!")],
        RegisterOptions::new(),
    )
    .unwrap();
}

fn seeded_form(defaults: Value) -> Form {
    let form = Form::with_defaults(FormOptions::default(), defaults);
    register_fields(&form);
    form
}

#[tokio::test]
async fn empty_username_is_the_only_error() {
    let form = seeded_form(json!({
        "username": "",
        "email": "Sincere@april.biz",
        "channel": "abc",
    }));

    assert!(!form.validate_form().await.unwrap());

    let errors = form.errors().unwrap();
    assert_eq!(
        errors.to_value(),
        json!({"username": "Username is required!"})
    );
    assert!(!errors.contains(&FieldPath::parse("channel")));
}

#[tokio::test]
async fn email_rules_report_their_messages() {
    let form = seeded_form(json!({"username": "Bret", "email": "", "channel": "abc"}));

    let cases = [
        ("not-an-email", RuleKind::Pattern, "Invalid email format!"),
        ("admin@demo.com", RuleKind::Custom, "Enter a different email address"),
        ("user@baddomain.com", RuleKind::Custom, "This domain is not supported!"),
    ];
    for (email, kind, message) in cases {
        form.set_value("email", json!(email), SetValueOptions::new().validate())
            .unwrap();
        let error = form.error("email").unwrap().expect("email should be invalid");
        assert_eq!(error.kind, kind, "{email}");
        assert_eq!(error.message, message, "{email}");
    }

    form.set_value(
        "email",
        json!("Sincere@april.biz"),
        SetValueOptions::new().validate(),
    )
    .unwrap();
    assert!(form.error("email").unwrap().is_none());
}

#[tokio::test]
async fn empty_email_skips_the_pattern() {
    let form = seeded_form(json!({"username": "Bret", "email": "", "channel": "abc"}));
    assert!(form.trigger("email").await.unwrap());
}

#[test_log::test(tokio::test)]
async fn remote_defaults_seed_the_form() {
    let resolver = resolver_fn(|| async {
        tokio::task::yield_now().await;
        let user = json!({"id": 1, "username": "Bret", "email": "Sincere@april.biz"});
        Ok::<_, ResolveError>(json!({
            "username": user["username"],
            "email": user["email"],
            "channel": "",
        }))
    });

    let form = Form::create(FormOptions::default(), &resolver).await.unwrap();
    assert_eq!(form.status(), SessionStatus::Ready);
    register_fields(&form);

    assert_eq!(form.get_value("username").unwrap(), Some(json!("Bret")));
    assert!(!form.form_state().unwrap().is_dirty);

    let mut invalid = None;
    let outcome = form
        .submit(
            |_| async { Ok::<(), std::io::Error>(()) },
            |errors| {
                invalid = Some(errors.to_value());
                async { Ok::<(), std::io::Error>(()) }
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Invalid);
    assert_eq!(invalid, Some(json!({"channel": "Channel name is required!"})));
}

#[test_log::test(tokio::test)]
async fn failed_defaults_leave_the_session_unusable() {
    let resolver = resolver_fn(|| async {
        Err::<Value, ResolveError>("failed to fetch users/1: connection refused".into())
    });

    let err = Form::create(FormOptions::default(), &resolver)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FormError::Initialization(InitializationError::Failed { .. })
    ));

    let form = Form::new(FormOptions::default());
    assert!(form.initialize(&resolver).await.is_err());

    let err = form
        .set_value("username", json!("Bret"), SetValueOptions::new())
        .unwrap_err();
    assert!(err.is_initialization());
    assert!(matches!(
        form.status(),
        SessionStatus::Failed { ref message } if message.contains("connection refused")
    ));
    assert!(form.values().is_err());
}

#[tokio::test]
async fn writes_before_resolution_are_rejected() {
    let form = Form::new(FormOptions::default());
    let err = form
        .set_value("username", json!("Bret"), SetValueOptions::new())
        .unwrap_err();
    assert!(matches!(
        err,
        FormError::Initialization(InitializationError::Pending)
    ));
}
