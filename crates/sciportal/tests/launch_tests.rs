//! Launch form against a scripted session service.

mod common;

use std::time::Duration;

use common::{ScriptedApi, coordinator, image, server_error, session};
use sciportal::client::ServiceError;
use sciportal::launch::{
    CatalogSource, FormField, LAUNCH_FORM_FIELDS, LaunchError, LaunchForm, LaunchOverrides,
};
use sciportal::session::SessionForm;

#[tokio::test(start_paused = true)]
async fn test_open_uses_catalog_default_type() {
    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let defaults = form.open().await.unwrap();

    assert_eq!(defaults.session_type, "notebook");
    assert_eq!(defaults.name, "notebook1");
    assert_eq!(defaults.image, "images.example.org/skaha/notebook:1.0");
    assert_eq!(defaults.cores, 2);
    assert_eq!(defaults.ram, 8);
    assert_eq!(defaults.images.len(), 2);
    assert_eq!(defaults.fields.visible, LAUNCH_FORM_FIELDS.to_vec());
    assert!(form.is_open());
    assert_eq!(form.current(), Some(&defaults));
}

#[tokio::test(start_paused = true)]
async fn test_default_name_follows_known_sessions() {
    let api = ScriptedApi::returning(vec![vec![session("1", "notebook", "Running")]]);
    let (coordinator, _log) = coordinator(&api);
    coordinator.load_session_list().await.unwrap();
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let defaults = form.open().await.unwrap();

    assert_eq!(defaults.name, "notebook2");
}

#[tokio::test(start_paused = true)]
async fn test_submit_notebook_with_overrides() {
    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);
    form.open().await.unwrap();

    let overrides = LaunchOverrides {
        name: Some("analysis".to_string()),
        cores: Some(4),
        ..LaunchOverrides::default()
    };
    let request = form.submit(&overrides).await.unwrap();

    assert_eq!(request.name, "analysis");
    assert_eq!(
        api.created(),
        vec![
            SessionForm::new("analysis", "notebook")
                .image("images.example.org/skaha/notebook:1.0")
                .cores(4)
                .ram(8)
        ]
    );
    assert_eq!(log.count("session_request_ok"), 1);
    assert_eq!(log.count("load_session_list_done"), 1);
    assert!(!form.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_fields_are_not_submitted() {
    let api = ScriptedApi::returning(vec![vec![]]);
    api.set_images(Ok(vec![image("images.example.org/skaha/desktop:1.0", "desktop")]));
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);
    form.open().await.unwrap();

    let defaults = form.select_type("desktop").await.unwrap();
    assert_eq!(defaults.name, "desktop1");
    assert!(defaults.fields.shows(FormField::Name));
    assert!(!defaults.fields.shows(FormField::Memory));

    let overrides = LaunchOverrides {
        ram: Some(16),
        ..LaunchOverrides::default()
    };
    form.submit(&overrides).await.unwrap();

    assert_eq!(api.created(), vec![SessionForm::new("desktop1", "desktop")]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_default_type() {
    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    assert!(matches!(form.reset().await, Err(LaunchError::NotOpen)));

    form.open().await.unwrap();
    form.select_type("carta").await.unwrap();
    let defaults = form.reset().await.unwrap();

    assert_eq!(defaults.session_type, "notebook");
}

#[tokio::test(start_paused = true)]
async fn test_type_without_images_is_rejected() {
    let api = ScriptedApi::returning(vec![vec![]]);
    api.set_images(Ok(vec![]));
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let err = form.open().await.unwrap_err();

    assert!(matches!(err, LaunchError::NoImages(ref t) if t == "notebook"));
    assert!(!form.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_type_is_rejected() {
    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let err = form.select_type("quantum").await.unwrap_err();

    assert!(matches!(err, LaunchError::UnknownType(ref t) if t == "quantum"));
}

#[tokio::test(start_paused = true)]
async fn test_context_failure_surfaces_service_error() {
    let api = ScriptedApi::returning(vec![vec![]]);
    api.set_context(Err(server_error()));
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let err = form.open().await.unwrap_err();

    assert!(matches!(err, LaunchError::Service(e) if e == server_error()));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_request_keeps_form_open() {
    let api = ScriptedApi::returning(vec![vec![]]);
    api.fail_create(ServiceError::Validation {
        message: "invalid memory value".to_string(),
    });
    let (coordinator, log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);
    form.open().await.unwrap();

    let err = form.submit(&LaunchOverrides::default()).await.unwrap_err();

    assert!(matches!(
        err,
        LaunchError::Service(ServiceError::Validation { ref message }) if message == "invalid memory value"
    ));
    assert!(form.is_open());
    assert_eq!(log.count("session_request_ok"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_requires_open_form() {
    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let err = form.submit(&LaunchOverrides::default()).await.unwrap_err();

    assert!(matches!(err, LaunchError::NotOpen));
    assert!(api.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_aborts_pending_fetches() {
    let api = ScriptedApi::returning(vec![vec![]]);
    api.delay_fetches(Duration::from_secs(5));
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::Builtin);

    let token = form.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let err = form.open().await.unwrap_err();

    assert!(matches!(err, LaunchError::Cancelled));
    assert!(!form.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_polling_and_reopen_works() {
    let api = ScriptedApi::returning(vec![vec![session("1", "notebook", "Pending")]]);
    let (coordinator, log) = coordinator(&api);
    coordinator.load_session_list().await.unwrap();
    assert!(coordinator.is_polling());

    let mut form = LaunchForm::new(coordinator.clone(), CatalogSource::Builtin);
    form.open().await.unwrap();
    form.close();

    assert!(!form.is_open());
    assert!(!coordinator.is_polling());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.count("polling_continue"), 0);

    let defaults = form.open().await.unwrap();
    assert_eq!(defaults.session_type, "notebook");
}

#[tokio::test]
async fn test_catalog_file_is_cached_until_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessiontype_map.json");
    std::fs::write(
        &path,
        r#"{"default":"desktop","session_types":[{"name":"desktop","form_fields":["name","type"]}]}"#,
    )
    .unwrap();

    let api = ScriptedApi::returning(vec![vec![]]);
    let (coordinator, _log) = coordinator(&api);
    let mut form = LaunchForm::new(coordinator, CatalogSource::File(path.clone()));

    let defaults = form.open().await.unwrap();
    assert_eq!(defaults.session_type, "desktop");
    assert_eq!(defaults.fields.visible, vec![FormField::Name, FormField::Type]);

    std::fs::write(
        &path,
        r#"{"default":"carta","session_types":[{"name":"carta","form_fields":["name","type","image"]}]}"#,
    )
    .unwrap();
    assert_eq!(form.open().await.unwrap().session_type, "desktop");

    let catalog = form.reload_catalog().await.unwrap();
    assert_eq!(catalog.default, "carta");
    assert_eq!(form.open().await.unwrap().session_type, "carta");
}
