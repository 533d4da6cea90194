use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

fn delta(pairs: &[(&str, Value)]) -> VariableDelta {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        handle.await.expect("handler task");
    }
}

fn counting_handler(name: &str, counter: Arc<AtomicUsize>) -> NamedHandler {
    NamedHandler::new(name, move |_event| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

#[test]
fn matcher_requires_exactly_one_criterion() {
    assert!(matches!(
        VariableMatcher::try_from(ChangeFilter::default()),
        Err(ConfigError::MatcherCriteria(0))
    ));
    let both = ChangeFilter {
        variable: Some("a".into()),
        prefix: Some("b".into()),
        ..ChangeFilter::default()
    };
    assert!(matches!(
        VariableMatcher::try_from(both),
        Err(ConfigError::MatcherCriteria(2))
    ));
    assert!(matches!(
        VariableMatcher::try_from(ChangeFilter::regex("input_(")),
        Err(ConfigError::InvalidPattern { .. })
    ));
}

#[test]
fn matchers_cover_exact_prefix_suffix_and_anchored_regex() {
    let exact = VariableMatcher::try_from(ChangeFilter::variable("time_s")).expect("exact");
    assert!(exact.matches("time_s"));
    assert!(!exact.matches("time_s_total"));

    let prefix = VariableMatcher::try_from(ChangeFilter::prefix("input_")).expect("prefix");
    assert!(prefix.matches("input_3_name"));
    assert!(!prefix.matches("preview_input"));

    let suffix = VariableMatcher::try_from(ChangeFilter::suffix("_name")).expect("suffix");
    assert!(suffix.matches("input_3_name"));

    let regex = VariableMatcher::try_from(ChangeFilter::regex(r"input_\d+_state")).expect("regex");
    assert!(regex.matches("input_12_state"));
    assert!(regex.matches("input_12_state_extra"));
    assert!(!regex.matches("my_input_12_state"));
}

#[test]
fn extracts_connection_names_from_status_variables() {
    assert_eq!(status_connection_name("connection_vmix_status"), Some("vmix"));
    assert_eq!(
        status_connection_name("connection_my_atem_status"),
        Some("my_atem")
    );
    assert_eq!(status_connection_name("connection_status"), None);
    assert_eq!(status_connection_name("connection__status"), None);
    assert_eq!(status_connection_name("vmix_status"), None);
}

#[tokio::test]
async fn connect_handlers_fire_once_on_entering_ready() {
    let dispatcher = EventDispatcher::new();
    let fired = Arc::new(AtomicUsize::new(0));
    dispatcher
        .on_connect("x", counting_handler("x-ready", Arc::clone(&fired)))
        .await;

    let handles = dispatcher
        .apply_delta("internal", delta(&[("connection_x_status", json!("ok"))]))
        .await;
    join_all(handles).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(dispatcher.is_ready("x").await);

    let handles = dispatcher
        .apply_delta("internal", delta(&[("connection_x_status", json!("ok"))]))
        .await;
    join_all(handles).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let handles = dispatcher
        .apply_delta("internal", delta(&[("connection_x_status", json!("good"))]))
        .await;
    join_all(handles).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1, "ok -> good stays ready");

    for status in ["error", "good"] {
        let handles = dispatcher
            .apply_delta("internal", delta(&[("connection_x_status", json!(status))]))
            .await;
        join_all(handles).await;
    }
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn readiness_reset_refires_connect_handlers() {
    let dispatcher = EventDispatcher::new();
    let fired = Arc::new(AtomicUsize::new(0));
    dispatcher
        .on_connect("vmix", counting_handler("vmix-ready", Arc::clone(&fired)))
        .await;

    let ready = delta(&[("connection_vmix_status", json!("good"))]);
    join_all(dispatcher.apply_batch([("internal".to_string(), ready.clone())].into(), false).await).await;
    dispatcher.reset_readiness().await;
    assert!(!dispatcher.is_ready("vmix").await);
    join_all(dispatcher.apply_batch([("internal".to_string(), ready)].into(), false).await).await;

    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn change_handlers_receive_new_and_previous_values() {
    let dispatcher = EventDispatcher::new();
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher
        .on_change(
            "vmix",
            ChangeFilter::prefix("input_"),
            NamedHandler::new("record", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().await.push(event);
                    Ok(())
                }
            }),
        )
        .await
        .expect("register");

    join_all(dispatcher.apply_delta("vmix", delta(&[("input_1", json!("Camera"))])).await).await;
    join_all(
        dispatcher
            .apply_delta(
                "vmix",
                delta(&[("input_1", json!("Slides")), ("preview", json!(2))]),
            )
            .await,
    )
    .await;

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 2, "preview does not match the prefix");
    assert_eq!(seen[0].last, None);
    assert_eq!(seen[1].value, json!("Slides"));
    assert_eq!(seen[1].last, Some(json!("Camera")));
    assert_eq!(seen[1].previous_value("vmix", "preview"), None);
    assert_eq!(
        dispatcher.var("vmix", "preview").await,
        Some(json!(2)),
        "store keeps every key, matched or not"
    );
}

#[tokio::test]
async fn handlers_only_see_their_own_connection() {
    let dispatcher = EventDispatcher::new();
    let fired = Arc::new(AtomicUsize::new(0));
    dispatcher
        .on_change(
            "atem",
            ChangeFilter::variable("program"),
            counting_handler("atem-program", Arc::clone(&fired)),
        )
        .await
        .expect("register");

    join_all(dispatcher.apply_delta("vmix", delta(&[("program", json!(1))])).await).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    join_all(dispatcher.apply_delta("atem", delta(&[("program", json!(1))])).await).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_handler_does_not_affect_others() {
    let dispatcher = EventDispatcher::new();
    let fired = Arc::new(AtomicUsize::new(0));
    dispatcher
        .on_change(
            "internal",
            ChangeFilter::variable("time_s"),
            NamedHandler::new("broken", |_event| async {
                Err::<(), _>(anyhow::anyhow!("boom"))
            }),
        )
        .await
        .expect("register");
    dispatcher
        .on_change(
            "internal",
            ChangeFilter::variable("time_s"),
            NamedHandler::new("panicking", |event| async move {
                if event.variable == "time_s" {
                    panic!("handler bug");
                }
                Ok(())
            }),
        )
        .await
        .expect("register");
    dispatcher
        .on_change(
            "internal",
            ChangeFilter::suffix("_s"),
            counting_handler("healthy", Arc::clone(&fired)),
        )
        .await
        .expect("register");

    let handles = dispatcher
        .apply_delta("internal", delta(&[("time_s", json!(5))]))
        .await;
    assert_eq!(handles.len(), 3);
    join_all(handles).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn snapshot_batches_do_not_dispatch_change_handlers() {
    let dispatcher = EventDispatcher::new();
    let fired = Arc::new(AtomicUsize::new(0));
    dispatcher
        .on_change(
            "internal",
            ChangeFilter::regex(".*"),
            counting_handler("all", Arc::clone(&fired)),
        )
        .await
        .expect("register");

    let handles = dispatcher
        .apply_batch(
            [("internal".to_string(), delta(&[("uptime", json!(10))]))].into(),
            false,
        )
        .await;
    assert!(handles.is_empty());
    assert_eq!(dispatcher.var("internal", "uptime").await, Some(json!(10)));
}

#[tokio::test]
async fn cast_policy_applies_to_new_and_existing_values() {
    let dispatcher = EventDispatcher::new();
    join_all(dispatcher.apply_delta("vmix", delta(&[("volume", json!("75"))])).await).await;
    join_all(dispatcher.apply_delta("atem", delta(&[("program", json!("2"))])).await).await;

    dispatcher.enable_cast(&["vmix"]).await;
    assert_eq!(dispatcher.var("vmix", "volume").await, Some(json!(75)));
    assert_eq!(dispatcher.var("atem", "program").await, Some(json!("2")));

    join_all(dispatcher.apply_delta("vmix", delta(&[("muted", json!("true"))])).await).await;
    assert_eq!(dispatcher.var("vmix", "muted").await, Some(json!(true)));
}

#[tokio::test]
async fn connections_ready_requires_every_connection() {
    let dispatcher = EventDispatcher::new();
    join_all(
        dispatcher
            .apply_delta(
                "internal",
                delta(&[
                    ("connection_vmix_status", json!("ok")),
                    ("connection_atem_status", json!("connecting")),
                ]),
            )
            .await,
    )
    .await;

    assert!(dispatcher.connections_ready(&["vmix"]).await);
    assert!(!dispatcher.connections_ready(&["vmix", "atem"]).await);
    assert_eq!(dispatcher.status("atem").await.as_deref(), Some("connecting"));
}
