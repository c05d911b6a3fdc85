use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;

use wick_core::call::{self, CallOptions};
use wick_core::local::{LocalSession, Router};
use wick_core::publish::{self, PublishOptions};
use wick_core::register::{self, Registration, RegistrationPolicy, RegistrationState};
use wick_core::render::{OutputFormat, Printer};
use wick_core::schedule::ScheduleSpec;
use wick_core::session::{CallResult, Event, Invocation, NO_SUCH_PROCEDURE, NO_SUCH_REGISTRATION};
use wick_core::subscribe::{self, SubscribeOptions};
use wick_core::value::{coerce_args, dict_from_strings};
use wick_core::{Action, Session, WickError};

fn as_dyn(s: Arc<LocalSession>) -> Arc<dyn Session> {
    s
}

/// Register a handler that counts invocations and tracks peak concurrency.
async fn counting_callee(
    session: &LocalSession,
    procedure: &str,
    hold: Duration,
) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let handler = {
        let calls = Arc::clone(&calls);
        let peak = Arc::clone(&peak);
        Arc::new(move |inv: Invocation| {
            let calls = Arc::clone(&calls);
            let peak = Arc::clone(&peak);
            let in_flight = Arc::clone(&in_flight);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if !hold.is_zero() {
                    tokio::time::sleep(hold).await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, WickError>(CallResult::new(inv.args, inv.kwargs))
            }
            .boxed()
        })
    };
    session
        .register(procedure, handler, Map::new())
        .await
        .unwrap();
    (calls, peak)
}

// ---------------------------------------------------------------------------
// register
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_delay_defers_the_registration() {
    let router = Router::new("realm1");
    let callee = as_dyn(router.join());
    let policy = RegistrationPolicy {
        delay: Duration::from_millis(300),
        ..Default::default()
    };
    let reg = Registration::pending("test.delayed", policy);
    let started = Instant::now();
    let task = {
        let reg = reg.clone();
        let callee = Arc::clone(&callee);
        tokio::spawn(async move { reg.activate(&callee, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = callee.unregister("test.delayed").await.unwrap_err();
    assert_eq!(err.uri(), Some(NO_SUCH_REGISTRATION));

    task.await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(reg.state(), RegistrationState::Registered);
    callee.unregister("test.delayed").await.unwrap();
}

#[tokio::test]
async fn register_invoke_count_releases_the_procedure() {
    let router = Router::new("realm1");
    let callee = as_dyn(router.join());
    let caller = router.join();
    let policy = RegistrationPolicy {
        max_invocations: Some(2),
        ..Default::default()
    };
    let reg = register::register(&callee, "test.limited", policy, &CancellationToken::new())
        .await
        .unwrap();

    for _ in 0..2 {
        caller
            .call("test.limited", vec![], Map::new(), Map::new())
            .await
            .unwrap();
    }

    let err = caller
        .call("test.limited", vec![], Map::new(), Map::new())
        .await
        .unwrap_err();
    assert_eq!(err.uri(), Some(NO_SUCH_PROCEDURE));
    assert!(callee.unregister("test.limited").await.is_err());
    assert_eq!(reg.invocations(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn register_shell_command_returns_stdout() {
    let router = Router::new("realm1");
    let callee = as_dyn(router.join());
    let caller = router.join();
    let policy = RegistrationPolicy {
        shell_command: Some("echo hello".into()),
        ..Default::default()
    };
    register::register(&callee, "test.shell", policy, &CancellationToken::new())
        .await
        .unwrap();

    let (printer, out) = Printer::capture(OutputFormat::Plain);
    let action = Action::call("test.shell");
    call::call(&[as_dyn(caller)], &action, &CallOptions::default(), &printer)
        .await
        .unwrap();
    assert_eq!(out.contents(), "[\n    \"hello\\n\"\n]\n");
}

// ---------------------------------------------------------------------------
// call
// ---------------------------------------------------------------------------

#[tokio::test]
async fn call_repeats_and_renders_every_result() {
    let router = Router::new("realm1");
    let callee = router.join();
    let (calls, _) = counting_callee(&callee, "test.count", Duration::ZERO).await;

    let (printer, out) = Printer::capture(OutputFormat::Plain);
    let action = Action::call("test.count").with_args(coerce_args(&["x".to_string()]));
    let opts = CallOptions {
        schedule: ScheduleSpec::new(0, 50, 1).unwrap(),
        log_time: false,
    };
    call::call(&[as_dyn(router.join())], &action, &opts, &printer)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    assert_eq!(out.contents().matches("\"x\"").count(), 50);
}

#[tokio::test]
async fn call_delay_is_paid_before_the_first_call() {
    let router = Router::new("realm1");
    let callee = router.join();
    let (calls, _) = counting_callee(&callee, "test.delay", Duration::ZERO).await;

    let (printer, _) = Printer::capture(OutputFormat::Plain);
    let opts = CallOptions {
        schedule: ScheduleSpec::new(200, 3, 3).unwrap(),
        log_time: true,
    };
    let started = Instant::now();
    call::call(&[as_dyn(router.join())], &Action::call("test.delay"), &opts, &printer)
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(2000), "delay paid more than once");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn call_concurrency_caps_in_flight_requests() {
    let router = Router::new("realm1");
    let callee = router.join();
    let (calls, peak) = counting_callee(&callee, "test.slow", Duration::from_millis(20)).await;

    let (printer, _) = Printer::capture(OutputFormat::Json);
    let opts = CallOptions {
        schedule: ScheduleSpec::new(0, 20, 4).unwrap(),
        log_time: false,
    };
    call::call(&[as_dyn(router.join())], &Action::call("test.slow"), &opts, &printer)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 20);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {peak} exceeded 4");
    assert!(peak > 1, "calls never overlapped");
}

#[tokio::test]
async fn call_failures_surface_after_all_iterations() {
    let router = Router::new("realm1");
    let (printer, out) = Printer::capture(OutputFormat::Plain);
    let opts = CallOptions {
        schedule: ScheduleSpec::new(0, 5, 2).unwrap(),
        log_time: false,
    };
    let sessions = [as_dyn(router.join())];

    let outcomes = call::call_all(&sessions, &Action::call("test.missing"), &opts, &printer)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes.failures(), 5);
    assert_eq!(
        outcomes.first_error().and_then(WickError::uri),
        Some(NO_SUCH_PROCEDURE)
    );

    let err = call::call(&sessions, &Action::call("test.missing"), &opts, &printer)
        .await
        .unwrap_err();
    assert_eq!(err.uri(), Some(NO_SUCH_PROCEDURE));
    assert_eq!(out.contents(), "");
}

#[tokio::test]
async fn call_spreads_workers_across_sessions() {
    let router = Router::new("realm1");
    let callee = router.join();
    let callers: Arc<Mutex<HashSet<u64>>> = Arc::default();
    let handler = {
        let callers = Arc::clone(&callers);
        Arc::new(move |inv: Invocation| {
            if let Some(id) = inv.details.get("caller").and_then(|v| v.as_u64()) {
                callers.lock().unwrap().insert(id);
            }
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Ok::<_, WickError>(CallResult::default())
            }
            .boxed()
        })
    };
    callee.register("test.who", handler, Map::new()).await.unwrap();

    let sessions = vec![as_dyn(router.join()), as_dyn(router.join())];
    let expected: HashSet<u64> = sessions.iter().map(|s| s.id()).collect();
    let action = Action::call("test.who").with_option("disclose_me", json!(true));
    let opts = CallOptions {
        schedule: ScheduleSpec::new(0, 10, 2).unwrap(),
        log_time: false,
    };
    let (printer, _) = Printer::capture(OutputFormat::Plain);
    call::call(&sessions, &action, &opts, &printer).await.unwrap();

    assert_eq!(*callers.lock().unwrap(), expected);
}

#[tokio::test]
async fn each_session_serves_one_call_at_a_time() {
    let router = Router::new("realm1");
    let callee = router.join();
    // caller id -> (in flight, peak)
    let usage: Arc<Mutex<HashMap<u64, (usize, usize)>>> = Arc::default();
    let handler = {
        let usage = Arc::clone(&usage);
        Arc::new(move |inv: Invocation| {
            let usage = Arc::clone(&usage);
            let caller = inv.details.get("caller").and_then(|v| v.as_u64());
            async move {
                let caller = caller.unwrap_or_default();
                {
                    let mut usage = usage.lock().unwrap();
                    let entry = usage.entry(caller).or_default();
                    entry.0 += 1;
                    entry.1 = entry.1.max(entry.0);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                usage.lock().unwrap().entry(caller).or_default().0 -= 1;
                Ok::<_, WickError>(CallResult::default())
            }
            .boxed()
        })
    };
    callee.register("test.usage", handler, Map::new()).await.unwrap();

    let sessions = vec![as_dyn(router.join()), as_dyn(router.join())];
    let action = Action::call("test.usage").with_option("disclose_me", json!(true));
    let opts = CallOptions {
        schedule: ScheduleSpec::new(0, 16, 4).unwrap(),
        log_time: false,
    };
    let (printer, _) = Printer::capture(OutputFormat::Plain);
    let outcomes = call::call_all(&sessions, &action, &opts, &printer)
        .await
        .unwrap();
    assert_eq!(outcomes.successes(), 16);

    let usage = usage.lock().unwrap();
    assert_eq!(usage.len(), 2);
    for (session, (_, peak)) in usage.iter() {
        assert_eq!(*peak, 1, "session {session} served {peak} calls at once");
    }
}

#[tokio::test]
async fn call_without_sessions_is_an_error() {
    let (printer, _) = Printer::capture(OutputFormat::Plain);
    let err = call::call(&[], &Action::call("x"), &CallOptions::default(), &printer)
        .await
        .unwrap_err();
    assert!(matches!(err, WickError::NoSession));
}

// ---------------------------------------------------------------------------
// rendering through a full call
// ---------------------------------------------------------------------------

async fn echo_output(args: &[&str], kwargs: &[(&str, &str)], format: OutputFormat) -> String {
    let router = Router::new("realm1");
    let callee = as_dyn(router.join());
    register::register(
        &callee,
        "test.echo",
        RegistrationPolicy::default(),
        &CancellationToken::new(),
    )
    .await
        .unwrap();

    let raw_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let raw_kwargs: Vec<(String, String)> = kwargs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let action = Action::call("test.echo")
        .with_args(coerce_args(&raw_args))
        .with_kwargs(dict_from_strings(raw_kwargs.iter().map(|(k, v)| (k, v))));

    let (printer, out) = Printer::capture(format);
    call::call(&[as_dyn(router.join())], &action, &CallOptions::default(), &printer)
        .await
        .unwrap();
    out.contents()
}

#[tokio::test]
async fn plain_output_args_only() {
    let out = echo_output(&["Hello", "1"], &[], OutputFormat::Plain).await;
    assert_eq!(out, "[\n    \"Hello\",\n    1\n]\n");
}

#[tokio::test]
async fn plain_output_kwargs_only() {
    let out = echo_output(&[], &[("name", "john"), ("age", "30")], OutputFormat::Plain).await;
    assert_eq!(out, "kwargs:\n{\n    \"age\": 30,\n    \"name\": \"john\"\n}\n");
}

#[tokio::test]
async fn plain_output_args_and_kwargs() {
    let out = echo_output(&["true"], &[("k", "v")], OutputFormat::Plain).await;
    assert_eq!(
        out,
        "args:\n[\n    true\n]\nkwargs:\n{\n    \"k\": \"v\"\n}\n"
    );
}

#[tokio::test]
async fn plain_output_empty_prints_nothing() {
    let out = echo_output(&[], &[], OutputFormat::Plain).await;
    assert_eq!(out, "");
}

#[tokio::test]
async fn json_output_always_has_both_members() {
    let out = echo_output(&[], &[], OutputFormat::Json).await;
    assert_eq!(out, "{\n    \"args\": [],\n    \"kwargs\": {}\n}\n");

    let out = echo_output(&["1.5"], &[("b", "false")], OutputFormat::Json).await;
    assert_eq!(
        out,
        "{\n    \"args\": [\n        1.5\n    ],\n    \"kwargs\": {\n        \"b\": false\n    }\n}\n"
    );
}

// ---------------------------------------------------------------------------
// publish / subscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_repeats_reach_the_subscriber() {
    let router = Router::new("realm1");
    let subscriber = router.join();
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        subscriber
            .subscribe(
                "test.topic",
                Arc::new(move |_: Event| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
                Map::new(),
            )
            .await
            .unwrap();
    }

    let opts = PublishOptions {
        schedule: ScheduleSpec::new(100, 10, 3).unwrap(),
        log_time: true,
    };
    let started = Instant::now();
    publish::publish(as_dyn(router.join()), &Action::publish("test.topic"), &opts)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(seen.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn subscribe_prints_details_when_asked() {
    let router = Router::new("realm1");
    let subscriber = router.join();
    let (printer, out) = Printer::capture(OutputFormat::Json);
    let opts = SubscribeOptions {
        details: true,
        ..Default::default()
    };
    subscribe::subscribe(subscriber.as_ref(), "test.topic", &opts, &printer)
        .await
        .unwrap();

    let action = Action::publish("test.topic").with_args(coerce_args(&["hi".to_string()]));
    publish::publish(as_dyn(router.join()), &action, &PublishOptions::default())
        .await
        .unwrap();

    let text = out.contents();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["args"], json!(["hi"]));
    assert_eq!(parsed["details"]["topic"], json!("test.topic"));

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    subscribe::serve(subscriber.as_ref(), "test.topic", shutdown)
        .await
        .unwrap();
    assert!(subscriber.unsubscribe("test.topic").await.is_err());
}
