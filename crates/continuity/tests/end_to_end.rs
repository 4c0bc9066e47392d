//! End-to-end flows through the runtime: archive, index, retrieve, inject,
//! and enrich, all against a temp data dir with the offline embedder.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use continuity::config::Config;
use continuity::events::{HookOutcome, HostEvent};
use continuity::memory::Message;
use continuity::runtime::MemoryRuntime;

fn runtime(dir: &TempDir) -> MemoryRuntime {
    MemoryRuntime::new(Config {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    })
}

fn turn(user_text: &str, agent_text: &str, days_ago: i64) -> Vec<Message> {
    let at = Utc::now() - Duration::days(days_ago);
    vec![
        Message::user(user_text).with_timestamp(at),
        Message::assistant(agent_text).with_timestamp(at + Duration::seconds(30)),
    ]
}

#[tokio::test]
async fn archive_and_search_round_trip() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end("main", &turn("I love sourdough", "Great bake!", 1))
        .await;

    let outcome = rt.search(None, "sourdough bread", 5).await;
    assert!(!outcome.exchanges.is_empty());
    let hit = &outcome.exchanges[0];
    assert!(hit.user_text.contains("sourdough"));
    assert!(outcome.distances[0] < 1.0);
}

#[tokio::test]
async fn injection_uses_first_person_framing() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end(
        "main",
        &turn(
            "I love sourdough and bake every sunday morning",
            "Sunday bakes are the best, enjoy the crumb",
            2,
        ),
    )
    .await;

    let context = rt
        .before_agent_start(
            "main",
            &[Message::user(
                "do you remember what bread I said I love baking?",
            )],
        )
        .await;

    assert!(context.contains("You remember these earlier conversations with this user:"));
    assert!(context.contains("They told you:"));
    assert!(context.contains("sourdough"));
    assert!(context.contains("Speak from this memory naturally."));
}

#[tokio::test]
async fn recalled_exchanges_are_chronological() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end(
        "main",
        &turn(
            "my garden has heirloom tomato seedlings now",
            "heirloom tomato plants need staking early",
            10,
        ),
    )
    .await;
    rt.agent_end(
        "main",
        &turn(
            "the heirloom tomato seedlings doubled in size",
            "great, start staking the tomato plants this week",
            1,
        ),
    )
    .await;

    let context = rt
        .before_agent_start(
            "main",
            &[Message::user("do you recall my heirloom tomato seedlings?")],
        )
        .await;

    let older = context.find("has heirloom tomato seedlings now");
    let newer = context.find("doubled in size");
    assert!(older.is_some() && newer.is_some());
    assert!(older.unwrap() < newer.unwrap(), "older exchange must render first");
}

#[tokio::test]
async fn noisy_exchanges_are_never_recalled() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end(
        "main",
        &turn(
            "do you remember my recipe?",
            "I don't have any information about that",
            3,
        ),
    )
    .await;

    let context = rt
        .before_agent_start(
            "main",
            &[Message::user("remember that recipe we wrote together?")],
        )
        .await;
    assert!(
        !context.contains("I don't have any information"),
        "denial exchanges must be filtered before injection"
    );
}

#[tokio::test]
async fn short_user_text_skips_retrieval() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end("main", &turn("I love sourdough", "Great bake!", 1))
        .await;

    let context = rt.before_agent_start("main", &[Message::user("hi")]).await;
    assert!(!context.contains("You remember"));
}

#[tokio::test]
async fn tool_result_enrichment_from_cache() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end(
        "main",
        &turn(
            "my sourdough starter is named Clint Yeastwood",
            "that is a glorious name for a starter",
            1,
        ),
    )
    .await;

    // Pre-populate the cache the way the host would, then run the
    // synchronous persist hook on a sparse tool result.
    rt.before_tool_call(
        "main",
        "memory_search",
        &serde_json::json!({"query": "sourdough starter name"}),
    )
    .await;

    let sparse = Message::new("tool", r#"{"results": []}"#);
    let replaced = rt
        .tool_result_persist("main", "memory_search", &sparse)
        .expect("cache hit must produce a replacement");
    let text = replaced.text();
    assert!(text.starts_with("You remember these conversations with this user:"));
    assert!(text.contains("Clint Yeastwood"));
    assert!(text.contains("conversation-archive"));

    // Other tools pass through untouched.
    assert!(rt
        .tool_result_persist("main", "web_search", &sparse)
        .is_none());
}

#[tokio::test]
async fn agents_are_isolated() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.agent_end("alpha", &turn("my cat is called Miso", "Miso is a lovely name", 1))
        .await;

    let beta = rt.search(Some("beta"), "cat called Miso", 5).await;
    assert!(beta.exchanges.is_empty(), "agent beta must not see alpha's memory");

    let alpha = rt.search(Some("alpha"), "cat called Miso", 5).await;
    assert!(!alpha.exchanges.is_empty());

    let agents = rt.list_agents();
    let dirs: Vec<_> = agents.iter().map(|a| a.data_dir.clone()).collect();
    assert_eq!(dirs.len(), 2);
    assert_ne!(dirs[0], dirs[1]);
}

#[tokio::test]
async fn session_lifecycle_and_state_report() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    rt.session_start("main", "session-1");
    rt.agent_end("main", &turn("I am learning pottery these days", "wheel throwing takes patience", 0))
        .await;

    let state = rt.get_state(None).await;
    assert_eq!(state.exchange_count, 1);
    assert_eq!(state.archive_stats.total_days, 1);
    assert!(state.index_ready);
    assert!(!state.anchors.is_empty(), "identity anchor expected");

    rt.session_start("main", "session-2");
    let state = rt.get_state(None).await;
    assert_eq!(state.exchange_count, 0, "session counters reset");
    // durable stores survive the session boundary
    assert_eq!(state.archive_stats.total_days, 1);
}

#[tokio::test]
async fn event_dispatch_wraps_hooks() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);

    let HookOutcome { prepend_context } = rt
        .handle_event(HostEvent::AgentEnd {
            agent_id: "main".into(),
            messages: turn("I keep bees on my roof in Lisbon", "rooftop hives do well there", 1),
        })
        .await;
    assert!(prepend_context.is_none());

    let outcome = rt
        .handle_event(HostEvent::BeforeAgentStart {
            agent_id: "main".into(),
            messages: vec![Message::user("remember what I told you about my bees?")],
        })
        .await;
    let context = outcome.prepend_context.expect("recall should inject");
    assert!(context.contains("bees"));
}
