//! End-to-end runs of the engine over scripted collaborators.
//!
//! Each test drives `run`/`execute` through the public API and checks the
//! terminal record plus the run-state invariants.

use std::sync::Arc;

use lifelog_agent::core::invariants::validate_invariants;
use lifelog_agent::core::messages::{OUTPUT_FALLBACK, input_refusal};
use lifelog_agent::core::types::{InputVerdict, OutputVerdict, SafetyPhase, Terminal};
use lifelog_agent::error::Collaborator;
use lifelog_agent::io::collaborators::Planner;
use lifelog_agent::io::config::EngineConfig;
use lifelog_agent::io::scenario::{Failures, Scenario};
use lifelog_agent::test_support::{
    RecordingPlanner, engine_for, engine_with, reflection, sleep_items,
};
use tokio_util::sync::CancellationToken;

const SLEEP_QUERY: &str = "What patterns do you see in my sleep quality?";

fn sleep_scenario() -> Scenario {
    Scenario {
        retrieval: sleep_items(5),
        reflections: vec![
            reflection("Some nights are short, need more data", false),
            reflection("Still unclear how exercise relates", false),
            reflection("Enough data to answer", true),
        ],
        synthesis: "You sleep longer on days you exercise.".to_string(),
        ..Scenario::default()
    }
}

/// Sleep-quality question: the Observer stays undecided for two cycles, so
/// the evidence threshold ends the loop at iteration 2 with 10 entries.
#[tokio::test]
async fn sleep_quality_question_completes_after_two_cycles() {
    let (engine, counts) = engine_for(sleep_scenario(), EngineConfig::default());
    let execution = engine.execute(SLEEP_QUERY, CancellationToken::new()).await;
    let record = &execution.record;

    assert!(record.success);
    assert_eq!(record.terminal, Terminal::Completed);
    assert_eq!(record.query, SLEEP_QUERY);
    assert_eq!(record.response, "You sleep longer on days you exercise.");
    assert_eq!(record.react_cycles, 2);
    assert_eq!(record.retrieved_entry_count, 10);
    assert_eq!(execution.state.observations().len(), 2);
    assert!(!execution.state.continue_policy());

    let phases: Vec<SafetyPhase> = record.safety_log.iter().map(|c| c.phase).collect();
    assert_eq!(phases, [SafetyPhase::Input, SafetyPhase::Output]);
    assert_eq!(record.reasoning_log.len(), 9);

    assert_eq!(counts.get(Collaborator::Planner), 2);
    assert_eq!(counts.get(Collaborator::Retriever), 2);
    assert_eq!(counts.get(Collaborator::Observer), 2);
    assert_eq!(counts.get(Collaborator::Synthesizer), 1);
    assert_eq!(counts.get(Collaborator::SafetyGate), 2);
    assert!(validate_invariants(&execution.state, 3).is_empty());
}

#[tokio::test]
async fn medication_request_is_blocked_before_the_loop() {
    let scenario = Scenario {
        input: InputVerdict::block("medical_advice"),
        retrieval: sleep_items(5),
        ..Scenario::default()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());
    let execution = engine
        .execute("Can you prescribe me medication?", CancellationToken::new())
        .await;
    let record = &execution.record;

    assert!(record.success);
    assert_eq!(record.terminal, Terminal::Blocked);
    assert_eq!(record.response, input_refusal("medical_advice"));
    assert!(record.response.contains("medical_advice"));
    assert_eq!(record.reasoning_log.len(), 1);
    assert_eq!(record.reasoning_log[0].label, "Safety Check (Input)");
    assert_eq!(record.retrieved_entry_count, 0);
    assert_eq!(record.react_cycles, 0);
    assert_eq!(record.safety_log.len(), 1);
    assert!(execution.state.observations().is_empty());

    assert_eq!(counts.get(Collaborator::SafetyGate), 1);
    assert_eq!(counts.get(Collaborator::Planner), 0);
    assert_eq!(counts.get(Collaborator::Retriever), 0);
    assert!(validate_invariants(&execution.state, 3).is_empty());
}

#[tokio::test]
async fn synthesizer_error_fails_with_apology() {
    let scenario = Scenario {
        failures: Failures {
            synthesizer: Some("model overloaded".to_string()),
            ..Failures::default()
        },
        ..sleep_scenario()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());
    let execution = engine.execute(SLEEP_QUERY, CancellationToken::new()).await;
    let record = &execution.record;

    assert!(!record.success);
    assert_eq!(record.terminal, Terminal::Failed);
    assert_eq!(
        record.response,
        "Sorry, I encountered an error: synthesizer call failed: model overloaded"
    );
    assert_eq!(
        record.error.as_deref(),
        Some("synthesizer call failed: model overloaded")
    );
    assert_eq!(record.safety_log.len(), 1);
    assert_eq!(counts.get(Collaborator::Synthesizer), 1);
    assert!(validate_invariants(&execution.state, 3).is_empty());
}

#[tokio::test]
async fn planner_error_is_not_retried() {
    let scenario = Scenario {
        failures: Failures {
            planner: Some("bad gateway".to_string()),
            ..Failures::default()
        },
        ..sleep_scenario()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.terminal, Terminal::Failed);
    assert!(record.response.contains("planner call failed"));
    assert_eq!(counts.get(Collaborator::Planner), 1);
    assert_eq!(counts.get(Collaborator::Retriever), 0);
}

#[tokio::test]
async fn long_errors_are_summarized_in_the_apology() {
    let detail = format!("{}\ninternal stack frame", "x".repeat(400));
    let scenario = Scenario {
        failures: Failures {
            retriever: Some(detail),
            ..Failures::default()
        },
        ..sleep_scenario()
    };
    let (engine, _) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.terminal, Terminal::Failed);
    assert!(!record.response.contains("internal stack frame"));
    assert!(record.response.ends_with("..."));
    let error = record.error.as_deref().expect("error");
    assert!(error.starts_with("retriever call failed: xxx"));
    assert!(!error.contains("internal stack frame"));
    assert!(error.ends_with("..."));
}

/// An undecided Observer with non-empty retrieval stops at iteration 2, not 3.
#[tokio::test]
async fn evidence_threshold_ends_loop_before_iteration_limit() {
    let scenario = Scenario {
        retrieval: sleep_items(1),
        reflections: vec![reflection("not sure yet", false)],
        ..Scenario::default()
    };
    let (engine, _) = engine_for(scenario, EngineConfig::default());
    let execution = engine.execute("How is my mood?", CancellationToken::new()).await;

    assert_eq!(execution.record.terminal, Terminal::Completed);
    assert_eq!(execution.record.react_cycles, 2);
    let last_observe = &execution.record.reasoning_log[6];
    assert_eq!(last_observe.label, "ReAct Observe (cycle 2)");
    assert!(last_observe.detail.contains("enough observations"));
}

#[tokio::test]
async fn empty_retrieval_runs_to_the_iteration_limit() {
    let scenario = Scenario {
        reflections: vec![reflection("nothing found", false)],
        ..Scenario::default()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());
    let execution = engine.execute("How is my mood?", CancellationToken::new()).await;

    assert_eq!(execution.record.terminal, Terminal::Completed);
    assert_eq!(execution.record.react_cycles, 3);
    assert_eq!(execution.record.retrieved_entry_count, 0);
    assert_eq!(counts.get(Collaborator::Synthesizer), 1);
    assert!(validate_invariants(&execution.state, 3).is_empty());
}

#[tokio::test]
async fn single_iteration_limit_runs_one_cycle() {
    let scenario = Scenario {
        reflections: vec![reflection("not sure yet", false)],
        ..sleep_scenario()
    };
    let config = EngineConfig {
        max_iterations: 1,
        ..EngineConfig::default()
    };
    let (engine, counts) = engine_for(scenario, config);
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.terminal, Terminal::Completed);
    assert_eq!(record.react_cycles, 1);
    assert_eq!(record.retrieved_entry_count, 5);
    assert_eq!(counts.get(Collaborator::Observer), 1);
}

#[tokio::test]
async fn blocked_output_is_replaced_but_run_completes() {
    let scenario = Scenario {
        output: OutputVerdict {
            is_safe: false,
            should_block: true,
            needs_revision: false,
            error: None,
        },
        ..sleep_scenario()
    };
    let (engine, _) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert!(record.success);
    assert_eq!(record.terminal, Terminal::Completed);
    assert_eq!(record.response, OUTPUT_FALLBACK);
    assert!(record.safety_log[1].should_block);
}

#[tokio::test]
async fn revision_flag_keeps_the_response() {
    let scenario = Scenario {
        output: OutputVerdict {
            is_safe: false,
            should_block: false,
            needs_revision: true,
            error: None,
        },
        ..sleep_scenario()
    };
    let (engine, _) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.response, "You sleep longer on days you exercise.");
    assert_eq!(record.safety_log[1].needs_revision, Some(true));
    assert!(record.reasoning_log.last().expect("step").detail.contains("revision"));
}

#[tokio::test]
async fn input_gate_failure_blocks() {
    let scenario = Scenario {
        failures: Failures {
            safety_input: Some("classifier down".to_string()),
            ..Failures::default()
        },
        ..sleep_scenario()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.terminal, Terminal::Blocked);
    assert_eq!(record.response, input_refusal("error"));
    let check = &record.safety_log[0];
    assert!(!check.is_safe);
    assert!(check.should_block);
    assert_eq!(check.category.as_deref(), Some("error"));
    assert_eq!(
        check.error.as_deref(),
        Some("safety_gate call failed: classifier down")
    );
    assert_eq!(counts.get(Collaborator::Planner), 0);
}

#[tokio::test]
async fn output_gate_failure_delivers_the_answer() {
    let scenario = Scenario {
        failures: Failures {
            safety_output: Some("classifier down".to_string()),
            ..Failures::default()
        },
        ..sleep_scenario()
    };
    let (engine, _) = engine_for(scenario, EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.terminal, Terminal::Completed);
    assert_eq!(record.response, "You sleep longer on days you exercise.");
    let check = &record.safety_log[1];
    assert!(check.is_safe);
    assert!(!check.should_block);
    assert!(check.error.is_some());
}

#[tokio::test]
async fn planner_sees_running_observation_log() {
    let (mut collaborators, _) = sleep_scenario().into_collaborators();
    let planner = Arc::new(RecordingPlanner::default());
    let as_planner: Arc<dyn Planner> = planner.clone();
    collaborators.planner = as_planner;
    let engine = engine_with(collaborators, EngineConfig::default());

    let record = engine.run(SLEEP_QUERY).await;

    assert_eq!(record.react_cycles, 2);
    assert_eq!(
        planner.seen(),
        vec![
            Vec::<String>::new(),
            vec!["Some nights are short, need more data".to_string()],
        ]
    );
}

#[tokio::test]
async fn completed_record_is_stable_across_reads() {
    let (engine, _) = engine_for(sleep_scenario(), EngineConfig::default());
    let execution = engine.execute(SLEEP_QUERY, CancellationToken::new()).await;
    let first = execution.state.reasoning_log().to_vec();
    let second = execution.state.reasoning_log().to_vec();
    assert_eq!(first, second);
    assert_eq!(first, execution.record.reasoning_log);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_do_not_share_state() {
    let scenario = Scenario {
        retrieval: sleep_items(3),
        reflections: vec![reflection("enough", true)],
        ..Scenario::default()
    };
    let (engine, counts) = engine_for(scenario, EngineConfig::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(&format!("question {i}")).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let record = handle.await.expect("join");
        assert_eq!(record.terminal, Terminal::Completed);
        assert_eq!(record.query, format!("question {i}"));
        assert_eq!(record.react_cycles, 1);
        assert_eq!(record.retrieved_entry_count, 3);
    }
    assert_eq!(counts.get(Collaborator::Planner), 8);
}

#[tokio::test]
async fn record_serializes_terminal_and_counts() {
    let (engine, _) = engine_for(sleep_scenario(), EngineConfig::default());
    let record = engine.run(SLEEP_QUERY).await;
    let json = serde_json::to_value(&record).expect("json");

    assert_eq!(json["terminal"], "completed");
    assert_eq!(json["react_cycles"], 2);
    assert_eq!(json["retrieved_entry_count"], 10);
    assert_eq!(json["safety_log"][0]["phase"], "input");
    assert!(json.get("error").is_none());
}
