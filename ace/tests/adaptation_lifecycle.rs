//! End-to-end adaptation scenarios over scripted collaborators.
//!
//! A single `ScriptedLlm` is shared by all three roles, so its script lists
//! responses in the exact order the adapter calls generator, reflector and
//! curator. The scripted environment records every call for inspection.

use ace::adapter::{BaselineAdapter, OfflineAdapter, OnlineAdapter, Roles};
use ace::core::playbook::Playbook;
use ace::core::trajectory::ExecutionStatus;
use ace::core::types::{Phase, ReflectorOutput};
use ace::dedup::Deduplicator;
use ace::io::config::{AdapterConfig, DedupConfig};
use ace::roles::Generator;
use ace::test_support::{
    FixedEmbedder, ScriptedEnvironment, ScriptedLlm, add_operations, curator_response,
    generator_response, reflector_response, sample, unit_test_report,
};

fn config() -> AdapterConfig {
    AdapterConfig {
        max_interaction_steps: 3,
        ..AdapterConfig::default()
    }
}

/// Two training epochs over one sample, then a frozen test pass.
///
/// Epoch 1 adds a tip; epoch 2 marks it helpful and adds a second one. The
/// test pass only calls the generator and sees both tips in its prompt.
#[test]
fn offline_training_learns_then_test_pass_is_frozen() {
    let llm = ScriptedLlm::new([
        generator_response("list the songs", &[], "print(apis.spotify.songs())"),
        reflector_response("Paginate list calls.", "[]"),
        curator_response(&add_operations("api usage", "Always paginate list endpoints.")),
        generator_response("paginate", &["api-00001"], "print(all_pages())"),
        reflector_response(
            "Pagination worked.",
            r#"[{"id": "api-00001", "tag": "Helpful"}]"#,
        ),
        curator_response(&add_operations(
            "api usage",
            "Look up credentials in the supervisor app.",
        )),
        generator_response("use the playbook", &["api-00001"], "print(done())"),
    ]);
    let env = ScriptedEnvironment::new()
        .completing_after(1)
        .with_report("abc_2", unit_test_report(1, 2));
    let cfg = AdapterConfig {
        epochs: 2,
        ..config()
    };
    let mut playbook = Playbook::new();

    let run = {
        let roles = Roles::with_client(llm.clone(), &cfg.roles);
        let mut adapter = OfflineAdapter::new(&mut playbook, roles, cfg);
        adapter
            .run(
                &[sample("abc_1", "List my liked songs.")],
                &[sample("abc_2", "Like every song in my queue.")],
                &env,
            )
            .expect("offline run")
    };

    assert_eq!(run.train.len(), 2);
    assert_eq!(run.train[0].results[0].epoch, 1);
    assert_eq!(run.train[1].results[0].epoch, 2);
    assert_eq!(run.train[1].results[0].phase, Phase::Train);
    assert_eq!(run.train[0].task_goal_completion(), 1.0);

    assert_eq!(playbook.len(), 2);
    let tip = playbook.get_tip("api-00001").expect("first tip");
    assert_eq!(tip.helpful, 1);
    assert_eq!(playbook.section("api usage").map(<[String]>::len), Some(2));

    let test = &run.test.results[0];
    assert_eq!(test.phase, Phase::Test);
    assert_eq!(test.reflection, ReflectorOutput::empty());
    assert!(test.curator_output.delta.is_empty());
    assert_eq!(test.playbook_snapshot, playbook.as_prompt());
    assert_eq!(run.test.task_goal_completion(), 0.0);
    assert_eq!(run.test.scenario_goal_completion(), 0.0);

    assert_eq!(llm.calls(), 7);
    assert_eq!(llm.remaining(), 0);
    let test_prompt = &llm.prompts()[6];
    assert!(test_prompt.contains("Always paginate list endpoints."));
    assert!(test_prompt.contains("Look up credentials in the supervisor app."));
}

/// Online learning with per-sample deduplication drops a restated tip.
#[test]
fn online_run_deduplicates_restated_tips() {
    let llm = ScriptedLlm::new([
        generator_response("first try", &[], "print(1)"),
        reflector_response("First insight about paging.", "[]"),
        curator_response(&add_operations("api usage", "Always paginate list endpoints.")),
        generator_response("second try", &[], "print(2)"),
        reflector_response("Second insight about paging.", "[]"),
        curator_response(&add_operations("api usage", "paginate LIST endpoints")),
    ]);
    let env = ScriptedEnvironment::new().completing_after(1);
    let cfg = AdapterConfig {
        dedup: DedupConfig {
            frequency: 1,
            ..DedupConfig::default()
        },
        ..config()
    };
    let mut playbook = Playbook::new();

    let report = {
        let roles = Roles::with_client(llm.clone(), &cfg.roles);
        let mut adapter = OnlineAdapter::new(&mut playbook, roles, cfg)
            .with_deduplicator(Deduplicator::substring_only());
        adapter
            .run(
                vec![sample("abc_1", "first"), sample("def_1", "second")],
                &env,
            )
            .expect("online run")
    };

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.phase == Phase::Online));
    assert_eq!(report.scenario_goal_completion(), 1.0);

    // The restated tip was added, then removed by deduplication.
    assert_eq!(report.results[1].curator_output.delta.operations.len(), 1);
    assert_eq!(playbook.len(), 1);
    assert!(playbook.get_tip("api-00001").is_some());
    assert!(playbook.get_tip("api-00002").is_none());

    // The second curator call sees both reflections in its window.
    let curator_prompt = &llm.prompts()[5];
    assert!(curator_prompt.contains("First insight about paging."));
    assert!(curator_prompt.contains("Second insight about paging."));
}

/// Two near-identical tips (cosine ~0.994) learned online with per-sample dedup.
fn learn_similar_tips(similarity_threshold: f32) -> Playbook {
    let llm = ScriptedLlm::new([
        generator_response("first try", &[], "print(1)"),
        reflector_response("Paging matters.", "[]"),
        curator_response(&add_operations("api usage", "Always paginate list endpoints.")),
        generator_response("second try", &[], "print(2)"),
        reflector_response("Paging still matters.", "[]"),
        curator_response(&add_operations("api usage", "Request every page of list results.")),
    ]);
    let embedder = FixedEmbedder::new([
        ("Always paginate list endpoints.", vec![1.0, 0.0]),
        ("Request every page of list results.", vec![0.9, 0.1]),
    ]);
    let env = ScriptedEnvironment::new().completing_after(1);
    let cfg = AdapterConfig {
        dedup: DedupConfig {
            frequency: 1,
            similarity_threshold,
        },
        ..config()
    };
    let mut playbook = Playbook::new();
    {
        let roles = Roles::with_client(llm, &cfg.roles);
        let mut adapter = OnlineAdapter::new(&mut playbook, roles, cfg).with_embedder(embedder);
        adapter
            .run(vec![sample("abc_1", "first"), sample("abc_2", "second")], &env)
            .expect("online run");
    }
    playbook
}

#[test]
fn embedding_dedup_uses_configured_threshold() {
    let strict = learn_similar_tips(0.995);
    assert_eq!(strict.len(), 2);

    let loose = learn_similar_tips(0.8);
    assert_eq!(loose.len(), 1);
    assert!(loose.get_tip("api-00002").is_none());
}

#[test]
fn baseline_scores_tasks_without_learning() {
    let llm = ScriptedLlm::new([
        generator_response("solve", &[], "print('a')"),
        generator_response("solve", &[], "print('b')"),
    ]);
    let env = ScriptedEnvironment::new()
        .completing_after(1)
        .with_report("abc_1", unit_test_report(2, 2))
        .with_report("abc_2", unit_test_report(1, 2));
    let mut playbook = Playbook::new();
    playbook.add_tip("api usage", "Always paginate list endpoints.", None, &[]);
    let before = playbook.dumps().expect("dump");

    let report = BaselineAdapter::new(&playbook, Generator::new(llm.clone()), config())
        .run(&[sample("abc_1", "one"), sample("abc_2", "two")], &env);

    assert_eq!(report.phase, Phase::Baseline);
    let tgcs: Vec<f64> = report.results.iter().map(|r| r.tgc()).collect();
    assert_eq!(tgcs, vec![1.0, 0.0]);
    assert_eq!(report.task_goal_completion(), 0.5);
    let counts = report.tally.get("abc").expect("scenario abc");
    assert_eq!((counts.passed, counts.attempted), (1, 2));
    assert_eq!(report.scenario_goal_completion(), 0.0);

    assert_eq!(llm.calls(), 2);
    assert_eq!(playbook.dumps().expect("dump"), before);
    assert!(llm.prompts()[0].contains("Always paginate list endpoints."));
}

#[test]
fn task_that_never_completes_stops_at_step_limit() {
    let llm = ScriptedLlm::new([
        generator_response("try", &[], "print(1)"),
        generator_response("try again", &[], "print(2)"),
    ]);
    let env = ScriptedEnvironment::new();
    let playbook = Playbook::new();
    let cfg = AdapterConfig {
        max_interaction_steps: 2,
        ..AdapterConfig::default()
    };

    let report = BaselineAdapter::new(&playbook, Generator::new(llm), cfg)
        .run(&[sample("abc_1", "never done")], &env);

    let result = &report.results[0];
    assert_eq!(result.execution_status(), ExecutionStatus::MaxStepsReached);
    assert_eq!(result.environment_result.metrics.num_steps, 2);
    assert_eq!(env.executed_code("abc_1"), vec!["print(1)", "print(2)"]);
    assert_eq!(env.evaluations("abc_1"), 1);
    assert!(env.closed("abc_1"));
}

/// Unparsable generator output crashes the task, which is still evaluated,
/// closed and reflected on.
#[test]
fn generator_exhaustion_crashes_task_but_learning_continues() {
    let llm = ScriptedLlm::new([
        "I am not sure what to do.".to_string(),
        "Still thinking.".to_string(),
        reflector_response("Emit the required sections.", "[]"),
        curator_response("[]"),
    ]);
    let env = ScriptedEnvironment::new().completing_after(1);
    let mut cfg = config();
    cfg.roles.max_retries = 2;
    let mut playbook = Playbook::new();

    let report = {
        let roles = Roles::with_client(llm.clone(), &cfg.roles);
        let mut adapter = OnlineAdapter::new(&mut playbook, roles, cfg);
        adapter
            .run([sample("abc_1", "crash me")], &env)
            .expect("online run")
    };

    let result = &report.results[0];
    assert_eq!(result.execution_status(), ExecutionStatus::Crashed);
    assert_eq!(result.environment_result.metrics.num_steps, 0);
    assert!(result.generator_output.is_none());
    assert!(env.executed_code("abc_1").is_empty());
    assert_eq!(env.evaluations("abc_1"), 1);
    assert!(env.closed("abc_1"));

    assert!(llm.prompts()[2].contains("Execution status: crashed"));
    assert_eq!(llm.remaining(), 0);
    assert!(playbook.is_empty());
}

#[test]
fn reflector_exhaustion_aborts_the_run() {
    let llm = ScriptedLlm::new([
        generator_response("solve", &[], "print(1)"),
        "no sections here".to_string(),
        "{\"reasoning\": \"half an answer\"}".to_string(),
    ]);
    let env = ScriptedEnvironment::new().completing_after(1);
    let mut cfg = config();
    cfg.roles.max_retries = 2;
    let mut playbook = Playbook::new();

    let roles = Roles::with_client(llm.clone(), &cfg.roles);
    let mut adapter = OnlineAdapter::new(&mut playbook, roles, cfg);
    let err = adapter
        .run([sample("abc_1", "q"), sample("abc_2", "q")], &env)
        .expect_err("reflector should give up");

    assert!(format!("{err:#}").contains("reflect on task abc_1"));
    assert!(env.closed("abc_1"));
    assert!(env.calls().iter().all(|call| !format!("{call:?}").contains("abc_2")));
    assert_eq!(llm.calls(), 3);
}
