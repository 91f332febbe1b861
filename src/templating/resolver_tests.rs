//! Tests for reference resolution across the whole engine.

use serde_json::{Value, json};

use crate::templating::{Context, Dialect, Engine, EngineBuilder, NodePath, Partial};

fn ctx(value: Value) -> Context {
    value.as_object().cloned().unwrap()
}

fn engine(builder: EngineBuilder) -> Engine {
    let (engine, report) = builder.build();
    assert!(report.is_clean(), "load problems: {report:?}");
    engine
}

fn t1() -> EngineBuilder {
    Engine::builder().template_node("t1", &json!({"type": "button", "name": "{{context.n}}"}))
}

#[test]
fn test_scenario_a_simple_reference() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({
        "type": "placeholder",
        "ref": "t1",
        "context": {"n": "World"}
    }));

    assert!(resolution.is_clean());
    assert_eq!(
        resolution.node,
        json!({"ref": "t1", "context": {"n": "World"}, "type": "button", "name": "World"})
    );
}

#[test]
fn test_scenario_b_partial_include() {
    let engine = engine(
        Engine::builder()
            .partial(Partial::new("greet", "Hello {{name}}!", Dialect::Jinja))
            .template_node(
                "t2",
                &json!({
                    "type": "markdown",
                    "content": "{{ include_partial(partial=\"greet\", name=context.n) }}"
                }),
            ),
    );

    let resolution = engine.resolve(&json!({"ref": "t2", "context": {"n": "Ada"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["content"], json!("Hello Ada!"));
    assert_eq!(resolution.node["type"], json!("markdown"));
}

#[test]
fn test_scenario_b_eta_template_with_jinja_partial() {
    let engine = engine(
        Engine::builder()
            .partial(Partial::new("greet", "Hello {{name}}!\nWelcome.", Dialect::Jinja))
            .template_node(
                "t2",
                &json!({
                    "dialect": "eta",
                    "type": "markdown",
                    "content": "<%~ include(\"greet\", {name: context.n}) %>"
                }),
            ),
    );

    let resolution = engine.resolve(&json!({"ref": "t2", "context": {"n": "Ada"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["content"], json!("Hello Ada!\nWelcome."));
}

#[test]
fn test_scenario_c_key_mapped_cards() {
    let engine = engine(
        t1().template_node("stack", &json!({"type": "vertical-stack", "cards": []})),
    );

    let ancestor = ctx(json!({
        "cards": [
            {"ref": "t1", "context": {"n": "A"}},
            {"ref": "t1", "context": {"n": "B"}}
        ]
    }));
    let resolution = engine.resolve_with(
        &json!({"ref": "stack", "key_map": {"cards": "cards"}}),
        &ancestor,
        &NodePath::default(),
    );

    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    let cards = resolution.node["cards"].as_array().unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0]["name"], json!("A"));
    assert_eq!(cards[1]["name"], json!("B"));
    assert_eq!(cards[0]["type"], json!("button"));
    assert_eq!(cards[1]["ref"], json!("t1"));
}

#[test]
fn test_context_precedence() {
    let engine = engine(
        Engine::builder()
            .template_node(
                "shared",
                &json!({"context": {"x": 1}, "x": "{{ context.x }}", "y": "{{ context.y | default(value='absent') }}"}),
            )
            .template_node(
                "isolated",
                &json!({
                    "context": {"x": 1},
                    "replicate_context": false,
                    "x": "{{ context.x }}",
                    "y": "{{ context.y | default(value='absent') }}"
                }),
            ),
    );
    let ancestor = ctx(json!({"x": 2, "y": 3}));

    let shared = engine.resolve_with(
        &json!({"ref": "shared", "context": {"x": 4}}),
        &ancestor,
        &NodePath::default(),
    );
    assert_eq!(shared.node["x"], json!("4"));
    assert_eq!(shared.node["y"], json!("3"));

    let isolated = engine.resolve_with(&json!({"ref": "isolated"}), &ancestor, &NodePath::default());
    assert_eq!(isolated.node["x"], json!("1"));
    assert_eq!(isolated.node["y"], json!("absent"));
}

#[test]
fn test_key_map_scalar_beats_template_output() {
    let engine = engine(
        Engine::builder().template_node("icon", &json!({"type": "button", "icon": "mdi:default"})),
    );
    let resolution = engine.resolve_with(
        &json!({"ref": "icon", "key_map": {"icon": "chosenIcon"}}),
        &ctx(json!({"chosenIcon": "mdi:check"})),
        &NodePath::default(),
    );
    assert_eq!(resolution.node["icon"], json!("mdi:check"));
    assert_eq!(resolution.node["key_map"], json!({"icon": "chosenIcon"}));
}

#[test]
fn test_template_default_key_map_applies() {
    let engine = engine(Engine::builder().template_node(
        "icon",
        &json!({"key_map": ["icon"], "type": "button", "icon": "mdi:default"}),
    ));
    let resolution = engine.resolve(&json!({"ref": "icon", "context": {"icon": "mdi:fan"}}));
    assert_eq!(resolution.node["icon"], json!("mdi:fan"));
    assert!(resolution.node.get("key_map").is_none());
}

#[test]
fn test_error_containment_keeps_siblings() {
    let engine = engine(
        t1().template_node("broken", &json!({"type": "button", "name": "{{ context.missing }}"})),
    );
    let tree = json!({
        "type": "vertical-stack",
        "cards": [
            {"ref": "broken", "context": {"n": "x"}},
            {"ref": "t1", "context": {"n": "ok"}}
        ]
    });

    let resolution = engine.resolve(&tree);
    let cards = resolution.node["cards"].as_array().unwrap();

    let error = cards[0]["error"].as_str().unwrap();
    assert!(error.starts_with("Template 'broken' failed:"), "got: {error}");
    assert!(error.contains("context.missing"), "got: {error}");
    assert_eq!(cards[0].as_object().unwrap().keys().next().map(String::as_str), Some("error"));
    assert_eq!(cards[0]["ref"], json!("broken"));
    assert_eq!(cards[0]["context"], json!({"n": "x"}));

    assert_eq!(cards[1]["name"], json!("ok"));
    assert!(cards[1].get("error").is_none());

    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].path, "cards[0]");
    assert_eq!(resolution.failures[0].key.as_deref(), Some("broken"));
}

#[test]
fn test_unknown_template_suggests_similar_keys() {
    let engine = engine(
        Engine::builder().template_node("light_button", &json!({"type": "button"})),
    );
    let resolution = engine.resolve(&json!({"ref": "light_buton"}));
    let error = resolution.node["error"].as_str().unwrap();
    assert!(error.contains("did you mean light_button"), "got: {error}");
}

#[test]
fn test_stale_error_is_cleared_on_success() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({
        "error": "Template 't1' failed: old problem",
        "ref": "t1",
        "context": {"n": "fixed"}
    }));
    assert!(resolution.node.get("error").is_none());
    assert_eq!(resolution.node["name"], json!("fixed"));
}

#[test]
fn test_failed_node_replaces_stale_error() {
    let engine = engine(Engine::builder());
    let resolution = engine.resolve(&json!({"error": "old", "ref": "gone", "type": "x"}));
    let node = resolution.node.as_object().unwrap();
    assert_eq!(node.len(), 3);
    assert!(node["error"].as_str().unwrap().contains("'gone' is not registered"));
}

#[test]
fn test_tree_without_references_is_unchanged() {
    let engine = engine(t1());
    let tree = json!({
        "title": "Home",
        "cards": [
            {"type": "entities", "entities": ["light.a", {"entity": "light.b"}]},
            {"type": "vertical-stack", "cards": [{"type": "button", "tap_action": {"action": "toggle"}}]}
        ],
        "sections": [{"cards": []}],
        "count": 3
    });
    let resolution = engine.resolve(&tree);
    assert_eq!(resolution.node, tree);
    assert!(resolution.is_clean());
}

#[test]
fn test_resolution_is_stable() {
    let engine = engine(
        t1().template_node("stack", &json!({"type": "vertical-stack", "cards": [{"ref": "t1", "context": {"n": "inner"}}]})),
    );
    let tree = json!({"cards": [{"ref": "t1", "context": {"n": "A"}}, {"ref": "stack"}]});

    let first = engine.resolve(&tree);
    let second = engine.resolve(&first.node);
    assert_eq!(first.node, second.node);
    assert!(first.node.to_string().find("card_template").is_none());
}

#[test]
fn test_references_found_deep_in_containers() {
    let engine = engine(t1());
    let tree = json!({
        "type": "button",
        "tap_action": {"action": "fire-dom-event", "browser_mod": {"data": {"content": {"ref": "t1", "context": {"n": "popup"}}}}},
        "sections": [{"type": "grid", "cards": [{"card": {"ref": "t1", "context": {"n": "nested"}}}]}]
    });

    let resolution = engine.resolve(&tree);
    assert!(resolution.is_clean());
    assert_eq!(
        resolution.node["tap_action"]["browser_mod"]["data"]["content"]["name"],
        json!("popup")
    );
    assert_eq!(resolution.node["sections"][0]["cards"][0]["card"]["name"], json!("nested"));
}

#[test]
fn test_nested_template_references_inherit_effective_context() {
    let engine = engine(
        t1().template_node(
            "wrapper",
            &json!({"type": "vertical-stack", "cards": [{"ref": "t1"}]}),
        ),
    );
    let resolution = engine.resolve(&json!({"ref": "wrapper", "context": {"n": "from wrapper"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["cards"][0]["name"], json!("from wrapper"));
}

#[test]
fn test_nested_failure_is_contained_inside_expansion() {
    let engine = engine(
        Engine::builder().template_node(
            "wrapper",
            &json!({"type": "vertical-stack", "cards": [{"ref": "nowhere"}, {"type": "ok"}]}),
        ),
    );
    let resolution = engine.resolve(&json!({"ref": "wrapper"}));
    assert!(resolution.node.get("error").is_none());
    assert!(resolution.node["cards"][0]["error"].is_string());
    assert_eq!(resolution.node["cards"][1], json!({"type": "ok"}));
    assert_eq!(resolution.failures[0].path, "cards[0]");
}

#[test]
fn test_template_definitions_are_left_alone() {
    let engine = engine(t1());
    let definition = json!({"card_template": "x", "type": "button", "card": {"ref": "t1"}});
    assert_eq!(engine.resolve(&definition).node, definition);
}

#[test]
fn test_template_alias() {
    let engine = engine(
        t1().template_node("alias", &json!({"ref": "t1", "context": {"n": "alias default"}})),
    );

    let resolution = engine.resolve(&json!({"ref": "alias"}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["ref"], json!("alias"));
    assert_eq!(resolution.node["type"], json!("button"));
    assert_eq!(resolution.node["name"], json!("alias default"));

    let resolution = engine.resolve(&json!({"ref": "alias", "context": {"n": "Grace"}}));
    assert_eq!(resolution.node["name"], json!("Grace"));
}

#[test]
fn test_rendered_alias_picks_template_from_context() {
    let engine = engine(
        t1().template_node("other", &json!({"type": "entity"}))
            .template_node("pick", &json!({"ref": "{{ context.kind }}"})),
    );

    let resolution = engine.resolve(&json!({"ref": "pick", "context": {"kind": "t1", "n": "Z"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["name"], json!("Z"));

    let resolution = engine.resolve(&json!({"ref": "pick", "context": {"kind": "other"}}));
    assert_eq!(resolution.node["type"], json!("entity"));
    assert_eq!(resolution.node["ref"], json!("pick"));
}

#[test]
fn test_bulk_overrides_from_reference_node() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({
        "ref": "t1",
        "context": {"n": "x"},
        "overrides": "{\"color\": \"red\", \"name\": \"forced\"}"
    }));
    assert_eq!(resolution.node["color"], json!("red"));
    assert_eq!(resolution.node["name"], json!("forced"));
    // The payload stays so the next pass applies it again.
    assert!(resolution.node["overrides"].is_string());
}

#[test]
fn test_bulk_overrides_rendered_from_context() {
    let engine = engine(Engine::builder().template_node(
        "styled",
        &json!({"type": "button", "overrides": "{{ context.style | default(value='') }}"}),
    ));

    let resolution = engine.resolve(&json!({"ref": "styled", "context": {"style": "{\"icon\": \"mdi:x\"}"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["icon"], json!("mdi:x"));
    assert!(resolution.node.get("overrides").is_none());
}

#[test]
fn test_bulk_override_parse_failure_is_contained() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({
        "cards": [
            {"ref": "t1", "context": {"n": "x"}, "overrides": "{broken"},
            {"ref": "t1", "context": {"n": "y"}}
        ]
    }));
    let error = resolution.node["cards"][0]["error"].as_str().unwrap();
    assert!(error.contains("Invalid overrides"), "got: {error}");
    assert_eq!(resolution.node["cards"][1]["name"], json!("y"));
}

#[test]
fn test_unparsable_output_is_contained() {
    let engine = engine(Engine::builder().template_node(
        "raw",
        &json!({"type": "markdown", "content": "{{ context.text | safe }}"}),
    ));
    let resolution = engine.resolve(&json!({"ref": "raw", "context": {"text": "say \"hi\""}}));
    let error = resolution.node["error"].as_str().unwrap();
    assert!(error.contains("not a valid card"), "got: {error}");
}

#[test]
fn test_substituted_quotes_and_newlines_stay_valid() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({"ref": "t1", "context": {"n": "line \"one\"\nline two"}}));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    assert_eq!(resolution.node["name"], json!("line \"one\"\nline two"));
}

#[test]
fn test_invalid_context_and_key_map_are_contained() {
    let engine = engine(t1());
    let bad_context = engine.resolve(&json!({"ref": "t1", "context": "n=1"}));
    assert!(bad_context.node["error"].as_str().unwrap().contains("Invalid context"));

    let bad_key_map = engine.resolve(&json!({"ref": "t1", "context": {"n": 1}, "key_map": 5}));
    assert!(bad_key_map.node["error"].as_str().unwrap().contains("Invalid key_map"));
}

#[test]
fn test_depth_limit_stops_runaway_key_mapping() {
    let engine = engine(
        Engine::builder()
            .max_depth(4)
            .template_node("nest", &json!({"type": "vertical-stack", "key_map": ["card"]})),
    );
    // Every level supplies the next level through its own context.
    let mut node = json!({"ref": "nest"});
    for _ in 0..6 {
        node = json!({"ref": "nest", "context": {"card": node}});
    }

    let resolution = engine.resolve(&node);
    assert_eq!(resolution.failures.len(), 1);
    assert!(resolution.failures[0].message.contains("maximum depth of 4"));
}

#[test]
fn test_output_field_order() {
    let engine = engine(t1());
    let resolution = engine.resolve(&json!({
        "type": "placeholder",
        "overrides": {"extra": true},
        "key_map": {"icon": "i"},
        "context": {"n": "x", "i": "mdi:a"},
        "ref": "t1"
    }));
    let keys: Vec<&str> =
        resolution.node.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["ref", "context", "key_map", "overrides", "type", "name", "extra", "icon"]);
}

#[test]
fn test_key_mapped_sub_node_context_rules() {
    let engine = engine(
        Engine::builder()
            .template_node("leaf", &json!({"who": "{{ context.who }}", "title": "{{ context.title | default(value='none') }}"}))
            .template_node("holder", &json!({"type": "holder", "key_map": ["card"]})),
    );

    let resolution = engine.resolve(&json!({
        "ref": "holder",
        "context": {
            "title": "from holder",
            "who": "holder",
            "card": {"ref": "leaf", "context": {"who": "leaf"}}
        }
    }));

    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    // The sub-node's own context wins; the rest of the holder's context is inherited.
    assert_eq!(resolution.node["card"]["who"], json!("leaf"));
    assert_eq!(resolution.node["card"]["title"], json!("from holder"));
}

#[test]
fn test_dotted_key_map_hides_consumed_list_from_sub_nodes() {
    let engine = engine(
        Engine::builder()
            .template_node("stack", &json!({"type": "vertical-stack", "cards": []}))
            .template_node(
                "peek",
                &json!({
                    "type": "peek",
                    "room": "{{ context.room.name }}",
                    "sees_cards": "{% if context.room.cards is defined %}yes{% else %}no{% endif %}"
                }),
            ),
    );

    let resolution = engine.resolve(&json!({
        "ref": "stack",
        "key_map": {"cards": "room.cards"},
        "context": {"room": {"name": "Kitchen", "cards": [{"ref": "peek"}, {"ref": "peek"}]}}
    }));

    assert!(resolution.is_clean(), "{:?}", resolution.failures);
    let cards = resolution.node["cards"].as_array().unwrap();
    assert_eq!(cards.len(), 2);
    for card in cards {
        assert_eq!(card["room"], json!("Kitchen"));
        assert_eq!(card["sees_cards"], json!("no"));
    }
}

#[test]
fn test_map_substituted_as_text_fails_the_node() {
    let engine = engine(Engine::builder().template_node("obj", &json!({"type": "entity", "v": "{{ context.o }}"})));

    let resolution = engine.resolve(&json!({"ref": "obj", "context": {"o": {"a": 1}}}));
    assert_eq!(resolution.failures.len(), 1);
    let error = resolution.node["error"].as_str().unwrap();
    assert!(error.starts_with("Template 'obj' failed"), "{error}");
    assert!(error.contains("json_encode"), "{error}");
    assert!(resolution.node.get("v").is_none());
}

#[test]
fn test_runtime_failure_inside_partial_is_contained() {
    let engine = engine(
        Engine::builder()
            .partial(Partial::new("strict", "<%= it.deep.value %>", Dialect::Eta))
            .template_node(
                "uses_partial",
                &json!({"content": "{{ include_partial(partial=\"strict\") }}"}),
            )
            .template_node("plain", &json!({"content": "fine"})),
    );

    let resolution = engine.resolve(&json!([{"ref": "uses_partial"}, {"ref": "plain"}]));
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].path, "[0]");
    assert!(resolution.failures[0].message.contains("strict"), "{}", resolution.failures[0]);
    assert_eq!(resolution.node[1]["content"], json!("fine"));
}
