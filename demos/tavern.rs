/// Tavern example: one evening at the Gilded Goose, resolved line by line.
///
/// Shows placeholders, inline conditionals, action blocks, templates,
/// speakers, styling, a mod overriding a built-in, a redirect, and a loot
/// draw.
///
/// Run with: cargo run --example tavern

use narrative_directives::core::engine::DirectiveEngine;
use narrative_directives::core::expression::ConditionParams;
use narrative_directives::core::registry::ActionRecord;
use narrative_directives::schema::content::ContentTable;
use narrative_directives::schema::pool::{DrawMode, DrawSettings, PoolDrawSettings, PoolTables};
use narrative_directives::schema::state::{GameState, WorldState};
use serde_json::{json, Value};

const CONTENT: &str = r#"{
    "tavern": [
        (id: "enter", val: "The door creaks. |$weather| {\"flag\": \"visits+=1\"}"),
        (id: "weather", val: "if{storm = 1}Rain hammers the shutters. else{}The night is calm. fi{}"),
        (id: "greet", val: "innkeeper: if{visits > 1}Back again? else{}Welcome, **stranger**. fi{} You carry |flag(gold)| gold."),
        (id: "order", val: "{\"flag\": \"gold-=3\", \"give\": [\"ale\", \"bread\"]} barmaid: Here you are. *Three* coins."),
        (id: "brawl", val: "A stool flies past. {\"redirect\": \"street.outside\"} You should never see this."),
    ],
}"#;

const POOLS: &str = r#"(
    definitions: {
        "trinkets": (source: "trinkets"),
    },
    entries: {
        "pocket": (
            pool: "trinkets",
            entities: [
                (id: Some("common"), weight: Some(4.0), count: Some(1), filters_include: Some({ "rarity": "common" })),
                (id: Some("shiny"), weight: Some(1.0), count: Some(2), filters_include: Some({ "tags": { "$all": ["shiny"] } })),
            ],
        ),
    },
)"#;

fn main() {
    let content = ContentTable::parse_ron(CONTENT).expect("Failed to parse tavern content");
    let pools = PoolTables::parse_ron(POOLS).expect("Failed to parse tavern pools");

    let mut state = WorldState::new().with_dungeon("tavern").with_content(content);
    state.set_flag("gold", 10.0);
    state.set_flag("storm", 1.0);
    let trinkets = json!({
        "button": { "rarity": "common", "tags": [] },
        "thimble": { "rarity": "common", "tags": ["shiny"] },
        "ring": { "rarity": "rare", "tags": ["shiny", "gold"] },
        "coin": { "rarity": "rare", "tags": ["shiny"] },
    });
    if let Value::Object(map) = trinkets {
        state.insert_data("trinkets", map);
    }

    let mut engine = DirectiveEngine::builder()
        .seed(2026)
        .with_pools(pools)
        .build()
        .expect("Failed to build engine");

    // A mod adds an inventory action and a placeholder.
    engine.register_action(
        "give",
        ActionRecord::new(|state, item| {
            if let Some(item) = item.as_str() {
                let key = format!("items.{}", item);
                let held = state.get_flag(&key);
                state.set_flag(&key, held + 1.0);
            }
        }),
    );
    engine.register_placeholder("held", |state, args| {
        let item = args.first()?;
        Some(state.get_flag(&format!("items.{}", item)).to_string())
    });

    println!("=== The Gilded Goose ===\n");
    for line in ["enter", "greet", "order", "greet"] {
        show(&engine, &mut state, line);
    }

    let ales = engine
        .resolve_string(&mut state, "You hold |held(ale)| ale.", false)
        .expect("resolve failed");
    println!("{}\n", ales.output);

    // A choice guarded by visibility and enablement clauses.
    let params = ConditionParams {
        if_all: Some("visits >= 1".to_string()),
        active_all: Some("gold >= 5".to_string()),
        ..ConditionParams::default()
    };
    let shown = engine
        .perform_conditional_evaluation(&state, Some(&params), false)
        .expect("condition failed");
    let enabled = engine
        .perform_conditional_evaluation(&state, Some(&params), true)
        .expect("condition failed");
    println!("[choice] Buy a round: shown={} enabled={}\n", shown, enabled);

    show(&engine, &mut state, "brawl");

    let found = engine.draw_from_pool(
        &state,
        "pocket",
        &PoolDrawSettings::new(DrawMode::Weight, 2).unique(),
    );
    println!("On the floor you find: {}", found.join(", "));

    let toast = engine.draw_from_collection(
        vec!["Cheers!", "To the road!", "Slàinte!"],
        &DrawSettings::new(DrawMode::Uniform, 1),
    );
    println!("Someone shouts: {}", toast.join(""));

    println!("\nFlags at closing time:");
    for (key, value) in state.flags() {
        println!("  {} = {}", key, value);
    }
}

fn show(engine: &DirectiveEngine, state: &mut WorldState, line: &str) {
    let resolution = engine
        .resolve_line(state, line, None)
        .expect("resolve failed")
        .expect("missing line");
    if resolution.redirected {
        println!("[redirect] {}\n", Value::Object(resolution.actions));
        return;
    }
    match resolution.speaker {
        Some(speaker) => println!("{}: {}", speaker, resolution.output),
        None => println!("{}", resolution.output),
    }
    if !resolution.actions.is_empty() {
        println!("  actions: {}", Value::Object(resolution.actions));
    }
    println!();
}
