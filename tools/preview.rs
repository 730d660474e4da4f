/// Preview: interactive shell for resolving content lines against a live
/// flag table.
///
/// Usage: preview [--content <path>] [--pools <path>] [--dungeon <id>] [--seed <n>]
///
/// Commands:
///   line <id> [dungeon]   resolve a stored content line
///   say <text>            resolve raw directive text
///   dry <text>            resolve without dispatching actions
///   if <conditions>       evaluate a comma-separated AND list
///   flag <key> <value>    set a flag
///   flags                 list all flags
///   dungeon <id>          switch the current dungeon
///   draw <pool> [n]       draw n unique templates from a pool
///   seed <n>              reseed the RNG
///   help                  list commands
///   quit                  exit
use narrative_directives::core::engine::DirectiveEngine;
use narrative_directives::core::expression::ClauseMode;
use narrative_directives::schema::content::ContentTable;
use narrative_directives::schema::pool::{DrawMode, PoolDrawSettings};
use narrative_directives::schema::state::{GameState, WorldState};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "narrative_directives=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let mut content_path = None;
    let mut pools_path = None;
    let mut dungeon = None;
    let mut seed: u64 = 42;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--content" if i + 1 < args.len() => {
                i += 1;
                content_path = Some(args[i].clone());
            }
            "--pools" if i + 1 < args.len() => {
                i += 1;
                pools_path = Some(args[i].clone());
            }
            "--dungeon" if i + 1 < args.len() => {
                i += 1;
                dungeon = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut state = WorldState::new();
    if let Some(ref path) = content_path {
        load_content(Path::new(path), &mut state);
    }
    state.current_dungeon = dungeon.or_else(|| {
        let mut ids: Vec<&str> = state.content().dungeon_ids().collect();
        ids.sort_unstable();
        ids.first().map(|s| s.to_string())
    });

    let mut builder = DirectiveEngine::builder().seed(seed);
    if let Some(ref path) = pools_path {
        let path = Path::new(path);
        builder = if path.is_dir() {
            builder.pools_dir(path)
        } else {
            builder.pools_file(path)
        };
    }
    let mut engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    println!("Loaded {} content lines", state.content().len());
    println!("Loaded {} pools", engine.pools().entries.len());
    println!("Dungeon: {}", state.current_dungeon.as_deref().unwrap_or("(none)"));
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "line" => {
                let mut parts = rest.split_whitespace();
                let Some(id) = parts.next() else {
                    println!("Usage: line <id> [dungeon]");
                    continue;
                };
                match engine.resolve_line(&mut state, id, parts.next()) {
                    Ok(Some(resolution)) => print_resolution(&resolution),
                    Ok(None) => println!("No such line: {}", id),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "say" | "dry" => {
                if rest.is_empty() {
                    println!("Usage: {} <text>", cmd);
                    continue;
                }
                match engine.resolve_string(&mut state, rest, cmd == "dry") {
                    Ok(resolution) => print_resolution(&resolution),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "if" => match engine.evaluate(&state, rest, ClauseMode::All) {
                Ok(result) => println!("{}", result),
                Err(e) => println!("ERROR: {}", e),
            },
            "flag" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next().and_then(|v| v.parse::<f64>().ok())) {
                    (Some(key), Some(value)) => {
                        state.set_flag(key, value);
                        println!("{} = {}", key, value);
                    }
                    _ => println!("Usage: flag <key> <number>"),
                }
            }
            "flags" => {
                let flags = state.flags();
                if flags.is_empty() {
                    println!("No flags set.");
                }
                for (key, value) in flags {
                    println!("  {} = {}", key, value);
                }
            }
            "dungeon" => {
                if rest.is_empty() {
                    println!("Dungeon: {}", state.current_dungeon.as_deref().unwrap_or("(none)"));
                } else {
                    state.current_dungeon = Some(rest.to_string());
                    println!("Dungeon set to {}", rest);
                }
            }
            "draw" => {
                let mut parts = rest.split_whitespace();
                let Some(pool) = parts.next() else {
                    println!("Usage: draw <pool> [n]");
                    continue;
                };
                let draws = parts.next().and_then(|n| n.parse().ok()).unwrap_or(1);
                let settings = PoolDrawSettings::new(DrawMode::Weight, draws).unique();
                let keys = engine.draw_from_pool(&state, pool, &settings);
                if keys.is_empty() {
                    println!("(nothing drawn)");
                }
                for key in keys {
                    println!("  {}", key);
                }
            }
            "seed" => match rest.parse::<u64>() {
                Ok(seed) => {
                    engine.reseed(seed);
                    println!("Seed set to {}", seed);
                }
                Err(_) => println!("Usage: seed <n>"),
            },
            _ => {
                println!("Unknown command: '{}'. Type 'help' for available commands.", cmd);
            }
        }
    }
}

fn load_content(path: &Path, state: &mut WorldState) {
    if path.is_dir() {
        match state.load_content_dir(path) {
            Ok(n) => println!("Loaded {} content files from {}", n, path.display()),
            Err(e) => {
                eprintln!("ERROR loading {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match ContentTable::load_from_ron(path) {
            Ok(table) => state.content_mut().merge(table),
            Err(e) => {
                eprintln!("ERROR loading {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }
}

fn print_resolution(resolution: &narrative_directives::core::directive::Resolution) {
    if resolution.redirected {
        println!("[redirect] {}", serde_json::Value::Object(resolution.actions.clone()));
        return;
    }
    match &resolution.speaker {
        Some(speaker) => println!("{}: {}", speaker, resolution.output),
        None => println!("{}", resolution.output),
    }
    if !resolution.actions.is_empty() {
        println!("  actions: {}", serde_json::Value::Object(resolution.actions.clone()));
    }
}

fn print_usage() {
    println!("Preview: interactive shell for resolving content lines.");
    println!();
    println!("Usage: preview [--content <path>] [--pools <path>] [--dungeon <id>] [--seed <n>]");
    println!();
    println!("  --content <path>  Content RON file or directory");
    println!("  --pools <path>    Pool RON file or directory");
    println!("  --dungeon <id>    Starting dungeon (default: first loaded)");
    println!("  --seed <n>        Initial RNG seed (default: 42)");
}

fn print_help() {
    println!("Commands:");
    println!("  line <id> [dungeon]  Resolve a stored content line");
    println!("  say <text>           Resolve raw directive text");
    println!("  dry <text>           Resolve without dispatching actions");
    println!("  if <conditions>      Evaluate a comma-separated AND list");
    println!("  flag <key> <value>   Set a flag");
    println!("  flags                List all flags");
    println!("  dungeon <id>         Switch the current dungeon");
    println!("  draw <pool> [n]      Draw n unique templates from a pool");
    println!("  seed <n>             Reseed the RNG");
    println!("  help                 Show this help");
    println!("  quit                 Exit");
}
