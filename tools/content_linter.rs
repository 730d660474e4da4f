/// Content Linter: static checks over content RON files.
///
/// Usage: content_linter <content_path> [--strict]
///
/// Reports malformed directive blocks, control-flow structure problems,
/// malformed conditions, unregistered condition functions, unknown action
/// ids, unknown placeholders and dangling `|$template|` references, checked
/// against the built-in registries. With `--strict`, warnings fail the run.
use narrative_directives::core::control_flow::{self, ControlFlowIssue, Token};
use narrative_directives::core::dispatch::is_condition_key;
use narrative_directives::core::expression::{parse_call, split_top_level, Comparison, Subject};
use narrative_directives::core::loose_json;
use narrative_directives::core::registry::Registries;
use narrative_directives::schema::content::{ContentLine, ContentTable};
use serde_json::Value;
use std::path::Path;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn main() {
    // Resolution helpers log their own recoveries; the report covers them.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "narrative_directives=off".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: content_linter <content_path> [--strict]");
        process::exit(0);
    }

    let content_path = Path::new(&args[1]);
    let strict = args[2..].iter().any(|a| a == "--strict");

    let mut content = ContentTable::new();
    if content_path.is_file() {
        match ContentTable::load_from_ron(content_path) {
            Ok(table) => content.merge(table),
            Err(e) => {
                eprintln!("ERROR: Failed to load content file: {}", e);
                process::exit(1);
            }
        }
    } else if content_path.is_dir() {
        load_content_recursive(content_path, &mut content);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", content_path.display());
        process::exit(1);
    }

    println!("Loaded {} content lines", content.len());

    let registries = Registries::with_builtins();
    let mut report = Report::default();

    let mut dungeons: Vec<&str> = content.dungeon_ids().collect();
    dungeons.sort_unstable();
    for dungeon in dungeons {
        let mut lines: Vec<&ContentLine> = content.lines(dungeon).collect();
        lines.sort_by(|a, b| a.id.cmp(&b.id));
        for line in lines {
            lint_line(&content, &registries, dungeon, line, &mut report);
        }
    }

    println!("\n=== Content Lint Report ===\n");

    if report.errors.is_empty() && report.warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }

    for error in &report.errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        report.errors.len(),
        report.warnings.len()
    );

    if report.errors.is_empty() && !(strict && !report.warnings.is_empty()) {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_content_recursive(dir: &Path, content: &mut ContentTable) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            load_content_recursive(&path, content);
        } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            match ContentTable::load_from_ron(&path) {
                Ok(table) => {
                    println!("  Loaded: {}", path.display());
                    content.merge(table);
                }
                Err(e) => {
                    eprintln!("  ERROR loading {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn lint_line(
    content: &ContentTable,
    registries: &Registries,
    dungeon: &str,
    line: &ContentLine,
    report: &mut Report,
) {
    let at = format!("{}.{}", dungeon, line.id);
    let text = line.val.as_str();

    for issue in control_flow::check(text) {
        match issue {
            ControlFlowIssue::UnbalancedBrace(keyword) => report
                .errors
                .push(format!("{}: '{}{{' has no closing brace", at, keyword)),
            ControlFlowIssue::StrayElse => report
                .errors
                .push(format!("{}: else{{}} without a preceding if{{}}", at)),
            ControlFlowIssue::StrayFi => report
                .warnings
                .push(format!("{}: fi{{}} without a preceding if{{}}", at)),
            ControlFlowIssue::UnclosedChain(n) => report
                .warnings
                .push(format!("{}: {} conditional chain(s) not closed with fi{{}}", at, n)),
        }
    }

    for token in control_flow::tokenize(text) {
        match token {
            Token::IfOpen(conditions)
            | Token::IfOrOpen(conditions)
            | Token::ElseOpen(conditions) => {
                lint_conditions(registries, &at, conditions, report);
            }
            Token::Plain(plain) => {
                lint_blocks(registries, &at, plain, report);
                lint_pipes(content, registries, dungeon, &at, plain, report);
            }
            Token::FiClose => {}
        }
    }
}

fn lint_conditions(registries: &Registries, at: &str, conditions: &str, report: &mut Report) {
    for part in split_top_level(conditions, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match Comparison::parse(part) {
            None => report
                .errors
                .push(format!("{}: malformed condition '{}'", at, part)),
            Some(Comparison {
                subject: Subject::Call { name, .. },
                ..
            }) if !registries.conditions.contains(&name) => report
                .errors
                .push(format!("{}: unregistered condition function '{}'", at, name)),
            Some(_) => {}
        }
    }
}

/// Top-level `{...}` directive blocks.
fn lint_blocks(registries: &Registries, at: &str, text: &str, report: &mut Report) {
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('{') {
        let open = cursor + offset;
        let Some(close) = control_flow::matching_brace(text, open) else {
            report
                .errors
                .push(format!("{}: unterminated directive block '{}'", at, &text[open..]));
            return;
        };
        let block = &text[open..=close];
        cursor = close + 1;
        match loose_json::parse_object(block) {
            Err(e) => report
                .errors
                .push(format!("{}: malformed directive {} ({})", at, block, e)),
            Ok(actions) => {
                for (key, value) in &actions {
                    if is_condition_key(key) {
                        if let Value::String(conditions) = value {
                            lint_conditions(registries, at, conditions, report);
                        }
                    } else if key != "redirect" && !registries.actions.contains(key) {
                        report
                            .warnings
                            .push(format!("{}: unknown action '{}'", at, key));
                    }
                }
            }
        }
    }
}

/// `|placeholder|` and `|$template|` references.
fn lint_pipes(
    content: &ContentTable,
    registries: &Registries,
    dungeon: &str,
    at: &str,
    text: &str,
    report: &mut Report,
) {
    let mut rest = text;
    while let Some(open) = rest.find('|') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('|') else {
            return;
        };
        let inner = &after[..close];
        if let Some(reference) = inner.strip_prefix('$') {
            let (target_dungeon, line_id) = reference
                .split_once(".$")
                .unwrap_or((dungeon, reference));
            if content.get(target_dungeon, line_id).is_none() {
                report.errors.push(format!(
                    "{}: template '{}.{}' does not exist",
                    at, target_dungeon, line_id
                ));
            }
        } else if let Some((name, _)) = parse_call(inner) {
            if !registries.placeholders.contains(&name) {
                report
                    .warnings
                    .push(format!("{}: unknown placeholder '{}'", at, name));
            }
        } else {
            rest = after;
            continue;
        }
        rest = &after[close + 1..];
    }
}
