//! Arena CLI
//!
//! Usage:
//!   arena --list                              # Show personas
//!   arena --duel santa egg                    # Local duel in the terminal
//!   arena --ffa santa egg dracula --rounds 5  # Local free-for-all
//!   arena --serve                             # HTTP + WebSocket API
//!   arena --duel santa egg --json             # One JSON round per line

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use arena::core::{
    run_server, ArenaConfig, Generator, HuggingFaceGenerator, MatchController, PersonaRegistry,
    ScriptedGenerator, StartReport,
};
use arena::types::{MatchMode, RoundKind, RoundResult};
use arena::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "arena",
    version = VERSION,
    about = "Persona arena - LLM personas try to talk each other out of their passwords",
    long_about = "Runs matches between personas while a judge persona scores every round.\n\n\
                  Modes:\n  \
                  --duel A B       Two contestants, sequential replies\n  \
                  --ffa A B C...   Three or more, introductions and whispers\n  \
                  --serve          HTTP + WebSocket API\n\n\
                  Set HF_API_KEY (environment or .env) to use the Hugging Face\n\
                  router; without it (or with --offline) a scripted generator\n\
                  plays instead."
)]
struct Args {
    /// Run a duel between two contestants
    #[arg(long, num_args = 2, value_names = ["A", "B"], conflicts_with = "ffa")]
    duel: Option<Vec<String>>,

    /// Run a free-for-all between three or more contestants
    #[arg(long, num_args = 3..)]
    ffa: Option<Vec<String>>,

    /// Stop a local match after this many rounds
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Run as HTTP API server
    #[arg(short, long)]
    serve: bool,

    /// Server address (overrides ARENA_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// List personas and exit
    #[arg(long)]
    list: bool,

    /// Persona file (overrides ARENA_PERSONAS)
    #[arg(long)]
    personas: Option<PathBuf>,

    /// Use the scripted generator even when an API key is set
    #[arg(long)]
    offline: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if args.no_color {
        colored::control::set_override(false);
    }

    // A missing .env is fine; real env vars win over the file
    dotenvy::dotenv().ok();
    let config = match ArenaConfig::from_env() {
        Ok(config) => config,
        Err(e) => fail(&format!("Configuration error: {}", e)),
    };

    let registry = match load_registry(&args, &config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => fail(&e),
    };

    if args.list {
        print_personas(&registry, args.json);
        return;
    }

    let generator = match build_generator(&args, &config, &registry) {
        Ok(generator) => generator,
        Err(e) => fail(&e),
    };
    tracing::info!(generator = generator.name(), personas = registry.len(), "arena ready");

    let controller = MatchController::new(registry.clone(), generator).with_timeout(config.generation_timeout);

    if args.serve {
        let addr = args.addr.clone().unwrap_or(config.addr);
        if let Err(e) = run_server(&addr, controller).await {
            fail(&format!("Server error: {}", e));
        }
    } else if let Some(ids) = &args.duel {
        run_local(controller, MatchMode::Duel, ids, &args).await;
    } else if let Some(ids) = &args.ffa {
        run_local(controller, MatchMode::FreeForAll, ids, &args).await;
    } else {
        print_personas(&registry, false);
        println!();
        println!("Nothing to do. Try --duel santa egg, or --help.");
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn fail(msg: &str) -> ! {
    eprintln!("{} {}", "✗".red().bold(), msg);
    std::process::exit(1);
}

fn load_registry(args: &Args, config: &ArenaConfig) -> Result<PersonaRegistry, String> {
    match args.personas.as_ref().or(config.personas_path.as_ref()) {
        Some(path) => PersonaRegistry::from_json_file(path)
            .map_err(|e| format!("Failed to load personas from {}: {}", path.display(), e)),
        None => Ok(PersonaRegistry::builtin()),
    }
}

fn build_generator(
    args: &Args,
    config: &ArenaConfig,
    registry: &PersonaRegistry,
) -> Result<Arc<dyn Generator>, String> {
    match (&config.api_key, args.offline) {
        (Some(key), false) => {
            let generator = HuggingFaceGenerator::new(config, key).map_err(|e| e.to_string())?;
            Ok(Arc::new(generator))
        }
        _ => {
            if !args.offline {
                tracing::warn!("HF_API_KEY not set, using the scripted generator");
            }
            let contestants: Vec<(&str, &str)> = registry
                .contestants()
                .map(|p| (p.id.as_str(), p.name.as_str()))
                .collect();
            Ok(Arc::new(ScriptedGenerator::demo(&registry.judge().id, &contestants)))
        }
    }
}

/// Play a match in the terminal until it ends or the round limit is hit
async fn run_local(mut controller: MatchController, mode: MatchMode, ids: &[String], args: &Args) {
    controller.setup();

    let report = match controller.start_as(mode, ids).await {
        Ok(report) => report,
        Err(e) => fail(&e.to_string()),
    };

    if args.json {
        println!("{}", serde_json::to_string(&report).unwrap_or_default());
    } else {
        print_header(mode, &report);
        print_start(&controller, &report);
    }

    for _ in 0..args.rounds {
        let result = match controller.advance().await {
            Ok(result) => result,
            Err(e) => fail(&e.to_string()),
        };

        if args.json {
            println!("{}", serde_json::to_string(&result).unwrap_or_default());
        } else {
            print_round(&controller, &result);
        }

        if result.is_terminal() {
            return;
        }
    }

    if !args.json {
        println!();
        println!(
            "{} Stopped after {} rounds (use --rounds to play longer)",
            "ℹ".blue().bold(),
            controller.current_round()
        );
    }
}

fn print_personas(registry: &PersonaRegistry, json: bool) {
    if json {
        let all: Vec<_> = registry.all().collect();
        println!("{}", serde_json::to_string_pretty(&all).unwrap_or_default());
        return;
    }
    for persona in registry.all() {
        println!("  {:<10} {:<12} {}", persona.id.bold(), persona.name, persona.role.to_string().dimmed());
    }
}

fn print_header(mode: MatchMode, report: &StartReport) {
    println!("{}", format!("Arena v{} - {}", VERSION, mode).bold());
    println!("{} {}", "Contestants:".dimmed(), report.participants.join(" vs "));
    println!("{} {}", "Judge:".dimmed(), report.judge);
    println!();
}

fn display_name(controller: &MatchController, id: &str) -> String {
    controller
        .registry()
        .get(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn print_start(controller: &MatchController, report: &StartReport) {
    for (id, text) in &report.openings {
        println!("{} {}", format!("{}:", display_name(controller, id)).cyan().bold(), text.trim());
    }
    if let Some(intro) = &report.introduction {
        print_round(controller, intro);
    }
}

fn print_round(controller: &MatchController, result: &RoundResult) {
    println!();
    let title = match result.kind {
        RoundKind::Introduction => "Introductions".to_string(),
        RoundKind::Contest => format!("Round {}", result.round),
    };
    println!("{}", format!("── {} ──", title).bold());

    for id in &result.participants {
        let name = display_name(controller, id);
        if let Some(text) = result.statements.get(id) {
            println!("{} {}", format!("{}:", name).cyan().bold(), text.trim());
        }
        if let Some(whisper) = result.whispers.get(id) {
            println!("  {} {}", "whisper".dimmed(), whisper.text.trim().dimmed());
        }
    }

    println!("{} {}", "Judge:".magenta().bold(), result.judge_feedback.trim());

    if result.kind == RoundKind::Contest {
        let scores: Vec<String> = result
            .participants
            .iter()
            .map(|id| {
                format!(
                    "{} {:.1} (+{:.1})",
                    display_name(controller, id),
                    result.total_of(id).unwrap_or(0.0),
                    result.score_of(id).unwrap_or(0.0)
                )
            })
            .collect();
        println!("{} {}", "Scores:".dimmed(), scores.join("  "));
    }

    if result.scoring_degraded {
        println!(
            "{} Neutral score used for: {}",
            "⚠".yellow().bold(),
            result.degraded_participants.join(", ")
        );
    }

    if let Some(outcome) = &result.outcome {
        println!();
        match &outcome.winner {
            Some(winner) => println!(
                "{} {} wins after {} rounds",
                "✓".green().bold(),
                display_name(controller, winner).green().bold(),
                outcome.round
            ),
            None => println!("{} Draw after {} rounds", "✓".green().bold(), outcome.round),
        }
    }
}
